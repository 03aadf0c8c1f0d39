//! Boundary to the image-decoding collaborator.
//!
//! The core only sees [`ImageStack`]s of opaque [`FrameId`]s and [`DecodedFrame`]s;
//! how they are produced lives behind [`FrameLoader`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::{bail, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrameId {
    pub source: PathBuf,
    pub frame_number: usize,
}

impl FrameId {
    pub fn new(source: impl Into<PathBuf>, frame_number: usize) -> Self {
        Self {
            source: source.into(),
            frame_number,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelSpacing {
    pub row_mm: f32,
    pub column_mm: f32,
}

impl PixelSpacing {
    pub fn new(row_mm: f32, column_mm: f32) -> Option<Self> {
        (row_mm.is_finite() && column_mm.is_finite() && row_mm > 0.0 && column_mm > 0.0)
            .then_some(Self { row_mm, column_mm })
    }

    pub fn pixel_area_mm2(&self) -> f32 {
        self.row_mm * self.column_mm
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StackMetadata {
    pub modality: Option<String>,
    pub study_description: Option<String>,
    pub series_description: Option<String>,
    pub pixel_spacing: Option<PixelSpacing>,
    pub view_position: Option<String>,
    pub laterality: Option<String>,
    pub instance_number: Option<i32>,
    pub label: String,
}

/// Ordered frames of one study series. Immutable once loaded; sessions hold it
/// behind an `Arc`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageStack {
    frames: Vec<FrameId>,
    pub metadata: StackMetadata,
}

impl ImageStack {
    pub fn new(frames: Vec<FrameId>, metadata: StackMetadata) -> Self {
        Self { frames, metadata }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frame(&self, index: usize) -> Option<&FrameId> {
        self.frames.get(index)
    }

    pub fn frames(&self) -> &[FrameId] {
        &self.frames
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Photometric {
    Monochrome1,
    Monochrome2,
    Rgb,
}

impl Photometric {
    pub fn from_dicom(value: &str) -> Self {
        let value = value.trim();
        if value.eq_ignore_ascii_case("MONOCHROME1") {
            Self::Monochrome1
        } else if value.to_ascii_uppercase().starts_with("MONOCHROME") {
            Self::Monochrome2
        } else {
            Self::Rgb
        }
    }
}

#[derive(Debug, Clone)]
pub enum FramePixels {
    /// One raw sample per pixel, row-major.
    Mono(Arc<[i32]>),
    /// Packed 8-bit RGB triples, row-major.
    Rgb(Arc<[u8]>),
}

#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub width: usize,
    pub height: usize,
    pub pixels: FramePixels,
    pub window_width: f32,
    pub window_center: f32,
    pub photometric: Photometric,
    pub pixel_spacing: Option<PixelSpacing>,
    pub min_value: i32,
    pub max_value: i32,
}

impl DecodedFrame {
    /// Builds a monochrome frame; a missing window falls back to the sample range.
    pub fn mono(
        width: usize,
        height: usize,
        samples: Vec<i32>,
        window: Option<(f32, f32)>,
        photometric: Photometric,
        pixel_spacing: Option<PixelSpacing>,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!("Frame has zero size ({width}x{height})");
        }
        if samples.len() != width * height {
            bail!(
                "Decoded pixel count mismatch: got {}, expected {}",
                samples.len(),
                width * height
            );
        }
        let (min_value, max_value) = min_max(&samples).unwrap_or((0, 0));
        let (window_width, window_center) = window
            .filter(|(width, center)| width.is_finite() && center.is_finite() && *width > 0.0)
            .unwrap_or_else(|| {
                (
                    (max_value as i64 - min_value as i64).max(1) as f32,
                    (min_value as f32 + max_value as f32) / 2.0,
                )
            });
        Ok(Self {
            width,
            height,
            pixels: FramePixels::Mono(Arc::from(samples.into_boxed_slice())),
            window_width,
            window_center,
            photometric,
            pixel_spacing,
            min_value,
            max_value,
        })
    }

    pub fn rgb(
        width: usize,
        height: usize,
        samples: Vec<u8>,
        pixel_spacing: Option<PixelSpacing>,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!("Frame has zero size ({width}x{height})");
        }
        if samples.len() != width * height * 3 {
            bail!(
                "Decoded color pixel count mismatch: got {}, expected {}",
                samples.len(),
                width * height * 3
            );
        }
        Ok(Self {
            width,
            height,
            pixels: FramePixels::Rgb(Arc::from(samples.into_boxed_slice())),
            window_width: 255.0,
            window_center: 127.5,
            photometric: Photometric::Rgb,
            pixel_spacing,
            min_value: 0,
            max_value: 255,
        })
    }

    /// MONOCHROME1 stores bright as low values, so it is shown inverted by default.
    pub fn default_invert(&self) -> bool {
        self.photometric == Photometric::Monochrome1
    }

    /// Raw sample at integer pixel coordinates; RGB frames report luma.
    pub fn sample(&self, x: usize, y: usize) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let index = y * self.width + x;
        match &self.pixels {
            FramePixels::Mono(samples) => samples.get(index).map(|value| *value as f32),
            FramePixels::Rgb(samples) => {
                let rgb = samples.get(index * 3..index * 3 + 3)?;
                Some(0.299 * rgb[0] as f32 + 0.587 * rgb[1] as f32 + 0.114 * rgb[2] as f32)
            }
        }
    }
}

fn min_max(values: &[i32]) -> Option<(i32, i32)> {
    let mut iter = values.iter().copied();
    let first = iter.next()?;
    Some(iter.fold((first, first), |(min, max), value| {
        (min.min(value), max.max(value))
    }))
}

/// External image-loading collaborator.
pub trait FrameLoader: Send + Sync {
    fn load_stack(&self, sources: &[PathBuf]) -> Result<ImageStack>;

    fn decode_frame(&self, frame: &FrameId) -> Result<DecodedFrame>;

    /// Splits an opened selection into stacks. The default treats every source as its
    /// own stack.
    fn load_stacks(&self, sources: &[PathBuf]) -> Vec<Result<ImageStack>> {
        sources
            .iter()
            .map(|source| self.load_stack(std::slice::from_ref(source)))
            .collect()
    }
}

/// Latest generation a session still wants decoded; 0 once it wants nothing.
/// Shared between a session and the requests it issued.
#[derive(Debug, Clone, Default)]
pub struct DecodeToken(Arc<AtomicU64>);

impl DecodeToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, generation: u64) {
        self.0.store(generation, Ordering::Release);
    }

    pub fn is_current(&self, generation: u64) -> bool {
        generation != 0 && self.0.load(Ordering::Acquire) == generation
    }
}

impl PartialEq for DecodeToken {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodeRequest {
    pub session_id: u64,
    pub generation: u64,
    pub frame_index: usize,
    pub frame: FrameId,
    pub token: DecodeToken,
}

impl DecodeRequest {
    /// False once the issuing session moved on or was disposed.
    pub fn is_current(&self) -> bool {
        self.token.is_current(self.generation)
    }
}

#[derive(Debug, Clone)]
pub struct DecodeOutcome {
    pub session_id: u64,
    pub generation: u64,
    pub frame_index: usize,
    pub result: Result<Arc<DecodedFrame>, String>,
}

pub fn decode_request(loader: &dyn FrameLoader, request: DecodeRequest) -> DecodeOutcome {
    let result = loader
        .decode_frame(&request.frame)
        .map(Arc::new)
        .map_err(|err| format!("{err:#}"));
    DecodeOutcome {
        session_id: request.session_id,
        generation: request.generation,
        frame_index: request.frame_index,
        result,
    }
}

pub const MAX_DECODE_WORKERS: usize = 4;

/// Runs decode requests on a small pool of background threads and hands the
/// outcomes back on the UI thread through [`DecodeDispatcher::poll`]. Requests
/// that are no longer current when a worker picks them up are skipped.
pub struct DecodeDispatcher {
    loader: Arc<dyn FrameLoader>,
    requests: Sender<DecodeRequest>,
    receiver: Receiver<Option<DecodeOutcome>>,
    workers: usize,
    in_flight: usize,
}

impl DecodeDispatcher {
    pub fn new(loader: Arc<dyn FrameLoader>) -> Self {
        let workers = thread::available_parallelism()
            .map(|count| count.get().clamp(1, MAX_DECODE_WORKERS))
            .unwrap_or(2);
        Self::with_workers(loader, workers)
    }

    pub fn with_workers(loader: Arc<dyn FrameLoader>, workers: usize) -> Self {
        let workers = workers.max(1);
        let (requests, request_rx) = mpsc::channel::<DecodeRequest>();
        let (tx, receiver) = mpsc::channel();
        let request_rx = Arc::new(Mutex::new(request_rx));
        for worker in 0..workers {
            let loader = Arc::clone(&loader);
            let request_rx = Arc::clone(&request_rx);
            let tx = tx.clone();
            thread::spawn(move || decode_worker(worker, loader.as_ref(), &request_rx, &tx));
        }
        Self {
            loader,
            requests,
            receiver,
            workers,
            in_flight: 0,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn dispatch(&mut self, request: DecodeRequest) {
        match self.requests.send(request) {
            Ok(()) => self.in_flight += 1,
            Err(err) => log::error!(
                "Decode workers are gone; frame {} not requested",
                err.0.frame_index
            ),
        }
    }

    pub fn poll(&mut self) -> Vec<DecodeOutcome> {
        let mut outcomes = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(outcome) => {
                    self.in_flight = self.in_flight.saturating_sub(1);
                    outcomes.extend(outcome);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        outcomes
    }

    pub fn load_stacks(&self, sources: &[PathBuf]) -> Vec<Result<ImageStack>> {
        self.loader.load_stacks(sources)
    }
}

fn decode_worker(
    worker: usize,
    loader: &dyn FrameLoader,
    requests: &Mutex<Receiver<DecodeRequest>>,
    outcomes: &Sender<Option<DecodeOutcome>>,
) {
    loop {
        let next = match requests.lock() {
            Ok(guard) => guard.recv(),
            Err(poisoned) => poisoned.into_inner().recv(),
        };
        let Ok(request) = next else {
            log::debug!("Decode worker {worker} stopping");
            return;
        };
        let outcome = if request.is_current() {
            Some(decode_request(loader, request))
        } else {
            log::debug!(
                "Session {}: skipped stale decode of frame {} (generation {})",
                request.session_id,
                request.frame_index,
                request.generation
            );
            None
        };
        if outcomes.send(outcome).is_err() {
            log::debug!("Decode worker {worker}: dispatcher dropped, outcome discarded");
            return;
        }
    }
}

pub fn display_name(path: &Path) -> String {
    path.file_name()
        .and_then(|value| value.to_str())
        .unwrap_or("image")
        .to_string()
}
