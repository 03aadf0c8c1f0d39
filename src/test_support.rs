use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};

use crate::loader::{
    DecodedFrame, FrameId, FrameLoader, ImageStack, Photometric, PixelSpacing, StackMetadata,
};

/// In-memory loader producing gradient frames: sample = 10 * (x + y) + frame number.
pub struct SyntheticLoader {
    pub width: usize,
    pub height: usize,
    pub frames: usize,
    pub modality: Option<String>,
    pub photometric: Photometric,
    failing: Vec<usize>,
    delay: Duration,
    decodes: Arc<AtomicUsize>,
}

impl SyntheticLoader {
    pub fn new(width: usize, height: usize, frames: usize) -> Self {
        Self {
            width,
            height,
            frames,
            modality: Some("CT".to_string()),
            photometric: Photometric::Monochrome2,
            failing: Vec::new(),
            delay: Duration::ZERO,
            decodes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing_on(mut self, frame_number: usize) -> Self {
        self.failing.push(frame_number);
        self
    }

    pub fn with_photometric(mut self, photometric: Photometric) -> Self {
        self.photometric = photometric;
        self
    }

    /// Every decode sleeps this long before producing samples.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Shared count of `decode_frame` calls, readable after the loader moved into a dispatcher.
    pub fn decode_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.decodes)
    }

    pub fn stack(&self) -> ImageStack {
        let frames = (0..self.frames)
            .map(|index| FrameId::new("synthetic", index))
            .collect();
        ImageStack::new(
            frames,
            StackMetadata {
                modality: self.modality.clone(),
                pixel_spacing: PixelSpacing::new(0.5, 0.5),
                label: "synthetic".to_string(),
                ..StackMetadata::default()
            },
        )
    }
}

impl FrameLoader for SyntheticLoader {
    fn load_stack(&self, _sources: &[PathBuf]) -> Result<ImageStack> {
        Ok(self.stack())
    }

    fn decode_frame(&self, frame: &FrameId) -> Result<DecodedFrame> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.failing.contains(&frame.frame_number) {
            bail!("Could not decode frame {}", frame.frame_number);
        }
        if frame.frame_number >= self.frames {
            bail!("No frame {} in synthetic stack", frame.frame_number);
        }
        let mut samples = Vec::with_capacity(self.width * self.height);
        for y in 0..self.height {
            for x in 0..self.width {
                samples.push(10 * (x + y) as i32 + frame.frame_number as i32);
            }
        }
        DecodedFrame::mono(
            self.width,
            self.height,
            samples,
            None,
            self.photometric,
            PixelSpacing::new(0.5, 0.5),
        )
    }
}
