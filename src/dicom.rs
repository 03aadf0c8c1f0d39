//! DICOM implementation of [`FrameLoader`] on top of `dicom-object` and
//! `dicom-pixeldata`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use dicom_object::{open_file, DefaultDicomObject, OpenFileOptions, Tag};
use dicom_pixeldata::PixelDecoder;

use crate::hanging::view_code;
use crate::loader::{
    display_name, DecodedFrame, FrameId, FrameLoader, ImageStack, Photometric, PixelSpacing,
    StackMetadata,
};

const PIXEL_DATA: Tag = Tag(0x7FE0, 0x0010);

/// Reads stacks from DICOM files and directories. Stateless: every decode opens the
/// file again, so one loader can serve all decode threads.
#[derive(Debug, Clone, Copy, Default)]
pub struct DicomLoader;

/// Header fields needed to group files into stacks.
#[derive(Debug, Clone)]
struct FileHeader {
    path: PathBuf,
    series_uid: Option<String>,
    frames: usize,
    metadata: StackMetadata,
}

impl FrameLoader for DicomLoader {
    /// All sources become one stack ordered by InstanceNumber.
    fn load_stack(&self, sources: &[PathBuf]) -> Result<ImageStack> {
        let mut headers = Vec::new();
        for (path, explicit) in expand_sources(sources)? {
            match read_header(&path) {
                Ok(header) => headers.push(header),
                Err(err) if explicit => return Err(err),
                Err(err) => log::debug!("Skipping {}: {err:#}", path.display()),
            }
        }
        stack_from_headers(headers)
    }

    /// Single-frame files sharing a SeriesInstanceUID form one stack; every other
    /// file is its own stack.
    fn load_stacks(&self, sources: &[PathBuf]) -> Vec<Result<ImageStack>> {
        let mut results = Vec::new();
        let mut groups: Vec<Vec<FileHeader>> = Vec::new();
        let mut series_groups: HashMap<String, usize> = HashMap::new();

        for source in sources {
            let expanded = match expand_sources(std::slice::from_ref(source)) {
                Ok(expanded) => expanded,
                Err(err) => {
                    results.push(Err(err));
                    continue;
                }
            };
            let mut found = false;
            for (path, explicit) in expanded {
                let header = match read_header(&path) {
                    Ok(header) => header,
                    Err(err) if explicit => {
                        results.push(Err(err));
                        continue;
                    }
                    Err(err) => {
                        log::debug!("Skipping {}: {err:#}", path.display());
                        continue;
                    }
                };
                found = true;
                match header.series_uid.clone().filter(|_| header.frames == 1) {
                    Some(uid) => match series_groups.get(&uid) {
                        Some(index) => groups[*index].push(header),
                        None => {
                            series_groups.insert(uid, groups.len());
                            groups.push(vec![header]);
                        }
                    },
                    None => groups.push(vec![header]),
                }
            }
            if !found && source.is_dir() {
                results.push(Err(anyhow::anyhow!(
                    "No DICOM images in {}",
                    source.display()
                )));
            }
        }

        results.extend(groups.into_iter().map(stack_from_headers));
        results
    }

    fn decode_frame(&self, frame: &FrameId) -> Result<DecodedFrame> {
        let path = &frame.source;
        let obj = open_file(path).with_context(|| format!("Could not open {}", path.display()))?;

        let width: usize = obj
            .element_by_name("Columns")
            .context("Missing Columns tag")?
            .to_int()
            .context("Invalid Columns value")?;
        let height: usize = obj
            .element_by_name("Rows")
            .context("Missing Rows tag")?
            .to_int()
            .context("Invalid Rows value")?;
        let photometric = Photometric::from_dicom(
            read_string(&obj, "PhotometricInterpretation")
                .as_deref()
                .unwrap_or("MONOCHROME2"),
        );
        let pixel_spacing = read_pixel_spacing(&obj);

        let frame_number = u32::try_from(frame.frame_number).context("Frame number too large")?;
        let decoded = obj.decode_pixel_data_frame(frame_number).with_context(|| {
            format!(
                "Failed to decode frame {} of {}",
                frame.frame_number,
                display_name(path)
            )
        })?;
        let decoded_width = decoded.columns() as usize;
        let decoded_height = decoded.rows() as usize;
        if decoded_width != width || decoded_height != height {
            bail!(
                "Decoded frame dimensions mismatch: decoded={}x{}, tags={}x{}",
                decoded_width,
                decoded_height,
                width,
                height
            );
        }

        let bits_allocated = decoded.bits_allocated();
        match decoded.samples_per_pixel() {
            1 => {
                if bits_allocated != 8 && bits_allocated != 16 {
                    bail!("BitsAllocated={bits_allocated} is not supported (only 8/16)");
                }
                let samples: Vec<i32> = decoded
                    .to_vec_frame(0)
                    .context("Could not convert decoded frame to i32 samples")?;
                let window = read_float_first(&obj, "WindowWidth")
                    .zip(read_float_first(&obj, "WindowCenter"));
                DecodedFrame::mono(width, height, samples, window, photometric, pixel_spacing)
            }
            spp if spp >= 3 => {
                if bits_allocated != 8 && bits_allocated != 16 {
                    bail!(
                        "BitsAllocated={bits_allocated} is not supported for color images (only 8/16)"
                    );
                }
                let interleaved: Vec<u8> = if bits_allocated == 8 {
                    decoded
                        .to_vec_frame(0)
                        .context("Could not convert decoded frame to u8 samples")?
                } else {
                    let shift = decoded.bits_stored().saturating_sub(8);
                    let wide: Vec<u16> = decoded
                        .to_vec_frame(0)
                        .context("Could not convert decoded frame to u16 samples")?;
                    wide.into_iter()
                        .map(|sample| (sample >> shift) as u8)
                        .collect()
                };
                let rgb = interleaved
                    .chunks_exact(spp as usize)
                    .flat_map(|pixel| [pixel[0], pixel[1], pixel[2]])
                    .collect();
                DecodedFrame::rgb(width, height, rgb, pixel_spacing)
            }
            other => bail!(
                "Unsupported SamplesPerPixel={other} (supports 1 for monochrome and >=3 for color)"
            ),
        }
    }
}

/// Files named by `sources`; directories contribute their files (sorted, not
/// recursive). The flag marks files the user named directly.
fn expand_sources(sources: &[PathBuf]) -> Result<Vec<(PathBuf, bool)>> {
    let mut files = Vec::new();
    for source in sources {
        if source.is_dir() {
            let mut entries: Vec<PathBuf> = fs::read_dir(source)
                .with_context(|| format!("Could not read directory {}", source.display()))?
                .filter_map(|entry| entry.ok().map(|entry| entry.path()))
                .filter(|path| path.is_file())
                .collect();
            entries.sort();
            files.extend(entries.into_iter().map(|path| (path, false)));
        } else {
            files.push((source.clone(), true));
        }
    }
    Ok(files)
}

fn stack_from_headers(mut headers: Vec<FileHeader>) -> Result<ImageStack> {
    if headers.is_empty() {
        bail!("No DICOM images in selection");
    }
    headers.sort_by_key(|header| {
        (
            header.metadata.instance_number.unwrap_or(i32::MAX),
            display_name(&header.path),
        )
    });

    let frames: Vec<FrameId> = headers
        .iter()
        .flat_map(|header| {
            (0..header.frames).map(move |frame_number| FrameId::new(&header.path, frame_number))
        })
        .collect();
    let mut metadata = headers[0].metadata.clone();
    if headers.len() > 1 {
        let base = metadata
            .series_description
            .clone()
            .unwrap_or_else(|| display_name(&headers[0].path));
        metadata.label = format!("{base} ({} images)", headers.len());
    }
    log::info!("Loaded stack {} with {} frame(s)", metadata.label, frames.len());
    Ok(ImageStack::new(frames, metadata))
}

fn read_header(path: &Path) -> Result<FileHeader> {
    let obj = OpenFileOptions::new()
        .read_until(PIXEL_DATA)
        .open_file(path)
        .with_context(|| format!("Could not open {}", path.display()))?;

    let frames = match read_int_first(&obj, "NumberOfFrames") {
        Some(value) if value > 0 => value as usize,
        Some(value) => bail!("Invalid NumberOfFrames={value} (must be >= 1)"),
        None => 1,
    };
    let mut metadata = StackMetadata {
        modality: read_string(&obj, "Modality"),
        study_description: read_string(&obj, "StudyDescription"),
        series_description: read_string(&obj, "SeriesDescription"),
        pixel_spacing: read_pixel_spacing(&obj),
        view_position: read_view_position(&obj),
        laterality: read_laterality(&obj),
        instance_number: read_int_first(&obj, "InstanceNumber"),
        label: display_name(path),
    };
    if let Some(code) = view_code(&metadata) {
        metadata.label = format!("{code} {}", metadata.label);
    }
    Ok(FileHeader {
        path: path.to_path_buf(),
        series_uid: read_string(&obj, "SeriesInstanceUID"),
        frames,
        metadata,
    })
}

fn read_string(obj: &DefaultDicomObject, name: &str) -> Option<String> {
    obj.element_by_name(name)
        .ok()
        .and_then(|el| el.to_str().ok())
        .map(|v| v.trim().trim_end_matches('\0').to_string())
        .filter(|v| !v.is_empty())
}

fn read_nested_string(
    obj: &DefaultDicomObject,
    seq_tag: Tag,
    item_index: u32,
    element_tag: Tag,
) -> Option<String> {
    obj.value_at((seq_tag, item_index, element_tag))
        .ok()
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_nested_string2(
    obj: &DefaultDicomObject,
    outer: (Tag, u32),
    inner: (Tag, u32),
    element_tag: Tag,
) -> Option<String> {
    obj.value_at((outer.0, outer.1, inner.0, inner.1, element_tag))
        .ok()
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn alphanumeric_token(raw: &str) -> String {
    raw.trim()
        .to_ascii_uppercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

fn normalize_view_position(raw: &str) -> Option<String> {
    let token = alphanumeric_token(raw);
    if token.is_empty() {
        return None;
    }
    if token.contains("R10242") || token.contains("CRANIOCAUDAL") || token.contains("CC") {
        return Some("CC".to_string());
    }
    if token.contains("R10226") || token.contains("MEDIOLATERALOBLIQUE") || token.contains("MLO") {
        return Some("MLO".to_string());
    }
    Some(raw.trim().to_string())
}

fn read_view_position(obj: &DefaultDicomObject) -> Option<String> {
    const VIEW_CODE_SEQUENCE: Tag = Tag(0x0054, 0x0220);
    const CODE_MEANING: Tag = Tag(0x0008, 0x0104);
    const CODE_VALUE: Tag = Tag(0x0008, 0x0100);

    read_string(obj, "ViewPosition")
        .or_else(|| read_nested_string(obj, VIEW_CODE_SEQUENCE, 0, CODE_MEANING))
        .or_else(|| read_nested_string(obj, VIEW_CODE_SEQUENCE, 0, CODE_VALUE))
        .and_then(|raw| normalize_view_position(&raw))
}

fn normalize_laterality(raw: &str) -> Option<String> {
    let token = alphanumeric_token(raw);
    if token.is_empty() {
        return None;
    }
    if token.starts_with('R') || token.contains("RIGHT") {
        return Some("R".to_string());
    }
    if token.starts_with('L') || token.contains("LEFT") {
        return Some("L".to_string());
    }
    Some(raw.trim().to_string())
}

fn read_laterality(obj: &DefaultDicomObject) -> Option<String> {
    const FRAME_ANATOMY_SEQUENCE: Tag = Tag(0x0020, 0x9071);
    const FRAME_LATERALITY: Tag = Tag(0x0020, 0x9072);
    const SHARED_FUNCTIONAL_GROUPS_SEQUENCE: Tag = Tag(0x5200, 0x9229);

    read_string(obj, "ImageLaterality")
        .or_else(|| read_string(obj, "Laterality"))
        .or_else(|| read_nested_string(obj, FRAME_ANATOMY_SEQUENCE, 0, FRAME_LATERALITY))
        .or_else(|| {
            read_nested_string2(
                obj,
                (SHARED_FUNCTIONAL_GROUPS_SEQUENCE, 0),
                (FRAME_ANATOMY_SEQUENCE, 0),
                FRAME_LATERALITY,
            )
        })
        .and_then(|raw| normalize_laterality(&raw))
}

fn read_pixel_spacing(obj: &DefaultDicomObject) -> Option<PixelSpacing> {
    read_string(obj, "PixelSpacing")
        .or_else(|| read_string(obj, "ImagerPixelSpacing"))
        .and_then(|raw| parse_pixel_spacing(&raw))
}

/// `row\column` spacing in millimetres.
fn parse_pixel_spacing(raw: &str) -> Option<PixelSpacing> {
    let mut values = raw.split('\\').map(|value| value.trim().parse::<f32>().ok());
    let row = values.next()??;
    let column = values.next().flatten().unwrap_or(row);
    PixelSpacing::new(row, column)
}

fn read_float_first(obj: &DefaultDicomObject, name: &str) -> Option<f32> {
    obj.element_by_name(name)
        .ok()
        .and_then(|el| el.to_str().ok())
        .and_then(|s| parse_multi_valued_number(&s))
}

fn read_int_first(obj: &DefaultDicomObject, name: &str) -> Option<i32> {
    obj.element_by_name(name)
        .ok()
        .and_then(|el| el.to_str().ok())
        .and_then(|value| {
            value
                .split('\\')
                .next()
                .and_then(|v| v.trim().parse::<i32>().ok())
        })
}

fn parse_multi_valued_number(value: &str) -> Option<f32> {
    value.split('\\').next()?.trim().parse::<f32>().ok()
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or_default();
        let dir = std::env::temp_dir().join(format!(
            "lumen-view-{name}-{}-{nanos}",
            std::process::id()
        ));
        fs::create_dir_all(&dir).expect("temp dir");
        dir
    }

    #[test]
    fn view_position_codes_normalise() {
        assert_eq!(normalize_view_position("cranio-caudal").as_deref(), Some("CC"));
        assert_eq!(normalize_view_position("R-10226").as_deref(), Some("MLO"));
        assert_eq!(normalize_view_position("LAT").as_deref(), Some("LAT"));
        assert_eq!(normalize_view_position("  "), None);
    }

    #[test]
    fn laterality_normalises_words_and_letters() {
        assert_eq!(normalize_laterality("right").as_deref(), Some("R"));
        assert_eq!(normalize_laterality("L").as_deref(), Some("L"));
        assert_eq!(normalize_laterality("B").as_deref(), Some("B"));
    }

    #[test]
    fn pixel_spacing_reads_row_then_column() {
        assert_eq!(
            parse_pixel_spacing("0.5\\0.25"),
            PixelSpacing::new(0.5, 0.25)
        );
        assert_eq!(parse_pixel_spacing("0.7"), PixelSpacing::new(0.7, 0.7));
        assert_eq!(parse_pixel_spacing("abc"), None);
        assert_eq!(parse_pixel_spacing("0\\1"), None);
        assert_eq!(parse_multi_valued_number("40\\80"), Some(40.0));
    }

    #[test]
    fn non_dicom_file_reports_its_path() {
        let dir = temp_dir("bad-file");
        let path = dir.join("notes.txt");
        fs::write(&path, b"not a dicom file").expect("write");

        let err = DicomLoader
            .load_stack(std::slice::from_ref(&path))
            .expect_err("plain text is rejected");
        assert!(format!("{err:#}").contains("notes.txt"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn directory_without_images_is_one_error() {
        let dir = temp_dir("empty-series");
        fs::write(dir.join("README"), b"nothing here").expect("write");

        let results = DicomLoader.load_stacks(std::slice::from_ref(&dir));
        assert_eq!(results.len(), 1);
        let message = format!("{:#}", results[0].as_ref().expect_err("no images"));
        assert!(message.contains("No DICOM images"), "{message}");
        let _ = fs::remove_dir_all(&dir);
    }
}
