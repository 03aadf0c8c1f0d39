use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use eframe::egui::ColorImage;
use image::{ImageFormat, RgbaImage};

pub fn encode_png(canvas: &ColorImage) -> Result<Vec<u8>> {
    let [width, height] = canvas.size;
    let bytes: Vec<u8> = canvas
        .pixels
        .iter()
        .flat_map(|color| color.to_array())
        .collect();
    let image = RgbaImage::from_raw(width as u32, height as u32, bytes)
        .context("Canvas buffer does not match its size")?;
    let mut encoded = Cursor::new(Vec::new());
    image
        .write_to(&mut encoded, ImageFormat::Png)
        .context("Could not encode snapshot as PNG")?;
    Ok(encoded.into_inner())
}

pub fn snapshot_file_name(unix_millis: u128) -> String {
    format!("snapshot-{unix_millis}.png")
}

/// Writes `png` into `directory` (current directory when `None`) under a
/// timestamped name.
pub fn write_snapshot(directory: Option<&Path>, png: &[u8]) -> Result<PathBuf> {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    let directory = directory.map(Path::to_path_buf).unwrap_or_default();
    if !directory.as_os_str().is_empty() {
        fs::create_dir_all(&directory)
            .with_context(|| format!("Could not create {}", directory.display()))?;
    }
    let path = directory.join(snapshot_file_name(millis));
    fs::write(&path, png).with_context(|| format!("Could not write {}", path.display()))?;
    Ok(path)
}
