use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::transform::{ZoomLimits, DEFAULT_ZOOM_MAX, DEFAULT_ZOOM_MIN};

const CONFIG_DIR_NAME: &str = "lumen-view";
const CONFIG_FILE_NAME: &str = "config.toml";

/// A named window/level pair for one modality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    pub window_width: f32,
    pub window_center: f32,
}

impl Preset {
    pub fn new(name: &str, window_width: f32, window_center: f32) -> Self {
        Self {
            name: name.to_string(),
            window_width,
            window_center,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoomConfig {
    pub min: f32,
    pub max: f32,
    /// Exponential rate applied to wheel deltas while the zoom tool owns the wheel.
    pub wheel_rate: f32,
    /// Zoom change per canvas pixel of vertical drag with the zoom tool.
    pub drag_rate: f32,
}

impl Default for ZoomConfig {
    fn default() -> Self {
        Self {
            min: DEFAULT_ZOOM_MIN,
            max: DEFAULT_ZOOM_MAX,
            wheel_rate: 0.0015,
            drag_rate: 0.01,
        }
    }
}

impl ZoomConfig {
    pub fn limits(&self) -> ZoomLimits {
        ZoomLimits::new(self.min, self.max)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowLevelConfig {
    /// Pixel-value span divided by this gives the per-pixel drag sensitivity.
    pub span_divisor: f32,
    pub min_sensitivity: f32,
    pub max_sensitivity: f32,
    /// Multiplier for vertical drag -> window width.
    pub width_sign: f32,
    /// Multiplier for horizontal drag -> window centre.
    pub center_sign: f32,
}

impl Default for WindowLevelConfig {
    fn default() -> Self {
        Self {
            span_divisor: 512.0,
            min_sensitivity: 0.25,
            max_sensitivity: 256.0,
            width_sign: -1.0,
            center_sign: 1.0,
        }
    }
}

impl WindowLevelConfig {
    pub fn sensitivity(&self, min_value: i32, max_value: i32) -> f32 {
        let span = (max_value as i64 - min_value as i64).unsigned_abs() as f32;
        let divisor = if self.span_divisor > 0.0 {
            self.span_divisor
        } else {
            512.0
        };
        let low = self.min_sensitivity.max(f32::MIN_POSITIVE);
        (span / divisor).clamp(low, self.max_sensitivity.max(low))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackScrollConfig {
    pub pixels_per_frame: f32,
    pub dead_zone: f32,
}

impl Default for StackScrollConfig {
    fn default() -> Self {
        Self {
            pixels_per_frame: 30.0,
            dead_zone: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayStyle {
    pub heatmap_opacity: f32,
    pub mask_color: [u8; 3],
    pub mask_opacity: f32,
    pub box_stroke: f32,
    pub selected_box_stroke: f32,
    pub label_font_px: f32,
    pub measurement_color: [u8; 3],
    pub measurement_stroke: f32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            heatmap_opacity: 0.4,
            mask_color: [255, 0, 0],
            mask_opacity: 0.5,
            box_stroke: 2.0,
            selected_box_stroke: 4.0,
            label_font_px: 13.0,
            measurement_color: [255, 215, 0],
            measurement_stroke: 1.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub zoom: ZoomConfig,
    pub window_level: WindowLevelConfig,
    pub stack_scroll: StackScrollConfig,
    pub overlay: OverlayStyle,
    /// Fit the image to its pane when a stack's first frame arrives.
    pub fit_on_load: bool,
    pub snapshot_dir: Option<PathBuf>,
    /// Presets keyed by upper-case modality code.
    pub presets: BTreeMap<String, Vec<Preset>>,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            zoom: ZoomConfig::default(),
            window_level: WindowLevelConfig::default(),
            stack_scroll: StackScrollConfig::default(),
            overlay: OverlayStyle::default(),
            fit_on_load: true,
            snapshot_dir: None,
            presets: default_presets(),
        }
    }
}

impl ViewerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("Invalid viewer config")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Could not read config {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("In {}", path.display()))
    }

    /// Loads `explicit` or the platform config file; anything unreadable falls back to
    /// defaults with a warning.
    pub fn load_or_default(explicit: Option<&Path>) -> Self {
        let path = explicit.map(Path::to_path_buf).or_else(config_file_path);
        let Some(path) = path else {
            return Self::default();
        };
        if explicit.is_none() && !path.exists() {
            return Self::default();
        }
        match Self::load(&path) {
            Ok(config) => {
                log::info!("Loaded config from {}", path.display());
                config
            }
            Err(err) => {
                log::warn!("Using default config: {err:#}");
                Self::default()
            }
        }
    }

    pub fn presets_for(&self, modality: Option<&str>) -> &[Preset] {
        let key = modality.unwrap_or_default().trim().to_ascii_uppercase();
        self.presets
            .get(&key)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

fn default_presets() -> BTreeMap<String, Vec<Preset>> {
    let mut presets = BTreeMap::new();
    presets.insert(
        "CT".to_string(),
        vec![
            Preset::new("Brain", 80.0, 40.0),
            Preset::new("Abdomen", 400.0, 50.0),
            Preset::new("Lung", 1500.0, -600.0),
            Preset::new("Bone", 2500.0, 480.0),
        ],
    );
    presets
}

pub fn config_file_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        return env::var_os("APPDATA")
            .map(PathBuf::from)
            .map(|base| base.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME));
    }

    #[cfg(target_os = "macos")]
    {
        return env::var_os("HOME").map(PathBuf::from).map(|home| {
            home.join("Library")
                .join("Application Support")
                .join(CONFIG_DIR_NAME)
                .join(CONFIG_FILE_NAME)
        });
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        if let Some(xdg) = env::var_os("XDG_CONFIG_HOME") {
            return Some(PathBuf::from(xdg).join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME));
        }
        env::var_os("HOME").map(PathBuf::from).map(|home| {
            home.join(".config")
                .join(CONFIG_DIR_NAME)
                .join(CONFIG_FILE_NAME)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config_path() -> PathBuf {
        std::env::temp_dir().join(format!(
            "lumen-view-config-test-{}-{}.toml",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        ))
    }

    #[test]
    fn empty_toml_yields_defaults() {
        let config = ViewerConfig::from_toml_str("").expect("empty config parses");
        assert_eq!(config, ViewerConfig::default());
        assert_eq!(config.zoom.limits(), ZoomLimits::new(0.1, 5.0));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let text = "fit_on_load = false\n[overlay]\nheatmap_opacity = 0.7\n";
        let config = ViewerConfig::from_toml_str(text).expect("config parses");
        assert!(!config.fit_on_load);
        assert_eq!(config.overlay.heatmap_opacity, 0.7);
        assert_eq!(config.overlay.mask_opacity, 0.5);
        assert_eq!(config.stack_scroll.pixels_per_frame, 30.0);
    }

    #[test]
    fn presets_are_looked_up_by_modality() {
        let config = ViewerConfig::default();
        let ct = config.presets_for(Some(" ct "));
        assert_eq!(ct.len(), 4);
        assert_eq!(ct[2], Preset::new("Lung", 1500.0, -600.0));
        assert!(config.presets_for(Some("MR")).is_empty());
        assert!(config.presets_for(None).is_empty());
    }

    #[test]
    fn custom_presets_replace_the_table() {
        let text = "[[presets.MR]]\nname = \"T1\"\nwindow_width = 600\nwindow_center = 300\n";
        let config = ViewerConfig::from_toml_str(text).expect("config parses");
        assert_eq!(config.presets_for(Some("MR")), &[Preset::new("T1", 600.0, 300.0)]);
        assert!(config.presets_for(Some("CT")).is_empty());
    }

    #[test]
    fn unreadable_config_falls_back_to_defaults() {
        let path = temp_config_path();
        fs::write(&path, "zoom = \"not a table\"").expect("should write temp config");
        assert!(ViewerConfig::load(&path).is_err());
        assert_eq!(ViewerConfig::load_or_default(Some(&path)), ViewerConfig::default());
        let _ = fs::remove_file(path);
    }

    #[test]
    fn window_level_sensitivity_is_clamped() {
        let config = WindowLevelConfig::default();
        assert_eq!(config.sensitivity(0, 100), 0.25);
        assert_eq!(config.sensitivity(0, 4096), 8.0);
        assert_eq!(config.sensitivity(i32::MIN, i32::MAX), 256.0);
    }
}
