//! Detection sidecar files.
//!
//! The vision models run outside this tool. Their output for a
//! photograph `koi.jpg` is read from `koi.detections.json` next to it:
//!
//! ```json
//! {
//!   "fish":  [{ "mask": "koi.fish.png", "confidence": 0.97 }],
//!   "coins": [{ "mask": "koi.coin.png", "confidence": 0.91, "label": "1peso" }],
//!   "pattern": { "label": "kohaku", "confidence": 0.88 }
//! }
//! ```
//!
//! Mask paths are relative to the sidecar. Masks are grayscale images at
//! photograph resolution; any non-zero pixel is inside.

use std::path::{Path, PathBuf};

use koi_metrics::{Detection, Detections, Mask, PatternPrediction};
use serde::Deserialize;

use crate::error::CliError;

const FISH_LABEL: &str = "koi";

#[derive(Debug, Deserialize)]
struct Sidecar {
    #[serde(default)]
    fish: Vec<SidecarDetection>,
    #[serde(default)]
    coins: Vec<SidecarDetection>,
    pattern: PatternPrediction,
}

#[derive(Debug, Deserialize)]
struct SidecarDetection {
    mask: PathBuf,
    confidence: f32,
    #[serde(default)]
    label: Option<String>,
}

/// Where the sidecar for `image` lives.
pub fn sidecar_path(image: &Path) -> PathBuf {
    image.with_extension("detections.json")
}

/// Read a sidecar and the masks it names.
pub fn load(path: &Path) -> Result<Detections, CliError> {
    let text = std::fs::read_to_string(path).map_err(|e| CliError::io(path, e))?;
    let sidecar: Sidecar = serde_json::from_str(&text).map_err(|e| CliError::json(path, e))?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let load_all = |entries: Vec<SidecarDetection>, default_label: &str| {
        entries
            .into_iter()
            .map(|entry| {
                let mask = load_mask(&base.join(&entry.mask))?;
                let label = entry.label.unwrap_or_else(|| default_label.to_owned());
                Ok(Detection::new(mask, entry.confidence, label))
            })
            .collect::<Result<Vec<_>, CliError>>()
    };
    Ok(Detections {
        fish: load_all(sidecar.fish, FISH_LABEL)?,
        coins: load_all(sidecar.coins, "")?,
        pattern: sidecar.pattern,
    })
}

fn load_mask(path: &Path) -> Result<Mask, CliError> {
    let raster = image::open(path).map_err(|source| CliError::Mask {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Mask::from_gray(raster.to_luma8()))
}
