//! Device configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::util::Result;

/// Settings fixed at device creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Worker threads for frame rendering (0 = one per core)
    pub num_threads: usize,
    /// Edge length in pixels of one render work item
    pub tile_size: u32,

    // Commit behavior
    /// Queue commits until a wait query, a render or an explicit flush
    pub defer_commits: bool,

    // Surfaces
    pub allow_invalid_surface_materials: bool,
    pub invalid_material_color: [f32; 4],

    /// Forward Debug severity reports to the status callback
    pub report_debug: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            num_threads: 0,
            tile_size: 16,
            defer_commits: false,
            allow_invalid_surface_materials: true,
            invalid_material_color: [1.0, 0.0, 1.0, 1.0],
            report_debug: false,
        }
    }
}

impl DeviceConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
