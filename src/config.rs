//! Run settings, loaded from YAML.
//!
//! Example:
//! ```yaml
//! probe_resname: BNZ
//! grid_size: 60
//! normalization: gfe
//! frame_range: "1001-last:10"
//! selectors:
//!   - name: heavy
//!     selection: heavy
//!   - name: ring
//!     selection:
//!       atom_names: [C1, C2, C3, C4, C5, C6]
//! exclude_resnames: [BNZ, WAT, Na+, Cl-]
//! ```

use std::{fs, path::Path};

use lin_alg::f64::Vec3;
use serde::{Deserialize, Serialize};

use crate::{
    AtomSelection, Comparison, ExtractParams, FrameRange, Normalization, OccupancyParams,
    PmapError, Result, Selector,
};

fn default_grid_size() -> usize {
    80
}

fn default_grid_pitch() -> f64 {
    1.
}

fn default_valid_dist() -> Option<f64> {
    Some(5.)
}

fn default_temperature() -> f64 {
    300.
}

fn default_selectors() -> Vec<Selector> {
    vec![Selector::new("heavy", AtomSelection::Heavy)]
}

fn default_threshold() -> f64 {
    0.001
}

fn default_env_distance() -> f64 {
    4.
}

fn default_threads() -> usize {
    1
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PmapConfig {
    pub probe_resname: String,
    /// Voxels per axis.
    #[serde(default = "default_grid_size")]
    pub grid_size: usize,
    /// Å per voxel.
    #[serde(default = "default_grid_pitch")]
    pub grid_pitch: f64,
    /// Å from the protein. Voxels farther out are excluded from normalization. `null` includes
    /// every voxel.
    #[serde(default = "default_valid_dist")]
    pub valid_dist: Option<f64>,
    #[serde(default)]
    pub normalization: Normalization,
    /// K
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// E.g. `"1-last:10"`. All frames if absent.
    #[serde(default)]
    pub frame_range: Option<String>,
    #[serde(
        default = "default_selectors",
        with = "serde_yaml::with::singleton_map_recursive"
    )]
    pub selectors: Vec<Selector>,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default)]
    pub comparison: Comparison,
    /// Å
    #[serde(default = "default_env_distance")]
    pub env_distance: f64,
    #[serde(default)]
    pub exclude_resnames: Vec<String>,
    #[serde(default)]
    pub exclude_res_ids: Vec<i32>,
    #[serde(default = "default_threads")]
    pub threads: usize,
}

impl PmapConfig {
    /// Settings with defaults for everything but the probe.
    pub fn new(probe_resname: impl Into<String>) -> Self {
        Self {
            probe_resname: probe_resname.into(),
            grid_size: default_grid_size(),
            grid_pitch: default_grid_pitch(),
            valid_dist: default_valid_dist(),
            normalization: Normalization::default(),
            temperature: default_temperature(),
            frame_range: None,
            selectors: default_selectors(),
            threshold: default_threshold(),
            comparison: Comparison::default(),
            env_distance: default_env_distance(),
            exclude_resnames: Vec::new(),
            exclude_res_ids: Vec::new(),
            threads: default_threads(),
        }
    }

    /// Parse and validate.
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let s = fs::read_to_string(path).map_err(|e| PmapError::from_open(e, path))?;
        Self::from_yaml_str(&s)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.probe_resname.trim().is_empty() {
            return Err(PmapError::value("probe_resname must not be empty"));
        }
        if self.grid_size == 0 {
            return Err(PmapError::value("grid_size must be at least 1"));
        }
        if !(self.grid_pitch > 0.) {
            return Err(PmapError::value(format!(
                "grid_pitch must be positive; got {}",
                self.grid_pitch
            )));
        }
        if let Some(d) = self.valid_dist {
            if !(d > 0.) {
                return Err(PmapError::value(format!(
                    "valid_dist must be positive or null; got {d}"
                )));
            }
        }
        if !(self.temperature > 0.) {
            return Err(PmapError::value(format!(
                "temperature must be positive; got {}",
                self.temperature
            )));
        }
        if !(self.env_distance > 0.) {
            return Err(PmapError::value(format!(
                "env_distance must be positive; got {}",
                self.env_distance
            )));
        }
        if self.threads == 0 {
            return Err(PmapError::value("threads must be at least 1"));
        }
        if self.selectors.is_empty() {
            return Err(PmapError::value("At least one selector is required"));
        }
        for (i, sel) in self.selectors.iter().enumerate() {
            if self.selectors[..i].iter().any(|s| s.name == sel.name) {
                return Err(PmapError::value(format!(
                    "Duplicate selector name \"{}\"",
                    sel.name
                )));
            }
        }
        self.frame_range()?;

        Ok(())
    }

    pub fn frame_range(&self) -> Result<FrameRange> {
        match &self.frame_range {
            Some(s) => s.parse(),
            None => Ok(FrameRange::default()),
        }
    }

    /// `trajectory_name` is what a `NAME|` frame range must match; see [`crate::trajectory_name`].
    pub fn occupancy_params(
        &self,
        box_center: Vec3,
        trajectory_name: Option<&str>,
    ) -> Result<OccupancyParams> {
        Ok(OccupancyParams {
            probe_resname: self.probe_resname.clone(),
            selectors: self.selectors.clone(),
            grid_size: self.grid_size,
            grid_pitch: self.grid_pitch,
            box_center,
            frame_range: self.frame_range()?,
            trajectory_name: trajectory_name.map(str::to_owned),
        })
    }

    pub fn extract_params(&self) -> Result<ExtractParams> {
        Ok(ExtractParams {
            probe_resname: self.probe_resname.clone(),
            threshold: self.threshold,
            comparison: self.comparison,
            env_distance: self.env_distance,
            exclude_resnames: self.exclude_resnames.iter().cloned().collect(),
            exclude_res_ids: self.exclude_res_ids.iter().copied().collect(),
            frame_range: self.frame_range()?,
            threads: self.threads,
        })
    }
}
