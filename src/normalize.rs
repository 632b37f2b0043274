//! Turns raw occupancy counts into probabilities over the region of interest, and probabilities
//! into grid free energies (GFE).
//!
//! Voxels outside the mask are written as `min(in-mask values) - 1`. Valid probabilities are
//! never negative, so consumers can test `value < 0` for "outside the region".

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{Mask, PmapError, Result, SpatialGrid};

/// cal/(mol·K)
pub const GAS_CONSTANT: f64 = 1.987_204_259;
/// Probabilities are clamped to this before taking the log.
pub const PROBABILITY_FLOOR: f64 = 1e-10;
/// kcal/mol. Free energies above this are noise, and are capped.
pub const GFE_CAP: f64 = 3.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// In-mask values sum to 1.
    #[default]
    Total,
    /// Mean count per frame.
    Snapshot,
    /// As `Snapshot`; the result feeds [`to_gfe`].
    Gfe,
}

impl Normalization {
    pub fn to_str(self) -> &'static str {
        match self {
            Self::Total => "total",
            Self::Snapshot => "snapshot",
            Self::Gfe => "gfe",
        }
    }
}

impl fmt::Display for Normalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

impl FromStr for Normalization {
    type Err = PmapError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "total" => Ok(Self::Total),
            "snapshot" => Ok(Self::Snapshot),
            "gfe" => Ok(Self::Gfe),
            other => Err(PmapError::value(format!(
                "Unsupported normalization mode: {other}. Use total, snapshot or gfe"
            ))),
        }
    }
}

/// Write the out-of-mask sentinel. Returns it, or `None` if nothing is in the mask.
pub(crate) fn fill_outside(values: &mut [f64], mask: &Mask) -> Option<f64> {
    let min_inside = values
        .iter()
        .zip(&mask.inside)
        .filter(|(_, m)| **m)
        .map(|(v, _)| *v)
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.min(v))))?;

    let sentinel = min_inside - 1.;
    for (v, inside) in values.iter_mut().zip(&mask.inside) {
        if !inside {
            *v = sentinel;
        }
    }
    Some(sentinel)
}

/// Normalize raw counts. Returns a new grid; `raw` is untouched.
pub fn normalize(
    raw: &SpatialGrid,
    mask: &Mask,
    frames_processed: usize,
    mode: Normalization,
) -> Result<SpatialGrid> {
    if frames_processed == 0 {
        return Err(PmapError::value(
            "Can't normalize: no frames were processed",
        ));
    }
    mask.check_grid(raw)?;
    if mask.count() == 0 {
        return Err(PmapError::value(
            "Can't normalize: no voxels are inside the mask",
        ));
    }

    let divisor = match mode {
        Normalization::Total => {
            let sum: f64 = raw
                .values
                .iter()
                .zip(&mask.inside)
                .filter(|(_, m)| **m)
                .map(|(v, _)| *v)
                .sum();
            if sum == 0. {
                return Err(PmapError::value(
                    "Can't normalize: there are no counts inside the mask",
                ));
            }
            sum
        }
        Normalization::Snapshot | Normalization::Gfe => frames_processed as f64,
    };

    let mut values: Vec<f64> = raw.values.iter().map(|v| v / divisor).collect();
    fill_outside(&mut values, mask);

    Ok(raw.with_values(values))
}

/// Expected per-voxel count of probe atoms if they were spread evenly through the box:
/// `n_probe_atoms · voxel_volume / box_volume`.
pub fn bulk_probability(n_probe_atoms: usize, box_volume: f64, voxel_volume: f64) -> Result<f64> {
    if !(box_volume > 0.) {
        return Err(PmapError::value(format!(
            "Box volume must be positive for a bulk reference; got {box_volume}"
        )));
    }
    if n_probe_atoms == 0 {
        return Err(PmapError::value("No probe atoms for a bulk reference"));
    }
    Ok(n_probe_atoms as f64 * voxel_volume / box_volume)
}

/// The free energy map and its negation; the latter is for display, where high is favorable.
#[derive(Clone, Debug)]
pub struct GfeMaps {
    pub gfe: SpatialGrid,
    pub inverse_gfe: SpatialGrid,
}

/// `ΔG = -RT ln(p / mean_probability)` per voxel, in kcal/mol, capped at [`GFE_CAP`].
/// `snapshot_map` should be normalized per frame (`Snapshot` or `Gfe`).
pub fn to_gfe(snapshot_map: &SpatialGrid, mean_probability: f64, temperature: f64) -> Result<GfeMaps> {
    if !(mean_probability > 0.) {
        return Err(PmapError::value(format!(
            "Mean probability must be positive; got {mean_probability}"
        )));
    }
    if !(temperature > 0.) {
        return Err(PmapError::value(format!(
            "Temperature must be positive; got {temperature}"
        )));
    }

    let rt = GAS_CONSTANT / 1_000. * temperature;

    let gfe: Vec<f64> = snapshot_map
        .values
        .iter()
        .map(|p| {
            let p = p.max(PROBABILITY_FLOOR);
            (-rt * (p / mean_probability).ln()).min(GFE_CAP)
        })
        .collect();
    let inverse: Vec<f64> = gfe.iter().map(|g| -g).collect();

    Ok(GfeMaps {
        gfe: snapshot_map.with_values(gfe),
        inverse_gfe: snapshot_map.with_values(inverse),
    })
}
