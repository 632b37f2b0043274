//! Counts probe atom positions into grids over a trajectory: one grid per selector, each a
//! histogram of where the selected atoms sat across all frames.

use lin_alg::f64::Vec3;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::{Frame, FrameRange, Model, Placement, PmapError, Result, SpatialGrid};

/// Frames between progress reports.
const PROGRESS_INTERVAL: usize = 1_000;

/// Which atoms a selector counts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtomSelection {
    /// Non-hydrogen atoms of the probe residue.
    Heavy,
    /// Every atom of the probe residue.
    All,
    /// Atoms of the probe residue with these names, e.g. a single aromatic carbon.
    AtomNames(Vec<String>),
    /// Non-hydrogen atoms of another residue type, e.g. waters or ions, for profiling.
    Residue(String),
}

/// A named atom selection. Each gets its own grid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Selector {
    pub name: String,
    pub selection: AtomSelection,
}

impl Selector {
    pub fn new(name: impl Into<String>, selection: AtomSelection) -> Self {
        Self {
            name: name.into(),
            selection,
        }
    }

    /// Indices into the topology's atoms. Fails if nothing matches, so that a misconfigured
    /// selector can't pass as an empty map.
    pub fn atom_indices(&self, topology: &Model, probe_resname: &str) -> Result<Vec<usize>> {
        if let AtomSelection::Residue(res_name) = &self.selection {
            if !topology.has_residue(res_name) {
                return Err(PmapError::value(format!(
                    "Residue {res_name} of selector \"{}\" is not present in the topology",
                    self.name
                )));
            }
        }

        let indices: Vec<usize> = topology
            .atoms
            .iter()
            .enumerate()
            .filter(|(_, a)| match &self.selection {
                AtomSelection::Heavy => a.res_name == probe_resname && !a.is_hydrogen(),
                AtomSelection::All => a.res_name == probe_resname,
                AtomSelection::AtomNames(names) => {
                    a.res_name == probe_resname && names.iter().any(|n| *n == a.name)
                }
                AtomSelection::Residue(res_name) => a.res_name == *res_name && !a.is_hydrogen(),
            })
            .map(|(i, _)| i)
            .collect();

        if indices.is_empty() {
            return Err(PmapError::value(format!(
                "Selector \"{}\" ({:?}) matches no atoms",
                self.name, self.selection
            )));
        }
        Ok(indices)
    }
}

#[derive(Clone, Debug)]
pub struct OccupancyParams {
    pub probe_resname: String,
    pub selectors: Vec<Selector>,
    /// Voxels per axis.
    pub grid_size: usize,
    /// Å per voxel.
    pub grid_pitch: f64,
    /// Usually the protein's center of mass; see [`Model::protein_center`].
    pub box_center: Vec3,
    pub frame_range: FrameRange,
    /// Matched against a `NAME|` frame range. A targeted range needs this to name the
    /// trajectory being read.
    pub trajectory_name: Option<String>,
}

/// Raw counts for one selector.
#[derive(Clone, Debug)]
pub struct SelectorMap {
    pub name: String,
    pub grid: SpatialGrid,
    /// Atoms the selector picks in each frame.
    pub n_atoms: usize,
    /// Atom positions that fell outside the grid, summed over frames.
    pub dropped: usize,
}

/// The result of a trajectory pass.
#[derive(Clone, Debug)]
pub struct Occupancy {
    pub maps: Vec<SelectorMap>,
    pub frames_processed: usize,
    /// Unit cell volume of the last frame processed, in Å³. `None` if frames carry no cell.
    pub last_volume: Option<f64>,
}

/// Deposits frames into per-selector grids. Build with [`OccupancyAccumulator::new`], feed frames,
/// then [`OccupancyAccumulator::finish`].
pub struct OccupancyAccumulator {
    n_topology_atoms: usize,
    selections: Vec<(Vec<usize>, SelectorMap)>,
    frames_processed: usize,
    last_volume: Option<f64>,
}

impl OccupancyAccumulator {
    pub fn new(topology: &Model, params: &OccupancyParams) -> Result<Self> {
        if !topology.has_residue(&params.probe_resname) {
            return Err(PmapError::value(format!(
                "Probe residue {} is not present in the trajectory topology",
                params.probe_resname
            )));
        }
        if params.selectors.is_empty() {
            return Err(PmapError::value("No atom selectors given"));
        }

        let mut selections = Vec::with_capacity(params.selectors.len());
        for sel in &params.selectors {
            let indices = sel.atom_indices(topology, &params.probe_resname)?;
            let grid = SpatialGrid::cube(
                params.grid_size,
                params.grid_pitch,
                Placement::Center(params.box_center),
            )?;

            selections.push((
                indices.clone(),
                SelectorMap {
                    name: sel.name.clone(),
                    grid,
                    n_atoms: indices.len(),
                    dropped: 0,
                },
            ));
        }

        Ok(Self {
            n_topology_atoms: topology.atoms.len(),
            selections,
            frames_processed: 0,
            last_volume: None,
        })
    }

    pub fn add_frame(&mut self, frame: &Frame) -> Result<()> {
        if frame.atom_posits.len() != self.n_topology_atoms {
            return Err(PmapError::value(format!(
                "Frame has {} atoms; the topology has {}",
                frame.atom_posits.len(),
                self.n_topology_atoms
            )));
        }

        for (indices, map) in &mut self.selections {
            let posits = indices.iter().map(|i| frame.atom_posits[*i]);
            map.dropped += map.grid.accumulate_histogram(posits);
        }

        self.frames_processed += 1;
        if let Some(v) = frame.volume() {
            self.last_volume = Some(v);
        }

        if self.frames_processed % PROGRESS_INTERVAL == 0 {
            info!("Accumulated {} frames", self.frames_processed);
        }

        Ok(())
    }

    pub fn frames_processed(&self) -> usize {
        self.frames_processed
    }

    pub fn finish(self) -> Occupancy {
        let maps: Vec<SelectorMap> = self.selections.into_iter().map(|(_, m)| m).collect();

        for m in &maps {
            if m.dropped > 0 {
                warn!(
                    "Selector \"{}\": {} atom positions fell outside the grid and were not counted",
                    m.name, m.dropped
                );
            }
        }
        if self.frames_processed == 0 {
            warn!("No frames were accumulated");
        }

        info!(
            "Occupancy pass complete: {} frames, {} selectors",
            self.frames_processed,
            maps.len()
        );

        Occupancy {
            maps,
            frames_processed: self.frames_processed,
            last_volume: self.last_volume,
        }
    }
}

/// Accumulate every frame within `params.frame_range`.
pub fn accumulate<I>(topology: &Model, frames: I, params: &OccupancyParams) -> Result<Occupancy>
where
    I: IntoIterator<Item = Result<Frame>>,
{
    if let Some(target) = params.frame_range.target() {
        if params.trajectory_name.as_deref() != Some(target) {
            return Err(PmapError::value(format!(
                "Frame range targets trajectory \"{target}\", but the trajectory is {}",
                params
                    .trajectory_name
                    .as_deref()
                    .map_or("unnamed".to_owned(), |n| format!("\"{n}\""))
            )));
        }
    }

    let mut acc = OccupancyAccumulator::new(topology, params)?;

    for frame in params.frame_range.apply(frames.into_iter()) {
        acc.add_frame(&frame?)?;
    }

    Ok(acc.finish())
}
