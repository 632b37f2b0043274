//! Finds probe molecules sitting in high- (or low-) probability regions of a map across many
//! structural snapshots, and cuts out each one together with the residues around it.
//!
//! Snapshot files are streamed in bounded chunks of models, and each extracted environment is
//! written out as soon as its chunk is done, so memory use doesn't grow with the input.
//! Per-model work is a pure function of the model, so chunks are processed on a thread pool;
//! a pool of one thread gives sequential processing through the same path.

use std::{
    collections::{HashMap, HashSet},
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};

use lin_alg::f64::Vec3;
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    FrameRange, Model, PmapError, ResidueKey, Result, SpatialGrid,
    grid::dist_sq,
    pdb::{PdbModels, PdbWriter},
    range::trajectory_name,
};

/// Models read from a source before they're processed and written.
const CHUNK_MODELS: usize = 64;

/// Fill for lookups outside the grid; never qualifies.
const OUTSIDE_GRID: f64 = -1.;

/// How a probe's map value is compared to the threshold.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    #[default]
    #[serde(alias = "greater_than")]
    Gt,
    #[serde(alias = "less_than")]
    Lt,
}

impl Comparison {
    fn passes(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => value > threshold,
            Self::Lt => value < threshold,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ExtractParams {
    pub probe_resname: String,
    pub threshold: f64,
    pub comparison: Comparison,
    /// Å. A residue is part of the environment if any of its atoms is this close to any probe
    /// atom.
    pub env_distance: f64,
    /// Residue names never counted as environment, e.g. the probe's own name, water and ions.
    pub exclude_resnames: HashSet<String>,
    /// Residue numbers never counted as environment.
    pub exclude_res_ids: HashSet<i32>,
    /// Applied to each source separately. A `NAME|` window applies only to the source with that
    /// file stem; the others are read in full.
    pub frame_range: FrameRange,
    /// Worker threads. 1 processes models sequentially.
    pub threads: usize,
}

impl ExtractParams {
    pub fn new(probe_resname: impl Into<String>, threshold: f64, env_distance: f64) -> Self {
        Self {
            probe_resname: probe_resname.into(),
            threshold,
            comparison: Comparison::Gt,
            env_distance,
            exclude_resnames: HashSet::new(),
            exclude_res_ids: HashSet::new(),
            frame_range: FrameRange::default(),
            threads: 1,
        }
    }

    fn is_excluded(&self, key: &ResidueKey, res_name: &str) -> bool {
        self.exclude_resnames.contains(res_name) || self.exclude_res_ids.contains(&key.res_id)
    }
}

/// What one model yielded.
#[derive(Clone, Debug, Default)]
pub struct ModelEnvironments {
    /// Probe residues present in the model, qualifying or not.
    pub n_probes: usize,
    pub environments: Vec<Model>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExtractSummary {
    pub models_scanned: usize,
    pub n_probes: usize,
    pub n_environments: usize,
}

struct Residue {
    key: ResidueKey,
    res_name: String,
    atoms: Vec<usize>,
}

/// Residues in order of first appearance.
fn group_residues(model: &Model) -> Vec<Residue> {
    let mut residues: Vec<Residue> = Vec::new();
    let mut index: HashMap<ResidueKey, usize> = HashMap::new();

    for (i, atom) in model.atoms.iter().enumerate() {
        let key = atom.residue_key();
        match index.get(&key) {
            Some(r) => residues[*r].atoms.push(i),
            None => {
                index.insert(key.clone(), residues.len());
                residues.push(Residue {
                    key,
                    res_name: atom.res_name.clone(),
                    atoms: vec![i],
                });
            }
        }
    }
    residues
}

/// Whether any atom of the residue is within `cutoff` of the probe atoms. The probe's bounding
/// sphere rejects most residues before any pairwise distances are computed.
fn residue_near_probe(
    model: &Model,
    residue: &Residue,
    probe_posits: &[Vec3],
    probe_center: Vec3,
    reach_sq: f64,
    cutoff_sq: f64,
) -> bool {
    residue.atoms.iter().any(|i| {
        let p = model.atoms[*i].posit;
        dist_sq(p, probe_center) <= reach_sq
            && probe_posits.iter().any(|q| dist_sq(p, *q) <= cutoff_sq)
    })
}

/// Environments of every qualifying probe in one model. Pure; safe to run in parallel.
pub fn environments_in_model(
    model: &Model,
    grid: &SpatialGrid,
    params: &ExtractParams,
) -> ModelEnvironments {
    let residues = group_residues(model);
    let cutoff_sq = params.env_distance * params.env_distance;

    let mut out = ModelEnvironments::default();

    for (i_probe, probe) in residues.iter().enumerate() {
        if probe.res_name != params.probe_resname {
            continue;
        }
        out.n_probes += 1;

        let mut heavy: Vec<usize> = probe
            .atoms
            .iter()
            .copied()
            .filter(|i| !model.atoms[*i].is_hydrogen())
            .collect();
        if heavy.is_empty() {
            heavy = probe.atoms.clone();
        }

        let qualifies = heavy.iter().any(|i| {
            let v = grid.interpolate_nearest(model.atoms[*i].posit, OUTSIDE_GRID);
            // Negative: outside the grid, or outside the map's mask.
            v >= 0. && params.comparison.passes(v, params.threshold)
        });
        if !qualifies {
            continue;
        }

        let probe_posits: Vec<Vec3> = probe.atoms.iter().map(|i| model.atoms[*i].posit).collect();
        let n = probe_posits.len() as f64;
        let center = Vec3::new(
            probe_posits.iter().map(|p| p.x).sum::<f64>() / n,
            probe_posits.iter().map(|p| p.y).sum::<f64>() / n,
            probe_posits.iter().map(|p| p.z).sum::<f64>() / n,
        );
        let radius = probe_posits
            .iter()
            .map(|p| dist_sq(*p, center).sqrt())
            .fold(0., f64::max);
        let reach = radius + params.env_distance;
        let reach_sq = reach * reach;

        let env: Vec<&Residue> = residues
            .iter()
            .enumerate()
            .filter(|(i, r)| {
                *i != i_probe
                    && !params.is_excluded(&r.key, &r.res_name)
                    && residue_near_probe(model, r, &probe_posits, center, reach_sq, cutoff_sq)
            })
            .map(|(_, r)| r)
            .collect();

        if env.is_empty() {
            debug!(
                "Probe {} {} qualifies but has no environment; skipping",
                probe.res_name, probe.key.res_id
            );
            continue;
        }

        let mut atom_is: Vec<usize> = probe.atoms.clone();
        for r in env {
            atom_is.extend_from_slice(&r.atoms);
        }
        atom_is.sort_unstable();

        out.environments.push(Model {
            atoms: atom_is.iter().map(|i| model.atoms[*i].clone()).collect(),
        });
    }

    out
}

/// Stream every source's models, writing each extracted environment to `writer` as one model.
///
/// Fails if a source is missing, if the probe residue never occurs, or if nothing was extracted;
/// the last almost always means a wrong residue name, threshold, or comparison.
pub fn extract_environments<W: Write>(
    grid: &SpatialGrid,
    sources: &[PathBuf],
    params: &ExtractParams,
    writer: &mut PdbWriter<W>,
) -> Result<ExtractSummary> {
    if params.threads == 0 {
        return Err(PmapError::value("Thread count must be at least 1"));
    }
    if !(params.env_distance > 0.) {
        return Err(PmapError::value(format!(
            "Environment distance must be positive; got {}",
            params.env_distance
        )));
    }
    if sources.is_empty() {
        return Err(PmapError::value("No snapshot sources given"));
    }

    // Check all sources up front, rather than failing after hours on the last one.
    for path in sources {
        File::open(path).map_err(|e| PmapError::from_open(e, path))?;
    }

    if let Some(target) = params.frame_range.target() {
        if !sources.iter().any(|p| trajectory_name(p) == target) {
            return Err(PmapError::value(format!(
                "Frame range targets \"{target}\", which names none of the snapshot sources"
            )));
        }
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(params.threads)
        .build()
        .map_err(|e| PmapError::Io(io::Error::other(e.to_string())))?;

    let mut summary = ExtractSummary::default();

    for path in sources {
        let before = summary.n_environments;
        let window = params.frame_range.for_trajectory(&trajectory_name(path));
        let mut models = window.apply(PdbModels::open(path)?);

        loop {
            let chunk: Vec<Model> = models
                .by_ref()
                .take(CHUNK_MODELS)
                .collect::<Result<_>>()?;
            if chunk.is_empty() {
                break;
            }

            let results: Vec<ModelEnvironments> = pool.install(|| {
                chunk
                    .par_iter()
                    .map(|m| environments_in_model(m, grid, params))
                    .collect()
            });

            summary.models_scanned += chunk.len();
            for r in results {
                summary.n_probes += r.n_probes;
                for env in &r.environments {
                    writer.write_model(env)?;
                    summary.n_environments += 1;
                }
            }
        }

        info!(
            "{}: {} environments extracted ({} models scanned so far)",
            path.display(),
            summary.n_environments - before,
            summary.models_scanned
        );
    }

    if summary.n_probes == 0 {
        return Err(PmapError::value(format!(
            "Probe residue {} was not found in any snapshot",
            params.probe_resname
        )));
    }
    if summary.n_environments == 0 {
        return Err(PmapError::value(
            "No structures were extracted; check the probe name, threshold and comparison",
        ));
    }

    Ok(summary)
}

/// As [`extract_environments`], writing a multi-model PDB file at `out`. The file is removed if
/// extraction fails.
pub fn extract_environments_to_file(
    grid: &SpatialGrid,
    sources: &[PathBuf],
    params: &ExtractParams,
    out: &Path,
) -> Result<ExtractSummary> {
    let mut writer = PdbWriter::create(out)?;

    match extract_environments(grid, sources, params, &mut writer) {
        Ok(summary) => {
            writer.finish()?;
            Ok(summary)
        }
        Err(e) => {
            drop(writer);
            let _ = fs::remove_file(out);
            Err(e)
        }
    }
}
