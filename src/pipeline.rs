//! End-to-end runs: a trajectory in, exported maps out. Also batch combination of exported maps.

use std::path::{Path, PathBuf};

use log::info;

use crate::{
    CombineOp, DistanceField, Frame, Mask, Model, Normalization, PmapConfig, PmapError, Result,
    SpatialGrid, accumulate, bulk_probability, combine, dcd::DcdReader, normalize, to_gfe,
    trajectory_name,
};

/// Files written for one selector.
#[derive(Clone, Debug)]
pub struct SelectorOutputs {
    pub name: String,
    pub raw: PathBuf,
    /// `_pmap.dx` for total normalization, `_snapshot.dx` otherwise.
    pub map: PathBuf,
    pub gfe: Option<PathBuf>,
    pub inverse_gfe: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct PmapOutputs {
    pub frames_processed: usize,
    pub selectors: Vec<SelectorOutputs>,
}

fn save(grid: &SpatialGrid, path: PathBuf, comment: &str) -> Result<PathBuf> {
    grid.save_dx(&path, comment)?;
    info!("Wrote {}", path.display());
    Ok(path)
}

/// Accumulate `frames`, normalize over the region within `valid_dist` of `reference`'s protein
/// atoms, and write DX maps to `out_dir` as `<prefix>_<selector>_<kind>.dx`.
///
/// The box is centered on the reference's protein. `topology` describes the atoms of each frame.
/// `trajectory_name` is what a `NAME|` frame range must match.
pub fn run_pmap<I>(
    config: &PmapConfig,
    topology: &Model,
    frames: I,
    trajectory_name: Option<&str>,
    reference: &Model,
    out_dir: &Path,
    prefix: &str,
) -> Result<PmapOutputs>
where
    I: IntoIterator<Item = Result<Frame>>,
{
    config.validate()?;

    let box_center = reference.protein_center().ok_or_else(|| {
        PmapError::value("The reference structure has no protein atoms to center the grid on")
    })?;

    let occ = accumulate(topology, frames, &config.occupancy_params(box_center, trajectory_name)?)?;
    if occ.frames_processed == 0 {
        return Err(PmapError::value(
            "No frames were processed; check the trajectory and frame range",
        ));
    }

    // Every selector grid shares this geometry.
    let dist = DistanceField::build(&occ.maps[0].grid, reference)?;
    let mask = dist.mask(config.valid_dist);
    info!(
        "{} of {} voxels are within the valid distance",
        mask.count(),
        mask.inside.len()
    );

    let box_volume = if config.normalization == Normalization::Gfe {
        Some(occ.last_volume.ok_or_else(|| {
            PmapError::value("GFE normalization needs unit cell volumes; the trajectory has none")
        })?)
    } else {
        None
    };

    let mut selectors = Vec::with_capacity(occ.maps.len());

    for sel in &occ.maps {
        let stem = format!("{prefix}_{}", sel.name);

        let raw = save(
            &sel.grid,
            out_dir.join(format!("{stem}_raw.dx")),
            &format!("raw {} counts over {} frames", sel.name, occ.frames_processed),
        )?;

        let map = normalize(&sel.grid, &mask, occ.frames_processed, config.normalization)?;
        let kind = match config.normalization {
            Normalization::Total => "pmap",
            Normalization::Snapshot | Normalization::Gfe => "snapshot",
        };
        let map_path = save(
            &map,
            out_dir.join(format!("{stem}_{kind}.dx")),
            &format!("{} normalized {}", config.normalization, sel.name),
        )?;

        let (mut gfe, mut inverse_gfe) = (None, None);
        if let Some(volume) = box_volume {
            let mean = bulk_probability(sel.n_atoms, volume, sel.grid.voxel_volume())?;
            let maps = to_gfe(&map, mean, config.temperature)?;

            gfe = Some(save(
                &maps.gfe,
                out_dir.join(format!("{stem}_gfe.dx")),
                &format!("{} GFE (kcal/mol) at {} K", sel.name, config.temperature),
            )?);
            inverse_gfe = Some(save(
                &maps.inverse_gfe,
                out_dir.join(format!("{stem}_inverse_gfe.dx")),
                &format!("{} inverse GFE (kcal/mol) at {} K", sel.name, config.temperature),
            )?);
        }

        selectors.push(SelectorOutputs {
            name: sel.name.clone(),
            raw,
            map: map_path,
            gfe,
            inverse_gfe,
        });
    }

    Ok(PmapOutputs {
        frames_processed: occ.frames_processed,
        selectors,
    })
}

/// [`run_pmap`] over files: a PDB topology (first model), a DCD trajectory, and a PDB reference.
/// The trajectory is named by its file stem.
pub fn run_pmap_files(
    config: &PmapConfig,
    topology: &Path,
    trajectory: &Path,
    reference: &Path,
    out_dir: &Path,
    prefix: &str,
) -> Result<PmapOutputs> {
    let topology = Model::load_pdb(topology)?;
    let reference = Model::load_pdb(reference)?;
    let frames = DcdReader::open(trajectory)?;

    let name = trajectory_name(trajectory);

    run_pmap(config, &topology, frames, Some(&name), &reference, out_dir, prefix)
}

/// Load DX maps, run `ops` over them, and write the results to `out_dir`: `<prefix>.dx` if the
/// ops reduce to one grid, `<prefix>_<n>.dx` (1-based) otherwise.
pub fn combine_files(
    inputs: &[PathBuf],
    ops: &[CombineOp],
    mask: Option<&Mask>,
    out_dir: &Path,
    prefix: &str,
) -> Result<Vec<PathBuf>> {
    let grids = inputs
        .iter()
        .map(|p| SpatialGrid::load_dx(p))
        .collect::<Result<Vec<_>>>()?;

    let results = combine(&grids, ops, mask)?;

    let ops_desc: Vec<String> = ops.iter().map(|o| o.to_string()).collect();
    let comment = format!("combined {} maps: {}", inputs.len(), ops_desc.join(", "));

    if let [single] = results.as_slice() {
        return Ok(vec![save(single, out_dir.join(format!("{prefix}.dx")), &comment)?]);
    }

    results
        .iter()
        .enumerate()
        .map(|(i, g)| save(g, out_dir.join(format!("{prefix}_{}.dx", i + 1)), &comment))
        .collect()
}
