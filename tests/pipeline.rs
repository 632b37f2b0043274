//! File-level runs: PDB + DCD in, DX maps out, then environment extraction against those maps.

use std::path::{Path, PathBuf};

use lin_alg::f64::Vec3;
use na_seq::Element;
use pmapper::{
    AtomRecord, CombineOp, Comparison, Frame, Model, Normalization, PmapConfig, SpatialGrid,
    dcd::{DcdWriter, UnitCell},
    extract_environments_to_file,
    pdb::{PdbModels, PdbWriter},
    pipeline::{combine_files, run_pmap_files},
};
use tempfile::TempDir;

/// Probe carbon positions. Three frames put it at `SITE_A`, one at `SITE_B`.
const SITE_A: [f64; 3] = [0.5, 2.5, 0.5];
const SITE_B: [f64; 3] = [0.5, -2.5, 0.5];

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn atom(
    serial_number: u32,
    name: &str,
    res_name: &str,
    res_id: i32,
    posit: [f64; 3],
    element: Element,
    hetero: bool,
) -> AtomRecord {
    AtomRecord {
        serial_number,
        name: name.to_owned(),
        res_name: res_name.to_owned(),
        chain_id: "A".to_owned(),
        res_id,
        posit: Vec3::new(posit[0], posit[1], posit[2]),
        element: Some(element),
        hetero,
    }
}

/// Two alanine CAs flanking the origin, and a probe of one carbon and one hydrogen.
fn model(probe_c: [f64; 3]) -> Model {
    Model {
        atoms: vec![
            atom(1, "CA", "ALA", 1, [-1., 0., 0.], Element::Carbon, false),
            atom(2, "CA", "ALA", 2, [1., 0., 0.], Element::Carbon, false),
            atom(3, "C1", "BNZ", 3, probe_c, Element::Carbon, true),
            atom(
                4,
                "H1",
                "BNZ",
                3,
                [probe_c[0] + 1., probe_c[1], probe_c[2]],
                Element::Hydrogen,
                true,
            ),
        ],
    }
}

fn write_pdb(path: &Path, models: &[Model]) {
    let mut w = PdbWriter::create(path).unwrap();
    for m in models {
        w.write_model(m).unwrap();
    }
    w.finish().unwrap();
}

struct Inputs {
    dir: TempDir,
    topology: PathBuf,
    trajectory: PathBuf,
}

fn inputs() -> Inputs {
    let dir = TempDir::new().unwrap();
    let topology = dir.path().join("top.pdb");
    let trajectory = dir.path().join("traj.dcd");

    write_pdb(&topology, &[model(SITE_A)]);

    let mut dcd = DcdWriter::create(&trajectory, 4, true, 1.).unwrap();
    for site in [SITE_A, SITE_B, SITE_A, SITE_A] {
        let frame = Frame {
            atom_posits: model(site).atoms.iter().map(|a| a.posit).collect(),
            unit_cell: Some(UnitCell::orthorhombic(30., 30., 30.)),
        };
        dcd.write_frame(&frame).unwrap();
    }
    dcd.finish().unwrap();

    Inputs {
        dir,
        topology,
        trajectory,
    }
}

fn config() -> PmapConfig {
    let mut config = PmapConfig::new("BNZ");
    config.grid_size = 10;
    config.valid_dist = Some(6.);
    config.exclude_resnames = vec!["BNZ".to_owned()];
    config
}

fn value_at(grid: &SpatialGrid, p: [f64; 3]) -> f64 {
    grid.interpolate_nearest(Vec3::new(p[0], p[1], p[2]), f64::NAN)
}

#[test]
fn test_trajectory_to_maps_to_environments() {
    init_logger();
    let inp = inputs();
    let out_dir = inp.dir.path();
    let config = config();

    let out = run_pmap_files(
        &config,
        &inp.topology,
        &inp.trajectory,
        &inp.topology,
        out_dir,
        "bnz",
    )
    .unwrap();
    assert_eq!(out.frames_processed, 4);

    let pmap = SpatialGrid::load_dx(&out.selectors[0].map).unwrap();
    assert_eq!(pmap.dims, [10, 10, 10]);
    assert!((value_at(&pmap, SITE_A) - 0.75).abs() < 1e-12);
    assert!((value_at(&pmap, SITE_B) - 0.25).abs() < 1e-12);
    // Far corner: outside the 6 Å mask.
    assert_eq!(value_at(&pmap, [-4.5, -4.5, -4.5]), -1.);

    let snapshots = out_dir.join("snapshots.pdb");
    write_pdb(&snapshots, &[model(SITE_A), model(SITE_B), model(SITE_A)]);

    let mut params = config.extract_params().unwrap();
    params.threshold = 0.5;
    let envs = out_dir.join("envs.pdb");
    let summary =
        extract_environments_to_file(&pmap, &[snapshots.clone()], &params, &envs).unwrap();
    assert_eq!(summary.models_scanned, 3);
    assert_eq!(summary.n_probes, 3);
    assert_eq!(summary.n_environments, 2);

    let back: Vec<Model> = PdbModels::open(&envs)
        .unwrap()
        .collect::<pmapper::Result<_>>()
        .unwrap();
    assert_eq!(back.len(), 2);
    let names: Vec<&str> = back[0].atoms.iter().map(|a| a.res_name.as_str()).collect();
    assert_eq!(names, vec!["ALA", "ALA", "BNZ", "BNZ"]);

    // The low-probability site, found from the other side.
    params.comparison = Comparison::Lt;
    params.threads = 2;
    let summary = extract_environments_to_file(&pmap, &[snapshots], &params, &envs).unwrap();
    assert_eq!(summary.n_environments, 1);
}

#[test]
fn test_gfe_run_and_combination() {
    init_logger();
    let inp = inputs();
    let out_dir = inp.dir.path();

    let mut config = config();
    config.normalization = Normalization::Gfe;
    config.frame_range = Some("1-last:1".to_owned());

    let out = run_pmap_files(
        &config,
        &inp.topology,
        &inp.trajectory,
        &inp.topology,
        out_dir,
        "run1",
    )
    .unwrap();
    let sel = &out.selectors[0];
    for name in [
        "run1_heavy_raw.dx",
        "run1_heavy_snapshot.dx",
        "run1_heavy_gfe.dx",
        "run1_heavy_inverse_gfe.dx",
    ] {
        assert!(out_dir.join(name).exists(), "{name}");
    }

    let snapshot = SpatialGrid::load_dx(&sel.map).unwrap();
    assert!((value_at(&snapshot, SITE_A) - 0.75).abs() < 1e-12);

    // Enriched sites are favorable; empty in-mask voxels hit the cap.
    let gfe = SpatialGrid::load_dx(sel.gfe.as_ref().unwrap()).unwrap();
    assert!(value_at(&gfe, SITE_A) < 0.);
    assert_eq!(value_at(&gfe, [3.5, 3.5, 0.5]), 3.);

    // A second, identical run: the max over runs is the map itself.
    let out2 = run_pmap_files(
        &config,
        &inp.topology,
        &inp.trajectory,
        &inp.topology,
        out_dir,
        "run2",
    )
    .unwrap();
    let combined = combine_files(
        &[sel.map.clone(), out2.selectors[0].map.clone()],
        &[CombineOp::Max],
        None,
        out_dir,
        "max",
    )
    .unwrap();
    let max = SpatialGrid::load_dx(&combined[0]).unwrap();
    assert_eq!(max.values, snapshot.values);
}

#[test]
fn test_missing_inputs() {
    let inp = inputs();
    let err = run_pmap_files(
        &config(),
        &inp.topology,
        &inp.dir.path().join("missing.dcd"),
        &inp.topology,
        inp.dir.path(),
        "x",
    )
    .unwrap_err();
    assert!(matches!(err, pmapper::PmapError::FileNotFound(_)));

    let mut config = config();
    config.probe_resname = "ACN".to_owned();
    let err = run_pmap_files(
        &config,
        &inp.topology,
        &inp.trajectory,
        &inp.topology,
        inp.dir.path(),
        "x",
    )
    .unwrap_err();
    assert!(err.is_value_error());
}

#[test]
fn test_targeted_frame_range_matches_trajectory_file() {
    let inp = inputs();

    let mut config = config();
    config.frame_range = Some("traj|2-3".to_owned());
    let out = run_pmap_files(
        &config,
        &inp.topology,
        &inp.trajectory,
        &inp.topology,
        inp.dir.path(),
        "win",
    )
    .unwrap();
    assert_eq!(out.frames_processed, 2);

    // Frames 2 and 3 visit each site once.
    let pmap = SpatialGrid::load_dx(&out.selectors[0].map).unwrap();
    assert!((value_at(&pmap, SITE_A) - 0.5).abs() < 1e-12);
    assert!((value_at(&pmap, SITE_B) - 0.5).abs() < 1e-12);

    config.frame_range = Some("prod2|2-3".to_owned());
    let err = run_pmap_files(
        &config,
        &inp.topology,
        &inp.trajectory,
        &inp.topology,
        inp.dir.path(),
        "win",
    )
    .unwrap_err();
    assert!(err.is_value_error());
    assert!(err.to_string().contains("prod2"));
}
