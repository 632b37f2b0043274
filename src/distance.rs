//! Distance from every voxel center to the nearest protein atom, and the masks derived from it.

use log::{debug, info};
use rayon::prelude::*;

use crate::{Model, PmapError, Result, SpatialGrid, grid::dist_sq};

/// Atoms handled per pass over the voxels. Bounds the work between progress reports.
const ATOM_BATCH: usize = 1_024;

/// A grid whose values are Å to the nearest reference atom.
#[derive(Clone, Debug)]
pub struct DistanceField {
    pub grid: SpatialGrid,
}

impl DistanceField {
    /// Compute the distance field on `reference_grid`'s geometry. Only atoms of standard
    /// (non-`HETATM`) residues count, so cofactors, ligands and waters in the reference file
    /// don't shape the mask.
    pub fn build(reference_grid: &SpatialGrid, reference: &Model) -> Result<Self> {
        let atoms: Vec<_> = reference
            .atoms
            .iter()
            .filter(|a| !a.hetero)
            .map(|a| a.posit)
            .collect();

        if atoms.is_empty() {
            return Err(PmapError::value(
                "The reference structure has no atoms of standard residues to measure distance from",
            ));
        }

        let mut grid = reference_grid.zeros_like();
        grid.values.fill(f64::INFINITY);

        let centers: Vec<_> = reference_grid.centers().collect();
        let slab = reference_grid.dims[1] * reference_grid.dims[2];
        let n_batches = atoms.len().div_ceil(ATOM_BATCH);

        // Squared distances until the end.
        for (i_batch, batch) in atoms.chunks(ATOM_BATCH).enumerate() {
            grid.values
                .par_chunks_mut(slab)
                .zip(centers.par_chunks(slab))
                .for_each(|(vals, cents)| {
                    for (v, c) in vals.iter_mut().zip(cents) {
                        for a in batch {
                            let d = dist_sq(*c, *a);
                            if d < *v {
                                *v = d;
                            }
                        }
                    }
                });

            debug!("Distance field: atom batch {}/{}", i_batch + 1, n_batches);
        }

        for v in &mut grid.values {
            *v = v.sqrt();
        }

        info!(
            "Built distance field over {} voxels from {} atoms",
            grid.len(),
            atoms.len()
        );

        Ok(Self { grid })
    }

    /// Use an existing grid, e.g. one loaded from a DX file, as a distance field.
    pub fn from_grid(grid: SpatialGrid) -> Self {
        Self { grid }
    }

    /// Voxels closer than `valid_dist` to the protein. With no distance, every voxel is inside.
    pub fn mask(&self, valid_dist: Option<f64>) -> Mask {
        match valid_dist {
            Some(cutoff) => Mask {
                dims: self.grid.dims,
                inside: self.grid.values.iter().map(|d| *d < cutoff).collect(),
            },
            None => Mask::full(self.grid.dims),
        }
    }
}

/// Per-voxel flags marking the region of interest, in grid storage order.
#[derive(Clone, Debug, PartialEq)]
pub struct Mask {
    pub dims: [usize; 3],
    pub inside: Vec<bool>,
}

impl Mask {
    /// Every voxel inside.
    pub fn full(dims: [usize; 3]) -> Self {
        Self {
            dims,
            inside: vec![true; dims[0] * dims[1] * dims[2]],
        }
    }

    pub fn new(dims: [usize; 3], inside: Vec<bool>) -> Result<Self> {
        if inside.len() != dims[0] * dims[1] * dims[2] {
            return Err(PmapError::value(format!(
                "Mask of dims {dims:?} has {} entries",
                inside.len()
            )));
        }
        Ok(Self { dims, inside })
    }

    pub fn count(&self) -> usize {
        self.inside.iter().filter(|v| **v).count()
    }

    pub fn check_grid(&self, grid: &SpatialGrid) -> Result<()> {
        if self.dims != grid.dims {
            return Err(PmapError::GridMismatch { property: "dims" });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use lin_alg::f64::Vec3;

    use super::*;
    use crate::{Placement, test_util::atom};

    #[test]
    fn test_single_atom_at_origin() {
        let pitch = 1.5;
        // Odd size: the origin is a voxel center, not a corner shared by 8 voxels.
        let grid = SpatialGrid::cube(7, pitch, Placement::Center(Vec3::new(0., 0., 0.))).unwrap();
        let model = Model {
            atoms: vec![atom(1, "CA", "ALA", 1, [0., 0., 0.])],
        };

        let df = DistanceField::build(&grid, &model).unwrap();
        let [i, j, k] = grid.voxel_of(Vec3::new(0., 0., 0.)).unwrap();
        assert_eq!([i, j, k], [3, 3, 3]);
        let half_diag = 3f64.sqrt() * pitch / 2.;
        assert!(df.grid.get(i, j, k) < half_diag);
        assert!(df.grid.get(i, j, k).abs() < 1e-12);

        // A neighbor is one pitch away.
        assert!((df.grid.get(i + 1, j, k) - pitch).abs() < 1e-12);
    }

    #[test]
    fn test_matches_brute_force() {
        let grid = SpatialGrid::cube(5, 2., Placement::Origin(Vec3::new(-3., -4., -5.))).unwrap();
        let posits = [[0., 0., 0.], [3., -1., 2.], [-2.5, 4., 1.]];
        let mut atoms: Vec<_> = posits
            .iter()
            .enumerate()
            .map(|(i, p)| atom(i as u32 + 1, "CA", "GLY", i as i32 + 1, *p))
            .collect();
        // Far-away ligand must be ignored.
        let mut lig = atom(9, "C1", "LIG", 99, [-2.9, -3.9, -4.9]);
        lig.hetero = true;
        atoms.push(lig);
        let model = Model { atoms };

        let df = DistanceField::build(&grid, &model).unwrap();

        for (c, d) in grid.centers().zip(&df.grid.values) {
            let expected = posits
                .iter()
                .map(|p| dist_sq(c, Vec3::new(p[0], p[1], p[2])).sqrt())
                .fold(f64::INFINITY, f64::min);
            assert!((d - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_no_eligible_atoms() {
        let grid = SpatialGrid::cube(2, 1., Placement::Origin(Vec3::new(0., 0., 0.))).unwrap();
        let mut lig = atom(1, "C1", "LIG", 1, [0., 0., 0.]);
        lig.hetero = true;

        let err = DistanceField::build(&grid, &Model { atoms: vec![lig] }).unwrap_err();
        assert!(err.is_value_error());
        assert!(DistanceField::build(&grid, &Model::default()).is_err());
    }

    #[test]
    fn test_mask_threshold() {
        let grid = SpatialGrid::new(
            Vec3::new(0., 0., 0.),
            Vec3::new(1., 1., 1.),
            [1, 1, 4],
            vec![0.5, 2., 5., f64::INFINITY],
        )
        .unwrap();
        let df = DistanceField::from_grid(grid);

        assert_eq!(df.mask(Some(2.)).inside, vec![true, false, false, false]);
        assert_eq!(df.mask(Some(5.1)).count(), 3);
        assert_eq!(df.mask(None).count(), 4);
        assert_eq!(Mask::full([1, 1, 4]), df.mask(None));
    }
}
