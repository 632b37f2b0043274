//! A uniform 3D scalar field over a box: the container for occupancy counts, probability maps,
//! free energies, and distance fields.
//!
//! Values are stored in OpenDX raster order: x is the slowest axis, z the fastest. The voxel
//! `(i, j, k)` covers `origin + [i, i+1) * delta.x` etc; its center is at `+ 0.5` voxel.

use lin_alg::f64::Vec3;

use crate::{PmapError, Result};

/// Where a new grid sits in space. A center is converted to the origin corner using the grid's
/// extent.
#[derive(Clone, Copy, Debug)]
pub enum Placement {
    Origin(Vec3),
    Center(Vec3),
}

impl Placement {
    /// For callers holding two optional settings, of which exactly one must be set.
    pub fn from_options(origin: Option<Vec3>, center: Option<Vec3>) -> Result<Self> {
        match (origin, center) {
            (Some(o), None) => Ok(Self::Origin(o)),
            (None, Some(c)) => Ok(Self::Center(c)),
            (None, None) => Err(PmapError::value(
                "A grid needs either an origin or a center; neither was given",
            )),
            (Some(_), Some(_)) => Err(PmapError::value(
                "A grid takes an origin or a center, not both",
            )),
        }
    }
}

/// Elementwise reductions over a list of grids.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GridOp {
    Max,
    Sum,
}

#[derive(Clone, Debug)]
pub struct SpatialGrid {
    /// Corner of voxel (0, 0, 0), in Å. Not its center.
    pub origin: Vec3,
    /// Voxel edge lengths, in Å.
    pub delta: Vec3,
    /// Voxel count along x, y, z.
    pub dims: [usize; 3],
    /// Length is always `dims[0] * dims[1] * dims[2]`.
    pub values: Vec<f64>,
}

impl SpatialGrid {
    /// Wrap existing values, e.g. ones read from a file.
    pub fn new(origin: Vec3, delta: Vec3, dims: [usize; 3], values: Vec<f64>) -> Result<Self> {
        let n = dims[0] * dims[1] * dims[2];
        if values.len() != n {
            return Err(PmapError::value(format!(
                "Grid of dims {dims:?} needs {n} values; got {}",
                values.len()
            )));
        }

        Ok(Self {
            origin,
            delta,
            dims,
            values,
        })
    }

    /// An all-zero grid of cubic voxels with edge `pitch`.
    pub fn zeros(dims: [usize; 3], pitch: f64, placement: Placement) -> Result<Self> {
        if dims.contains(&0) {
            return Err(PmapError::value(format!(
                "Grid dims must all be positive: {dims:?}"
            )));
        }
        if !(pitch > 0.) {
            return Err(PmapError::value(format!(
                "Grid pitch must be positive: {pitch}"
            )));
        }

        let origin = match placement {
            Placement::Origin(o) => o,
            Placement::Center(c) => Vec3::new(
                c.x - dims[0] as f64 * pitch / 2.,
                c.y - dims[1] as f64 * pitch / 2.,
                c.z - dims[2] as f64 * pitch / 2.,
            ),
        };

        Self::new(
            origin,
            Vec3::new(pitch, pitch, pitch),
            dims,
            vec![0.; dims[0] * dims[1] * dims[2]],
        )
    }

    /// A `size × size × size` grid; the shape every map in the pipeline uses.
    pub fn cube(size: usize, pitch: f64, placement: Placement) -> Result<Self> {
        Self::zeros([size; 3], pitch, placement)
    }

    /// An all-zero grid with the same geometry as this one.
    pub fn zeros_like(&self) -> Self {
        Self {
            origin: self.origin,
            delta: self.delta,
            dims: self.dims,
            values: vec![0.; self.values.len()],
        }
    }

    /// The same geometry, carrying new values. `values` must have this grid's length.
    pub(crate) fn with_values(&self, values: Vec<f64>) -> Self {
        debug_assert_eq!(values.len(), self.values.len());
        Self {
            origin: self.origin,
            delta: self.delta,
            dims: self.dims,
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Å³
    pub fn voxel_volume(&self) -> f64 {
        self.delta.x * self.delta.y * self.delta.z
    }

    #[inline]
    pub fn index(&self, i: usize, j: usize, k: usize) -> usize {
        (i * self.dims[1] + j) * self.dims[2] + k
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize, k: usize) -> f64 {
        self.values[self.index(i, j, k)]
    }

    pub fn center_of(&self, i: usize, j: usize, k: usize) -> Vec3 {
        Vec3::new(
            self.origin.x + (i as f64 + 0.5) * self.delta.x,
            self.origin.y + (j as f64 + 0.5) * self.delta.y,
            self.origin.z + (k as f64 + 0.5) * self.delta.z,
        )
    }

    /// Voxel centers in storage order. Call again to iterate again.
    pub fn centers(&self) -> VoxelCenters<'_> {
        VoxelCenters {
            grid: self,
            next: 0,
        }
    }

    /// The voxel containing `point`, if it's inside the grid's extent.
    pub fn voxel_of(&self, point: Vec3) -> Option<[usize; 3]> {
        let f = [
            ((point.x - self.origin.x) / self.delta.x).floor(),
            ((point.y - self.origin.y) / self.delta.y).floor(),
            ((point.z - self.origin.z) / self.delta.z).floor(),
        ];

        let mut out = [0; 3];
        for axis in 0..3 {
            // Also rejects NaN.
            if !(f[axis] >= 0. && f[axis] < self.dims[axis] as f64) {
                return None;
            }
            out[axis] = f[axis] as usize;
        }
        Some(out)
    }

    /// Value of the voxel whose center is nearest to `point`, or `fill` if the point lies
    /// outside the grid.
    pub fn interpolate_nearest(&self, point: Vec3, fill: f64) -> f64 {
        match self.voxel_of(point) {
            Some([i, j, k]) => self.get(i, j, k),
            None => fill,
        }
    }

    /// Add one count per point to the voxel containing it. Points outside the extent are skipped;
    /// returns how many were.
    pub fn accumulate_histogram<I>(&mut self, points: I) -> usize
    where
        I: IntoIterator<Item = Vec3>,
    {
        let mut dropped = 0;
        for p in points {
            match self.voxel_of(p) {
                Some([i, j, k]) => {
                    let idx = self.index(i, j, k);
                    self.values[idx] += 1.;
                }
                None => dropped += 1,
            }
        }
        dropped
    }

    /// Strict (bitwise float) equality of dims, origin and delta.
    pub fn check_consistent(&self, other: &Self) -> Result<()> {
        if self.dims != other.dims {
            return Err(PmapError::GridMismatch { property: "dims" });
        }
        if !vec_eq(self.origin, other.origin) {
            return Err(PmapError::GridMismatch { property: "origin" });
        }
        if !vec_eq(self.delta, other.delta) {
            return Err(PmapError::GridMismatch { property: "delta" });
        }
        Ok(())
    }

    /// Check that every grid in the list shares the first one's geometry.
    pub fn check_all_consistent(grids: &[Self]) -> Result<()> {
        let Some(first) = grids.first() else {
            return Err(PmapError::value("Empty grid list"));
        };
        for g in &grids[1..] {
            first.check_consistent(g)?;
        }
        Ok(())
    }

    /// Reduce a list of same-geometry grids into a new grid. Inputs are left untouched.
    pub fn combine(grids: &[Self], op: GridOp) -> Result<Self> {
        Self::check_all_consistent(grids)?;

        let mut values = grids[0].values.clone();
        for g in &grids[1..] {
            for (acc, v) in values.iter_mut().zip(&g.values) {
                *acc = match op {
                    GridOp::Max => acc.max(*v),
                    GridOp::Sum => *acc + v,
                };
            }
        }

        Ok(grids[0].with_values(values))
    }
}

/// Iterator over voxel centers; see [`SpatialGrid::centers`].
pub struct VoxelCenters<'a> {
    grid: &'a SpatialGrid,
    next: usize,
}

impl Iterator for VoxelCenters<'_> {
    type Item = Vec3;

    fn next(&mut self) -> Option<Vec3> {
        if self.next >= self.grid.len() {
            return None;
        }

        let [_, ny, nz] = self.grid.dims;
        let n = self.next;
        self.next += 1;

        Some(self.grid.center_of(n / (ny * nz), (n / nz) % ny, n % nz))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rem = self.grid.len() - self.next;
        (rem, Some(rem))
    }
}

impl ExactSizeIterator for VoxelCenters<'_> {}

#[inline]
pub(crate) fn vec_eq(a: Vec3, b: Vec3) -> bool {
    a.x == b.x && a.y == b.y && a.z == b.z
}

#[inline]
pub(crate) fn dist_sq(a: Vec3, b: Vec3) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    let dz = a.z - b.z;
    dx * dx + dy * dy + dz * dz
}
