//! Combining maps across independent runs: a left-to-right pipeline of reductions and rescalings
//! over a list of same-geometry grids, optionally restricted to a mask.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{GridOp, Mask, PmapError, Result, SpatialGrid, normalize::fill_outside};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombineOp {
    /// Elementwise sum; collapses the list to one grid.
    Sum,
    /// Elementwise maximum; collapses the list to one grid.
    Max,
    /// Per grid: in-mask values rescaled to sum to 1.
    Probability,
    /// Per grid: in-mask values replaced by their z-score over the mask.
    #[serde(rename = "zscore")]
    ZScore,
}

impl fmt::Display for CombineOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let val = match self {
            Self::Sum => "sum",
            Self::Max => "max",
            Self::Probability => "probability",
            Self::ZScore => "zscore",
        };
        write!(f, "{val}")
    }
}

impl FromStr for CombineOp {
    type Err = PmapError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sum" => Ok(Self::Sum),
            "max" => Ok(Self::Max),
            "probability" => Ok(Self::Probability),
            "zscore" => Ok(Self::ZScore),
            other => Err(PmapError::not_implemented(format!("invalid mode: {other}"))),
        }
    }
}

/// Run `ops` in order over `grids`. Inputs are not modified. With a mask, every output has
/// out-of-mask voxels set to `min(in-mask) - 1`.
pub fn combine(
    grids: &[SpatialGrid],
    ops: &[CombineOp],
    mask: Option<&Mask>,
) -> Result<Vec<SpatialGrid>> {
    SpatialGrid::check_all_consistent(grids)?;
    if let Some(m) = mask {
        m.check_grid(&grids[0])?;
    }

    let mut current = grids.to_vec();

    for op in ops {
        current = match op {
            CombineOp::Sum => vec![reduce(&current, GridOp::Sum, mask)?],
            CombineOp::Max => vec![reduce(&current, GridOp::Max, mask)?],
            CombineOp::Probability => current
                .iter()
                .map(|g| to_probability(g, mask))
                .collect::<Result<Vec<_>>>()?,
            CombineOp::ZScore => current.iter().map(|g| to_zscore(g, mask)).collect(),
        };
    }

    Ok(current)
}

/// The elementwise maximum over maps of equal geometry.
pub fn grid_max(grids: &[SpatialGrid]) -> Result<SpatialGrid> {
    SpatialGrid::combine(grids, GridOp::Max)
}

/// The elementwise sum over maps of equal geometry.
pub fn grid_sum(grids: &[SpatialGrid]) -> Result<SpatialGrid> {
    SpatialGrid::combine(grids, GridOp::Sum)
}

fn reduce(grids: &[SpatialGrid], op: GridOp, mask: Option<&Mask>) -> Result<SpatialGrid> {
    let mut out = SpatialGrid::combine(grids, op)?;
    if let Some(m) = mask {
        fill_outside(&mut out.values, m);
    }
    Ok(out)
}

fn inside<'a>(values: &'a [f64], mask: Option<&'a Mask>) -> impl Iterator<Item = f64> + 'a {
    values
        .iter()
        .enumerate()
        .filter(move |(i, _)| mask.is_none_or(|m| m.inside[*i]))
        .map(|(_, v)| *v)
}

fn to_probability(grid: &SpatialGrid, mask: Option<&Mask>) -> Result<SpatialGrid> {
    let sum: f64 = inside(&grid.values, mask).sum();
    if sum == 0. {
        return Err(PmapError::value(
            "Can't rescale to probabilities: in-mask values sum to zero",
        ));
    }

    let mut values: Vec<f64> = grid.values.iter().map(|v| v / sum).collect();
    if let Some(m) = mask {
        fill_outside(&mut values, m);
    }
    Ok(grid.with_values(values))
}

/// Population statistics over the mask. A constant map becomes all zeros.
fn to_zscore(grid: &SpatialGrid, mask: Option<&Mask>) -> SpatialGrid {
    let n = inside(&grid.values, mask).count();

    let mut values = if n == 0 {
        grid.values.clone()
    } else {
        let mean = inside(&grid.values, mask).sum::<f64>() / n as f64;
        let var = inside(&grid.values, mask)
            .map(|v| (v - mean).powi(2))
            .sum::<f64>()
            / n as f64;
        let std = var.sqrt();

        grid.values
            .iter()
            .map(|v| if std > 0. { (v - mean) / std } else { 0. })
            .collect()
    };

    if let Some(m) = mask {
        fill_outside(&mut values, m);
    }
    grid.with_values(values)
}

#[cfg(test)]
mod tests {
    use lin_alg::f64::Vec3;

    use super::*;
    use crate::Placement;

    fn grid(values: Vec<f64>) -> SpatialGrid {
        SpatialGrid::new(
            Vec3::new(-1., -1., -1.),
            Vec3::new(1., 1., 1.),
            [2, 2, 2],
            values,
        )
        .unwrap()
    }

    fn mask() -> Mask {
        Mask::new(
            [2, 2, 2],
            vec![true, true, true, true, false, false, true, true],
        )
        .unwrap()
    }

    #[test]
    fn test_parse_ops() {
        assert_eq!("ZScore".parse::<CombineOp>().unwrap(), CombineOp::ZScore);
        assert_eq!("max".parse::<CombineOp>().unwrap(), CombineOp::Max);
        let err = "median".parse::<CombineOp>().unwrap_err();
        assert!(matches!(err, PmapError::NotImplemented(_)));
        assert!(err.to_string().contains("invalid mode"));
    }

    #[test]
    fn test_grid_max_elementwise() {
        let a = grid(vec![0.1, 0.5, 0.2, 0.9, 0., 0.3, 0.3, 0.05]);
        let b = grid(vec![0.4, 0.2, 0.2, 0.1, 0.7, 0.3, 0.2, 0.06]);
        let m = grid_max(&[a.clone(), b.clone()]).unwrap();
        for i in 0..8 {
            assert_eq!(m.values[i], a.values[i].max(b.values[i]));
        }

        let c = SpatialGrid::cube(3, 1., Placement::Origin(a.origin)).unwrap();
        assert!(grid_max(&[a, c]).unwrap_err().is_value_error());
    }

    #[test]
    fn test_empty_lists() {
        assert!(grid_max(&[]).is_err());
        assert!(grid_sum(&[]).is_err());
        assert!(combine(&[], &[CombineOp::Sum], None).is_err());
    }

    #[test]
    fn test_singleton_identity() {
        let g = grid(vec![1., 2., 3., 4., 5., 6., 7., 8.]);
        for op in [CombineOp::Sum, CombineOp::Max] {
            let out = combine(std::slice::from_ref(&g), &[op], None).unwrap();
            assert_eq!(out.len(), 1);
            assert_eq!(out[0].values, g.values);
        }
    }

    #[test]
    fn test_sum_with_mask_sentinel() {
        let a = grid(vec![1., 2., 3., 4., 5., 6., 7., 8.]);
        let b = grid(vec![1.; 8]);
        let out = combine(&[a, b], &[CombineOp::Sum], Some(&mask())).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].values, vec![2., 3., 4., 5., 1., 1., 8., 9.]);
    }

    #[test]
    fn test_probability_per_grid() {
        let a = grid(vec![1., 1., 1., 1., 100., 100., 2., 4.]);
        let b = grid(vec![0., 0., 0., 0., 0., 0., 0., 5.]);
        let out = combine(&[a, b], &[CombineOp::Probability], Some(&mask())).unwrap();
        assert_eq!(out.len(), 2);

        let m = mask();
        for g in &out {
            let s: f64 = inside(&g.values, Some(&m)).sum();
            assert!((s - 1.).abs() < 1e-12);
        }
        assert!((out[0].values[7] - 0.4).abs() < 1e-12);
        assert!(out[0].values[4] < 0.);
    }

    #[test]
    fn test_zscore() {
        let g = grid(vec![1., 2., 3., 4., 99., 99., 5., 6.]);
        let out = combine(&[g], &[CombineOp::ZScore], Some(&mask())).unwrap();
        let m = mask();

        let z: Vec<f64> = inside(&out[0].values, Some(&m)).collect();
        let mean = z.iter().sum::<f64>() / z.len() as f64;
        let var = z.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / z.len() as f64;
        assert!(mean.abs() < 1e-12);
        assert!((var - 1.).abs() < 1e-12);

        let min_z = z.iter().cloned().fold(f64::INFINITY, f64::min);
        assert_eq!(out[0].values[4], min_z - 1.);

        let flat = combine(&[grid(vec![3.; 8])], &[CombineOp::ZScore], None).unwrap();
        assert!(flat[0].values.iter().all(|v| *v == 0.));
    }

    #[test]
    fn test_pipeline_order() {
        let a = grid(vec![1., 0., 0., 0., 0., 0., 0., 1.]);
        let b = grid(vec![0., 0., 0., 0., 0., 0., 0., 2.]);

        // Rescale each run, then take the max over runs.
        let out = combine(&[a, b], &[CombineOp::Probability, CombineOp::Max], None).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].values[0], 0.5);
        assert_eq!(out[0].values[7], 1.);
    }

    #[test]
    fn test_mismatch_names_property() {
        let a = grid(vec![0.; 8]);
        let mut b = a.clone();
        b.delta = Vec3::new(0.5, 0.5, 0.5);
        let err = combine(&[a, b], &[CombineOp::Max], None).unwrap_err();
        assert!(err.to_string().contains("delta"));
    }
}
