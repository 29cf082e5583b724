//! 心动噪声回归.
//!
//! 把最终相位投影按每个样本自身的相位展开回时间轴, 作为单个回归量 (带截距) 从数据中回归掉.

use itertools::izip;
use ndarray::{s, Array1, Array2, Array3, Array4, ArrayView3, ArrayView4, Axis};

use crate::data::map_slices;
use crate::fitting;
use crate::phase::PhaseBinGrid;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 回归方式.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum GlmMode {
    /// 不回归.
    #[default]
    Off,

    /// 每个体素沿时间方向单独拟合一个系数.
    Temporal,

    /// 每个时间点在空间上单独拟合一个系数.
    Spatial,
}

/// 回归结果.
#[derive(Clone, Debug)]
pub struct GlmResult {
    /// 拟合系数. `Temporal` 时形状为 `(z, H, W)`, `Spatial` 时为 `(1, 1, t)`.
    pub coefficients: Array3<f64>,

    /// 去除噪声后的数据, `(z, H, W, t)`.
    pub filtered: Array4<f64>,

    /// 被去除的部分, `(z, H, W, t)`.
    pub removed: Array4<f64>,
}

/// 心动噪声回归量: 每个体素在每个时间点取其相位最近 bin 上的 `rawapp` 值.
///
/// `phases` 形状为 `(z, t)`, 掩码外为 0.
pub fn cardiac_noise(
    rawapp: ArrayView4<f64>,
    phases: &Array2<f64>,
    grid: &PhaseBinGrid,
    mask: ArrayView3<f64>,
) -> Array4<f64> {
    let (len_z, h, w, _) = rawapp.dim();
    let timepoints = phases.len_of(Axis(1));
    let mut noise = Array4::zeros((len_z, h, w, timepoints));
    for z in 0..len_z {
        let bins: Vec<usize> = phases.row(z).iter().map(|&p| grid.nearest(p)).collect();
        for ((y, x), &m) in mask.index_axis(Axis(0), z).indexed_iter() {
            if m == 0.0 {
                continue;
            }
            for (t, &b) in bins.iter().enumerate() {
                noise[[z, y, x, t]] = rawapp[[z, y, x, b]];
            }
        }
    }
    noise
}

/// 拟合 `y = a + b * x`, 返回 `b`. `x` 为常数或方程奇异时为 0.
fn slope(x: &[f64], y: &[f64]) -> f64 {
    let (lo, hi) = x.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if hi - lo <= f64::EPSILON * hi.abs().max(lo.abs()).max(1.0) {
        return 0.0;
    }
    fitting::polyfit(x, y, 1).map_or(0.0, |p| p.0[1])
}

/// 回归掉 `noise`.
///
/// `data` 与 `noise` 形状均为 `(z, H, W, t)`, 只有 `mask` 非零的体素参与. `mode` 为
/// [`GlmMode::Off`] 时返回 `None`.
pub fn regress_noise(
    data: ArrayView4<f64>,
    noise: ArrayView4<f64>,
    mask: ArrayView3<f64>,
    mode: GlmMode,
) -> Option<GlmResult> {
    let (len_z, h, w, timepoints) = data.dim();
    let mut removed = Array4::zeros(data.dim());
    let coefficients = match mode {
        GlmMode::Off => return None,
        GlmMode::Temporal => {
            let slices = map_slices(len_z, |z| {
                let mut coefs = Array2::<f64>::zeros((h, w));
                let mut rm = Array3::<f64>::zeros((h, w, timepoints));
                for ((y, x), &m) in mask.index_axis(Axis(0), z).indexed_iter() {
                    if m == 0.0 {
                        continue;
                    }
                    let xs = noise.slice(s![z, y, x, ..]).to_vec();
                    let ys = data.slice(s![z, y, x, ..]).to_vec();
                    let b = slope(&xs, &ys);
                    coefs[[y, x]] = b;
                    rm.slice_mut(s![y, x, ..]).assign(&Array1::from_iter(xs.iter().map(|v| b * v)));
                }
                (coefs, rm)
            });
            let mut coefficients = Array3::zeros((len_z, h, w));
            for (z, (c, r)) in slices.into_iter().enumerate() {
                coefficients.index_axis_mut(Axis(0), z).assign(&c);
                removed.index_axis_mut(Axis(0), z).assign(&r);
            }
            coefficients
        }
        GlmMode::Spatial => {
            let voxels: Vec<(usize, usize, usize)> = mask
                .indexed_iter()
                .filter_map(|(idx, &m)| (m != 0.0).then_some(idx))
                .collect();
            let mut coefficients = Array3::zeros((1, 1, timepoints));
            for t in 0..timepoints {
                let xs: Vec<f64> = voxels.iter().map(|&(z, y, x)| noise[[z, y, x, t]]).collect();
                let ys: Vec<f64> = voxels.iter().map(|&(z, y, x)| data[[z, y, x, t]]).collect();
                let b = slope(&xs, &ys);
                coefficients[[0, 0, t]] = b;
                for (&(z, y, x), &v) in izip!(&voxels, &xs) {
                    removed[[z, y, x, t]] = b * v;
                }
            }
            coefficients
        }
    };
    let filtered = &data - &removed;
    log::info!("regressed cardiac noise ({:?})", mode);
    Some(GlmResult {
        coefficients,
        filtered,
        removed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::PhaseConvention;

    fn f64_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-8
    }

    #[test]
    fn test_cardiac_noise() {
        let grid = PhaseBinGrid::new(4, PhaseConvention::Centric);
        let rawapp = Array4::from_shape_fn((1, 1, 2, 4), |(_, _, x, b)| (10 * x + b) as f64);
        let phases = Array2::from_shape_vec((1, 3), grid.values()[1..].to_vec()).unwrap();
        let mask = Array3::from_shape_vec((1, 1, 2), vec![1.0, 0.0]).unwrap();
        let noise = cardiac_noise(rawapp.view(), &phases, &grid, mask.view());
        assert_eq!(noise.slice(s![0, 0, 0, ..]).to_vec(), vec![1.0, 2.0, 3.0]);
        assert!(noise.slice(s![0, 0, 1, ..]).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_temporal_regression() {
        let noise = Array4::from_shape_fn((1, 1, 2, 50), |(_, _, _, t)| (t as f64 * 0.7).sin());
        let data = Array4::from_shape_fn((1, 1, 2, 50), |(_, _, x, t)| {
            100.0 + (x as f64 + 2.0) * noise[[0, 0, x, t]] + if t % 2 == 0 { 0.01 } else { -0.01 }
        });
        let mask = Array3::ones((1, 1, 2));
        let r = regress_noise(data.view(), noise.view(), mask.view(), GlmMode::Temporal).unwrap();
        assert!((r.coefficients[[0, 0, 0]] - 2.0).abs() < 0.01);
        assert!((r.coefficients[[0, 0, 1]] - 3.0).abs() < 0.01);
        assert!(r.filtered.iter().all(|v| (v - 100.0).abs() < 0.05));
        assert!(f64_eq(r.removed[[0, 0, 1, 3]], r.coefficients[[0, 0, 1]] * noise[[0, 0, 1, 3]]));
    }

    #[test]
    fn test_spatial_regression_and_off() {
        let noise = Array4::from_shape_fn((1, 2, 3, 4), |(_, y, x, t)| (y * 3 + x + t) as f64);
        let data = noise.mapv(|v| 5.0 + 1.5 * v);
        let mask = Array3::ones((1, 2, 3));
        let r = regress_noise(data.view(), noise.view(), mask.view(), GlmMode::Spatial).unwrap();
        assert_eq!(r.coefficients.dim(), (1, 1, 4));
        assert!(r.coefficients.iter().all(|&c| (c - 1.5).abs() < 1e-6));
        assert!(r.filtered.iter().all(|v| (v - 5.0).abs() < 1e-6));
        assert!(regress_noise(data.view(), noise.view(), mask.view(), GlmMode::Off).is_none());
    }

    /// 回归量为常数时系数为 0, 数据原样保留.
    #[test]
    fn test_constant_regressor() {
        assert_eq!(slope(&[2.0; 8], &[1.0, 3.0, 2.0, 5.0, 4.0, 0.0, 1.0, 2.0]), 0.0);
        assert_eq!(slope(&[], &[]), 0.0);
        let noise = Array4::from_elem((1, 1, 1, 6), 7.0);
        let data = Array4::from_shape_fn((1, 1, 1, 6), |(_, _, _, t)| t as f64);
        let mask = Array3::ones((1, 1, 1));
        let r = regress_noise(data.view(), noise.view(), mask.view(), GlmMode::Temporal).unwrap();
        assert_eq!(r.coefficients[[0, 0, 0]], 0.0);
        assert_eq!(r.filtered, data);
    }
}
