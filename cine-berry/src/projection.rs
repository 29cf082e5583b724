//! 相位投影.
//!
//! 按每个时间点的心动相位, 把每个体素的时间序列重新分 bin, 得到一个心动周期内的
//! 体素信号 (`app`) 和原始强度电影 (`cine`).
//!
//! # 注意
//!
//! 1. 各切片之间相互独立, 开启 `rayon` 特性时按切片并行.
//! 2. 累积权重为 0 的 bin 权重视为 1, 因此信号为 0 而不是 NaN.

use ndarray::{s, Array2, Array3, Array4, ArrayView3, Axis};

use crate::consts::APP_SMOOTH_DIVISOR;
use crate::data::{map_slices, AcquisitionGeometry};
use crate::filter::FilterBand;
use crate::phase::{PhaseBinGrid, PhaseConvention};
use crate::prep::NormalizedData;
use crate::resample::{interp_linear, Gridder};
use crate::{stats, vessel, ProcessConfig};

/// 每个切片每个时间点的卷绕相位, 形状 `(z, t)`.
///
/// 第 `z` 个切片第 `t` 个时间点的采集时刻为 `t * tr + slice_times[z]`, 在切片分辨率时间轴 `slice_axis`
/// 上对展开相位插值后卷绕.
pub fn slice_phase_values(
    unwrapped: &[f64],
    slice_axis: &[f64],
    geometry: &AcquisitionGeometry,
    timepoints: usize,
    convention: PhaseConvention,
) -> Array2<f64> {
    let mut out = Array2::zeros((geometry.num_slices(), timepoints));
    for (z, mut row) in out.axis_iter_mut(Axis(0)).enumerate() {
        for (v, t) in row.iter_mut().zip(geometry.acquisition_times(z, timepoints)) {
            *v = convention.phase_mod(interp_linear(slice_axis, unwrapped, t));
        }
    }
    out
}

/// 每个切片参与投影的时间点.
///
/// `bad` 为切片分辨率的坏点掩码. 第 `z` 个切片第 `t` 个时间点对应交织波形的第
/// `t * num_steps + offsets[z]` 个样本.
pub fn valid_timepoints(
    bad: Option<&[bool]>,
    geometry: &AcquisitionGeometry,
    timepoints: usize,
) -> Vec<Vec<usize>> {
    (0..geometry.num_slices())
        .map(|z| {
            (0..timepoints)
                .filter(|&t| {
                    bad.map_or(true, |b| {
                        !b.get(t * geometry.num_steps + geometry.offsets[z])
                            .copied()
                            .unwrap_or(false)
                    })
                })
                .collect()
        })
        .collect()
}

/// 环形一阶差分的极值: `(最大值, 其相位, 最小值, 其相位)`.
pub fn circular_derivs(curve: &[f64], grid: &PhaseBinGrid) -> [f64; 4] {
    let n = curve.len();
    if n == 0 {
        return [0.0; 4];
    }
    let diffs: Vec<f64> = (0..n).map(|i| curve[(i + 1) % n] - curve[i]).collect();
    let values = grid.values();
    let hi = stats::argmax(&diffs).unwrap_or(0);
    let lo = stats::argmin(&diffs).unwrap_or(0);
    [diffs[hi], values[hi], diffs[lo], values[lo]]
}

/// 相位投影结果. 4D 数组形状均为 `(z, H, W, N)`, 除 `derivatives` 为 `(z, H, W, 4)`.
#[derive(Clone, Debug)]
pub struct PhaseProjection {
    /// 平滑, 翻转 (可选) 并把最小值平移到 0 之后的曲线.
    pub app: Array4<f64>,

    /// 平滑后, 翻转和平移之前的曲线.
    pub rawapp: Array4<f64>,

    /// `app` 除以体素均值.
    pub normapp: Array4<f64>,

    /// 原始强度 (未去均值) 的分 bin 平均.
    pub cine: Array4<f64>,

    /// 每个 bin 的累积权重 (零权重已替换为 1).
    pub weights: Array4<f64>,

    /// [`circular_derivs`] 的结果.
    pub derivatives: Array4<f64>,

    /// 由导数极值判定的翻转符号, `(z, H, W)`. 掩码外为 1.
    pub flips: Array3<f64>,
}

/// 单个切片的投影.
struct SliceProjection {
    app: Array3<f64>,
    rawapp: Array3<f64>,
    normapp: Array3<f64>,
    cine: Array3<f64>,
    weights: Array3<f64>,
    derivatives: Array3<f64>,
    flips: Array2<f64>,
}

/// 投影器. 持有相位网格, congrid 算子和平滑滤波器.
#[derive(Clone, Debug)]
pub struct PhaseProjector<'a> {
    grid: PhaseBinGrid,
    gridder: &'a Gridder,
    smoother: Option<FilterBand>,
    flip_arteries: bool,
}

impl<'a> PhaseProjector<'a> {
    /// 由配置构造. `gridder` 必须是 `grid` 上的循环 congrid 算子.
    pub fn new(grid: PhaseBinGrid, gridder: &'a Gridder, config: &ProcessConfig) -> Self {
        let fs = 1.0 / grid.step();
        Self {
            grid,
            gridder,
            smoother: config
                .smooth_app
                .then(|| FilterBand::lowpass(fs / APP_SMOOTH_DIVISOR)),
            flip_arteries: config.flip_arteries,
        }
    }

    /// 投影 `mask` 非零的体素.
    ///
    /// `phases` 由 [`slice_phase_values`] 得到, `valid` 由 [`valid_timepoints`] 得到.
    pub fn project(
        &self,
        data: &NormalizedData,
        mask: ArrayView3<f64>,
        phases: &Array2<f64>,
        valid: &[Vec<usize>],
    ) -> PhaseProjection {
        let (len_z, h, w, _) = data.demeaned.dim();
        let n = self.grid.n;
        let slices = map_slices(len_z, |z| {
            self.project_slice(data, mask, z, &phases.row(z).to_vec(), &valid[z])
        });

        let mut out = PhaseProjection {
            app: Array4::zeros((len_z, h, w, n)),
            rawapp: Array4::zeros((len_z, h, w, n)),
            normapp: Array4::zeros((len_z, h, w, n)),
            cine: Array4::zeros((len_z, h, w, n)),
            weights: Array4::zeros((len_z, h, w, n)),
            derivatives: Array4::zeros((len_z, h, w, 4)),
            flips: Array3::ones((len_z, h, w)),
        };
        for (z, sp) in slices.into_iter().enumerate() {
            out.app.index_axis_mut(Axis(0), z).assign(&sp.app);
            out.rawapp.index_axis_mut(Axis(0), z).assign(&sp.rawapp);
            out.normapp.index_axis_mut(Axis(0), z).assign(&sp.normapp);
            out.cine.index_axis_mut(Axis(0), z).assign(&sp.cine);
            out.weights.index_axis_mut(Axis(0), z).assign(&sp.weights);
            out.derivatives.index_axis_mut(Axis(0), z).assign(&sp.derivatives);
            out.flips.index_axis_mut(Axis(0), z).assign(&sp.flips);
        }
        let arteries = out.flips.iter().filter(|&&f| f < 0.0).count();
        log::debug!("{} voxels have artery-like derivative shapes", arteries);
        out
    }

    fn project_slice(
        &self,
        data: &NormalizedData,
        mask: ArrayView3<f64>,
        z: usize,
        phases: &[f64],
        valid: &[usize],
    ) -> SliceProjection {
        let (_, h, w, _) = data.demeaned.dim();
        let n = self.grid.n;
        let mut sp = SliceProjection {
            app: Array3::zeros((h, w, n)),
            rawapp: Array3::zeros((h, w, n)),
            normapp: Array3::zeros((h, w, n)),
            cine: Array3::zeros((h, w, n)),
            weights: Array3::zeros((h, w, n)),
            derivatives: Array3::zeros((h, w, 4)),
            flips: Array2::ones((h, w)),
        };

        // 同一切片内所有体素共享相位, 因此 congrid 结果只需计算一次.
        let taps: Vec<_> = valid
            .iter()
            .map(|&t| (t, self.gridder.congrid(phases[t], 1.0)))
            .collect();
        let mut weights = vec![0.0; n];
        for (_, ts) in &taps {
            for tap in ts {
                weights[tap.index] += tap.weight;
            }
        }
        if weights.iter().any(|&wt| wt == 0.0) {
            log::debug!("slice {} has empty phase bins", z);
        }
        weights.iter_mut().filter(|wt| **wt == 0.0).for_each(|wt| *wt = 1.0);

        let fs = 1.0 / self.grid.step();
        for ((y, x), &m) in mask.index_axis(Axis(0), z).indexed_iter() {
            if m == 0.0 {
                continue;
            }
            let demeaned = data.demeaned.slice(s![z, y, x, ..]);
            let raw = data.detrended.slice(s![z, y, x, ..]);
            let mut app = vec![0.0; n];
            let mut cine = vec![0.0; n];
            for (t, ts) in &taps {
                for tap in ts {
                    app[tap.index] -= tap.weight * demeaned[*t];
                    cine[tap.index] += tap.weight * raw[*t];
                }
            }
            app.iter_mut().zip(&weights).for_each(|(a, wt)| *a /= wt);
            cine.iter_mut().zip(&weights).for_each(|(c, wt)| *c /= wt);

            let smoothed = match &self.smoother {
                Some(band) => band.apply(&app, fs, true),
                None => app.clone(),
            };
            let derivs = circular_derivs(&smoothed, &self.grid);
            let flip = vessel::derivative_flip(derivs[0], derivs[2]);

            let mean = stats::mean(&smoothed);
            let mut corrected: Vec<f64> = if self.flip_arteries {
                smoothed.iter().map(|&v| (v - mean) * flip + mean).collect()
            } else {
                smoothed.clone()
            };
            let min = corrected.iter().copied().fold(f64::INFINITY, f64::min);
            corrected.iter_mut().for_each(|v| *v -= min);
            let voxel_mean = data.means[[z, y, x]];

            for (i, &c) in corrected.iter().enumerate() {
                sp.app[[y, x, i]] = c;
                sp.normapp[[y, x, i]] = stats::safe_div(c, voxel_mean);
                sp.rawapp[[y, x, i]] = smoothed[i];
                sp.cine[[y, x, i]] = cine[i];
                sp.weights[[y, x, i]] = weights[i];
            }
            for (i, &d) in derivs.iter().enumerate() {
                sp.derivatives[[y, x, i]] = d;
            }
            sp.flips[[y, x]] = flip;
        }
        sp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prep::normalize_voxels;
    use crate::resample::GridKernel;

    fn f64_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-8
    }

    fn setup(n: usize) -> (PhaseBinGrid, Gridder) {
        let grid = PhaseBinGrid::new(n, PhaseConvention::Centric);
        let gridder = Gridder::new(grid.axis(), 3.0, GridKernel::Kaiser, true).unwrap();
        (grid, gridder)
    }

    #[test]
    fn test_circular_derivs() {
        let (grid, _) = setup(4);
        let d = circular_derivs(&[0.0, 1.0, 3.0, 0.5], &grid);
        assert!(f64_eq(d[0], 2.0));
        assert!(f64_eq(d[1], grid.values()[1]));
        // 环绕: 0.5 -> 0.0.
        assert!(f64_eq(d[2], -2.5));
        assert!(f64_eq(d[3], grid.values()[3]));
    }

    #[test]
    fn test_valid_timepoints() {
        let geom = AcquisitionGeometry::sequential(1.0, 2).unwrap();
        let bad = [false, false, true, false, false, true];
        let v = valid_timepoints(Some(&bad[..]), &geom, 3);
        assert_eq!(v[0], vec![0, 2]);
        assert_eq!(v[1], vec![0, 1]);
        assert_eq!(valid_timepoints(None, &geom, 3)[1], vec![0, 1, 2]);
    }

    /// 所有样本集中在少数相位上, 大量 bin 没有权重, 结果仍然没有 NaN/Inf.
    #[test]
    fn test_sparse_phases_have_no_nan() {
        let (grid, gridder) = setup(32);
        let data = Array4::from_shape_fn((2, 2, 2, 20), |(_, _, _, t)| 100.0 + (t % 3) as f64);
        let mask = Array3::ones((2, 2, 2));
        let norm = normalize_voxels(data.view(), mask.view(), 0);
        let phases = Array2::from_shape_fn((2, 20), |(_, t)| if t % 2 == 0 { 0.0 } else { 1.0 });
        let valid = vec![(0..20).collect::<Vec<_>>(); 2];
        let config = ProcessConfig::default();
        let p = PhaseProjector::new(grid, &gridder, &config).project(&norm, mask.view(), &phases, &valid);
        for arr in [&p.app, &p.rawapp, &p.normapp, &p.cine, &p.weights] {
            assert!(arr.iter().all(|v| v.is_finite()));
        }
        assert!(p.weights.iter().all(|&w| w > 0.0));
        assert!(p.app.iter().all(|&v| v >= -1e-12));
    }

    /// 正弦脉动的体素被投影为一个周期的正弦, 掩码外的体素为 0.
    #[test]
    fn test_projects_sinusoid() {
        let (grid, gridder) = setup(16);
        let timepoints = 400;
        let conv = PhaseConvention::Centric;
        let phases = Array2::from_shape_fn((1, timepoints), |(_, t)| conv.phase_mod(t as f64 * 0.77));
        let data = Array4::from_shape_fn((1, 1, 2, timepoints), |(_, _, _, t)| {
            1000.0 + 10.0 * phases[[0, t]].cos()
        });
        let mask = Array3::from_shape_vec((1, 1, 2), vec![1.0, 0.0]).unwrap();
        let norm = normalize_voxels(data.view(), mask.view(), 0);
        let valid = vec![(0..timepoints).collect::<Vec<_>>()];
        let config = ProcessConfig {
            smooth_app: false,
            ..Default::default()
        };
        let p = PhaseProjector::new(grid, &gridder, &config).project(&norm, mask.view(), &phases, &valid);

        for (i, b) in grid.values().iter().enumerate() {
            // app 为取反后的信号.
            assert!((p.rawapp[[0, 0, 0, i]] + 10.0 * b.cos()).abs() < 0.8, "bin {i}");
            assert!((p.cine[[0, 0, 0, i]] - 1000.0 - 10.0 * b.cos()).abs() < 0.8);
            assert_eq!(p.app[[0, 0, 1, i]], 0.0);
        }
        let min = p.app.slice(s![0, 0, 0, ..]).iter().copied().fold(f64::INFINITY, f64::min);
        assert!(min.abs() < 1e-12);
        assert!((p.normapp[[0, 0, 0, 0]] - p.app[[0, 0, 0, 0]] / 1000.0).abs() < 1e-6);
        assert_eq!(p.flips[[0, 0, 1]], 1.0);
    }

    /// 不翻转时, `rawapp` 平移到最小值为 0 后与 `app` 相同 (两者都经过平滑).
    #[test]
    fn test_rawapp_is_smoothed() {
        let (grid, gridder) = setup(16);
        let timepoints = 300;
        let conv = PhaseConvention::Centric;
        let phases = Array2::from_shape_fn((1, timepoints), |(_, t)| conv.phase_mod(t as f64 * 0.77));
        let data = Array4::from_shape_fn((1, 1, 1, timepoints), |(_, _, _, t)| {
            1000.0 + 10.0 * phases[[0, t]].cos() + 3.0 * (5.0 * phases[[0, t]]).sin()
        });
        let mask = Array3::ones((1, 1, 1));
        let norm = normalize_voxels(data.view(), mask.view(), 0);
        let valid = vec![(0..timepoints).collect::<Vec<_>>()];
        let config = ProcessConfig {
            smooth_app: true,
            flip_arteries: false,
            ..Default::default()
        };
        let p = PhaseProjector::new(grid, &gridder, &config).project(&norm, mask.view(), &phases, &valid);
        let raw = p.rawapp.slice(s![0, 0, 0, ..]);
        let min = raw.iter().copied().fold(f64::INFINITY, f64::min);
        for (r, a) in raw.iter().zip(p.app.slice(s![0, 0, 0, ..])) {
            assert!(f64_eq(r - min, *a));
        }
    }
}
