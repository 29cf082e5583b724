//! 血管分类.
//!
//! 1. 由导数极值判定动脉极性 (快速下降) 或静脉极性.
//! 2. 以相位投影的峰谷幅度划定血管掩码 (硬阈值) 与可视化用的宽松掩码 (软阈值).
//! 3. 可选的混叠相关: 以亚 TR 精度估计每个血管体素的脉搏波到达时延与幅度.

use ndarray::{s, Array1, Array3, Array4, ArrayView3, ArrayView4, Axis, Zip};

use crate::consts::VESSEL_PERCENTILE;
use crate::correlate::AliasedCorrelator;
use crate::data::{map_slices, AcquisitionGeometry};
use crate::phase::PhaseBinGrid;
use crate::projection::PhaseProjection;
use crate::{stats, ProcessConfig};

/// 负向导数的幅度超过正向导数时为 -1 (动脉极性), 否则为 1.
#[inline]
pub fn derivative_flip(max_deriv: f64, min_deriv: f64) -> f64 {
    if -min_deriv > max_deriv {
        -1.0
    } else {
        1.0
    }
}

/// 血管阈值.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct VesselThresholds {
    /// 硬阈值: 掩码内峰谷幅度第 98 百分位的一半.
    pub hard: f64,

    /// 软阈值: `soft_vessel_frac * hard`.
    pub soft: f64,
}

impl VesselThresholds {
    /// 由每个体素的峰谷幅度 `amplitude` 在 `mask` 内计算.
    pub fn from_amplitude(amplitude: ArrayView3<f64>, mask: ArrayView3<f64>, soft_frac: f64) -> Self {
        let values: Vec<f64> = amplitude
            .iter()
            .zip(mask.iter())
            .filter_map(|(&a, &m)| (m != 0.0).then_some(a))
            .collect();
        let hard = if values.is_empty() {
            log::warn!("vessel threshold computed over an empty mask");
            0.0
        } else {
            stats::frac_vals(&values, &[VESSEL_PERCENTILE])[0] / 2.0
        };
        Self {
            hard,
            soft: soft_frac * hard,
        }
    }
}

/// 血管分类结果. 3D 数组形状为 `(z, H, W)`.
#[derive(Clone, Debug)]
pub struct VesselMaps {
    /// 阈值.
    pub thresholds: VesselThresholds,

    /// 峰谷幅度超过硬阈值的体素 (0/1). 作为下一轮的估计掩码.
    pub vessel_mask: Array3<f64>,

    /// 峰谷幅度超过软阈值的体素上的 `app`, 其余为 0. 形状 `(z, H, W, N)`.
    pub masked_app: Array4<f64>,

    /// 掩码内体素曲线最小值所在相位.
    pub min_phase: Array3<f64>,

    /// 掩码内体素曲线最大值所在相位.
    pub max_phase: Array3<f64>,

    /// 动脉 (翻转符号为负的血管体素, 0/1).
    pub arteries: Array3<f64>,

    /// 静脉 (翻转符号为正的血管体素, 0/1).
    pub veins: Array3<f64>,

    /// 每个体素的峰谷幅度.
    pub vessel_map: Array3<f64>,

    /// 动脉上的峰谷幅度.
    pub artery_map: Array3<f64>,

    /// 静脉上的峰谷幅度.
    pub vein_map: Array3<f64>,
}

impl VesselMaps {
    /// 血管体素个数.
    pub fn num_vessels(&self) -> usize {
        self.vessel_mask.iter().filter(|&&v| v != 0.0).count()
    }

    /// 动脉体素个数.
    pub fn num_arteries(&self) -> usize {
        self.arteries.iter().filter(|&&v| v != 0.0).count()
    }
}

/// 在投影掩码 `mask` 内对相位投影分类.
pub fn classify(
    projection: &PhaseProjection,
    mask: ArrayView3<f64>,
    grid: &PhaseBinGrid,
    config: &ProcessConfig,
) -> VesselMaps {
    let source = if config.unnorm_vessel_map {
        &projection.app
    } else {
        &projection.normapp
    };
    // 曲线最小值已平移到 0, 最大值即峰谷幅度.
    let vessel_map = source.map_axis(Axis(3), |lane| lane.iter().copied().fold(0.0, f64::max));
    let thresholds = VesselThresholds::from_amplitude(vessel_map.view(), mask, config.soft_vessel_frac);

    let dim = vessel_map.dim();
    let mut vessel_mask = Array3::zeros(dim);
    let mut min_phase = Array3::zeros(dim);
    let mut max_phase = Array3::zeros(dim);
    let mut arteries = Array3::zeros(dim);
    let mut veins = Array3::zeros(dim);
    let mut masked_app = projection.app.clone();

    Zip::indexed(&mut vessel_mask)
        .and(&vessel_map)
        .and(&mask)
        .for_each(|idx, v, &amp, &m| {
            if m != 0.0 && amp > thresholds.hard {
                *v = 1.0;
            }
            if m == 0.0 || amp <= thresholds.soft {
                masked_app.slice_mut(s![idx.0, idx.1, idx.2, ..]).fill(0.0);
            }
        });

    Zip::indexed(&vessel_mask)
        .and(&mask)
        .and(&projection.flips)
        .for_each(|(z, y, x), &v, &m, &flip| {
            if m == 0.0 {
                return;
            }
            let curve = projection.app.slice(s![z, y, x, ..]).to_vec();
            min_phase[[z, y, x]] = grid.index_phase(stats::argmin(&curve).unwrap_or(0));
            max_phase[[z, y, x]] = grid.index_phase(stats::argmax(&curve).unwrap_or(0));
            if v == 0.0 {
                return;
            }
            if flip < 0.0 {
                arteries[[z, y, x]] = 1.0;
            } else {
                veins[[z, y, x]] = 1.0;
            }
        });

    let artery_map = &vessel_map * &arteries;
    let vein_map = &vessel_map * &veins;
    let maps = VesselMaps {
        thresholds,
        vessel_mask,
        masked_app,
        min_phase,
        max_phase,
        arteries,
        veins,
        vessel_map,
        artery_map,
        vein_map,
    };
    log::info!(
        "vessel thresholds: hard {:.4}, soft {:.4}; {} vessel voxels, {} arteries",
        thresholds.hard,
        thresholds.soft,
        maps.num_vessels(),
        maps.num_arteries()
    );
    maps
}

/// 混叠相关结果.
#[derive(Clone, Debug)]
pub struct WaveDelay {
    /// 每个候选时延上的相关值, `(z, H, W, P)`.
    pub corrfunc: Array4<f64>,

    /// 峰值所在时延 (秒).
    pub wave_delay: Array3<f64>,

    /// 峰值处的相关值.
    pub wave_amp: Array3<f64>,
}

/// 对 `vessel_mask` 内的体素计算混叠相关.
///
/// 体素信号取去均值数据的相反数, 与相位投影的符号约定一致. `flip_arteries` 时相关函数先乘以翻转符号
/// 再取最大值, 否则取绝对值最大处.
pub fn aliased_correlation(
    demeaned: ArrayView4<f64>,
    vessel_mask: ArrayView3<f64>,
    flips: ArrayView3<f64>,
    correlator: &AliasedCorrelator,
    geometry: &AcquisitionGeometry,
    flip_arteries: bool,
) -> WaveDelay {
    let (len_z, h, w, timepoints) = demeaned.dim();
    let search = correlator.search_values();
    let points = search.len();

    let slices = map_slices(len_z, |z| {
        let mut corrfunc = Array3::<f64>::zeros((h, w, points));
        let mut delay = ndarray::Array2::<f64>::zeros((h, w));
        let mut amp = ndarray::Array2::<f64>::zeros((h, w));
        let mask = vessel_mask.index_axis(Axis(0), z);
        if !mask.iter().any(|&m| m != 0.0) {
            return (corrfunc, delay, amp);
        }
        let references = correlator.references(timepoints, geometry.slice_times[z]);
        for ((y, x), &m) in mask.indexed_iter() {
            if m == 0.0 {
                continue;
            }
            let signal: Vec<f64> = demeaned.slice(s![z, y, x, ..]).iter().map(|v| -v).collect();
            let mut corr = AliasedCorrelator::apply(&references, &signal);
            let best = if flip_arteries {
                let flip = flips[[z, y, x]];
                corr.iter_mut().for_each(|c| *c *= flip);
                stats::argmax(&corr)
            } else {
                let abs: Vec<f64> = corr.iter().map(|c| c.abs()).collect();
                stats::argmax(&abs)
            }
            .unwrap_or(0);
            delay[[y, x]] = search[best];
            amp[[y, x]] = corr[best];
            corrfunc
                .slice_mut(s![y, x, ..])
                .assign(&Array1::from(corr));
        }
        (corrfunc, delay, amp)
    });

    let mut out = WaveDelay {
        corrfunc: Array4::zeros((len_z, h, w, points)),
        wave_delay: Array3::zeros((len_z, h, w)),
        wave_amp: Array3::zeros((len_z, h, w)),
    };
    for (z, (c, d, a)) in slices.into_iter().enumerate() {
        out.corrfunc.index_axis_mut(Axis(0), z).assign(&c);
        out.wave_delay.index_axis_mut(Axis(0), z).assign(&d);
        out.wave_amp.index_axis_mut(Axis(0), z).assign(&a);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::PhaseConvention;
    use crate::projection::circular_derivs;
    use std::f64::consts::PI;

    /// 一个体素快速下降缓慢上升 (动脉), 另一个快速上升缓慢下降 (静脉).
    #[test]
    fn test_flip_from_derivatives() {
        let grid = PhaseBinGrid::new(32, PhaseConvention::Centric);
        let rise: Vec<f64> = (0..32).map(|i| if i < 28 { i as f64 / 28.0 } else { (32 - i) as f64 / 4.0 }).collect();
        let fall: Vec<f64> = rise.iter().rev().copied().collect();

        let d = circular_derivs(&rise, &grid);
        assert_eq!(derivative_flip(d[0], d[2]), -1.0);
        let d = circular_derivs(&fall, &grid);
        assert_eq!(derivative_flip(d[0], d[2]), 1.0);
    }

    fn projection(amps: &[f64], flips: &[f64]) -> PhaseProjection {
        let n = 8;
        let v = amps.len();
        let app = Array4::from_shape_fn((1, 1, v, n), |(_, _, x, i)| {
            amps[x] * (1.0 + (2.0 * PI * i as f64 / n as f64).cos())
        });
        PhaseProjection {
            normapp: app.clone() / 100.0,
            rawapp: app.clone(),
            cine: app.clone(),
            weights: Array4::ones(app.dim()),
            derivatives: Array4::zeros((1, 1, v, 4)),
            flips: Array3::from_shape_vec((1, 1, v), flips.to_vec()).unwrap(),
            app,
        }
    }

    #[test]
    fn test_classify() {
        let mut amps = vec![0.01; 100];
        amps[3] = 5.0;
        amps[7] = 4.0;
        amps[9] = 0.5;
        let mut flips = vec![1.0; 100];
        flips[3] = -1.0;
        let p = projection(&amps, &flips);
        let mask = Array3::ones((1, 1, 100));
        let grid = PhaseBinGrid::new(8, PhaseConvention::Centric);
        let config = ProcessConfig::default();
        let maps = classify(&p, mask.view(), &grid, &config);

        // 第 98 百分位为 1.0, 硬阈值 0.5.
        assert!((maps.thresholds.hard - 0.5).abs() < 1e-12);
        assert_eq!(maps.num_vessels(), 3);
        assert_eq!(maps.arteries[[0, 0, 3]], 1.0);
        assert_eq!(maps.veins[[0, 0, 7]], 1.0);
        assert_eq!(maps.veins[[0, 0, 9]], 1.0);
        assert_eq!(maps.num_arteries(), 1);
        assert!(maps.thresholds.soft < maps.thresholds.hard);
        assert!((maps.vessel_map[[0, 0, 3]] - 10.0).abs() < 1e-9);
        assert_eq!(maps.artery_map[[0, 0, 7]], 0.0);
        // 最大值在 bin 0, 最小值在 bin 4.
        assert!((maps.max_phase[[0, 0, 3]] + PI).abs() < 1e-12);
        assert!(maps.min_phase[[0, 0, 3]].abs() < 1e-12);
        assert!(maps.masked_app.slice(s![0, 0, 0, ..]).iter().all(|&v| v == 0.0));
        // 掩码内的非血管体素同样有极值相位, 但不属于动脉或静脉.
        assert_eq!(maps.vessel_mask[[0, 0, 0]], 0.0);
        assert!((maps.max_phase[[0, 0, 0]] + PI).abs() < 1e-12);
        assert_eq!(maps.arteries[[0, 0, 0]] + maps.veins[[0, 0, 0]], 0.0);

        let mut partial = mask.clone();
        partial[[0, 0, 0]] = 0.0;
        let maps = classify(&p, partial.view(), &grid, &config);
        assert_eq!(maps.max_phase[[0, 0, 0]], 0.0);
        assert!((maps.max_phase[[0, 0, 1]] + PI).abs() < 1e-12);
    }

    /// 体素信号比参考晚 0.3 秒.
    #[test]
    fn test_aliased_correlation_delay() {
        let tr = 1.0;
        let hires_fs = 25.0;
        let timepoints = 150;
        let pulse = |t: f64| (2.0 * PI * 1.05 * t).sin() + 0.5 * (2.0 * PI * 2.1 * t).sin();
        let reference: Vec<f64> = (0..25 * 160).map(|i| pulse(i as f64 / hires_fs)).collect();
        let geom = AcquisitionGeometry::sequential(tr, 2).unwrap();
        let demeaned = Array4::from_shape_fn((2, 1, 1, timepoints), |(z, _, _, t)| {
            -pulse(t as f64 * tr + geom.slice_times[z] - 0.3)
        });
        let search: Vec<f64> = (0..31).map(|i| i as f64 * 0.05 - 0.75).collect();
        let ac = AliasedCorrelator::new(&reference, hires_fs, 1.0 / tr, search);
        let mask = Array3::ones((2, 1, 1));
        let flips = Array3::ones((2, 1, 1));
        let wd = aliased_correlation(demeaned.view(), mask.view(), flips.view(), &ac, &geom, false);
        for z in 0..2 {
            assert!((wd.wave_delay[[z, 0, 0]] + 0.3).abs() < 1e-9, "{}", wd.wave_delay[[z, 0, 0]]);
            assert!(wd.wave_amp[[z, 0, 0]] > 0.0);
        }
        assert_eq!(wd.corrfunc.dim(), (2, 1, 1, 31));
    }
}
