//! 心动周期平均.
//!
//! 用 congrid 把 (相位, 值) 或 (距上次零相位的时间, 值) 散点分摊到规则网格上,
//! 得到一个心动周期内的平均波形. 结果用于质控和报告.

use crate::consts::COVERAGE_DIVISOR;
use crate::phase::PhaseConvention;
use crate::resample::{BinAxis, GridKernel, Gridder};
use crate::{stats, PipelineResult};

/// 网格上的平均波形.
#[derive(Clone, Debug)]
pub struct CycleAverage {
    /// 网格.
    pub axis: BinAxis,

    /// 平均值. 覆盖不足的 bin 为 0.
    pub waveform: Vec<f64>,

    /// 每个 bin 累积的权重.
    pub weights: Vec<f64>,

    /// 每个 bin 的覆盖是否足够.
    pub valid: Vec<bool>,
}

/// 累积 `weight * value` 与 `weight`.
fn accumulate<I>(gridder: &Gridder, samples: I) -> (Vec<f64>, Vec<f64>)
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let n = gridder.axis().len;
    let mut sum = vec![0.0; n];
    let mut weight = vec![0.0; n];
    for (loc, val) in samples {
        for tap in gridder.congrid(loc, val) {
            sum[tap.index] += tap.value;
            weight[tap.index] += tap.weight;
        }
    }
    (sum, weight)
}

/// 归一化. 权重低于最大权重 1/50 的 bin 视为覆盖不足, 置 0;
/// `shift_min` 为 `true` 时把有效 bin 的最小值平移到 0.
fn finish(axis: BinAxis, sum: Vec<f64>, weights: Vec<f64>, shift_min: bool) -> CycleAverage {
    let max_weight = weights.iter().copied().fold(0.0, f64::max);
    let floor = max_weight / COVERAGE_DIVISOR;
    let valid: Vec<bool> = weights.iter().map(|&w| w > floor && w > 0.0).collect();
    let mut waveform: Vec<f64> = sum
        .iter()
        .zip(&weights)
        .zip(&valid)
        .map(|((&s, &w), &ok)| if ok { s / w } else { 0.0 })
        .collect();
    let missing = valid.iter().filter(|&&ok| !ok).count();
    if missing > 0 {
        log::debug!("{} of {} bins have insufficient coverage", missing, axis.len);
    }
    if shift_min {
        let min = waveform
            .iter()
            .zip(&valid)
            .filter_map(|(&v, &ok)| ok.then_some(v))
            .fold(f64::INFINITY, f64::min);
        if min.is_finite() {
            waveform
                .iter_mut()
                .zip(&valid)
                .filter(|(_, &ok)| ok)
                .for_each(|(v, _)| *v -= min);
        }
    }
    CycleAverage {
        axis,
        waveform,
        weights,
        valid,
    }
}

/// 按相位平均.
///
/// `phases` 为卷绕后的相位, 只有 `indices` 中的样本参与. `gridder` 应为循环网格.
pub fn cardiac_cycle_average(
    phases: &[f64],
    signal: &[f64],
    indices: &[usize],
    gridder: &Gridder,
) -> CycleAverage {
    let (sum, weights) = accumulate(gridder, indices.iter().map(|&i| (phases[i], signal[i])));
    finish(*gridder.axis(), sum, weights, true)
}

/// 零相位时刻.
///
/// 卷绕相位下降超过 pi (即从区间上端跳回下端) 时, 在相邻两个样本之间线性插值出穿越时刻.
pub fn zero_phase_locations(times: &[f64], wrapped: &[f64], convention: PhaseConvention) -> Vec<f64> {
    let upper = convention.lower() + 2.0 * std::f64::consts::PI;
    times
        .windows(2)
        .zip(wrapped.windows(2))
        .filter_map(|(t, p)| {
            if p[0] - p[1] <= std::f64::consts::PI {
                return None;
            }
            let unwrapped = p[1] + 2.0 * std::f64::consts::PI;
            let frac = stats::safe_div(upper - p[0], unwrapped - p[0]);
            Some(t[0] + frac * (t[1] - t[0]))
        })
        .collect()
}

/// 每个样本距上一个零相位时刻的时间. 第一个零相位之前的样本为 `None`.
pub fn instantaneous_times(times: &[f64], zeros: &[f64]) -> Vec<Option<f64>> {
    times
        .iter()
        .map(|&t| {
            let k = zeros.partition_point(|&z| z <= t);
            (k > 0).then(|| t - zeros[k - 1])
        })
        .collect()
}

/// 时域脉搏平均.
///
/// 以距上次零相位的时间为横坐标, 在步长 `step` 的非循环网格上平均. 网格长度为
/// `floor(max_t / step) + 1`, 从而 `len * step` 总不小于最大瞬时时间.
#[allow(clippy::too_many_arguments)]
pub fn pulse_time_average(
    times: &[f64],
    wrapped: &[f64],
    signal: &[f64],
    indices: &[usize],
    step: f64,
    width: f64,
    kernel: GridKernel,
    convention: PhaseConvention,
) -> PipelineResult<CycleAverage> {
    let zeros = zero_phase_locations(times, wrapped, convention);
    let inst = instantaneous_times(times, &zeros);
    let max_t = indices
        .iter()
        .filter_map(|&i| inst[i])
        .fold(0.0, f64::max);
    let len = (max_t / step).floor() as usize + 1;
    let axis = BinAxis {
        start: 0.0,
        step,
        len,
    };
    let gridder = Gridder::new(axis, width, kernel, false)?;
    let (sum, weights) = accumulate(
        &gridder,
        indices.iter().filter_map(|&i| inst[i].map(|t| (t, signal[i]))),
    );
    log::debug!(
        "pulse average over {} zero crossings, {} bins of {} s",
        zeros.len(),
        len,
        step
    );
    Ok(finish(axis, sum, weights, false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::PhaseBinGrid;
    use std::f64::consts::PI;

    fn grid_gridder(n: usize) -> (PhaseBinGrid, Gridder) {
        let grid = PhaseBinGrid::new(n, PhaseConvention::Centric);
        let g = Gridder::new(grid.axis(), 3.0, GridKernel::Kaiser, true).unwrap();
        (grid, g)
    }

    fn sampled(origin: f64) -> (Vec<f64>, Vec<f64>) {
        let conv = PhaseConvention::Centric;
        let fs = 25.0;
        let (phases, values): (Vec<f64>, Vec<f64>) = (0..25 * 60)
            .map(|i| {
                let phi = 2.0 * PI * 1.13 * i as f64 / fs + origin;
                (conv.phase_mod(phi), 2.0 + phi.cos())
            })
            .unzip();
        (phases, values)
    }

    /// 稠密采样的正弦重建后为 `cos(bin) + 1`, 与相位原点无关.
    #[test]
    fn test_reconstructs_sinusoid() {
        let (grid, g) = grid_gridder(32);
        let mut results = Vec::new();
        for origin in [0.0, 1.0, -2.5] {
            let (phases, values) = sampled(origin);
            let idx: Vec<usize> = (0..phases.len()).collect();
            let avg = cardiac_cycle_average(&phases, &values, &idx, &g);
            assert!(avg.valid.iter().all(|&v| v));
            for (b, &v) in grid.values().iter().zip(&avg.waveform) {
                assert!((v - (b.cos() + 1.0)).abs() < 0.05, "bin {b}: {v}");
            }
            results.push(avg.waveform);
        }
        for w in &results[1..] {
            for (a, b) in w.iter().zip(&results[0]) {
                assert!((a - b).abs() < 0.02);
            }
        }
    }

    /// 只覆盖半个周期时, 另一半为 0 且被标记为无效.
    #[test]
    fn test_insufficient_coverage() {
        let (_, g) = grid_gridder(16);
        let phases: Vec<f64> = (0..400).map(|i| -PI + (i % 100) as f64 * 0.03).collect();
        let values = vec![1.0; 400];
        let idx: Vec<usize> = (0..400).collect();
        let avg = cardiac_cycle_average(&phases, &values, &idx, &g);
        assert!(!avg.valid[12]);
        assert_eq!(avg.waveform[12], 0.0);
        assert!(avg.valid[2]);
        // 常数信号平移后为 0.
        assert!(avg.waveform[2].abs() < 1e-12);
    }

    #[test]
    fn test_zero_phase_locations() {
        let conv = PhaseConvention::Centric;
        let times = [0.0, 1.0, 2.0, 3.0];
        let wrapped = [2.0, 3.0, -3.0, -2.0];
        let zeros = zero_phase_locations(&times, &wrapped, conv);
        assert_eq!(zeros.len(), 1);
        let expected = 1.0 + (PI - 3.0) / (2.0 * PI - 6.0);
        assert!((zeros[0] - expected).abs() < 1e-12);

        let inst = instantaneous_times(&times, &zeros);
        assert_eq!(inst[0], None);
        assert!((inst[3].unwrap() - (3.0 - expected)).abs() < 1e-12);
    }

    #[test]
    fn test_pulse_length_covers_max_time() {
        let conv = PhaseConvention::Centric;
        for (rate, step) in [(1.13, 0.01), (0.9, 0.03), (1.5, 0.007)] {
            let fs = 25.0;
            let times: Vec<f64> = (0..2000).map(|i| i as f64 / fs).collect();
            let wrapped: Vec<f64> = times.iter().map(|t| conv.phase_mod(2.0 * PI * rate * t)).collect();
            let signal: Vec<f64> = wrapped.iter().map(|p| p.sin()).collect();
            let idx: Vec<usize> = (0..times.len()).collect();
            let avg = pulse_time_average(&times, &wrapped, &signal, &idx, step, 3.0, GridKernel::Kaiser, conv)
                .unwrap();
            let zeros = zero_phase_locations(&times, &wrapped, conv);
            let max_t = instantaneous_times(&times, &zeros)
                .into_iter()
                .flatten()
                .fold(0.0, f64::max);
            assert!(avg.axis.len as f64 * step >= max_t);
            assert!(max_t < 1.0 / rate + 1.0 / fs);
        }
    }
}
