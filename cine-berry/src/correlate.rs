//! 波形间的时延估计.
//!
//! 1. [`check_card_match`]: 两个同采样率心动波形的互相关峰值及其时延.
//! 2. [`AliasedCorrelator`]: 用高采样率参考波形在低采样率体素信号上搜索亚 TR 时延.

use crate::filter::{self, FilterBand};
use crate::resample::interp_linear;
use crate::{fitting, stats};
use rustfft::num_complex::Complex64;

/// 互相关峰值的搜索范围 (秒).
const SEARCH_RANGE_SECS: f64 = 5.0;

/// 互相关结果.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CardMatch {
    /// 峰值处的相关系数.
    pub correlation: f64,

    /// 峰值处的时延 (秒). 正值表示 `reference` 落后于 `candidate`.
    pub delay: f64,

    /// 峰值位于搜索范围边缘, 结果不可靠.
    pub at_edge: bool,
}

/// 去趋势, 加 Hamming 窗后做相关归一化.
fn prepare(data: &[f64], fs: f64, len: usize) -> Vec<f64> {
    let filtered = FilterBand::Cardiac.apply(data, fs, false);
    let detrended = fitting::detrend(&filtered, 3, true);
    let win = filter::hamming(detrended.len());
    let windowed: Vec<f64> = detrended.iter().zip(&win).map(|(x, w)| x * w).collect();
    let mut v = stats::corr_normalize(&windowed);
    v.truncate(len);
    v
}

/// 完整互相关 `c[k] = sum_n a[n + k] * b[n]`, `k` 从 `-(n - 1)` 到 `n - 1`.
pub fn cross_correlate(a: &[f64], b: &[f64]) -> Vec<f64> {
    let n = a.len().min(b.len());
    if n == 0 {
        return Vec::new();
    }
    let size = (2 * n - 1).next_power_of_two();
    let pad = |x: &[f64]| {
        let mut v = x[..n].to_vec();
        v.resize(size, 0.0);
        v
    };
    let fa = filter::fft(&pad(a));
    let fb = filter::fft(&pad(b));
    let prod: Vec<Complex64> = fa.iter().zip(&fb).map(|(x, y)| x * y.conj()).collect();
    let c = filter::ifft(prod);
    (-(n as i64 - 1)..n as i64)
        .map(|k| c[k.rem_euclid(size as i64) as usize].re)
        .collect()
}

/// 在心动频带内比较两个采样率为 `fs` 的波形.
pub fn check_card_match(reference: &[f64], candidate: &[f64], fs: f64) -> CardMatch {
    let n = reference.len().min(candidate.len());
    let a = prepare(reference, fs, n);
    let b = prepare(candidate, fs, n);
    let xcorr = cross_correlate(&a, &b);
    if xcorr.is_empty() {
        return CardMatch {
            correlation: 0.0,
            delay: 0.0,
            at_edge: true,
        };
    }
    let center = n as i64 - 1;
    let reach = ((SEARCH_RANGE_SECS * fs).round() as i64).min(center);
    let lo = (center - reach) as usize;
    let hi = (center + reach) as usize;
    let window = &xcorr[lo..=hi];
    let Some(peak) = stats::argmax(window) else {
        return CardMatch {
            correlation: 0.0,
            delay: 0.0,
            at_edge: true,
        };
    };
    let at_edge = peak == 0 || peak == window.len() - 1;

    // 抛物线插值细化峰值位置.
    let (mut offset, mut value) = (0.0, window[peak]);
    if !at_edge {
        let (y0, y1, y2) = (window[peak - 1], window[peak], window[peak + 1]);
        let denom = y0 - 2.0 * y1 + y2;
        if denom < 0.0 {
            offset = 0.5 * (y0 - y2) / denom;
            value = y1 - 0.25 * (y0 - y2) * offset;
        }
    }
    let lag = (lo + peak) as f64 + offset - center as f64;
    let result = CardMatch {
        correlation: value,
        delay: lag / fs,
        at_edge,
    };
    log::debug!(
        "cardiac match: r = {:.3}, delay = {:.3} s{}",
        result.correlation,
        result.delay,
        if at_edge { " (at search edge)" } else { "" }
    );
    result
}

/// 把采样率 `fs` 的信号平移 `shift_secs` 秒 (正值向后推迟). 边界外取端点值.
pub fn time_shift(data: &[f64], shift_secs: f64, fs: f64) -> Vec<f64> {
    let xp: Vec<f64> = (0..data.len()).map(|i| i as f64).collect();
    let shift = shift_secs * fs;
    xp.iter().map(|&x| interp_linear(&xp, data, x - shift)).collect()
}

/// 混叠相关器.
///
/// 参考波形以高采样率给出, 体素信号以 TR 为间隔采样. 对每个候选时延, 在体素采样时刻
/// (加上时延和切片偏移) 上对参考波形插值, 归一化后与体素信号做点积.
#[derive(Clone, Debug)]
pub struct AliasedCorrelator {
    hires_axis: Vec<f64>,
    hires: Vec<f64>,
    lores_fs: f64,
    search: Vec<f64>,
}

impl AliasedCorrelator {
    /// `hires` 采样率为 `hires_fs`, 从 0 时刻开始; 体素信号采样率为 `lores_fs`.
    pub fn new(hires: &[f64], hires_fs: f64, lores_fs: f64, search: Vec<f64>) -> Self {
        Self {
            hires_axis: (0..hires.len()).map(|i| i as f64 / hires_fs).collect(),
            hires: hires.to_vec(),
            lores_fs,
            search,
        }
    }

    /// 候选时延 (秒).
    #[inline]
    pub fn search_values(&self) -> &[f64] {
        &self.search
    }

    /// 对长度为 `len`, 采集偏移为 `offset` 秒的体素信号, 生成每个候选时延的归一化参考.
    ///
    /// 同一切片内的所有体素共享这组参考.
    pub fn references(&self, len: usize, offset: f64) -> Vec<Vec<f64>> {
        self.search
            .iter()
            .map(|&d| {
                let sampled: Vec<f64> = (0..len)
                    .map(|t| interp_linear(&self.hires_axis, &self.hires, t as f64 / self.lores_fs + d + offset))
                    .collect();
                stats::corr_normalize(&sampled)
            })
            .collect()
    }

    /// 相关函数: 每个候选时延上参考与 `signal` 的点积.
    pub fn apply(references: &[Vec<f64>], signal: &[f64]) -> Vec<f64> {
        references
            .iter()
            .map(|r| r.iter().zip(signal).map(|(a, b)| a * b).sum())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn pulse(fs: f64, n: usize, delay: f64) -> Vec<f64> {
        (0..n)
            .map(|i| {
                let t = i as f64 / fs - delay;
                (2.0 * PI * 1.1 * t).sin() + 0.3 * (2.0 * PI * 2.2 * t).sin()
            })
            .collect()
    }

    #[test]
    fn test_cross_correlate_lag() {
        let a = [0.0, 0.0, 1.0, 0.0];
        let b = [1.0, 0.0, 0.0, 0.0];
        let c = cross_correlate(&a, &b);
        assert_eq!(c.len(), 7);
        // a 比 b 晚 2 个样本, 峰值在 k = 2.
        assert_eq!(stats::argmax(&c), Some(3 + 2));
    }

    #[test]
    fn test_check_card_match_delay() {
        let fs = 10.0;
        let reference = pulse(fs, 1200, 0.3);
        let candidate = pulse(fs, 1200, 0.0);
        let m = check_card_match(&reference, &candidate, fs);
        assert!((m.delay - 0.3).abs() < 0.05, "delay = {}", m.delay);
        assert!(m.correlation > 0.8);
        assert!(!m.at_edge);
    }

    #[test]
    fn test_time_shift() {
        let data = [0.0, 1.0, 2.0, 3.0];
        assert_eq!(time_shift(&data, 1.0, 1.0), vec![0.0, 0.0, 1.0, 2.0]);
    }

    /// 体素信号比参考晚 0.2 秒, 相关函数峰值落在 0.2 秒.
    #[test]
    fn test_aliased_correlator() {
        let hires_fs = 25.0;
        let tr = 0.8;
        let reference = pulse(hires_fs, 25 * 200, 0.0);
        let signal: Vec<f64> = (0..200)
            .map(|t| {
                let time = t as f64 * tr + 0.2;
                (2.0 * PI * 1.1 * time).sin() + 0.3 * (2.0 * PI * 2.2 * time).sin()
            })
            .collect();
        let search: Vec<f64> = (0..21).map(|i| i as f64 * 0.05 - 0.5).collect();
        let ac = AliasedCorrelator::new(&reference, hires_fs, 1.0 / tr, search);
        let refs = ac.references(signal.len(), 0.0);
        let corr = AliasedCorrelator::apply(&refs, &signal);
        let best = stats::argmax(&corr).unwrap();
        assert!((ac.search_values()[best] - 0.2).abs() < 1e-9);
    }
}
