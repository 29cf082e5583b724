//! 瞬时相位.
//!
//! 由窄带 (基频) 心动波形构造解析信号, 取其辐角并展开得到连续相位, 取其模得到幅度包络.
//! 参与分 bin 的相位值总是先经过 [`PhaseConvention::phase_mod`] 卷绕.

use crate::filter::{self, FilterBand};
use crate::resample::BinAxis;
use crate::{fitting, stats};
use rustfft::num_complex::Complex64;
use std::f64::consts::PI;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

const TWO_PI: f64 = 2.0 * PI;

/// 相位卷绕区间.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PhaseConvention {
    /// `[-pi, pi)`.
    Centric,

    /// `[0, 2 * pi)`.
    NonCentric,
}

impl PhaseConvention {
    /// 区间下界.
    #[inline]
    pub fn lower(&self) -> f64 {
        match self {
            Self::Centric => -PI,
            Self::NonCentric => 0.0,
        }
    }

    /// 把任意角度卷绕进区间. 幂等.
    pub fn phase_mod(&self, x: f64) -> f64 {
        let lower = self.lower();
        let mut v = (x - lower).rem_euclid(TWO_PI) + lower;
        // rem_euclid 在极小负数上可能返回 2 * pi.
        if v >= lower + TWO_PI {
            v = lower;
        }
        v
    }
}

/// 输出相位网格: `n` 个等距 bin 覆盖一整个周期, 不含区间上端点.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PhaseBinGrid {
    /// bin 个数.
    pub n: usize,

    /// 卷绕区间.
    pub convention: PhaseConvention,
}

impl PhaseBinGrid {
    /// 构造.
    pub fn new(n: usize, convention: PhaseConvention) -> Self {
        Self { n, convention }
    }

    /// bin 间距.
    #[inline]
    pub fn step(&self) -> f64 {
        TWO_PI / self.n as f64
    }

    /// 作为 congrid 网格.
    pub fn axis(&self) -> BinAxis {
        BinAxis {
            start: self.convention.lower(),
            step: self.step(),
            len: self.n,
        }
    }

    /// 各 bin 中心相位.
    pub fn values(&self) -> Vec<f64> {
        self.axis().values()
    }

    /// 相位 `phi` (先卷绕) 最近的 bin, 循环意义下.
    pub fn nearest(&self, phi: f64) -> usize {
        let wrapped = self.convention.phase_mod(phi);
        let i = ((wrapped - self.convention.lower()) / self.step()).round() as usize;
        i % self.n
    }

    /// bin 索引对应的相位, 用于报告最小/最大相位位置.
    #[inline]
    pub fn index_phase(&self, i: usize) -> f64 {
        i as f64 * self.step() - PI
    }
}

/// 相位轨迹.
#[derive(Clone, Debug)]
pub struct PhaseTrace {
    /// 展开后的连续相位.
    pub unwrapped: Vec<f64>,

    /// 瞬时幅度包络.
    pub envelope: Vec<f64>,

    /// 第 0 个样本的相位.
    pub phi0: f64,
}

impl PhaseTrace {
    /// 卷绕后的相位.
    pub fn wrapped(&self, convention: PhaseConvention) -> Vec<f64> {
        self.unwrapped.iter().map(|&p| convention.phase_mod(p)).collect()
    }

    /// 对展开相位做 `order` 次多项式趋势滤波, 偏离超过 3 倍 MAD 的点替换为拟合值.
    pub fn trend_filtered(mut self, order: usize) -> Self {
        self.unwrapped = fitting::trend_filter(&self.unwrapped, order, 3.0);
        self
    }
}

/// 解析信号. 负频率分量置零, 正频率分量加倍.
pub fn analytic_signal(data: &[f64]) -> Vec<Complex64> {
    let n = data.len();
    let mut spec = filter::fft(data);
    if n == 0 {
        return spec;
    }
    let half = n / 2;
    for (k, c) in spec.iter_mut().enumerate().skip(1) {
        if k < half || (k == half && n % 2 == 1) {
            *c *= 2.0;
        } else if k > half {
            *c = Complex64::new(0.0, 0.0);
        }
    }
    filter::ifft(spec)
}

/// 相位展开: 相邻样本的跳变被修正到 `(-pi, pi]` 内.
pub fn unwrap(phase: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(phase.len());
    let mut offset = 0.0;
    let mut prev = None;
    for &p in phase {
        if let Some(q) = prev {
            let d: f64 = p - q;
            let dd = (d + PI).rem_euclid(TWO_PI) - PI;
            let dd = if dd == -PI && d > 0.0 { PI } else { dd };
            offset += dd - d;
        }
        out.push(p + offset);
        prev = Some(p);
    }
    out
}

/// 计算瞬时相位和包络.
pub fn analytic_phase(data: &[f64]) -> PhaseTrace {
    let analytic = analytic_signal(data);
    let raw: Vec<f64> = analytic.iter().map(|c| c.arg()).collect();
    let unwrapped = unwrap(&raw);
    PhaseTrace {
        phi0: unwrapped.first().copied().unwrap_or(0.0),
        envelope: analytic.iter().map(|c| c.norm()).collect(),
        unwrapped,
    }
}

/// 以 `fundamental` (Hz) 为中心窄带滤波, 得到基频波形.
pub fn get_fundamental(data: &[f64], fs: f64, fundamental: f64) -> Vec<f64> {
    FilterBand::fundamental(fundamental).apply(data, fs, false)
}

/// 心率估计参数.
#[derive(Copy, Clone, Debug)]
pub struct HeartRateSearch {
    /// 下限 (BPM).
    pub min_hr: f64,
    /// 上限 (BPM).
    pub max_hr: f64,
    /// 频谱平滑窗口长度.
    pub smooth_len: usize,
}

/// 估计心动基频 (Hz).
///
/// 对 Hamming 加窗的频谱, 清零搜索范围以外的 bin (同时去掉零频附近的泄漏),
/// Savitzky-Golay 平滑后取峰值. `bad` 中标记为 `true` 的样本在计算前置零.
pub fn estimate_cardiac_frequency(
    waveform: &[f64],
    fs: f64,
    search: HeartRateSearch,
    bad: Option<&[bool]>,
) -> f64 {
    let censored: Vec<f64> = match bad {
        Some(mask) => waveform
            .iter()
            .zip(mask)
            .map(|(&x, &b)| if b { 0.0 } else { x })
            .collect(),
        None => waveform.to_vec(),
    };

    let (wf, wp) = filter::welch(&censored, fs, 1024);
    if let Some(k) = stats::argmax(&wp) {
        let init = (wf[k] * 60.0).clamp(search.min_hr, search.max_hr);
        log::debug!("initial spectral peak: {:.2} BPM", init);
    }

    let (freqs, mut mags) = filter::windowed_spectrum(&censored, fs);
    if freqs.len() < 2 {
        return search.min_hr / 60.0;
    }
    let df = freqs[1] - freqs[0];
    let min_bin = ((search.min_hr / (60.0 * df)).floor() as usize).min(mags.len());
    let max_bin = ((search.max_hr / (60.0 * df)).floor() as usize).min(mags.len());
    mags[..min_bin].iter_mut().for_each(|m| *m = 0.0);
    mags[max_bin..].iter_mut().for_each(|m| *m = 0.0);

    let smoothed = fitting::savgol_filter(&mags, search.smooth_len, 3);
    let peak = stats::argmax(&smoothed).map_or(search.min_hr / 60.0, |k| freqs[k]);
    log::debug!("cardiac fundamental frequency is {:.2} BPM", peak * 60.0);
    peak
}
