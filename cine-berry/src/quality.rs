//! 光电容积脉搏波类信号的质量指标.
//!
//! 对去趋势后的波形计算滑动窗口偏度, 峰度和近似熵, 并汇总其均值和标准差.
//! 参考: Elgendi, "Optimal Signal Quality Index for Photoplethysmogram Signals", 2016.

use crate::{fitting, stats};

/// 窗口设置 (秒).
#[derive(Copy, Clone, Debug)]
pub struct QualityWindows {
    /// 偏度窗口.
    pub skew_secs: f64,
    /// 峰度窗口.
    pub kurtosis_secs: f64,
    /// 近似熵窗口.
    pub entropy_secs: f64,
    /// 去趋势多项式阶数.
    pub detrend_order: usize,
}

impl Default for QualityWindows {
    fn default() -> Self {
        Self {
            skew_secs: 5.0,
            kurtosis_secs: 60.0,
            entropy_secs: 1.0,
            detrend_order: 8,
        }
    }
}

/// 质量指标.
#[derive(Clone, Debug, Default)]
pub struct SignalQuality {
    /// 偏度序列.
    pub skew: Vec<f64>,
    /// 峰度 (Pearson 定义, 正态分布为 3) 序列.
    pub kurtosis: Vec<f64>,
    /// 近似熵序列.
    pub entropy: Vec<f64>,
}

impl SignalQuality {
    /// `(偏度均值, 偏度标准差)`.
    pub fn skew_summary(&self) -> (f64, f64) {
        (stats::mean(&self.skew), stats::std(&self.skew))
    }

    /// `(峰度均值, 峰度标准差)`.
    pub fn kurtosis_summary(&self) -> (f64, f64) {
        (stats::mean(&self.kurtosis), stats::std(&self.kurtosis))
    }

    /// `(近似熵均值, 近似熵标准差)`.
    pub fn entropy_summary(&self) -> (f64, f64) {
        (stats::mean(&self.entropy), stats::std(&self.entropy))
    }
}

/// 近似熵 ApEn(m, r). 距离为 Chebyshev 距离.
pub fn approximate_entropy(data: &[f64], m: usize, r: f64) -> f64 {
    let phi = |m: usize| -> f64 {
        let n = data.len();
        if n < m || m == 0 {
            return 0.0;
        }
        let count = n - m + 1;
        let templates: Vec<&[f64]> = (0..count).map(|i| &data[i..i + m]).collect();
        let total: f64 = templates
            .iter()
            .map(|a| {
                let similar = templates
                    .iter()
                    .filter(|b| a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() <= r))
                    .count();
                (similar as f64 / count as f64).ln()
            })
            .sum();
        total / count as f64
    };
    (phi(m + 1) - phi(m)).abs()
}

/// 把秒数换算为奇数个点.
fn odd_points(secs: f64, fs: f64) -> usize {
    let n = (secs * fs).round() as usize;
    n + 1 - n % 2
}

/// 在每个点周围的窗口上计算 `f`. 窗口在序列边界处被截断.
fn windowed<F: Fn(&[f64]) -> f64>(data: &[f64], points: usize, f: F) -> Vec<f64> {
    let half = points / 2;
    (0..data.len())
        .map(|i| {
            let start = i.saturating_sub(half);
            let end = (i + half + 1).min(data.len());
            f(&data[start..end])
        })
        .collect()
}

/// 计算 `waveform` (采样率 `fs`) 的质量指标.
pub fn signal_quality(waveform: &[f64], fs: f64, windows: QualityWindows) -> SignalQuality {
    let detrended = fitting::detrend(waveform, windows.detrend_order, true);
    let skew = windowed(&detrended, odd_points(windows.skew_secs, fs), stats::skew);
    let kurtosis = windowed(&detrended, odd_points(windows.kurtosis_secs, fs), |w| {
        stats::kurtosis(w) + 3.0
    });
    let entropy = windowed(&detrended, odd_points(windows.entropy_secs, fs), |w| {
        approximate_entropy(w, 2, 0.2 * stats::std(w))
    });
    SignalQuality {
        skew,
        kurtosis,
        entropy,
    }
}
