//! 基于 FFT 的非因果滤波器, 包络检测和功率谱估计.
//!
//! 所有滤波器都是零相位的: 对 (必要时经反射延拓的) 信号做 FFT, 乘以实值传递函数后逆变换.

use crate::consts::band;
use rustfft::num_complex::Complex64;
use rustfft::FftPlanner;
use std::f64::consts::PI;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 反射延拓的时长 (秒).
const PAD_SECS: f64 = 30.0;

/// 滤波器频带.
///
/// 传递函数为梯形: `lower_stop` 以下为 0, `lower_pass` 到 `upper_pass` 为 1,
/// 两侧线性过渡, `upper_stop` 以上为 0. `lower_pass` 不大于 0 时退化为低通.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FilterBand {
    /// 心动频带.
    Cardiac,

    /// 呼吸频带.
    Respiratory,

    /// 任意频带.
    Arb {
        /// 下阻带边缘 (Hz).
        lower_stop: f64,
        /// 下通带边缘 (Hz).
        lower_pass: f64,
        /// 上通带边缘 (Hz).
        upper_pass: f64,
        /// 上阻带边缘 (Hz).
        upper_stop: f64,
    },
}

impl FilterBand {
    /// 截止频率为 `cutoff` 的低通滤波器.
    pub fn lowpass(cutoff: f64) -> Self {
        Self::Arb {
            lower_stop: 0.0,
            lower_pass: 0.0,
            upper_pass: cutoff,
            upper_stop: cutoff * band::UPPER_STOP_RATIO,
        }
    }

    /// 以 `center` 为中心的窄带, 用于提取基频.
    pub fn fundamental(center: f64) -> Self {
        let lower_pass = center * band::FUND_LOWER_RATIO;
        let upper_pass = center * band::FUND_UPPER_RATIO;
        Self::Arb {
            lower_stop: lower_pass * band::LOWER_STOP_RATIO,
            lower_pass,
            upper_pass,
            upper_stop: upper_pass * band::UPPER_STOP_RATIO,
        }
    }

    /// `(lower_stop, lower_pass, upper_pass, upper_stop)`.
    pub fn edges(&self) -> (f64, f64, f64, f64) {
        let trapezoid = |lp: f64, up: f64| {
            (lp * band::LOWER_STOP_RATIO, lp, up, up * band::UPPER_STOP_RATIO)
        };
        match *self {
            Self::Cardiac => trapezoid(band::CARD_LOWER_PASS, band::CARD_UPPER_PASS),
            Self::Respiratory => trapezoid(band::RESP_LOWER_PASS, band::RESP_UPPER_PASS),
            Self::Arb {
                lower_stop,
                lower_pass,
                upper_pass,
                upper_stop,
            } => (lower_stop, lower_pass, upper_pass, upper_stop),
        }
    }

    /// 频率 `f` (Hz) 处的增益.
    pub fn gain(&self, f: f64) -> f64 {
        let (ls, lp, up, us) = self.edges();
        let f = f.abs();
        let lower = if lp <= 0.0 || f >= lp {
            1.0
        } else if f <= ls {
            0.0
        } else {
            (f - ls) / (lp - ls)
        };
        let upper = if f <= up {
            1.0
        } else if f >= us {
            0.0
        } else {
            (us - f) / (us - up)
        };
        lower * upper
    }

    /// 对采样率为 `fs` 的信号滤波.
    ///
    /// `cyclic` 为 `true` 时信号被视为周期信号, 不做延拓.
    pub fn apply(&self, data: &[f64], fs: f64, cyclic: bool) -> Vec<f64> {
        apply_transfer(data, fs, cyclic, |f| self.gain(f))
    }
}

/// 正向 FFT.
pub(crate) fn fft(data: &[f64]) -> Vec<Complex64> {
    let mut buf: Vec<Complex64> = data.iter().map(|&x| Complex64::new(x, 0.0)).collect();
    if !buf.is_empty() {
        FftPlanner::<f64>::new()
            .plan_fft_forward(buf.len())
            .process(&mut buf);
    }
    buf
}

/// 逆 FFT, 已除以长度.
pub(crate) fn ifft(mut buf: Vec<Complex64>) -> Vec<Complex64> {
    let n = buf.len();
    if n > 0 {
        FftPlanner::<f64>::new().plan_fft_inverse(n).process(&mut buf);
    }
    let scale = 1.0 / n.max(1) as f64;
    buf.iter_mut().for_each(|c| *c *= scale);
    buf
}

/// 第 `k` 个 FFT bin 的频率绝对值.
#[inline]
fn bin_freq(k: usize, n: usize, fs: f64) -> f64 {
    let k = if k <= n / 2 { k } else { n - k };
    k as f64 * fs / n as f64
}

/// 两端做偶反射延拓, 返回延拓长度.
fn reflect_pad(data: &[f64], pad: usize) -> Vec<f64> {
    let n = data.len();
    let pad = pad.min(n.saturating_sub(1));
    let mut out = Vec::with_capacity(n + 2 * pad);
    out.extend((1..=pad).rev().map(|i| data[i]));
    out.extend_from_slice(data);
    out.extend((1..=pad).map(|i| data[n - 1 - i]));
    out
}

fn apply_transfer<F: Fn(f64) -> f64>(data: &[f64], fs: f64, cyclic: bool, gain: F) -> Vec<f64> {
    let n = data.len();
    if n < 2 {
        return data.to_vec();
    }
    let pad = if cyclic {
        0
    } else {
        ((PAD_SECS * fs) as usize).min(n - 1)
    };
    let padded = if pad > 0 {
        reflect_pad(data, pad)
    } else {
        data.to_vec()
    };
    let m = padded.len();
    let mut spec = fft(&padded);
    for (k, c) in spec.iter_mut().enumerate() {
        *c *= gain(bin_freq(k, m, fs));
    }
    ifft(spec)[pad..pad + n].iter().map(|c| c.re).collect()
}

/// 去除 `fundamental` 及其各次谐波 (直到 Nyquist 频率) 处的窄带成分.
///
/// 每个陷波的宽度为谐波频率的 `notch_pct` 百分比, 两侧各有同宽的线性过渡.
pub fn harmonic_notch_filter(data: &[f64], fs: f64, fundamental: f64, notch_pct: f64) -> Vec<f64> {
    if fundamental <= 0.0 || notch_pct <= 0.0 {
        return data.to_vec();
    }
    let nyquist = fs / 2.0;
    let harmonics: Vec<f64> = (1..)
        .map(|h| h as f64 * fundamental)
        .take_while(|&f| f < nyquist)
        .collect();
    log::debug!("notching {} harmonics of {:.4} Hz", harmonics.len(), fundamental);
    apply_transfer(data, fs, false, |f| {
        harmonics
            .iter()
            .map(|&h| {
                let half = h * notch_pct / 100.0 / 2.0;
                let d = (f - h).abs();
                if d <= half {
                    0.0
                } else if d >= 2.0 * half {
                    1.0
                } else {
                    (d - half) / half
                }
            })
            .product()
    })
}

/// 幅度包络: 去均值取绝对值后低通滤波.
pub fn envelope(data: &[f64], fs: f64, cutoff: f64) -> Vec<f64> {
    let m = crate::stats::mean(data);
    let abs: Vec<f64> = data.iter().map(|&x| (x - m).abs()).collect();
    FilterBand::lowpass(cutoff).apply(&abs, fs, false)
}

/// 长度为 `n` 的 Hamming 窗.
pub fn hamming(n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![1.0];
    }
    (0..n)
        .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f64 / (n - 1) as f64).cos())
        .collect()
}

/// 长度为 `n` 的周期 Hann 窗.
fn hann(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / n as f64).cos())
        .collect()
}

/// 单边幅度谱 `(频率, 幅度)`, 信号先去均值并乘以 Hamming 窗.
pub fn windowed_spectrum(data: &[f64], fs: f64) -> (Vec<f64>, Vec<f64>) {
    let n = data.len();
    let m = crate::stats::mean(data);
    let win = hamming(n);
    let windowed: Vec<f64> = data.iter().zip(&win).map(|(&x, &w)| (x - m) * w).collect();
    let spec = fft(&windowed);
    let half = n / 2 + 1;
    let freqs = (0..half).map(|k| k as f64 * fs / n as f64).collect();
    let mags = spec.iter().take(half).map(|c| c.norm()).collect();
    (freqs, mags)
}

/// Welch 功率谱密度估计. Hann 窗, 50% 重叠, 每段去均值.
///
/// 数据短于 `nperseg` 时以整个信号为一段.
pub fn welch(data: &[f64], fs: f64, nperseg: usize) -> (Vec<f64>, Vec<f64>) {
    let seg = nperseg.min(data.len()).max(1);
    let step = (seg / 2).max(1);
    let win = hann(seg);
    let win_power: f64 = win.iter().map(|w| w * w).sum();
    let half = seg / 2 + 1;
    let mut psd = vec![0.0; half];
    let mut count = 0usize;
    let mut start = 0;
    while start + seg <= data.len() {
        let chunk = &data[start..start + seg];
        let m = crate::stats::mean(chunk);
        let windowed: Vec<f64> = chunk.iter().zip(&win).map(|(&x, &w)| (x - m) * w).collect();
        for (p, c) in psd.iter_mut().zip(fft(&windowed).iter().take(half)) {
            *p += c.norm_sqr();
        }
        count += 1;
        start += step;
    }
    let scale = 1.0 / (fs * win_power.max(f64::MIN_POSITIVE) * count.max(1) as f64);
    for (k, p) in psd.iter_mut().enumerate() {
        *p *= scale;
        if k != 0 && !(seg % 2 == 0 && k == seg / 2) {
            *p *= 2.0;
        }
    }
    let freqs = (0..half).map(|k| k as f64 * fs / seg as f64).collect();
    (freqs, psd)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(f: f64, fs: f64, n: usize) -> Vec<f64> {
        (0..n).map(|i| (2.0 * PI * f * i as f64 / fs).sin()).collect()
    }

    fn rms_mid(v: &[f64]) -> f64 {
        let q = v.len() / 4;
        crate::stats::rms(&v[q..v.len() - q])
    }

    #[test]
    fn test_gain_shape() {
        let b = FilterBand::Arb {
            lower_stop: 0.9,
            lower_pass: 1.0,
            upper_pass: 2.0,
            upper_stop: 2.2,
        };
        assert_eq!(b.gain(0.5), 0.0);
        assert!((b.gain(0.95) - 0.5).abs() < 1e-12);
        assert_eq!(b.gain(1.5), 1.0);
        assert!((b.gain(2.1) - 0.5).abs() < 1e-9);
        assert_eq!(b.gain(3.0), 0.0);
        assert_eq!(FilterBand::lowpass(1.0).gain(0.0), 1.0);
    }

    /// 心动带通保留 1.2 Hz, 去除 0.3 Hz.
    #[test]
    fn test_cardiac_band() {
        let fs = 20.0;
        let keep = sine(1.2, fs, 2000);
        let drop = sine(0.3, fs, 2000);
        let mixed: Vec<f64> = keep.iter().zip(&drop).map(|(a, b)| a + b).collect();
        let out = FilterBand::Cardiac.apply(&mixed, fs, false);
        let diff: Vec<f64> = out.iter().zip(&keep).map(|(a, b)| a - b).collect();
        assert!(rms_mid(&diff) < 0.05);
    }

    #[test]
    fn test_notch_removes_harmonics() {
        let fs = 10.0;
        let tone = sine(2.0, fs, 3000);
        let out = harmonic_notch_filter(&tone, fs, 1.0, 5.0);
        assert!(rms_mid(&out) < 0.05);
        let pass = sine(1.5, fs, 3000);
        let out = harmonic_notch_filter(&pass, fs, 1.0, 5.0);
        assert!((rms_mid(&out) - rms_mid(&pass)).abs() < 0.02);
    }

    #[test]
    fn test_envelope_of_sine() {
        let fs = 50.0;
        let s = sine(5.0, fs, 5000);
        let env = envelope(&s, fs, 0.4);
        // |sin| 的均值为 2 / pi.
        let mid = crate::stats::mean(&env[1000..4000]);
        assert!((mid - 2.0 / PI).abs() < 0.02);
    }

    #[test]
    fn test_welch_peak() {
        let fs = 25.0;
        let s = sine(1.25, fs, 4096);
        let (f, p) = welch(&s, fs, 1024);
        let k = crate::stats::argmax(&p).unwrap();
        assert!((f[k] - 1.25).abs() < fs / 1024.0);
    }

    #[test]
    fn test_reflect_pad() {
        assert_eq!(reflect_pad(&[1.0, 2.0, 3.0], 2), vec![3.0, 2.0, 1.0, 2.0, 3.0, 2.0, 1.0]);
    }
}
