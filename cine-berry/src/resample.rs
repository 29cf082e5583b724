//! 重采样.
//!
//! 核心是 congrid: 把位置不规则的样本按核函数权重分摊到规则网格的相邻 bin 上.
//! 累积 `weight * value` 和 `weight` 后相除, 即得到每个 bin 的加权平均.
//!
//! # 注意
//!
//! 1. 核宽度以 bin 为单位, 取值为 1.5 到 5.0 之间 0.5 的整数倍.
//! 2. 样本恰好位于 bin 中心时, 该 bin 获得核的最大权重 1.

use crate::{PipelineError, PipelineResult};
use std::f64::consts::PI;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// congrid 核形状.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum GridKernel {
    /// Kaiser-Bessel 核.
    Kaiser,

    /// 截断高斯核, 截断处为 2 个标准差.
    Gauss,
}

/// 检查核宽度是否合法.
pub fn check_kernel_width(width: f64) -> PipelineResult<()> {
    let doubled = width * 2.0;
    if (1.5..=5.0).contains(&width) && (doubled - doubled.round()).abs() < 1e-9 {
        Ok(())
    } else {
        Err(PipelineError::config(format!(
            "congrid kernel width must be a multiple of 0.5 in 1.5..=5.0, got {width}"
        )))
    }
}

/// 零阶第一类修正 Bessel 函数, 级数展开.
fn bessel_i0(x: f64) -> f64 {
    let q = x * x / 4.0;
    let mut term = 1.0;
    let mut sum = 1.0;
    for k in 1..64 {
        term *= q / (k * k) as f64;
        sum += term;
        if term < sum * 1e-17 {
            break;
        }
    }
    sum
}

/// 规则网格: 第 `i` 个 bin 的中心为 `start + i * step`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BinAxis {
    /// 第一个 bin 的中心.
    pub start: f64,

    /// bin 间距.
    pub step: f64,

    /// bin 个数.
    pub len: usize,
}

impl BinAxis {
    /// 从 `start` 到 `end` (含) 的 `len` 个等距 bin.
    pub fn linspace(start: f64, end: f64, len: usize) -> Self {
        let step = if len > 1 {
            (end - start) / (len - 1) as f64
        } else {
            1.0
        };
        Self { start, step, len }
    }

    /// 第 `i` 个 bin 的中心.
    #[inline]
    pub fn value(&self, i: usize) -> f64 {
        self.start + i as f64 * self.step
    }

    /// 所有 bin 中心.
    pub fn values(&self) -> Vec<f64> {
        (0..self.len).map(|i| self.value(i)).collect()
    }

    /// 离 `x` 最近的 bin, 结果被截断到合法范围.
    pub fn nearest(&self, x: f64) -> usize {
        let i = ((x - self.start) / self.step).round();
        i.clamp(0.0, (self.len.max(1) - 1) as f64) as usize
    }
}

/// 一个样本分摊到某个 bin 上的份额.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Tap {
    /// 目标 bin.
    pub index: usize,

    /// 核权重.
    pub weight: f64,

    /// `weight * value`.
    pub value: f64,
}

/// congrid 算子.
#[derive(Clone, Debug)]
pub struct Gridder {
    axis: BinAxis,
    half_width: f64,
    kernel: GridKernel,
    cyclic: bool,
    beta: f64,
    i0_beta: f64,
}

impl Gridder {
    /// `width` 为核宽度 (单位: bin). `cyclic` 为 `true` 时网格首尾相接,
    /// 周期为 `axis.len * axis.step`.
    pub fn new(axis: BinAxis, width: f64, kernel: GridKernel, cyclic: bool) -> PipelineResult<Self> {
        check_kernel_width(width)?;
        if axis.len == 0 || axis.step <= 0.0 {
            return Err(PipelineError::config("congrid axis must be non-empty and increasing"));
        }
        // Beatty et al. 2005, 过采样率 1.5.
        let alpha = 1.5;
        let beta = PI * ((width / alpha).powi(2) * (alpha - 0.5).powi(2) - 0.8).sqrt();
        Ok(Self {
            axis,
            half_width: width / 2.0,
            kernel,
            cyclic,
            beta,
            i0_beta: bessel_i0(beta),
        })
    }

    /// 网格.
    #[inline]
    pub fn axis(&self) -> &BinAxis {
        &self.axis
    }

    /// 距 bin 中心 `d` 个 bin 处的核权重. `|d| > width / 2` 时为 0.
    pub fn kernel_weight(&self, d: f64) -> f64 {
        let r = d.abs() / self.half_width;
        if r > 1.0 {
            return 0.0;
        }
        match self.kernel {
            GridKernel::Kaiser => bessel_i0(self.beta * (1.0 - r * r).sqrt()) / self.i0_beta,
            GridKernel::Gauss => (-0.5 * (2.0 * r).powi(2)).exp(),
        }
    }

    /// 把位于 `loc`, 值为 `val` 的样本分摊到网格上.
    ///
    /// 非循环网格上超出两端半个 bin 以外的部分被丢弃.
    pub fn congrid(&self, loc: f64, val: f64) -> Vec<Tap> {
        let pos = (loc - self.axis.start) / self.axis.step;
        let center = pos.round();
        let offset = pos - center;
        let reach = self.half_width.ceil() as i64;
        let len = self.axis.len as i64;

        (-reach..=reach)
            .filter_map(|k| {
                let weight = self.kernel_weight(k as f64 - offset);
                if weight <= 0.0 {
                    return None;
                }
                let raw = center as i64 + k;
                let index = if self.cyclic {
                    raw.rem_euclid(len)
                } else if (0..len).contains(&raw) {
                    raw
                } else {
                    return None;
                };
                Some(Tap {
                    index: index as usize,
                    weight,
                    value: weight * val,
                })
            })
            .collect()
    }
}

/// 线性插值. `x` 超出 `xp` 范围时取端点值. `xp` 必须递增.
pub fn interp_linear(xp: &[f64], fp: &[f64], x: f64) -> f64 {
    debug_assert_eq!(xp.len(), fp.len());
    match xp.len() {
        0 => return 0.0,
        1 => return fp[0],
        _ => {}
    }
    if x <= xp[0] {
        return fp[0];
    }
    let last = xp.len() - 1;
    if x >= xp[last] {
        return fp[last];
    }
    let hi = xp.partition_point(|&v| v <= x).min(last);
    let lo = hi - 1;
    let t = (x - xp[lo]) / (xp[hi] - xp[lo]);
    fp[lo] + t * (fp[hi] - fp[lo])
}

/// 把采样率 `fs_in`, 起始时间 `t0` 的信号重采样到采样率 `fs_out`, 起始时间 0, 共 `n_out` 个点.
///
/// 降采样时先按新的 Nyquist 频率低通滤波.
pub fn resample_uniform(data: &[f64], fs_in: f64, t0: f64, fs_out: f64, n_out: usize) -> Vec<f64> {
    let filtered;
    let src = if fs_out < fs_in {
        filtered = crate::filter::FilterBand::lowpass(0.45 * fs_out).apply(data, fs_in, false);
        &filtered[..]
    } else {
        data
    };
    let xp: Vec<f64> = (0..src.len()).map(|i| t0 + i as f64 / fs_in).collect();
    (0..n_out)
        .map(|i| interp_linear(&xp, src, i as f64 / fs_out))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f64_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-8
    }

    #[test]
    fn test_kernel_width_check() {
        for w in [1.5, 2.0, 3.0, 4.5, 5.0] {
            assert!(check_kernel_width(w).is_ok());
        }
        for w in [1.0, 2.2, 5.5] {
            assert!(check_kernel_width(w).is_err());
        }
    }

    #[test]
    fn test_bessel_i0() {
        assert!(f64_eq(bessel_i0(0.0), 1.0));
        assert!((bessel_i0(1.0) - 1.2660658777520082).abs() < 1e-12);
    }

    /// 样本在 bin 中心时获得最大权重, 核宽度以外没有权重.
    #[test]
    fn test_congrid_at_center() {
        let axis = BinAxis::linspace(0.0, 9.0, 10);
        for kernel in [GridKernel::Kaiser, GridKernel::Gauss] {
            for width in [1.5, 3.0, 5.0] {
                let g = Gridder::new(axis, width, kernel, true).unwrap();
                let taps = g.congrid(4.0, 2.0);
                let center = taps.iter().find(|t| t.index == 4).unwrap();
                assert!(f64_eq(center.weight, 1.0));
                assert!(f64_eq(center.value, 2.0));
                assert!(taps.iter().all(|t| t.weight <= center.weight));
                for t in &taps {
                    let d = (t.index as f64 - 4.0).abs();
                    assert!(d <= width / 2.0, "bin {} 在核宽度 {} 外", t.index, width);
                }
            }
        }
    }

    #[test]
    fn test_congrid_wraps() {
        let axis = BinAxis::linspace(0.0, 7.0, 8);
        let g = Gridder::new(axis, 3.0, GridKernel::Kaiser, true).unwrap();
        let mut idx: Vec<usize> = g.congrid(0.0, 1.0).iter().map(|t| t.index).collect();
        idx.sort_unstable();
        assert_eq!(idx, vec![0, 1, 7]);

        let g = Gridder::new(axis, 3.0, GridKernel::Kaiser, false).unwrap();
        let mut idx: Vec<usize> = g.congrid(0.0, 1.0).iter().map(|t| t.index).collect();
        idx.sort_unstable();
        assert_eq!(idx, vec![0, 1]);
    }

    /// 权重随距离递减.
    #[test]
    fn test_kernel_monotone() {
        let g = Gridder::new(BinAxis::linspace(0.0, 1.0, 2), 4.0, GridKernel::Kaiser, false).unwrap();
        let w: Vec<f64> = (0..=4).map(|i| g.kernel_weight(i as f64 * 0.5)).collect();
        assert!(w.windows(2).all(|p| p[0] > p[1] || p[1] == 0.0));
        assert!(f64_eq(g.kernel_weight(2.5), 0.0));
    }

    #[test]
    fn test_interp_linear() {
        let xp = [0.0, 1.0, 2.0];
        let fp = [0.0, 10.0, 0.0];
        assert!(f64_eq(interp_linear(&xp, &fp, 0.5), 5.0));
        assert!(f64_eq(interp_linear(&xp, &fp, 1.5), 5.0));
        assert!(f64_eq(interp_linear(&xp, &fp, -1.0), 0.0));
        assert!(f64_eq(interp_linear(&xp, &fp, 2.0), 0.0));
    }

    #[test]
    fn test_resample_uniform_upsample() {
        let data: Vec<f64> = (0..10).map(f64::from).collect();
        let out = resample_uniform(&data, 1.0, 0.0, 4.0, 37);
        assert!(f64_eq(out[5], 1.25));
        assert!(f64_eq(out[36], 9.0));
    }
}
