//! 坏点检测.
//!
//! 两种阈值策略 (稳健偏差 / 分位范围) 之后, 每段坏点向两侧各扩展一个缓冲区,
//! 再把夹在坏点之间 (或序列端点处) 的过短好点段也标记为坏点.

use crate::stats;
use crate::{PipelineError, PipelineResult};
use either::Either;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 坏点检测方法.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BadPointMethod {
    /// 与中位数的绝对偏差不小于 `k * MAD` 即为坏点.
    /// `k = sqrt(1 / (1 - retain))`.
    Mad {
        /// 期望保留的样本比例, 取值 `(0, 1)`.
        retain: f64,
    },

    /// 取覆盖中间 `retain` 比例样本的数值范围, 向两侧各扩展一个范围宽度, 范围外为坏点.
    FracVal {
        /// 期望保留的样本比例, 取值 `(0, 1)`.
        retain: f64,
    },
}

impl BadPointMethod {
    /// 按名字构造. 名字不是 `"mad"` 或 `"fracval"` 时返回配置错误.
    pub fn from_name(name: &str, retain: f64) -> PipelineResult<Self> {
        let method = match name {
            "mad" => Self::Mad { retain },
            "fracval" => Self::FracVal { retain },
            _ => {
                return Err(PipelineError::config(format!(
                    "unknown bad point method `{name}`"
                )))
            }
        };
        method.validate()?;
        Ok(method)
    }

    /// 方法名.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Mad { .. } => "mad",
            Self::FracVal { .. } => "fracval",
        }
    }

    /// 保留比例.
    pub fn retain(&self) -> f64 {
        match *self {
            Self::Mad { retain } | Self::FracVal { retain } => retain,
        }
    }

    pub(crate) fn validate(&self) -> PipelineResult<()> {
        let r = self.retain();
        if r > 0.0 && r < 1.0 {
            Ok(())
        } else {
            Err(PipelineError::config(format!(
                "retain fraction must lie in (0, 1), got {r}"
            )))
        }
    }
}

/// 坏点检测结果.
#[derive(Clone, Debug)]
pub struct BadPoints {
    /// `true` 表示坏点.
    pub mask: Vec<bool>,

    /// 单个绝对偏差阈值 (左), 或 `(下界, 上界)` (右).
    pub threshold: Either<f64, (f64, f64)>,

    /// 使用的方法.
    pub method: BadPointMethod,
}

impl BadPoints {
    /// 全部为好点的结果.
    pub fn none(len: usize, method: BadPointMethod) -> Self {
        Self {
            mask: vec![false; len],
            threshold: Either::Left(f64::INFINITY),
            method,
        }
    }

    /// 好点的索引.
    pub fn good_indices(&self) -> Vec<usize> {
        self.mask
            .iter()
            .enumerate()
            .filter_map(|(i, &bad)| (!bad).then_some(i))
            .collect()
    }

    /// 坏点个数.
    pub fn count(&self) -> usize {
        self.mask.iter().filter(|&&b| b).count()
    }

    /// 坏点的 0/1 表示, 便于保存.
    pub fn as_f64(&self) -> Vec<f64> {
        self.mask.iter().map(|&b| f64::from(u8::from(b))).collect()
    }
}

/// 检测 `waveform` 中的坏点.
///
/// `round(min_gap_secs * sample_rate)` 个样本既是坏点两侧的缓冲宽度, 也是最短好点段长度.
pub fn find_bad_points(
    waveform: &[f64],
    sample_rate: f64,
    method: BadPointMethod,
    min_gap_secs: f64,
) -> BadPoints {
    let (mut mask, threshold) = match method {
        BadPointMethod::Mad { retain } => {
            let med = stats::median(waveform);
            let dev: Vec<f64> = waveform.iter().map(|&x| (x - med).abs()).collect();
            let thresh = (1.0 / (1.0 - retain)).sqrt() * stats::mad(waveform);
            (
                dev.iter().map(|&d| d >= thresh).collect::<Vec<_>>(),
                Either::Left(thresh),
            )
        }
        BadPointMethod::FracVal { retain } => {
            let v = stats::frac_vals(waveform, &[(1.0 - retain) / 2.0, (1.0 + retain) / 2.0]);
            let range = v[1] - v[0];
            let (lower, upper) = (v[0] - range, v[1] + range);
            (
                waveform.iter().map(|&x| !(lower..=upper).contains(&x)).collect(),
                Either::Right((lower, upper)),
            )
        }
    };

    let streak = (min_gap_secs * sample_rate).round() as usize;
    dilate(&mut mask, streak);
    fill_short_gaps(&mut mask, streak);

    let result = BadPoints {
        mask,
        threshold,
        method,
    };
    log::debug!(
        "{} of {} points marked bad using the {} method",
        result.count(),
        waveform.len(),
        method.name()
    );
    result
}

/// 每个坏点向两侧各扩展 `width` 个样本.
fn dilate(mask: &mut [bool], width: usize) {
    if width == 0 {
        return;
    }
    let flagged: Vec<usize> = mask
        .iter()
        .enumerate()
        .filter_map(|(i, &b)| b.then_some(i))
        .collect();
    let n = mask.len();
    for i in flagged {
        let lo = i.saturating_sub(width);
        let hi = (i + width + 1).min(n);
        mask[lo..hi].iter_mut().for_each(|b| *b = true);
    }
}

/// 把长度小于 `streak` 且一侧或两侧紧邻坏点的好点段标记为坏点.
/// 没有坏点时不做任何修改.
fn fill_short_gaps(mask: &mut [bool], streak: usize) {
    if streak == 0 || !mask.iter().any(|&b| b) {
        return;
    }
    let n = mask.len();
    let mut i = 0;
    while i < n {
        if mask[i] {
            i += 1;
            continue;
        }
        let start = i;
        while i < n && !mask[i] {
            i += 1;
        }
        if i - start < streak {
            mask[start..i].iter_mut().for_each(|b| *b = true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noise(n: usize) -> Vec<f64> {
        // 确定性的伪随机序列, 近似均匀分布.
        let mut state = 12345_u64;
        (0..n)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                ((state >> 33) as f64 / (1u64 << 31) as f64) - 0.5
            })
            .collect()
    }

    /// 所有保留下来的好点段, 要么足够长, 要么位于序列边界 (且没有坏点).
    fn assert_gap_property(mask: &[bool], streak: usize) {
        let mut i = 0;
        while i < mask.len() {
            if mask[i] {
                i += 1;
                continue;
            }
            let start = i;
            while i < mask.len() && !mask[i] {
                i += 1;
            }
            assert!(i - start >= streak, "好点段 {start}..{i} 过短");
        }
    }

    #[test]
    fn test_unknown_method() {
        assert!(matches!(
            BadPointMethod::from_name("triangle", 0.89),
            Err(PipelineError::Configuration(_))
        ));
        assert_eq!(BadPointMethod::from_name("mad", 0.89).unwrap().name(), "mad");
        assert!(BadPointMethod::from_name("fracval", 1.5).is_err());
    }

    #[test]
    fn test_clean_signal_keeps_most() {
        let fs = 10.0;
        let wave: Vec<f64> = (0..1000).map(|i| (i as f64 * 0.3).sin()).collect();
        let bp = find_bad_points(&wave, fs, BadPointMethod::FracVal { retain: 0.89 }, 2.0);
        assert_eq!(bp.count(), 0);
        assert!(bp.threshold.is_right());
    }

    /// 3 秒的大幅振荡突发段连同两侧各 2 秒的缓冲区都被标记为坏点,
    /// 突发段内过零附近的小值也不例外.
    #[test]
    fn test_outlier_burst() {
        let fs = 10.0;
        let mut wave = noise(1200);
        for (k, v) in wave[500..530].iter_mut().enumerate() {
            *v = 5.0 * (1.3 * k as f64 + 1.0).sin();
        }
        // 突发段内有低于阈值的样本.
        assert!(wave[500..530].iter().any(|v| v.abs() < 1.0));
        let bp = find_bad_points(&wave, fs, BadPointMethod::Mad { retain: 0.89 }, 2.0);
        assert!(bp.mask[480..550].iter().all(|&b| b));
        assert!(bp.mask[..470].iter().all(|&b| !b));
        assert!(bp.mask[560..].iter().all(|&b| !b));
        assert!(bp.threshold.is_left());
        assert_gap_property(&bp.mask, 20);
    }

    #[test]
    fn test_dilate() {
        let mut mask = vec![false; 10];
        mask[1] = true;
        mask[7] = true;
        dilate(&mut mask, 2);
        assert_eq!(
            mask,
            vec![true, true, true, true, false, true, true, true, true, true]
        );
    }

    #[test]
    fn test_fill_short_gaps() {
        let mut mask = vec![false, false, true, false, false, false, false, true, false];
        fill_short_gaps(&mut mask, 3);
        assert_eq!(mask, vec![true, true, true, false, false, false, false, true, true]);

        let mut clean = vec![false; 4];
        fill_short_gaps(&mut clean, 10);
        assert!(clean.iter().all(|&b| !b));
    }

    #[test]
    fn test_gap_property_on_noise() {
        let fs = 5.0;
        let wave = noise(2000);
        let bp = find_bad_points(&wave, fs, BadPointMethod::Mad { retain: 0.3 }, 2.0);
        assert!(bp.count() > 0);
        assert_gap_property(&bp.mask, 10);
    }
}
