//! 一维统计量.
//!
//! 所有函数均接受切片, 不会修改输入.
//! 中位数和分位数基于 `NotNan` 排序, 输入中不应包含 NaN.

use crate::consts::MAD_TO_SIGMA;
use ordered_float::NotNan;

/// 返回升序排列的副本. NaN 会被丢弃.
pub fn sorted(data: &[f64]) -> Vec<f64> {
    let mut v: Vec<NotNan<f64>> = data.iter().filter_map(|&x| NotNan::new(x).ok()).collect();
    v.sort_unstable();
    v.into_iter().map(NotNan::into_inner).collect()
}

/// 均值. 空输入返回 0.
pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// 总体方差 (除以 `n`).
pub fn variance(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let m = mean(data);
    data.iter().map(|&x| (x - m) * (x - m)).sum::<f64>() / data.len() as f64
}

/// 总体标准差.
#[inline]
pub fn std(data: &[f64]) -> f64 {
    variance(data).sqrt()
}

/// 均方根.
pub fn rms(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    (data.iter().map(|x| x * x).sum::<f64>() / data.len() as f64).sqrt()
}

/// 中位数. 偶数长度时取中间两个值的平均.
pub fn median(data: &[f64]) -> f64 {
    let s = sorted(data);
    match s.len() {
        0 => 0.0,
        n if n % 2 == 1 => s[n / 2],
        n => 0.5 * (s[n / 2 - 1] + s[n / 2]),
    }
}

/// 中位数绝对偏差, 缩放为正态分布标准差的一致估计.
pub fn mad(data: &[f64]) -> f64 {
    let med = median(data);
    let dev: Vec<f64> = data.iter().map(|&x| (x - med).abs()).collect();
    median(&dev) * MAD_TO_SIGMA
}

/// 去中位数并除以 MAD.
///
/// 返回 `(归一化后的信号, MAD)`. MAD 为 0 时只做去中位数.
pub fn mad_normalize(data: &[f64]) -> (Vec<f64>, f64) {
    let med = median(data);
    let demedianed: Vec<f64> = data.iter().map(|&x| x - med).collect();
    let sigma = mad(&demedianed);
    if sigma > 0.0 {
        (demedianed.iter().map(|&x| x / sigma).collect(), sigma)
    } else {
        (demedianed, sigma)
    }
}

/// 去均值并除以标准差. 标准差为 0 时只做去均值.
pub fn std_normalize(data: &[f64]) -> Vec<f64> {
    let m = mean(data);
    let s = std(data);
    data.iter()
        .map(|&x| if s > 0.0 { (x - m) / s } else { x - m })
        .collect()
}

/// 相关归一化: 标准化后再除以 `sqrt(n)`, 使两个等长信号的点积即为 Pearson 相关系数.
pub fn corr_normalize(data: &[f64]) -> Vec<f64> {
    let scale = (data.len().max(1) as f64).sqrt();
    std_normalize(data).into_iter().map(|x| x / scale).collect()
}

/// 按线性插值计算分位数, `q` 取值 `[0, 1]`.
pub fn percentile(data: &[f64], q: f64) -> f64 {
    let s = sorted(data);
    percentile_sorted(&s, q)
}

/// 对已排序数据按线性插值计算分位数.
pub fn percentile_sorted(s: &[f64], q: f64) -> f64 {
    if s.is_empty() {
        return 0.0;
    }
    let pos = q.clamp(0.0, 1.0) * (s.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    s[lo] + (s[hi] - s[lo]) * frac
}

/// 多个分位数 (向下取整索引), 只排序一次.
pub fn frac_vals(data: &[f64], fracs: &[f64]) -> Vec<f64> {
    let s = sorted(data);
    if s.is_empty() {
        return vec![0.0; fracs.len()];
    }
    let max_index = (s.len() - 1) as f64;
    fracs
        .iter()
        .map(|&f| s[(f.clamp(0.0, 1.0) * max_index).floor() as usize])
        .collect()
}

/// 偏度 (有偏估计, 三阶中心矩除以方差的 1.5 次幂).
pub fn skew(data: &[f64]) -> f64 {
    let m = mean(data);
    let n = data.len().max(1) as f64;
    let m2 = data.iter().map(|&x| (x - m).powi(2)).sum::<f64>() / n;
    let m3 = data.iter().map(|&x| (x - m).powi(3)).sum::<f64>() / n;
    if m2 > 0.0 {
        m3 / m2.powf(1.5)
    } else {
        0.0
    }
}

/// 超额峰度 (Fisher 定义, 有偏估计). 正态分布的值为 0.
pub fn kurtosis(data: &[f64]) -> f64 {
    let m = mean(data);
    let n = data.len().max(1) as f64;
    let m2 = data.iter().map(|&x| (x - m).powi(2)).sum::<f64>() / n;
    let m4 = data.iter().map(|&x| (x - m).powi(4)).sum::<f64>() / n;
    if m2 > 0.0 {
        m4 / (m2 * m2) - 3.0
    } else {
        0.0
    }
}

/// 最大值所在索引. 空输入返回 `None`.
pub fn argmax(data: &[f64]) -> Option<usize> {
    data.iter()
        .enumerate()
        .filter_map(|(i, &x)| NotNan::new(x).ok().map(|v| (i, v)))
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(i, _)| i)
}

/// 最小值所在索引. 空输入返回 `None`.
pub fn argmin(data: &[f64]) -> Option<usize> {
    data.iter()
        .enumerate()
        .filter_map(|(i, &x)| NotNan::new(x).ok().map(|v| (i, v)))
        .min_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)))
        .map(|(i, _)| i)
}

/// 强度掩码: 大于稳健最大值 (98% 分位数) 的 `thresh_pct` 百分比的位置为 `true`.
pub fn make_mask(image: &[f64], thresh_pct: f64) -> Vec<bool> {
    let robust_max = percentile(image, crate::consts::VESSEL_PERCENTILE);
    let thresh = robust_max * thresh_pct / 100.0;
    image.iter().map(|&v| v > thresh).collect()
}

/// 分母为 0 时返回 0 的除法.
#[inline]
pub fn safe_div(num: f64, den: f64) -> f64 {
    if den != 0.0 {
        num / den
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f64_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-8
    }

    #[test]
    fn test_median() {
        assert!(f64_eq(median(&[3.0, 1.0, 2.0]), 2.0));
        assert!(f64_eq(median(&[4.0, 1.0, 2.0, 3.0]), 2.5));
        assert!(f64_eq(median(&[]), 0.0));
    }

    #[test]
    fn test_mad_of_constant_is_zero() {
        let (v, sigma) = mad_normalize(&[5.0; 10]);
        assert!(f64_eq(sigma, 0.0));
        assert!(v.iter().all(|&x| f64_eq(x, 0.0)));
    }

    /// 归一化后的信号 MAD 为 1, 中位数为 0.
    #[test]
    fn test_mad_normalize() {
        let data: Vec<f64> = (0..101).map(|i| (i as f64 * 0.37).sin() * 4.0 + 10.0).collect();
        let (v, sigma) = mad_normalize(&data);
        assert!(sigma > 0.0);
        assert!(median(&v).abs() < 1e-12);
        assert!(f64_eq(mad(&v), 1.0));
    }

    #[test]
    fn test_percentile() {
        let d: Vec<f64> = (0..=10).map(f64::from).collect();
        assert!(f64_eq(percentile(&d, 0.5), 5.0));
        assert!(f64_eq(percentile(&d, 0.98), 9.8));
        assert_eq!(frac_vals(&d, &[0.0, 1.0]), vec![0.0, 10.0]);
    }

    #[test]
    fn test_moments() {
        let sym = [-2.0, -1.0, 0.0, 1.0, 2.0];
        assert!(f64_eq(skew(&sym), 0.0));
        assert!(f64_eq(variance(&sym), 2.0));
        // 两点分布的超额峰度为 -2.
        assert!(f64_eq(kurtosis(&[-1.0, 1.0, -1.0, 1.0]), -2.0));
    }

    #[test]
    fn test_corr_normalize_self_dot_is_one() {
        let v = corr_normalize(&[1.0, 3.0, 2.0, 7.0, -1.0]);
        let dot: f64 = v.iter().map(|x| x * x).sum();
        assert!(f64_eq(dot, 1.0));
    }

    #[test]
    fn test_make_mask() {
        let mut image = vec![0.0; 50];
        image.extend(vec![100.0; 50]);
        image[0] = 20.0;
        let mask = make_mask(&image, 10.0);
        assert!(mask[0]);
        assert!(!mask[1]);
        assert_eq!(mask.iter().filter(|&&m| m).count(), 51);
    }

    #[test]
    fn test_arg_extrema() {
        let d = [1.0, 5.0, -3.0, 5.0];
        assert_eq!(argmax(&d), Some(1));
        assert_eq!(argmin(&d), Some(2));
        assert_eq!(argmax(&[]), None);
    }
}
