//! 曲线拟合.
//!
//! 多项式最小二乘拟合, 以及基于它的去趋势, 趋势滤波和 Savitzky-Golay 平滑.

mod polynomial;
mod savgol;

pub use polynomial::Polynomial;
pub use savgol::savgol_filter;

/// 基于最小二乘法拟合 n 次多项式曲线.
///
/// `x` 是自变量数组, `y` 是对应函数值, `degree` 是多项式次数.
/// 点数不足或方程奇异时返回 `None`.
pub fn polyfit(x: &[f64], y: &[f64], degree: usize) -> Option<Polynomial<f64>> {
    polynomial::least_squares(x, y, degree)
}

/// 以样本序号为自变量的归一化坐标, 取值约在 `[-1, 1)`.
fn centered_axis(n: usize) -> Vec<f64> {
    let half = (n as f64 / 2.0).max(1.0);
    (0..n).map(|i| (i as f64 - n as f64 / 2.0) / half).collect()
}

/// 去除 `order` 次多项式趋势.
///
/// `demean` 为 `false` 时保留常数项 (均值不变).
/// `order` 为 0 或数据过短时原样返回.
pub fn detrend(data: &[f64], order: usize, demean: bool) -> Vec<f64> {
    if order == 0 && !demean {
        return data.to_vec();
    }
    let x = centered_axis(data.len());
    match polyfit(&x, data, order) {
        Some(p) => data
            .iter()
            .zip(&x)
            .map(|(&y, &t)| {
                if demean {
                    y - p.eval(t)
                } else {
                    y - p.eval_without_constant(t)
                }
            })
            .collect(),
        None => data.to_vec(),
    }
}

/// 多项式趋势滤波.
///
/// 用 `order` 次多项式拟合 `data`, 残差超过 `ndevs` 倍 MAD 的点替换为拟合值.
pub fn trend_filter(data: &[f64], order: usize, ndevs: f64) -> Vec<f64> {
    let n = data.len().max(1) as f64;
    let x: Vec<f64> = (0..data.len()).map(|i| i as f64 / n).collect();
    let Some(p) = polyfit(&x, data, order) else {
        return data.to_vec();
    };
    let fit: Vec<f64> = x.iter().map(|&t| p.eval(t)).collect();
    let resid: Vec<f64> = data.iter().zip(&fit).map(|(a, b)| a - b).collect();
    let limit = ndevs * crate::stats::mad(&resid);
    data.iter()
        .zip(&fit)
        .zip(&resid)
        .map(|((&y, &f), &r)| if r.abs() > limit { f } else { y })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detrend_removes_line() {
        let data: Vec<f64> = (0..50).map(|i| 3.0 + 0.2 * i as f64).collect();
        let out = detrend(&data, 1, true);
        assert!(out.iter().all(|v| v.abs() < 1e-9));
    }

    /// 不去均值时, 去趋势的结果保留原始均值.
    #[test]
    fn test_detrend_keep_mean() {
        let data: Vec<f64> = (0..51).map(|i| 3.0 + 0.2 * (i as f64 - 25.0)).collect();
        let out = detrend(&data, 1, false);
        assert!(out.iter().all(|v| (v - 3.0).abs() < 1e-9));
    }

    #[test]
    fn test_trend_filter_replaces_outlier() {
        let mut data: Vec<f64> = (0..100).map(|i| i as f64 * 0.1 + 0.01 * ((i * 7) % 5) as f64).collect();
        data[40] += 20.0;
        let out = trend_filter(&data, 3, 3.0);
        assert!(out[40] < data[40] - 10.0);
        assert_eq!(out[90], data[90]);
    }
}
