//! Savitzky-Golay 平滑.
//!
//! 内部点使用卷积系数, 两端各半个窗口改为在首 (尾) 窗口上整体拟合后求值.

use super::polynomial::{least_squares, Polynomial};

/// 返回合法的 `(窗口长度, 阶数)`. 窗口长度被限制为不超过数据长度的奇数,
/// 阶数被限制为小于窗口长度.
fn clamp_window(len: usize, window: usize, order: usize) -> (usize, usize) {
    let mut w = window.min(len).max(1);
    if w % 2 == 0 {
        w -= 1;
    }
    (w, order.min(w.saturating_sub(1)))
}

/// 平滑系数: 对窗口中心的拟合值等于窗口数据和系数的点积.
fn coefficients(window: usize, order: usize) -> Vec<f64> {
    let half = (window / 2) as f64;
    let x: Vec<f64> = (0..window).map(|i| i as f64 - half).collect();
    // 以单位脉冲逐个拟合, 得到中心点对各输入的响应.
    (0..window)
        .map(|k| {
            let mut impulse = vec![0.0; window];
            impulse[k] = 1.0;
            least_squares(&x, &impulse, order).map_or(if k == window / 2 { 1.0 } else { 0.0 }, |p| p.eval(0.0))
        })
        .collect()
}

/// 对 `data` 做 Savitzky-Golay 平滑.
pub fn savgol_filter(data: &[f64], window: usize, order: usize) -> Vec<f64> {
    let n = data.len();
    let (w, order) = clamp_window(n, window, order);
    if w < 3 {
        return data.to_vec();
    }
    let half = w / 2;
    let coef = coefficients(w, order);
    let mut out = vec![0.0; n];
    for i in half..n - half {
        out[i] = coef
            .iter()
            .zip(&data[i - half..=i + half])
            .map(|(c, v)| c * v)
            .sum();
    }

    let x: Vec<f64> = (0..w).map(|i| i as f64).collect();
    let edge = |slice: &[f64]| least_squares(&x, slice, order);
    if let Some(head) = edge(&data[..w]) {
        fill(&mut out[..half], &head, 0.0);
    } else {
        out[..half].copy_from_slice(&data[..half]);
    }
    if let Some(tail) = edge(&data[n - w..]) {
        fill(&mut out[n - half..], &tail, (w - half) as f64);
    } else {
        out[n - half..].copy_from_slice(&data[n - half..]);
    }
    out
}

fn fill(out: &mut [f64], poly: &Polynomial<f64>, offset: f64) {
    for (i, v) in out.iter_mut().enumerate() {
        *v = poly.eval(offset + i as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 阶数内的多项式信号经平滑后不变.
    #[test]
    fn test_preserves_quadratic() {
        let data: Vec<f64> = (0..40).map(|i| 0.3 * (i as f64).powi(2) - 2.0 * i as f64 + 1.0).collect();
        let out = savgol_filter(&data, 11, 3);
        for (a, b) in out.iter().zip(&data) {
            assert!((a - b).abs() < 1e-6, "{a} != {b}");
        }
    }

    #[test]
    fn test_coefficients_sum_to_one() {
        let c = coefficients(7, 2);
        assert!((c.iter().sum::<f64>() - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_short_input() {
        assert_eq!(savgol_filter(&[1.0, 2.0], 101, 3), vec![1.0, 2.0]);
    }
}
