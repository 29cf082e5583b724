//! 体素级预处理: 去趋势, 去均值, 均值归一化.

use ndarray::{Array3, Array4, ArrayView3, ArrayView4, Axis, Zip};

use crate::fitting;

/// 预处理后的数据, 形状均为 `(z, H, W, t)`.
#[derive(Clone, Debug)]
pub struct NormalizedData {
    /// 去趋势后的数据, 均值保留.
    pub detrended: Array4<f64>,

    /// 去均值数据.
    pub demeaned: Array4<f64>,

    /// 去均值后除以均值. 均值为 0 的体素为 0.
    pub normalized: Array4<f64>,

    /// 每个体素的时间均值, `(z, H, W)`.
    pub means: Array3<f64>,
}

/// 对 `mask` 非零的体素做 `order` 次多项式去趋势 (保留常数项), 然后计算均值, 去均值数据与归一化数据.
///
/// `order` 为 0 时不去趋势.
pub fn normalize_voxels(data: ArrayView4<f64>, mask: ArrayView3<f64>, order: usize) -> NormalizedData {
    let mut detrended = data.to_owned();
    if order > 0 {
        let op = |mut lane: ndarray::ArrayViewMut1<f64>, &m: &f64| {
            if m != 0.0 {
                let out = fitting::detrend(&lane.to_vec(), order, false);
                lane.iter_mut().zip(out).for_each(|(v, o)| *v = o);
            }
        };
        let zip = Zip::from(detrended.lanes_mut(Axis(3))).and(&mask);
        #[cfg(feature = "rayon")]
        zip.par_for_each(op);
        #[cfg(not(feature = "rayon"))]
        zip.for_each(op);
    }

    let means = detrended
        .mean_axis(Axis(3))
        .unwrap_or_else(|| Array3::zeros(mask.dim()));
    let mut demeaned = detrended.clone();
    let mut normalized = Array4::zeros(detrended.dim());
    Zip::from(demeaned.lanes_mut(Axis(3)))
        .and(normalized.lanes_mut(Axis(3)))
        .and(&means)
        .for_each(|mut d, mut n, &m| {
            d.mapv_inplace(|v| v - m);
            n.zip_mut_with(&d, |n, &d| *n = crate::stats::safe_div(d, m));
        });

    NormalizedData {
        detrended,
        demeaned,
        normalized,
        means,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        let data = Array4::from_shape_fn((1, 1, 3, 10), |(_, _, w, t)| match w {
            0 => 100.0 + 2.0 * t as f64,
            1 => 0.0,
            _ => 50.0 + if t % 2 == 0 { 1.0 } else { -1.0 },
        });
        let mask = Array3::from_shape_vec((1, 1, 3), vec![1.0, 1.0, 1.0]).unwrap();
        let n = normalize_voxels(data.view(), mask.view(), 1);

        // 线性趋势被去掉, 均值保留.
        assert!((n.means[[0, 0, 0]] - 109.0).abs() < 1e-9);
        assert!(n.demeaned.slice(ndarray::s![0, 0, 0, ..]).iter().all(|v| v.abs() < 1e-9));
        // 零均值体素不会产生 NaN.
        assert!(n.normalized.iter().all(|v| v.is_finite()));
        assert!((n.normalized[[0, 0, 2, 0]].abs() - 1.0 / 50.0).abs() < 1e-3);
    }

    #[test]
    fn test_unmasked_voxels_not_detrended() {
        let data = Array4::from_shape_fn((1, 1, 1, 8), |(.., t)| t as f64);
        let mask = Array3::zeros((1, 1, 1));
        let n = normalize_voxels(data.view(), mask.view(), 2);
        assert_eq!(n.detrended, data);
    }
}
