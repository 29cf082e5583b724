//! 多项式曲线.

// ref: https://blog.csdn.net/u012494154/article/details/112519550

use ndarray::{Array1, Array2};
use ndarray_linalg::Solve;

/// 多项式, 系数按升幂排列.
#[derive(Clone, Debug, PartialEq)]
pub struct Polynomial<T: num::Float>(pub Array1<T>);

impl<T: num::Float> Polynomial<T> {
    /// Horner 法求值.
    pub fn eval(&self, x: T) -> T {
        self.0.iter().rev().fold(T::zero(), |acc, &cur| acc * x + cur)
    }

    /// 求值但忽略常数项.
    pub fn eval_without_constant(&self, x: T) -> T {
        self.eval(x) - self.0.first().copied().unwrap_or_else(T::zero)
    }

    /// 多项式次数.
    #[inline]
    pub fn degree(&self) -> usize {
        self.0.len().saturating_sub(1)
    }
}

/// 最小二乘拟合. 通过正规方程 `V^T V theta = V^T y` 求解.
///
/// 方程奇异或解不是有限值时返回 `None`.
pub(crate) fn least_squares(x: &[f64], y: &[f64], degree: usize) -> Option<Polynomial<f64>> {
    assert_eq!(x.len(), y.len(), "x 值和 y 值必须一一对应");
    if x.len() <= degree {
        return None;
    }
    let v_mat = vandermonde(x, degree);
    let y = Array1::from_iter(y.iter().copied());
    let normal = v_mat.t().dot(&v_mat);
    let rhs = v_mat.t().dot(&y);
    let theta = normal.solve_into(rhs).ok()?;
    theta.iter().all(|v| v.is_finite()).then_some(Polynomial(theta))
}

fn vandermonde(x: &[f64], degree: usize) -> Array2<f64> {
    // shape: (m, n); m = x.len(), n = degree + 1
    Array2::<f64>::from_shape_fn((x.len(), degree + 1), |(m, n)| x[m].powi(n as i32))
}
