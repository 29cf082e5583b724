//! 运行时错误.

use thiserror::Error;

/// 流水线运行时错误.
///
/// 只有配置错误与几何不匹配属于致命错误. 数值退化 (空切片, 零权重 bin 等)
/// 在本地处理并记录日志, 不会产生 `Err`.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// 配置错误. 例如未知的坏点检测方法, 非法的 congrid 核宽度,
    /// 或外部生理信号的时间覆盖不足.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// 外部掩码 (或估计掩码) 的空间几何与 fMRI 数据不一致.
    ///
    /// 两个参数依次为期望形状和实际形状, 均为 `(z, h, w)`.
    #[error("dimension mismatch: expected {0:?}, got {1:?}")]
    DimensionMismatch((usize, usize, usize), (usize, usize, usize)),

    /// nifti 读写错误.
    #[error(transparent)]
    Nifti(#[from] nifti::NiftiError),

    /// 底层 I/O 错误.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// 数组形状错误.
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),

    /// json 解析错误.
    #[cfg(feature = "serde")]
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// 构造配置错误.
    #[inline]
    pub(crate) fn config<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
}

/// 流水线运行结果.
pub type PipelineResult<T> = Result<T, PipelineError>;
