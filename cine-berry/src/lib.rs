#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 从 4D fMRI 数据中提取心动波形及其瞬时相位, 并按心动相位重建 "电影" (cine) 体数据,
//! 进而区分动脉与静脉.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 体数据统一按 `(z, H, W)` 访问, 时间 (或相位) 为最后一维.
//! 2. 只有配置错误和几何不匹配会返回 `Err`. 空切片, 零权重 bin 等数值退化在本地处理,
//!   记录日志后输出零值.
//!
//! # 开发计划
//!
//! ### 从图像强度提取心动/呼吸波形 ✅
//!
//! 切片平均, 按采集时刻交织, 去除 TR 周期成分与谐波, 带通.
//!
//! 实现位于 `cine-berry/src/waveform.rs`.
//!
//! ### 坏点检测 ✅
//!
//! MAD 与分位范围两种策略, 以及过短好点段的合并.
//!
//! 实现位于 `cine-berry/src/badpts.rs`.
//!
//! ### 心率估计, 解析信号与瞬时相位 ✅
//!
//! 实现位于 `cine-berry/src/phase.rs`.
//!
//! ### congrid 循环网格重采样 & 心动周期平均 ✅
//!
//! 实现位于 `cine-berry/src/resample.rs` 与 `cine-berry/src/cycle.rs`.
//!
//! ### 相位投影与血管分类 ✅
//!
//! 导数极值判定动脉极性, 硬/软阈值血管掩码, 混叠相关时延估计.
//!
//! 实现位于 `cine-berry/src/projection.rs` 与 `cine-berry/src/vessel.rs`.
//!
//! ### 多轮精化 ✅
//!
//! 实现位于 `cine-berry/src/pipeline.rs`.
//!
//! ### 外部生理记录 ✅
//!
//! 覆盖范围检查, 包络归一化, 互相关对齐.
//!
//! 实现位于 `cine-berry/src/physio.rs` 与 `cine-berry/src/correlate.rs`.
//!
//! ### 心动噪声回归 ✅
//!
//! 实现位于 `cine-berry/src/glm.rs`.
//!
//! ### 小功能 ✅
//!
//! 1. 信号质量指标 (偏度, 峰度, 近似熵). ✅
//! 2. 运行信息 JSON. ✅
//! 3. Data iterator ✅
//!
//! ### 完善代码文档 ✅
//!
//! 给每个 public API 提供文档, 并视情况给 private
//! API 提供文档.

/// 三维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

/// 4D fMRI nii 文件基础数据结构及周边 I/O.
pub mod data;

pub use data::{AcquisitionGeometry, FmriScan, NiftiHeaderAttr};

mod error;

pub use error::{PipelineError, PipelineResult};

mod config;

pub use config::{AliasedCorrelation, ProcessConfig};

pub mod consts;

pub mod stats;

pub mod fitting;

pub mod filter;

pub mod resample;

pub mod phase;

pub mod badpts;

pub mod waveform;

pub mod quality;

pub mod correlate;

pub mod physio;

pub mod cycle;

pub mod prep;

pub mod projection;

pub mod vessel;

pub mod glm;

pub mod info;

pub mod pipeline;

pub mod output;

pub mod dataset;

pub mod prelude;
