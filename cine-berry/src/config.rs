//! 流水线配置.
//!
//! 滤波器频带, congrid 核, 坏点检测方法, GLM 方式等选项均建模为封闭的枚举,
//! 非法取值在构造时即被拒绝.

use crate::badpts::BadPointMethod;
use crate::consts::{self, band};
use crate::filter::FilterBand;
use crate::glm::GlmMode;
use crate::phase::PhaseConvention;
use crate::resample::GridKernel;
use crate::{PipelineError, PipelineResult};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 混叠相关 (aliased correlation) 的搜索窗口.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AliasedCorrelation {
    /// 延迟搜索窗口总宽度 (秒), 以 0 为中心.
    pub width: f64,

    /// 窗口内等距的候选延迟个数.
    pub points: usize,
}

impl Default for AliasedCorrelation {
    fn default() -> Self {
        Self {
            width: 1.5,
            points: 201,
        }
    }
}

impl AliasedCorrelation {
    /// 候选延迟 (秒), 从 `-width / 2` 到 `width / 2` (含端点).
    pub fn search_values(&self) -> Vec<f64> {
        let n = self.points.max(2);
        let step = self.width / (n - 1) as f64;
        (0..n)
            .map(|i| i as f64 * step - self.width / 2.0)
            .collect()
    }
}

/// 一次完整运行的配置.
///
/// `Default` 给出常用的默认值.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ProcessConfig {
    /// 输出相位 bin 个数 `N`.
    pub dest_points: usize,

    /// congrid 核宽度 (单位: bin). 取值为 1.5 到 5.0 之间 0.5 的整数倍.
    pub congrid_bins: f64,

    /// congrid 核形状.
    pub grid_kernel: GridKernel,

    /// 相位卷绕区间.
    pub phase: PhaseConvention,

    /// 心率搜索下限 (BPM).
    pub min_hr: f64,

    /// 心率搜索上限 (BPM).
    pub max_hr: f64,

    /// 心动带通滤波器下限 (BPM).
    pub min_hr_filt: f64,

    /// 心动带通滤波器上限 (BPM).
    pub max_hr_filt: f64,

    /// TR 谐波陷波宽度 (占谐波频率的百分比).
    pub notch_pct: f64,

    /// 是否对每个切片的平均信号做 MAD 归一化.
    pub mad_norm: bool,

    /// 去除 TR 内周期平均时使用除法 (`true`) 还是减法 (`false`).
    pub multiplicative: bool,

    /// 从图像提取生理信号时是否只平均估计掩码内的体素.
    /// 为 `false` 时切片内全部体素都计入平均的分母, 掩码值仍作为权重.
    pub use_mask_card_from_fmri: bool,

    /// 是否翻转动脉体素的相位投影曲线 (并额外增加一轮精化).
    pub flip_arteries: bool,

    /// 重新估计波形时只使用动脉体素.
    pub arteries_only: bool,

    /// 图像提取波形的坏点检测方法.
    pub bad_points: BadPointMethod,

    /// 外部生理信号的坏点检测方法.
    pub physio_bad_points: BadPointMethod,

    /// 坏点之间好点段的最短长度 (秒).
    pub min_gap_secs: f64,

    /// 坏点是否同时从 cycle average 和相位投影中剔除.
    /// 基频估计总是忽略坏点.
    pub censor_bad_points: bool,

    /// 标准化采样率 (Hz).
    pub std_freq: f64,

    /// 包络检测低通截止频率 (Hz).
    pub env_cutoff: f64,

    /// 包络下限, 以包络最大值的比例表示.
    pub env_thresh: f64,

    /// 频谱平滑 (Savitzky-Golay) 窗口长度.
    pub smooth_len: usize,

    /// 是否对展开后的相位做多项式趋势滤波.
    pub filt_phase: bool,

    /// 是否对每个体素的相位投影曲线做循环低通平滑.
    pub smooth_app: bool,

    /// 软血管阈值占硬阈值的比例.
    pub soft_vessel_frac: f64,

    /// 血管图是否使用未归一化的相位投影.
    pub unnorm_vessel_map: bool,

    /// 混叠相关设置. `None` 表示不计算.
    pub aliased_correlation: Option<AliasedCorrelation>,

    /// 体素去趋势的多项式阶数. 0 表示不去趋势.
    pub detrend_order: usize,

    /// 强度掩码阈值 (占稳健最大值的百分比).
    pub mask_thresh_pct: f64,

    /// 强制使用的心率 (Hz). 设置后跳过频谱估计结果.
    pub forced_hr: Option<f64>,

    /// 即使有外部生理信号, 仍使用图像提取的波形做相位投影.
    pub project_with_raw: bool,

    /// 按互相关延迟将外部生理信号对齐到图像提取波形.
    pub align_cardiac: bool,

    /// 时域脉搏平均的时间步长 (秒).
    pub pulse_recon_step: f64,

    /// 心动噪声回归方式.
    pub glm: GlmMode,

    /// 是否保留非最终轮次的输出.
    pub save_intermediate: bool,

    /// 是否计算信号质量指标.
    pub compute_quality: bool,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            dest_points: consts::DEFAULT_DEST_POINTS,
            congrid_bins: consts::DEFAULT_CONGRID_BINS,
            grid_kernel: GridKernel::Kaiser,
            phase: PhaseConvention::Centric,
            min_hr: 40.0,
            max_hr: 140.0,
            min_hr_filt: 40.0,
            max_hr_filt: 140.0,
            notch_pct: 1.5,
            mad_norm: true,
            multiplicative: true,
            use_mask_card_from_fmri: true,
            flip_arteries: false,
            arteries_only: false,
            bad_points: BadPointMethod::Mad {
                retain: consts::DEFAULT_RETAIN_THRESH,
            },
            physio_bad_points: BadPointMethod::FracVal {
                retain: consts::DEFAULT_RETAIN_THRESH,
            },
            min_gap_secs: consts::DEFAULT_MIN_GAP_SECS,
            censor_bad_points: true,
            std_freq: consts::DEFAULT_STD_FREQ,
            env_cutoff: 0.4,
            env_thresh: 0.2,
            smooth_len: 101,
            filt_phase: false,
            smooth_app: true,
            soft_vessel_frac: 0.4,
            unnorm_vessel_map: true,
            aliased_correlation: None,
            detrend_order: 3,
            mask_thresh_pct: 10.0,
            forced_hr: None,
            project_with_raw: false,
            align_cardiac: false,
            pulse_recon_step: 0.01,
            glm: GlmMode::Off,
            save_intermediate: false,
            compute_quality: true,
        }
    }
}

impl ProcessConfig {
    /// 检查参数合法性. 违反时返回 `PipelineError::Configuration`.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.dest_points < 2 {
            return Err(PipelineError::config("dest_points must be at least 2"));
        }
        crate::resample::check_kernel_width(self.congrid_bins)?;
        if !(self.min_hr > 0.0 && self.min_hr < self.max_hr) {
            return Err(PipelineError::config(format!(
                "invalid heart rate search range {}..{} BPM",
                self.min_hr, self.max_hr
            )));
        }
        if !(self.min_hr_filt > 0.0 && self.min_hr_filt < self.max_hr_filt) {
            return Err(PipelineError::config(format!(
                "invalid cardiac filter range {}..{} BPM",
                self.min_hr_filt, self.max_hr_filt
            )));
        }
        self.bad_points.validate()?;
        self.physio_bad_points.validate()?;
        if self.std_freq <= 0.0 || self.pulse_recon_step <= 0.0 {
            return Err(PipelineError::config("sample rates and steps must be positive"));
        }
        if let Some(ac) = &self.aliased_correlation {
            if ac.points < 2 || ac.width <= 0.0 {
                return Err(PipelineError::config("aliased correlation window is empty"));
            }
        }
        Ok(())
    }

    /// 精化轮数. 提供了估计掩码时为 1, 否则为 2; 若需要翻转动脉则再加 1.
    pub fn num_passes(&self, has_est_mask: bool) -> usize {
        let base = if has_est_mask { 1 } else { 2 };
        base + usize::from(self.flip_arteries)
    }

    /// 心动带通滤波器. 通带上限超过 `nyquist` 时被截断.
    pub fn card_band(&self, nyquist: f64) -> FilterBand {
        let lower = self.min_hr_filt / 60.0;
        let upper = (self.max_hr_filt / 60.0).min(nyquist / band::UPPER_STOP_RATIO);
        FilterBand::Arb {
            lower_stop: lower * band::LOWER_STOP_RATIO,
            lower_pass: lower,
            upper_pass: upper,
            upper_stop: upper * band::UPPER_STOP_RATIO,
        }
    }

    /// 从 json 文件加载配置. 缺失的字段取默认值.
    #[cfg(feature = "serde")]
    pub fn from_json_file<P: AsRef<std::path::Path>>(path: P) -> PipelineResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// 将配置保存为 json 文件.
    #[cfg(feature = "serde")]
    pub fn to_json_file<P: AsRef<std::path::Path>>(&self, path: P) -> PipelineResult<()> {
        std::fs::write(path.as_ref(), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(ProcessConfig::default().validate().is_ok());
    }

    #[test]
    fn test_num_passes() {
        let mut c = ProcessConfig::default();
        assert_eq!(c.num_passes(true), 1);
        assert_eq!(c.num_passes(false), 2);
        c.flip_arteries = true;
        assert_eq!(c.num_passes(true), 2);
        assert_eq!(c.num_passes(false), 3);
    }

    #[test]
    fn test_bad_kernel_width_rejected() {
        let c = ProcessConfig {
            congrid_bins: 2.2,
            ..Default::default()
        };
        assert!(matches!(c.validate(), Err(PipelineError::Configuration(_))));
    }

    #[test]
    fn test_search_values_symmetric() {
        let v = AliasedCorrelation {
            width: 2.0,
            points: 5,
        }
        .search_values();
        assert_eq!(v.len(), 5);
        assert!((v[0] + 1.0).abs() < 1e-12);
        assert!(v[2].abs() < 1e-12);
        assert!((v[4] - 1.0).abs() < 1e-12);
    }
}
