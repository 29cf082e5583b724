//! 通用常量.

/// 频带相关常量 (单位: Hz).
pub mod band {
    /// 呼吸频带通带下限.
    pub const RESP_LOWER_PASS: f64 = 0.2;

    /// 呼吸频带通带上限.
    pub const RESP_UPPER_PASS: f64 = 0.5;

    /// 心动频带通带下限 (40 BPM).
    pub const CARD_LOWER_PASS: f64 = 40.0 / 60.0;

    /// 心动频带通带上限 (140 BPM).
    pub const CARD_UPPER_PASS: f64 = 140.0 / 60.0;

    /// 下过渡带相对于通带下限的比例.
    pub const LOWER_STOP_RATIO: f64 = 0.9;

    /// 上过渡带相对于通带上限的比例.
    pub const UPPER_STOP_RATIO: f64 = 1.1;

    /// 基频窄带的下边界系数.
    pub const FUND_LOWER_RATIO: f64 = 0.71;

    /// 基频窄带的上边界系数.
    pub const FUND_UPPER_RATIO: f64 = 1.4;
}

/// 默认输出相位 bin 个数.
pub const DEFAULT_DEST_POINTS: usize = 32;

/// 默认 congrid 核宽度 (单位: bin).
pub const DEFAULT_CONGRID_BINS: f64 = 3.0;

/// 默认标准化采样率 (Hz).
pub const DEFAULT_STD_FREQ: f64 = 25.0;

/// 默认坏点保留比例.
pub const DEFAULT_RETAIN_THRESH: f64 = 0.89;

/// 默认最小坏点间隙 (秒).
pub const DEFAULT_MIN_GAP_SECS: f64 = 2.0;

/// 外部生理信号覆盖 fMRI 时间范围时允许的误差 (秒).
pub const PHYSIO_SLOP_SECS: f64 = 0.25;

/// cycle average 中, 权重低于最大权重 `1 / COVERAGE_DIVISOR` 的 bin 被视为覆盖不足.
pub const COVERAGE_DIVISOR: f64 = 50.0;

/// 平滑相位投影曲线时的截止频率比例. 截止频率为相位采样率的 `1 / 6`,
/// 即一个完整相位周期内最多保留 3 个周期.
pub const APP_SMOOTH_DIVISOR: f64 = 6.0;

/// 硬血管阈值所取的百分位.
pub const VESSEL_PERCENTILE: f64 = 0.98;

/// MAD 到高斯标准差的换算系数 (`1 / Φ⁻¹(3/4)`).
pub const MAD_TO_SIGMA: f64 = 1.482_602_218_505_602;
