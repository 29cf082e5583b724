//! 外部生理记录 (脉搏血氧仪等).
//!
//! 记录可以是纯文本列, 也可以是 BIDS 的 `*_physio.tsv[.gz]` 加 JSON sidecar.
//! 处理步骤: 覆盖范围检查, 包络归一化, 重采样到切片分辨率与标准分辨率, 坏点检测,
//! 与图像提取波形的互相关, 以及可选的时延对齐.

use std::path::Path;

use crate::badpts::{find_bad_points, BadPoints};
use crate::consts::PHYSIO_SLOP_SECS;
use crate::correlate::{check_card_match, time_shift, CardMatch};
use crate::data::vecio;
use crate::resample::interp_linear;
use crate::waveform::{clean_cardiac, CleanedCardiac};
use crate::{stats, PipelineError, PipelineResult, ProcessConfig};

/// 一段外部生理记录.
#[derive(Clone, Debug)]
pub struct PhysioRecording {
    /// 样本.
    pub samples: Vec<f64>,

    /// 采样率 (Hz).
    pub sample_rate: f64,

    /// 第一个样本相对第一个体积采集时刻的时间 (秒). 记录早于成像开始时为负.
    pub start_time: f64,
}

impl PhysioRecording {
    /// 构造. 采样率必须为正.
    pub fn new(samples: Vec<f64>, sample_rate: f64, start_time: f64) -> PipelineResult<Self> {
        if sample_rate <= 0.0 {
            return Err(PipelineError::config(format!(
                "physiological sample rate must be positive, got {sample_rate}"
            )));
        }
        Ok(Self {
            samples,
            sample_rate,
            start_time,
        })
    }

    /// 从文本文件的第 `col` 列读入.
    pub fn from_text<P: AsRef<Path>>(
        path: P,
        col: usize,
        sample_rate: f64,
        start_time: f64,
    ) -> PipelineResult<Self> {
        Self::new(vecio::read_column(path, col)?, sample_rate, start_time)
    }

    /// 从 BIDS 生理记录读入名为 `column` 的列.
    ///
    /// sidecar 与 `tsv` 同名, 扩展名为 `.json`, 提供 `SamplingFrequency`, `StartTime` 和 `Columns`.
    #[cfg(feature = "serde")]
    pub fn from_bids<P: AsRef<Path>>(tsv: P, column: &str) -> PipelineResult<Self> {
        let tsv = tsv.as_ref();
        let name = tsv
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| PipelineError::config(format!("bad file name {}", tsv.display())))?;
        let stem = name
            .strip_suffix(".tsv.gz")
            .or_else(|| name.strip_suffix(".tsv"))
            .ok_or_else(|| PipelineError::config(format!("{} is not a tsv file", tsv.display())))?;
        let sidecar = tsv.with_file_name(format!("{stem}.json"));
        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&sidecar)?)?;

        let field = |key: &str| {
            value.get(key).and_then(|v| v.as_f64()).ok_or_else(|| {
                PipelineError::config(format!("{} has no numeric {key}", sidecar.display()))
            })
        };
        let sample_rate = field("SamplingFrequency")?;
        let start_time = field("StartTime").unwrap_or(0.0);
        let col = value
            .get("Columns")
            .and_then(|v| v.as_array())
            .and_then(|cols| cols.iter().position(|c| c.as_str() == Some(column)))
            .ok_or_else(|| {
                PipelineError::config(format!("{} has no `{column}` column", sidecar.display()))
            })?;
        log::info!(
            "reading column {} of {} ({} Hz, start {} s)",
            col,
            tsv.display(),
            sample_rate,
            start_time
        );
        Self::from_text(tsv, col, sample_rate, start_time)
    }

    /// 每个样本的时刻 (秒).
    pub fn time_axis(&self) -> Vec<f64> {
        (0..self.samples.len())
            .map(|i| self.start_time + i as f64 / self.sample_rate)
            .collect()
    }

    /// 记录是否覆盖 `[0, end]`, 两端允许 0.25 秒误差.
    pub fn check_coverage(&self, end: f64) -> PipelineResult<()> {
        let axis = self.time_axis();
        let (Some(&first), Some(&last)) = (axis.first(), axis.last()) else {
            return Err(PipelineError::config("physiological recording is empty"));
        };
        if first > PHYSIO_SLOP_SECS || last < end - PHYSIO_SLOP_SECS {
            return Err(PipelineError::config(format!(
                "physiological recording covers {first:.3}..{last:.3} s, imaging needs 0..{end:.3} s"
            )));
        }
        Ok(())
    }

    /// 在时刻 `times` 上插值.
    fn sample_at(&self, data: &[f64], times: &[f64]) -> Vec<f64> {
        let axis = self.time_axis();
        times.iter().map(|&t| interp_linear(&axis, data, t)).collect()
    }
}

/// 处理后的生理记录.
#[derive(Clone, Debug)]
pub struct ProcessedPhysio {
    /// 原采样率下的包络归一化结果.
    pub cleaned: CleanedCardiac,

    /// 切片分辨率波形.
    pub slice_res: Vec<f64>,

    /// 标准分辨率波形.
    pub std_res: Vec<f64>,

    /// 切片分辨率坏点.
    pub slice_bad: BadPoints,

    /// 标准分辨率坏点.
    pub std_bad: BadPoints,

    /// 与图像提取波形的互相关.
    pub card_match: CardMatch,
}

/// 处理外部生理记录.
///
/// `slice_axis` 是切片分辨率时间轴, `slice_fs` 是其采样率; `image_std` 是图像提取的标准分辨率心动波形.
pub fn process_physio(
    recording: &PhysioRecording,
    slice_axis: &[f64],
    slice_fs: f64,
    image_std: &[f64],
    config: &ProcessConfig,
) -> PipelineResult<ProcessedPhysio> {
    let end = slice_axis.last().copied().unwrap_or(0.0);
    recording.check_coverage(end)?;

    let fs = recording.sample_rate;
    let cleaned = clean_cardiac(
        &recording.samples,
        fs,
        config.env_cutoff,
        config.env_thresh,
        None,
    );

    let slice_src = if slice_fs < fs {
        crate::filter::FilterBand::lowpass(0.45 * slice_fs).apply(&cleaned.normalized, fs, false)
    } else {
        cleaned.normalized.clone()
    };
    let mut slice_res = stats::mad_normalize(&recording.sample_at(&slice_src, slice_axis)).0;

    let std_len = (slice_axis.len() as f64 / slice_fs * config.std_freq).floor() as usize;
    let std_axis: Vec<f64> = (0..std_len).map(|i| i as f64 / config.std_freq).collect();
    let std_src = if config.std_freq < fs {
        crate::filter::FilterBand::lowpass(0.45 * config.std_freq).apply(&cleaned.normalized, fs, false)
    } else {
        cleaned.normalized.clone()
    };
    let mut std_res = stats::mad_normalize(&recording.sample_at(&std_src, &std_axis)).0;

    let card_match = check_card_match(&std_res, image_std, config.std_freq);
    log::info!(
        "physiological waveform delay is {:.3} s relative to the image (r = {:.3})",
        card_match.delay,
        card_match.correlation
    );
    if config.align_cardiac {
        slice_res = time_shift(&slice_res, -card_match.delay, slice_fs);
        std_res = time_shift(&std_res, -card_match.delay, config.std_freq);
    }

    let method = config.physio_bad_points;
    let slice_bad = find_bad_points(&slice_res, slice_fs, method, config.min_gap_secs);
    let std_bad = find_bad_points(&std_res, config.std_freq, method, config.min_gap_secs);

    Ok(ProcessedPhysio {
        cleaned,
        slice_res,
        std_res,
        slice_bad,
        std_bad,
        card_match,
    })
}
