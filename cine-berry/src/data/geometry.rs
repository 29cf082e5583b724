//! 切片采集时序.
//!
//! 一个 TR 内各切片的采集时刻决定了把切片平均信号交织成高时间分辨率波形的方式.

use std::path::Path;

use crate::{PipelineError, PipelineResult};

/// 采集时序.
#[derive(Clone, Debug, PartialEq)]
pub struct AcquisitionGeometry {
    /// 重复时间 (秒).
    pub tr: f64,

    /// 每个切片在 TR 内的采集时刻 (秒).
    pub slice_times: Vec<f64>,

    /// 一个 TR 内不同采集时刻的个数.
    pub num_steps: usize,

    /// 相邻不同采集时刻的间距 (秒).
    pub min_step: f64,

    /// 每个切片的采集时刻序号, 取值 `0..num_steps`.
    pub offsets: Vec<usize>,
}

impl AcquisitionGeometry {
    /// 由 TR 和切片时刻构造.
    ///
    /// 排序后相邻时刻差的最大值作为步长 (多频带采集中同时采集的切片时刻相同).
    /// 所有切片同时采集时, 退化为每个 TR 一个采样点.
    pub fn new(tr: f64, slice_times: Vec<f64>) -> PipelineResult<Self> {
        if tr <= 0.0 {
            return Err(PipelineError::config(format!("TR must be positive, got {tr}")));
        }
        if slice_times.is_empty() {
            return Err(PipelineError::config("no slice times given"));
        }
        let sorted = crate::stats::sorted(&slice_times);
        let min_step = sorted
            .windows(2)
            .map(|w| w[1] - w[0])
            .fold(0.0_f64, f64::max);
        let (num_steps, offsets) = if min_step > 0.0 {
            let num_steps = ((tr / min_step).round() as usize).max(1);
            let offsets = slice_times
                .iter()
                .map(|&t| ((t / min_step).round() as i64).rem_euclid(num_steps as i64) as usize)
                .collect();
            (num_steps, offsets)
        } else {
            (1, vec![0; slice_times.len()])
        };
        log::debug!(
            "{} slice times with {} unique values - step is {}",
            slice_times.len(),
            num_steps,
            min_step
        );
        Ok(Self {
            tr,
            slice_times,
            num_steps,
            min_step,
            offsets,
        })
    }

    /// 顺序升序采集: 第 `i` 个切片在 `i * tr / num_slices` 时刻.
    pub fn sequential(tr: f64, num_slices: usize) -> PipelineResult<Self> {
        let times = (0..num_slices)
            .map(|i| i as f64 * tr / num_slices as f64)
            .collect();
        Self::new(tr, times)
    }

    /// 切片个数.
    #[inline]
    pub fn num_slices(&self) -> usize {
        self.slice_times.len()
    }

    /// 交织波形的采样率 (Hz).
    #[inline]
    pub fn slice_sample_rate(&self) -> f64 {
        self.num_steps as f64 / self.tr
    }

    /// 交织波形的时间轴 (秒), 共 `timepoints * num_steps` 个点.
    pub fn slice_time_axis(&self, timepoints: usize) -> Vec<f64> {
        let dt = self.tr / self.num_steps as f64;
        (0..timepoints * self.num_steps)
            .map(|i| i as f64 * dt)
            .collect()
    }

    /// 第 `slice` 个切片各时间点的采集时刻.
    pub fn acquisition_times(&self, slice: usize, timepoints: usize) -> Vec<f64> {
        let offset = self.slice_times[slice];
        (0..timepoints)
            .map(|t| t as f64 * self.tr + offset)
            .collect()
    }
}

/// 读入切片时刻.
///
/// `.json` 文件 (BIDS sidecar) 读取其中的 `SliceTiming` 字段, 其它文件按纯文本数值读取.
pub fn read_slice_times<P: AsRef<Path>>(path: P) -> PipelineResult<Vec<f64>> {
    let path = path.as_ref();
    if path.extension().is_some_and(|e| e == "json") {
        read_bids_slice_times(path)
    } else {
        super::vecio::read_vec(path)
    }
}

#[cfg(feature = "serde")]
fn read_bids_slice_times(path: &Path) -> PipelineResult<Vec<f64>> {
    let text = std::fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&text)?;
    value
        .get("SliceTiming")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_f64()).collect())
        .ok_or_else(|| {
            PipelineError::config(format!("{} has no SliceTiming field", path.display()))
        })
}

#[cfg(not(feature = "serde"))]
fn read_bids_slice_times(path: &Path) -> PipelineResult<Vec<f64>> {
    Err(PipelineError::config(format!(
        "reading {} requires the `serde` feature",
        path.display()
    )))
}
