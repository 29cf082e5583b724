//! 从图像强度提取生理波形.
//!
//! 每个切片在估计掩码内求平均, 按切片采集时刻交织成高时间分辨率波形,
//! 去除 TR 周期成分后分别带通得到心动和呼吸波形.

use ndarray::{ArrayView3, ArrayView4, Axis};

use crate::consts::band;
use crate::data::AcquisitionGeometry;
use crate::filter::{self, FilterBand};
use crate::resample::resample_uniform;
use crate::{stats, ProcessConfig};

/// 图像提取的生理波形.
#[derive(Clone, Debug)]
pub struct ImageDerivedPhysio {
    /// 心动波形 (切片分辨率, MAD 归一化, 符号取反).
    pub cardiac: Vec<f64>,

    /// 心动波形的归一化因子.
    pub card_normfac: f64,

    /// 呼吸波形 (切片分辨率, MAD 归一化, 符号取反).
    pub respiratory: Vec<f64>,

    /// 呼吸波形的归一化因子.
    pub resp_normfac: f64,

    /// 切片分辨率采样率 (Hz).
    pub sample_rate: f64,

    /// TR 内各采集时刻的平均值.
    pub cycle_average: Vec<f64>,

    /// 每个切片平均信号的归一化因子. 没有有效体素的切片为 0.
    pub slice_norms: Vec<f64>,
}

/// 估计掩码的体素权重.
///
/// `flips` 给出时, 掩码乘以每个体素的翻转符号; `arteries_only` 时正号 (静脉) 体素权重为 0.
fn voxel_weights(
    mask: ArrayView3<f64>,
    flips: Option<ArrayView3<f64>>,
    config: &ProcessConfig,
) -> ndarray::Array3<f64> {
    match flips {
        Some(flips) if config.flip_arteries => {
            let mut w = &mask * &flips;
            if config.arteries_only {
                ndarray::Zip::from(&mut w)
                    .and(&flips)
                    .for_each(|w, &f| {
                        if f > 0.0 {
                            *w = 0.0
                        }
                    });
            }
            w
        }
        _ => mask.to_owned(),
    }
}

/// 从归一化后的 `(z, H, W, t)` 数据提取心动和呼吸波形.
pub fn physio_from_image(
    norm_data: ArrayView4<f64>,
    est_mask: ArrayView3<f64>,
    flips: Option<ArrayView3<f64>>,
    geometry: &AcquisitionGeometry,
    config: &ProcessConfig,
) -> ImageDerivedPhysio {
    let (num_slices, _, _, timepoints) = norm_data.dim();
    let num_steps = geometry.num_steps;
    let weights = voxel_weights(est_mask, flips, config);

    let mut hires = vec![0.0; timepoints * num_steps];
    let mut slice_norms = vec![0.0; num_slices];
    for (z, (slice, w)) in norm_data
        .axis_iter(Axis(0))
        .zip(weights.axis_iter(Axis(0)))
        .enumerate()
    {
        let mut avg = vec![0.0; timepoints];
        let mut count = 0usize;
        for ((h, x), &wv) in w.indexed_iter() {
            if config.use_mask_card_from_fmri && wv == 0.0 {
                continue;
            }
            count += 1;
            for (a, &v) in avg.iter_mut().zip(slice.slice(ndarray::s![h, x, ..])) {
                *a += v * wv;
            }
        }
        if count == 0 {
            log::warn!("slice {} has no valid voxels, contributing zero", z);
            continue;
        }
        avg.iter_mut().for_each(|a| *a /= count as f64);
        let (avg, norm) = if config.mad_norm {
            stats::mad_normalize(&avg)
        } else {
            (avg, 1.0)
        };
        slice_norms[z] = norm;
        let offset = geometry.offsets[z];
        for (t, a) in avg.into_iter().enumerate() {
            hires[num_steps * t + offset] += a;
        }
    }

    let cycle_average: Vec<f64> = (0..num_steps)
        .map(|i| {
            let v: Vec<f64> = hires.iter().skip(i).step_by(num_steps).copied().collect();
            stats::mean(&v)
        })
        .collect();
    for (t, v) in hires.iter_mut().enumerate() {
        let ca = cycle_average[t % num_steps];
        if config.multiplicative {
            *v /= ca + 1.0;
        } else {
            *v -= ca;
        }
    }

    let fs = geometry.slice_sample_rate();
    log::debug!("slice sample rate is {} Hz", fs);
    let notched = filter::harmonic_notch_filter(&hires, fs, 1.0 / geometry.tr, config.notch_pct);

    let mean_norm = stats::mean(&slice_norms);
    let band_limited = |band: FilterBand| {
        let (mut wave, normfac) = stats::mad_normalize(&band.apply(&notched, fs, false));
        wave.iter_mut().for_each(|v| *v = -*v);
        (wave, normfac * mean_norm)
    };
    let (cardiac, card_normfac) = band_limited(config.card_band(fs / 2.0));
    let (respiratory, resp_normfac) = band_limited(FilterBand::Respiratory);

    ImageDerivedPhysio {
        cardiac,
        card_normfac,
        respiratory,
        resp_normfac,
        sample_rate: fs,
        cycle_average,
        slice_norms,
    }
}

/// 包络归一化后的心动波形.
#[derive(Clone, Debug)]
pub struct CleanedCardiac {
    /// 去基线后的波形.
    pub filtered: Vec<f64>,

    /// 除以包络后的波形.
    pub normalized: Vec<f64>,

    /// 下限截断后的包络.
    pub envelope: Vec<f64>,

    /// 截断前包络的均值.
    pub env_mean: f64,
}

/// 去除心动波形的增益起伏.
///
/// 包络 (整流后低通) 低于 `thresh * max` 的部分被抬高到该值, 然后用包络均值乘以波形再除以包络.
/// `nyquist` 限制去基线滤波器的上限.
pub fn clean_cardiac(
    waveform: &[f64],
    fs: f64,
    cutoff: f64,
    thresh: f64,
    nyquist: Option<f64>,
) -> CleanedCardiac {
    let (normed, _) = stats::mad_normalize(waveform);
    let (card, _) = stats::mad_normalize(&FilterBand::Cardiac.apply(&normed, fs, false));
    let mut envelope = filter::envelope(&card, fs, cutoff);
    let env_mean = stats::mean(&envelope);
    let floor = thresh * envelope.iter().copied().fold(f64::MIN, f64::max);
    envelope.iter_mut().for_each(|e| *e = e.max(floor));

    let (lower_stop, lower_pass, _, _) = FilterBand::Cardiac.edges();
    let mut upper_pass = 10.0;
    let mut upper_stop = upper_pass * band::UPPER_STOP_RATIO;
    if let Some(nyq) = nyquist {
        if nyq < upper_pass {
            upper_pass = nyq;
            upper_stop = nyq;
        }
    }
    let baseline = FilterBand::Arb {
        lower_stop,
        lower_pass,
        upper_pass,
        upper_stop,
    };
    let (filtered, _) = stats::mad_normalize(&baseline.apply(&normed, fs, false));
    let ratio: Vec<f64> = filtered
        .iter()
        .zip(&envelope)
        .map(|(&f, &e)| stats::safe_div(env_mean * f, e))
        .collect();
    let (normalized, _) = stats::mad_normalize(&ratio);

    CleanedCardiac {
        filtered,
        normalized,
        envelope,
        env_mean,
    }
}

/// 把采样率为 `fs` 的波形重采样到 `std_freq` 并做 MAD 归一化.
pub fn to_standard_rate(waveform: &[f64], fs: f64, std_freq: f64) -> Vec<f64> {
    let n_out = (waveform.len() as f64 / fs * std_freq).floor() as usize;
    stats::mad_normalize(&resample_uniform(waveform, fs, 0.0, std_freq, n_out)).0
}
