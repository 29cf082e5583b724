//! 多轮精化流水线.
//!
//! 每一轮 (pass) 依次执行: 图像提取波形 -> 坏点检测 -> 心率与相位估计 -> 周期平均 ->
//! 相位投影 -> 血管分类 (最后一轮 -> 混叠相关). 下一轮以本轮的血管掩码作为估计掩码.
//! 轮数固定, 不做收敛判断. 只有最后一轮的结果会被提升为最终结果.
//!
//! # 注意
//!
//! 1. 每轮拥有自己的输出缓冲区 ([`PassOutput`]), 轮与轮之间只传递只读的估计掩码和翻转符号.
//! 2. 配置错误与几何不匹配立即返回 `Err`, 不产生部分结果.

use std::time::Instant;

use ndarray::{Array2, Array3, Zip};

use crate::badpts::{find_bad_points, BadPoints};
use crate::correlate::AliasedCorrelator;
use crate::cycle::{cardiac_cycle_average, pulse_time_average, CycleAverage};
use crate::data::{AcquisitionGeometry, FmriScan, NiftiHeaderAttr};
use crate::glm::{cardiac_noise, regress_noise, GlmResult};
use crate::info::RunInfo;
use crate::phase::{
    analytic_phase, estimate_cardiac_frequency, get_fundamental, HeartRateSearch, PhaseBinGrid,
    PhaseTrace,
};
use crate::physio::{process_physio, PhysioRecording, ProcessedPhysio};
use crate::prep::{normalize_voxels, NormalizedData};
use crate::projection::{slice_phase_values, valid_timepoints, PhaseProjection, PhaseProjector};
use crate::quality::{signal_quality, QualityWindows, SignalQuality};
use crate::resample::Gridder;
use crate::vessel::{aliased_correlation, classify, VesselMaps, WaveDelay};
use crate::waveform::{clean_cardiac, physio_from_image, to_standard_rate, ImageDerivedPhysio};
use crate::{stats, PipelineError, PipelineResult, ProcessConfig};

/// 一次运行的输入.
#[derive(Clone, Debug)]
pub struct PipelineInputs {
    /// 4D fMRI 数据.
    pub scan: FmriScan,

    /// 切片采集时序.
    pub geometry: AcquisitionGeometry,

    /// 外部提供的估计掩码. 提供时精化轮数减 1.
    pub est_mask: Option<Array3<f64>>,

    /// 外部提供的投影掩码, 与强度掩码相乘.
    pub proj_mask: Option<Array3<f64>>,

    /// 外部生理记录.
    pub physio: Option<PhysioRecording>,
}

impl PipelineInputs {
    /// 只有 fMRI 数据和采集时序的输入.
    pub fn new(scan: FmriScan, geometry: AcquisitionGeometry) -> Self {
        Self {
            scan,
            geometry,
            est_mask: None,
            proj_mask: None,
            physio: None,
        }
    }
}

/// 各轮共享的只读上下文.
#[derive(Clone, Debug)]
pub struct PassContext {
    /// 采集时序.
    pub geometry: AcquisitionGeometry,

    /// 预处理后的数据.
    pub data: NormalizedData,

    /// 强度掩码 (0/1).
    pub intensity_mask: Array3<f64>,

    /// 投影掩码 (0/1 或权重).
    pub proj_mask: Array3<f64>,

    /// 外部估计掩码与强度掩码之积.
    pub supplied_est_mask: Option<Array3<f64>>,

    /// 输出相位网格.
    pub grid: PhaseBinGrid,

    /// 相位网格上的循环 congrid 算子.
    pub gridder: Gridder,

    /// 切片分辨率时间轴 (秒).
    pub slice_axis: Vec<f64>,

    /// 切片分辨率采样率 (Hz).
    pub slice_fs: f64,

    /// 时间点个数.
    pub timepoints: usize,

    /// 外部生理记录.
    pub physio: Option<PhysioRecording>,
}

/// 一轮的全部输出.
#[derive(Clone, Debug)]
pub struct PassOutput {
    /// 轮次, 从 0 开始.
    pub pass: usize,

    /// 图像提取的生理波形.
    pub image: ImageDerivedPhysio,

    /// 包络归一化后的图像心动波形.
    pub image_cleaned: Vec<f64>,

    /// 标准分辨率图像心动波形.
    pub image_std: Vec<f64>,

    /// 图像心动波形的坏点 (切片分辨率).
    pub image_bad: BadPoints,

    /// 处理后的外部生理记录.
    pub physio: Option<ProcessedPhysio>,

    /// 驱动相位投影的波形 (切片分辨率).
    pub driver: Vec<f64>,

    /// 标准分辨率的驱动波形. 由图像驱动时取包络归一化后的版本.
    pub driver_std: Vec<f64>,

    /// 合并后的坏点 (切片分辨率).
    pub bad: Vec<bool>,

    /// 图像波形估计的心率 (BPM).
    pub image_hr: f64,

    /// 外部记录估计的心率 (BPM).
    pub physio_hr: Option<f64>,

    /// 相位估计所用的心动频率 (Hz).
    pub cardiac_freq: f64,

    /// 基频波形.
    pub fundamental: Vec<f64>,

    /// 相位轨迹.
    pub phase: PhaseTrace,

    /// 按相位平均的驱动波形.
    pub cycle_average: CycleAverage,

    /// 按时间平均的驱动波形.
    pub pulse_average: CycleAverage,

    /// 驱动波形的质量指标.
    pub quality: Option<SignalQuality>,

    /// 每个切片每个时间点的相位, `(z, t)`.
    pub slice_phases: Array2<f64>,

    /// 相位投影.
    pub projection: PhaseProjection,

    /// 血管分类.
    pub vessels: VesselMaps,

    /// 混叠相关. 只有最后一轮计算.
    pub wave_delay: Option<WaveDelay>,

    /// 本轮的运行信息.
    pub info: RunInfo,
}

/// 精化状态. 每调用一次 [`Pipeline::step`] 前进一轮.
#[derive(Clone, Debug)]
pub struct RefinementState {
    /// 下一轮的序号.
    pub pass: usize,

    /// 总轮数.
    pub num_passes: usize,

    /// 下一轮使用的估计掩码.
    pub est_mask: Array3<f64>,

    /// 下一轮使用的翻转符号.
    pub flips: Option<Array3<f64>>,

    /// 已完成的轮次. 未开启 `save_intermediate` 时只保留最近一轮.
    pub history: Vec<PassOutput>,
}

impl RefinementState {
    /// 以 `est_mask` 开始, 共 `num_passes` 轮.
    pub fn with_mask(est_mask: Array3<f64>, num_passes: usize) -> Self {
        Self {
            pass: 0,
            num_passes,
            est_mask,
            flips: None,
            history: Vec::new(),
        }
    }

    /// 是否已完成全部轮次.
    #[inline]
    pub fn is_done(&self) -> bool {
        self.pass >= self.num_passes
    }

    /// 最近完成的一轮.
    #[inline]
    pub fn last(&self) -> Option<&PassOutput> {
        self.history.last()
    }
}

/// 最终结果.
#[derive(Clone, Debug)]
pub struct RunOutput {
    /// 最后一轮的输出.
    pub final_pass: PassOutput,

    /// 之前各轮的输出 (仅当 `save_intermediate`).
    pub intermediate: Vec<PassOutput>,

    /// 强度掩码.
    pub intensity_mask: Array3<f64>,

    /// 投影掩码.
    pub proj_mask: Array3<f64>,

    /// 心动噪声回归.
    pub glm: Option<GlmResult>,

    /// 汇总的运行信息.
    pub info: RunInfo,
}

/// 记录阶段耗时.
struct Stage {
    name: &'static str,
    start: Instant,
}

impl Stage {
    fn begin(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
        }
    }

    fn end(self) {
        log::info!("{} done in {:.3} s", self.name, self.start.elapsed().as_secs_f64());
    }
}

/// 流水线.
#[derive(Clone, Debug)]
pub struct Pipeline {
    config: ProcessConfig,
}

impl Pipeline {
    /// 检查配置后构造.
    pub fn new(config: ProcessConfig) -> PipelineResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// 配置.
    #[inline]
    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    /// 预处理: 几何检查, 掩码, 体素归一化, 相位网格.
    pub fn prepare(&self, inputs: &PipelineInputs) -> PipelineResult<PassContext> {
        let stage = Stage::begin("preparation");
        let scan = &inputs.scan;
        let shape = scan.shape();
        if inputs.geometry.num_slices() != scan.len_z() {
            return Err(PipelineError::config(format!(
                "{} slice times given for {} slices",
                inputs.geometry.num_slices(),
                scan.len_z()
            )));
        }
        for mask in [&inputs.est_mask, &inputs.proj_mask].into_iter().flatten() {
            if mask.dim() != shape {
                return Err(PipelineError::DimensionMismatch(shape, mask.dim()));
            }
        }

        let mean = scan.mean_volume();
        let flat: Vec<f64> = mean.iter().copied().collect();
        let flags = stats::make_mask(&flat, self.config.mask_thresh_pct);
        let intensity_mask = Array3::from_shape_vec(
            shape,
            flags.into_iter().map(|b| f64::from(u8::from(b))).collect(),
        )?;
        let proj_mask = match &inputs.proj_mask {
            Some(m) => &intensity_mask * m,
            None => intensity_mask.clone(),
        };
        log::info!(
            "{} voxels in the intensity mask, {} in the projection mask",
            intensity_mask.iter().filter(|&&v| v != 0.0).count(),
            proj_mask.iter().filter(|&&v| v != 0.0).count()
        );

        let data = normalize_voxels(scan.data(), proj_mask.view(), self.config.detrend_order);
        let grid = PhaseBinGrid::new(self.config.dest_points, self.config.phase);
        let gridder = Gridder::new(grid.axis(), self.config.congrid_bins, self.config.grid_kernel, true)?;
        let timepoints = scan.timepoints();
        let supplied_est_mask = inputs.est_mask.as_ref().map(|m| m * &intensity_mask);
        let ctx = PassContext {
            slice_axis: inputs.geometry.slice_time_axis(timepoints),
            slice_fs: inputs.geometry.slice_sample_rate(),
            geometry: inputs.geometry.clone(),
            data,
            intensity_mask,
            proj_mask,
            supplied_est_mask,
            grid,
            gridder,
            timepoints,
            physio: inputs.physio.clone(),
        };
        stage.end();
        Ok(ctx)
    }

    /// 初始状态: 估计掩码为外部提供的掩码, 否则为强度掩码.
    pub fn initial_state(&self, ctx: &PassContext) -> RefinementState {
        let has_est = ctx.supplied_est_mask.is_some();
        let mask = ctx
            .supplied_est_mask
            .clone()
            .unwrap_or_else(|| ctx.intensity_mask.clone());
        RefinementState::with_mask(mask, self.config.num_passes(has_est))
    }

    /// 执行一轮, 返回下一状态.
    pub fn step(&self, ctx: &PassContext, mut state: RefinementState) -> PipelineResult<RefinementState> {
        let pass = state.pass;
        log::info!("starting pass {} of {}", pass + 1, state.num_passes);
        let is_final = pass + 1 >= state.num_passes;
        let output = self.run_pass(ctx, pass, is_final, &state.est_mask, state.flips.as_ref())?;

        state.est_mask = match &ctx.supplied_est_mask {
            Some(m) => m.clone(),
            None => output.vessels.vessel_mask.clone(),
        };
        state.flips = Some(output.projection.flips.clone());
        if !self.config.save_intermediate {
            state.history.clear();
        }
        state.history.push(output);
        state.pass += 1;
        Ok(state)
    }

    /// 完整运行.
    pub fn run(&self, inputs: &PipelineInputs) -> PipelineResult<RunOutput> {
        let ctx = self.prepare(inputs)?;
        let mut state = self.initial_state(&ctx);
        while !state.is_done() {
            state = self.step(&ctx, state)?;
        }
        let Some(final_pass) = state.history.pop() else {
            return Err(PipelineError::config("no refinement pass was run"));
        };

        let glm = if self.config.glm != crate::glm::GlmMode::Off {
            let stage = Stage::begin("noise regression");
            let noise = cardiac_noise(
                final_pass.projection.rawapp.view(),
                &final_pass.slice_phases,
                &ctx.grid,
                ctx.proj_mask.view(),
            );
            let result = regress_noise(ctx.data.detrended.view(), noise.view(), ctx.proj_mask.view(), self.config.glm);
            stage.end();
            result
        } else {
            None
        };

        let mut info = RunInfo::new();
        info.insert("numpasses", state.num_passes);
        info.insert("slicesamplerate", ctx.slice_fs);
        info.insert("numslicelocs", ctx.geometry.num_steps);
        info.insert("timepoints", ctx.timepoints);
        info.insert("destpoints", self.config.dest_points);
        info.insert("congridbins", self.config.congrid_bins);
        for p in &state.history {
            for (k, v) in p.info.iter() {
                info.insert(format!("pass{}_{}", p.pass + 1, k), v.clone());
            }
        }
        info.extend(final_pass.info.clone());

        Ok(RunOutput {
            final_pass,
            intermediate: state.history,
            intensity_mask: ctx.intensity_mask,
            proj_mask: ctx.proj_mask,
            glm,
            info,
        })
    }

    fn heart_rate_search(&self) -> HeartRateSearch {
        HeartRateSearch {
            min_hr: self.config.min_hr,
            max_hr: self.config.max_hr,
            smooth_len: self.config.smooth_len,
        }
    }

    fn run_pass(
        &self,
        ctx: &PassContext,
        pass: usize,
        is_final: bool,
        est_mask: &Array3<f64>,
        flips: Option<&Array3<f64>>,
    ) -> PipelineResult<PassOutput> {
        let config = &self.config;
        let mut info = RunInfo::new();
        let fs = ctx.slice_fs;

        let stage = Stage::begin("cardiac waveform extraction");
        let image = physio_from_image(
            ctx.data.normalized.view(),
            est_mask.view(),
            flips.map(|f| f.view()),
            &ctx.geometry,
            config,
        );
        // 坏点, 心率和相位基于未清理的波形. 清理后的波形只用于标准分辨率的比对和质量评估.
        let cleaned = clean_cardiac(&image.cardiac, fs, config.env_cutoff, config.env_thresh, Some(fs / 2.0));
        let image_cleaned = cleaned.normalized;
        let image_std = to_standard_rate(&image_cleaned, fs, config.std_freq);
        let image_bad = find_bad_points(&image.cardiac, fs, config.bad_points, config.min_gap_secs);
        let image_hr = 60.0 * estimate_cardiac_frequency(&image.cardiac, fs, self.heart_rate_search(), Some(&image_bad.mask[..]));
        log::info!("pass {}: image derived heart rate is {:.2} BPM", pass + 1, image_hr);
        info.insert("fmri_hr_bpm", image_hr);
        info.insert("card_normfac", image.card_normfac);
        info.insert("resp_normfac", image.resp_normfac);
        info.insert("badpts_method", image_bad.method.name());
        info.insert("numbadpts", image_bad.count());
        match image_bad.threshold {
            either::Either::Left(t) => info.insert("badpts_thresh", t),
            either::Either::Right((lo, hi)) => info.insert("badpts_thresh", vec![lo, hi]),
        }
        stage.end();

        let physio = match &ctx.physio {
            Some(rec) => {
                let stage = Stage::begin("physiological waveform processing");
                let p = process_physio(rec, &ctx.slice_axis, fs, &image_std, config)?;
                info.insert("pleth_delay", p.card_match.delay);
                info.insert("pleth_corr", p.card_match.correlation);
                info.insert("pleth_numbadpts", p.slice_bad.count());
                stage.end();
                Some(p)
            }
            None => None,
        };
        let physio_hr = physio.as_ref().map(|p| {
            60.0 * estimate_cardiac_frequency(&p.std_res, config.std_freq, self.heart_rate_search(), Some(&p.std_bad.mask[..]))
        });
        if let Some(hr) = physio_hr {
            log::info!("pass {}: physiological heart rate is {:.2} BPM", pass + 1, hr);
            info.insert("pleth_hr_bpm", hr);
        }

        // 外部记录默认驱动相位投影, 两者的坏点取并集.
        let (driver, driver_std, bad) = match &physio {
            Some(p) => {
                let bad: Vec<bool> = image_bad
                    .mask
                    .iter()
                    .zip(&p.slice_bad.mask)
                    .map(|(&a, &b)| a || b)
                    .collect();
                if config.project_with_raw {
                    (image.cardiac.clone(), image_std.clone(), bad)
                } else {
                    (p.slice_res.clone(), p.std_res.clone(), bad)
                }
            }
            None => (image.cardiac.clone(), image_std.clone(), image_bad.mask.clone()),
        };

        let stage = Stage::begin("phase estimation");
        let cardiac_freq = match config.forced_hr {
            Some(f) => {
                log::info!("using forced heart rate of {:.2} BPM", f * 60.0);
                f
            }
            None => estimate_cardiac_frequency(&driver, fs, self.heart_rate_search(), Some(&bad[..])),
        };
        let censored: Vec<f64> = driver
            .iter()
            .zip(&bad)
            .map(|(&v, &b)| if b { 0.0 } else { v })
            .collect();
        let (censored, _) = stats::mad_normalize(&censored);
        let fundamental = get_fundamental(&censored, fs, cardiac_freq);
        let mut phase = analytic_phase(&fundamental);
        if config.filt_phase {
            phase = phase.trend_filtered(3);
        }
        let wrapped = phase.wrapped(config.phase);
        info.insert("cardiac_freq", cardiac_freq);
        info.insert("phi0", phase.phi0);
        stage.end();

        let stage = Stage::begin("cycle averaging");
        let indices: Vec<usize> = if config.censor_bad_points {
            (0..driver.len()).filter(|&i| !bad[i]).collect()
        } else {
            (0..driver.len()).collect()
        };
        let cycle_average = cardiac_cycle_average(&wrapped, &driver, &indices, &ctx.gridder);
        let pulse_average = pulse_time_average(
            &ctx.slice_axis,
            &wrapped,
            &driver,
            &indices,
            config.pulse_recon_step,
            config.congrid_bins,
            config.grid_kernel,
            config.phase,
        )?;
        let quality = config.compute_quality.then(|| {
            let q = signal_quality(&driver_std, config.std_freq, QualityWindows::default());
            let (skew, skew_std) = q.skew_summary();
            let (kurt, kurt_std) = q.kurtosis_summary();
            let (ent, ent_std) = q.entropy_summary();
            info.insert("sqi_skew_mean", skew);
            info.insert("sqi_skew_std", skew_std);
            info.insert("sqi_kurt_mean", kurt);
            info.insert("sqi_kurt_std", kurt_std);
            info.insert("sqi_entropy_mean", ent);
            info.insert("sqi_entropy_std", ent_std);
            q
        });
        stage.end();

        let stage = Stage::begin("phase projection");
        let slice_phases = slice_phase_values(&phase.unwrapped, &ctx.slice_axis, &ctx.geometry, ctx.timepoints, config.phase);
        let valid = valid_timepoints(
            config.censor_bad_points.then_some(&bad[..]),
            &ctx.geometry,
            ctx.timepoints,
        );
        let projection = PhaseProjector::new(ctx.grid, &ctx.gridder, config).project(
            &ctx.data,
            ctx.proj_mask.view(),
            &slice_phases,
            &valid,
        );
        stage.end();

        let stage = Stage::begin("vessel classification");
        let vessels = classify(&projection, ctx.proj_mask.view(), &ctx.grid, config);
        info.insert("vessel_hard_thresh", vessels.thresholds.hard);
        info.insert("vessel_soft_thresh", vessels.thresholds.soft);
        info.insert("numvessels", vessels.num_vessels());
        info.insert("numarteries", vessels.num_arteries());
        // 混叠相关只在最后一轮计算.
        let wave_delay = config.aliased_correlation.filter(|_| is_final).map(|ac| {
            let correlator = AliasedCorrelator::new(&driver_std, config.std_freq, 1.0 / ctx.geometry.tr, ac.search_values());
            aliased_correlation(
                ctx.data.demeaned.view(),
                vessels.vessel_mask.view(),
                projection.flips.view(),
                &correlator,
                &ctx.geometry,
                config.flip_arteries,
            )
        });
        stage.end();

        Ok(PassOutput {
            pass,
            image,
            image_cleaned,
            image_std,
            image_bad,
            physio,
            driver,
            driver_std,
            bad,
            image_hr,
            physio_hr,
            cardiac_freq,
            fundamental,
            phase,
            cycle_average,
            pulse_average,
            quality,
            slice_phases,
            projection,
            vessels,
            wave_delay,
            info,
        })
    }
}

/// 两个同形状数组的最大绝对差.
pub fn max_abs_diff(a: &Array3<f64>, b: &Array3<f64>) -> f64 {
    let mut m = 0.0_f64;
    Zip::from(a).and(b).for_each(|x, y| m = m.max((x - y).abs()));
    m
}
