//! 三种精化方案.
//!
//! 1. `supplied`: 以强度掩码作为外部估计掩码, 只运行一轮.
//! 2. `two-pass`: 默认两轮, 第二轮以第一轮的血管掩码为估计掩码.
//! 3. `artery`: 在两轮之后再增加一轮按动脉极性翻转的估计.

use crate::profile::Profile;
use cine_berry::prelude::*;
use cine_berry::stats;
use ndarray::Array3;
use std::path::Path;
use utils::loader;

/// 一种方案: 对每个 run 修改输入和配置.
type Schedule = fn(&mut PipelineInputs, &mut ProcessConfig);

fn supplied_mask(inputs: &mut PipelineInputs, config: &mut ProcessConfig) {
    let mean = inputs.scan.mean_volume();
    let flat: Vec<f64> = mean.iter().copied().collect();
    let flags = stats::make_mask(&flat, config.mask_thresh_pct);
    let values = flags.into_iter().map(|b| if b { 1.0 } else { 0.0 }).collect();
    inputs.est_mask = Array3::from_shape_vec(mean.dim(), values).ok();
}

fn two_pass(_: &mut PipelineInputs, _: &mut ProcessConfig) {}

fn artery_aware(_: &mut PipelineInputs, config: &mut ProcessConfig) {
    config.flip_arteries = true;
}

fn run_schedule(name: &str, p: &Path, schedule: Schedule) -> Profile {
    let mut profile = Profile::new();
    let loader = match loader::full_run_loader(p) {
        Ok(l) => l,
        Err(e) => {
            log::error!("{name}: cannot open dataset: {e}");
            return profile.finish();
        }
    };
    for (idx, inputs) in loader {
        println!("{name}: run {idx}...");
        let mut inputs = match inputs {
            Ok(i) => i,
            Err(e) => {
                log::warn!("{name}: run {idx} failed to load: {e}");
                profile.count_failed();
                continue;
            }
        };
        let mut config = ProcessConfig {
            compute_quality: false,
            ..Default::default()
        };
        schedule(&mut inputs, &mut config);

        profile.run_start();
        match Pipeline::new(config).and_then(|pl| pl.run(&inputs)) {
            Ok(out) => {
                let f = &out.final_pass;
                profile.run_finished(f.image_hr, f.vessels.num_vessels(), f.vessels.num_arteries());
            }
            Err(e) => {
                log::warn!("{name}: run {idx} failed: {e}");
                profile.count_failed();
            }
        }
    }
    profile.finish()
}

pub fn supplied(p: &Path) -> Profile {
    run_schedule("Supplied", p, supplied_mask)
}

pub fn two_passes(p: &Path) -> Profile {
    run_schedule("Two-pass", p, two_pass)
}

pub fn artery(p: &Path) -> Profile {
    run_schedule("Artery", p, artery_aware)
}
