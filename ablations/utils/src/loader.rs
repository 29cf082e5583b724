//! 对 `cine-berry::dataset` 的更一层封装. 提供更直接的数据集加载器.

use cine_berry::dataset::generic::{bold_filename, slice_times_filename};
use cine_berry::dataset::{discover_runs, run_loader, RunLoader};
use cine_berry::PipelineResult;
use std::env;
use std::path::{Path, PathBuf};

/// 获取 fMRI 数据集基本路径.
///
/// 1. 若环境变量 `$CINE_DATASET_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/fmri`.
pub fn dataset_dir_from_env_or_home() -> Option<PathBuf> {
    match env::var("CINE_DATASET_DIR") {
        Ok(d) if !d.is_empty() => Some(PathBuf::from(d)),
        _ => cine_berry::dataset::home_dataset_dir_with(["fmri"]),
    }
}

/// 获取目录下全部 run 的加载器.
pub fn full_run_loader<P: AsRef<Path>>(path: P) -> PipelineResult<RunLoader> {
    let runs = discover_runs(path.as_ref())?;
    run_loader(runs, path, bold_filename, slice_times_filename)
}
