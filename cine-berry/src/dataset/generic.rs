//! 通用 fMRI run 加载器.
//!
//! 提供迭代器风格的数据集获取模式. 目录下每个 run 由一个 4D nifti 文件和一个切片时刻文件组成,
//! 默认命名为 `run-{i}_bold.nii[.gz]` 与 `run-{i}_slicetimes.txt`.

use std::path::{Path, PathBuf};

use crate::data::{read_slice_times, AcquisitionGeometry, FmriScan};
use crate::pipeline::PipelineInputs;
use crate::{PipelineError, PipelineResult};

/// 文件名构造器. 接受 run 索引, 获得文件名.
pub type FilenameBuilder = fn(u32) -> String;

/// 默认的 fMRI 文件名.
pub fn bold_filename(idx: u32) -> String {
    format!("run-{idx}_bold.nii.gz")
}

/// 默认的切片时刻文件名.
pub fn slice_times_filename(idx: u32) -> String {
    format!("run-{idx}_slicetimes.txt")
}

/// 从文件名中解析 run 索引. 接受 `.nii` 与 `.nii.gz`.
fn parse_run_index(name: &str) -> Option<u32> {
    let rest = name.strip_prefix("run-")?;
    let idx = rest
        .strip_suffix("_bold.nii.gz")
        .or_else(|| rest.strip_suffix("_bold.nii"))?;
    idx.parse().ok()
}

/// 列出 `path` 下所有 run 的索引, 升序.
pub fn discover_runs<P: AsRef<Path>>(path: P) -> PipelineResult<Vec<u32>> {
    let mut runs: Vec<u32> = std::fs::read_dir(path)?
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str().and_then(parse_run_index))
        .collect();
    runs.sort_unstable();
    runs.dedup();
    Ok(runs)
}

/// 从指定索引, 路径和文件名构造器创建 run 加载器.
///
/// # 注意
///
/// 1. `path` 必须是目录, 否则返回配置错误.
/// 2. fMRI 文件不存在时, 会尝试去掉 `.gz` 后缀的同名文件.
pub fn run_loader<I: IntoIterator<Item = u32>, P: AsRef<Path>>(
    data: I,
    path: P,
    bold: FilenameBuilder,
    slice_times: FilenameBuilder,
) -> PipelineResult<RunLoader> {
    let path = path.as_ref().to_owned();
    if !path.is_dir() {
        return Err(PipelineError::config(format!(
            "{} is not a directory",
            path.display()
        )));
    }

    let mut data: Vec<u32> = data.into_iter().collect();
    data.reverse();

    Ok(RunLoader {
        path,
        data_rev: data,
        bold,
        slice_times,
    })
}

/// fMRI run 加载器, 并在内部自动转换文件名.
#[derive(Debug)]
pub struct RunLoader {
    path: PathBuf,
    data_rev: Vec<u32>,
    bold: FilenameBuilder,
    slice_times: FilenameBuilder,
}

impl RunLoader {
    fn open(&self, idx: u32) -> PipelineResult<PipelineInputs> {
        let mut bold = self.path.join((self.bold)(idx));
        if !bold.exists() && bold.extension().is_some_and(|e| e == "gz") {
            bold.set_extension("");
        }
        let scan = FmriScan::open(&bold)?;
        let times = read_slice_times(self.path.join((self.slice_times)(idx)))?;
        let geometry = AcquisitionGeometry::new(scan.tr(), times)?;
        Ok(PipelineInputs::new(scan, geometry))
    }
}

impl Iterator for RunLoader {
    type Item = (u32, PipelineResult<PipelineInputs>);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.data_rev.pop()?;
        Some((idx, self.open(idx)))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.data_rev.len(), Some(self.data_rev.len()))
    }
}

impl ExactSizeIterator for RunLoader {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_index() {
        assert_eq!(parse_run_index("run-3_bold.nii.gz"), Some(3));
        assert_eq!(parse_run_index("run-12_bold.nii"), Some(12));
        assert_eq!(parse_run_index("run-1_slicetimes.txt"), None);
        assert_eq!(parse_run_index("sub-1_bold.nii"), None);
    }

    #[test]
    fn test_discover_and_missing_files() {
        let dir = std::env::temp_dir().join("cine_berry_runs");
        std::fs::create_dir_all(&dir).unwrap();
        for name in ["run-2_bold.nii.gz", "run-1_bold.nii", "notes.txt"] {
            std::fs::write(dir.join(name), b"").unwrap();
        }
        assert_eq!(discover_runs(&dir).unwrap(), vec![1, 2]);

        let mut loader = run_loader([7], &dir, bold_filename, slice_times_filename).unwrap();
        assert_eq!(loader.len(), 1);
        let (idx, res) = loader.next().unwrap();
        assert_eq!(idx, 7);
        assert!(res.is_err());
        assert!(loader.next().is_none());
        assert!(run_loader([1], dir.join("notes.txt"), bold_filename, slice_times_filename).is_err());
    }
}
