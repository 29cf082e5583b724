//! 4D fMRI 数据及其周边 I/O.
//!
//! 体数据统一按 `(z, H, W)` 访问, 时间序列为最后一维, 即 `(z, H, W, t)`.

use std::path::Path;

use ndarray::{Array3, Array4, ArrayView1, ArrayView4, ArrayViewMut4, Axis, Ix3, Ix4};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use crate::{Idx3d, PipelineError, PipelineResult};

pub mod geometry;
pub mod vecio;

pub use geometry::{read_slice_times, AcquisitionGeometry};

/// `NiftiHeader` 是栈上大对象, 移动该对象的开销很可观.
/// 因此我们将其分配到堆上.
type BoxedHeader = Box<NiftiHeader>;

/// `xyzt_units` 中的时间单位掩码.
const TIME_UNIT_MASK: u8 = 0x38;
const UNITS_MSEC: u8 = 16;
const UNITS_USEC: u8 = 24;

/// 将 (W, H, z) 转换成 (z, H, W). 以后均按照该模式访问.
#[inline]
fn get_shape_from_header(h: &NiftiHeader) -> Idx3d {
    // [W, H, z]. 体素个数数组.
    let [_, w, h, z, ..] = h.dim;
    (z as usize, h as usize, w as usize)
}

/// nii 文件 header 的共用属性.
pub trait NiftiHeaderAttr {
    /// 获取 header 部分.
    fn header(&self) -> &NiftiHeader;

    /// 获取空间形状大小.
    #[inline]
    fn shape(&self) -> Idx3d {
        get_shape_from_header(self.header())
    }

    /// 获取水平切片个数.
    #[inline]
    fn len_z(&self) -> usize {
        self.shape().0
    }

    /// 获取空间体素个数.
    #[inline]
    fn size(&self) -> usize {
        let (z, h, w) = self.shape();
        z * h * w
    }

    /// 获取单个体素分辨率 (毫米), 顺序为 `[z, H, W]`.
    #[inline]
    fn pix_dim(&self) -> [f64; 3] {
        let [_, w, h, z, ..] = self.header().pixdim;
        [z as f64, h as f64, w as f64]
    }

    /// 检查 `other` 与自身的空间网格是否一致.
    fn check_space_match(&self, other: &NiftiHeader) -> PipelineResult<()> {
        let expected = self.shape();
        let got = get_shape_from_header(other);
        if expected != got {
            return Err(PipelineError::DimensionMismatch(expected, got));
        }
        let [_, w, h, z, ..] = other.pixdim;
        let theirs = [z as f64, h as f64, w as f64];
        if self
            .pix_dim()
            .iter()
            .zip(theirs)
            .any(|(a, b)| (a - b).abs() > 1e-3)
        {
            log::warn!("voxel sizes differ: {:?} vs {:?}", self.pix_dim(), theirs);
        }
        Ok(())
    }
}

impl NiftiHeaderAttr for NiftiHeader {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        self
    }
}

/// nii 格式 4D fMRI 扫描, 包括 header 和强度数据.
#[derive(Debug, Clone)]
pub struct FmriScan {
    header: BoxedHeader,
    data: Array4<f64>,
}

impl NiftiHeaderAttr for FmriScan {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }
}

impl FmriScan {
    /// 打开 nii 文件格式的 4D fMRI 扫描. `path` 为 nii (或 nii.gz) 文件的本地路径.
    pub fn open<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        let obj = ReaderOptions::new().read_file(path.as_ref())?;
        let header = Box::new(obj.header().clone());
        let data = obj.into_volume().into_ndarray::<f64>()?;
        if data.ndim() != 4 {
            return Err(PipelineError::config(format!(
                "expected a 4-D volume, got {} dimensions",
                data.ndim()
            )));
        }

        // [W, H, z, t] -> [z, H, W, t].
        let data = data
            .into_dimensionality::<Ix4>()?
            .permuted_axes([2, 1, 0, 3])
            .as_standard_layout()
            .into_owned();
        log::info!("opened {} with shape {:?}", path.as_ref().display(), data.dim());
        Ok(Self { header, data })
    }

    /// 根据 `(z, H, W, t)` 数据和 TR (秒) 直接创建扫描.
    ///
    /// # 注意
    ///
    /// header 只有维度, 体素大小和 TR 是有意义的, 你应仅将其用于实验目的.
    pub fn fake(data: Array4<f64>, tr: f64) -> Self {
        let (z, h, w, t) = data.dim();
        let mut header = Box::<NiftiHeader>::default();
        header.dim = [4, w as u16, h as u16, z as u16, t as u16, 1, 1, 1];
        header.pixdim = [1.0, 1.0, 1.0, 1.0, tr as f32, 1.0, 1.0, 1.0];
        // mm + sec.
        header.xyzt_units = 2 | 8;
        header.intent_name[..4].copy_from_slice(b"fake");
        let data = if data.is_standard_layout() {
            data
        } else {
            data.as_standard_layout().into_owned()
        };
        Self { header, data }
    }

    /// 判断该结构是否是由 `fake` 方法手动拼接的.
    pub fn is_faked(&self) -> bool {
        self.header.intent_name.starts_with(b"fake")
    }

    /// 重复时间 (秒). 按 header 中的时间单位换算.
    pub fn tr(&self) -> f64 {
        let raw = self.header.pixdim[4] as f64;
        match self.header.xyzt_units & TIME_UNIT_MASK {
            UNITS_MSEC => raw / 1000.0,
            UNITS_USEC => raw / 1_000_000.0,
            _ => raw,
        }
    }

    /// 时间点个数.
    #[inline]
    pub fn timepoints(&self) -> usize {
        self.data.len_of(Axis(3))
    }

    /// 丢弃前 `n` 个时间点 (例如尚未达到稳态的扫描).
    pub fn skip_initial(self, n: usize) -> Self {
        if n == 0 {
            return self;
        }
        let n = n.min(self.timepoints());
        let data = self
            .data
            .slice_axis(Axis(3), (n..).into())
            .as_standard_layout()
            .into_owned();
        let mut header = self.header;
        header.dim[4] = data.len_of(Axis(3)) as u16;
        Self { header, data }
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView4<'_, f64> {
        self.data.view()
    }

    /// 获得数据的一份可变 shallow copy.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut4<'_, f64> {
        self.data.view_mut()
    }

    /// 单个体素的时间序列.
    #[inline]
    pub fn series(&self, (z, h, w): Idx3d) -> ArrayView1<'_, f64> {
        self.data.slice(ndarray::s![z, h, w, ..])
    }

    /// 每个体素的时间均值.
    pub fn mean_volume(&self) -> Array3<f64> {
        self.data
            .mean_axis(Axis(3))
            .unwrap_or_else(|| Array3::zeros(self.shape()))
    }
}

/// 读入 3D 掩码, 并检查其空间网格与 `reference` 一致.
///
/// 第四维长度为 1 的文件也被接受.
pub fn open_mask<P: AsRef<Path>>(path: P, reference: &dyn NiftiHeaderAttr) -> PipelineResult<Array3<f64>> {
    let obj = ReaderOptions::new().read_file(path.as_ref())?;
    reference.check_space_match(obj.header())?;
    let data = obj.into_volume().into_ndarray::<f64>()?;
    let data = match data.ndim() {
        3 => data.into_dimensionality::<Ix3>()?,
        4 if data.shape()[3] == 1 => data
            .into_dimensionality::<Ix4>()?
            .index_axis_move(Axis(3), 0),
        n => {
            return Err(PipelineError::config(format!(
                "mask must have 3 dimensions, got {n}"
            )))
        }
    };
    // [W, H, z] -> [z, H, W].
    Ok(data.permuted_axes([2, 1, 0]).as_standard_layout().into_owned())
}

/// 以 `reference` 的空间信息保存 `(z, H, W)` 体数据.
pub fn save_volume<P: AsRef<Path>>(path: P, reference: &NiftiHeader, vol: &Array3<f64>) -> PipelineResult<()> {
    let mut header = reference.clone();
    header.dim[0] = 3;
    header.dim[4] = 1;
    let data = vol.view().permuted_axes([2, 1, 0]);
    WriterOptions::new(path.as_ref())
        .reference_header(&header)
        .write_nifti(&data)?;
    Ok(())
}

/// 以 `reference` 的空间信息保存 `(z, H, W, n)` 数据. 第四维的间距为 `step`, 起点为 `offset`.
pub fn save_series<P: AsRef<Path>>(
    path: P,
    reference: &NiftiHeader,
    data: &Array4<f64>,
    step: f64,
    offset: f64,
) -> PipelineResult<()> {
    let mut header = reference.clone();
    header.dim[0] = 4;
    header.dim[4] = data.len_of(Axis(3)) as u16;
    header.pixdim[4] = step as f32;
    header.toffset = offset as f32;
    let data = data.view().permuted_axes([2, 1, 0, 3]);
    WriterOptions::new(path.as_ref())
        .reference_header(&header)
        .write_nifti(&data)?;
    Ok(())
}

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelIterator, ParallelIterator};

        /// 借助 `rayon`, 并行地对 `0..len_z` 的每个水平切片执行 `op`, 按切片顺序收集结果.
        pub(crate) fn map_slices<R, F>(len_z: usize, op: F) -> Vec<R>
        where
            R: Send,
            F: Fn(usize) -> R + Sync + Send,
        {
            (0..len_z).into_par_iter().map(op).collect()
        }
    } else {
        /// 依次对 `0..len_z` 的每个水平切片执行 `op`, 按切片顺序收集结果.
        pub(crate) fn map_slices<R, F>(len_z: usize, op: F) -> Vec<R>
        where
            F: Fn(usize) -> R,
        {
            (0..len_z).map(op).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan() -> FmriScan {
        let data = Array4::from_shape_fn((3, 4, 5, 6), |(z, h, w, t)| (z * 1000 + h * 100 + w * 10 + t) as f64);
        FmriScan::fake(data, 2.0)
    }

    #[test]
    fn test_fake_header() {
        let s = scan();
        assert!(s.is_faked());
        assert_eq!(s.shape(), (3, 4, 5));
        assert_eq!(s.timepoints(), 6);
        assert_eq!(s.tr(), 2.0);
        assert_eq!(s.series((1, 2, 3))[4], 1234.0);
    }

    #[test]
    fn test_skip_initial() {
        let s = scan().skip_initial(2);
        assert_eq!(s.timepoints(), 4);
        assert_eq!(s.series((0, 0, 0))[0], 2.0);
        assert_eq!(s.header().dim[4], 4);
    }

    #[test]
    fn test_mean_volume() {
        let m = scan().mean_volume();
        assert_eq!(m.dim(), (3, 4, 5));
        assert!((m[[0, 0, 1]] - 12.5).abs() < 1e-12);
    }

    #[test]
    fn test_space_mismatch() {
        let s = scan();
        let mut other = s.header().clone();
        other.dim[1] = 7;
        assert!(matches!(
            s.check_space_match(&other),
            Err(PipelineError::DimensionMismatch((3, 4, 5), (3, 4, 7)))
        ));
        assert!(s.check_space_match(s.header()).is_ok());
    }

    #[test]
    fn test_msec_tr() {
        let mut s = scan();
        s.header.pixdim[4] = 800.0;
        s.header.xyzt_units = 2 | UNITS_MSEC;
        assert!((s.tr() - 0.8).abs() < 1e-9);
    }
}
