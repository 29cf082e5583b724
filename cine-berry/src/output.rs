//! 结果写出.
//!
//! 所有文件名均为 `{prefix}{pass}_{name}`, 最终结果的 `{pass}` 为空, 中间轮次为 `_pass{k}`.

use std::path::PathBuf;

use nifti::NiftiHeader;

use crate::data::{save_series, save_volume, vecio};
use crate::phase::PhaseBinGrid;
use crate::pipeline::{PassOutput, RunOutput};
use crate::{PipelineResult, ProcessConfig};

/// 结果写出器.
#[derive(Debug, Clone)]
pub struct OutputWriter {
    prefix: String,
    header: Box<NiftiHeader>,
}

impl OutputWriter {
    /// `prefix` 为输出路径前缀 (可以包含目录), `header` 提供空间信息.
    pub fn new<S: Into<String>>(prefix: S, header: &NiftiHeader) -> Self {
        Self {
            prefix: prefix.into(),
            header: Box::new(header.clone()),
        }
    }

    fn path(&self, tag: &str, name: &str) -> PathBuf {
        PathBuf::from(format!("{}{}_{}", self.prefix, tag, name))
    }

    /// 写出一次运行的全部结果. 中间轮次只有在存在时写出.
    pub fn write_run(&self, out: &RunOutput, config: &ProcessConfig) -> PipelineResult<()> {
        self.write_pass(&out.final_pass, "", config)?;
        for p in &out.intermediate {
            self.write_pass(p, &format!("_pass{}", p.pass + 1), config)?;
        }

        save_volume(self.path("", "intensitymask.nii.gz"), &self.header, &out.intensity_mask)?;
        save_volume(self.path("", "projmask.nii.gz"), &self.header, &out.proj_mask)?;

        if let Some(glm) = &out.glm {
            let tr = self.header.pixdim[4] as f64;
            save_series(self.path("", "glmfiltered.nii.gz"), &self.header, &glm.filtered, tr, 0.0)?;
            save_series(self.path("", "glmremoved.nii.gz"), &self.header, &glm.removed, tr, 0.0)?;
            if glm.coefficients.dim().0 == 1 && glm.coefficients.dim().1 == 1 {
                let coefs: Vec<f64> = glm.coefficients.iter().copied().collect();
                vecio::write_vec(self.path("", "glmcoefs.txt"), &coefs)?;
            } else {
                save_volume(self.path("", "glmcoefs.nii.gz"), &self.header, &glm.coefficients)?;
            }
        }

        #[cfg(feature = "serde")]
        out.info.to_json_file(self.path("", "info.json"))?;

        log::info!("results written with prefix {}", self.prefix);
        Ok(())
    }

    fn write_pass(&self, p: &PassOutput, tag: &str, config: &ProcessConfig) -> PipelineResult<()> {
        let grid = PhaseBinGrid::new(config.dest_points, config.phase);
        let (step, start) = (grid.step(), grid.convention.lower());
        let h = &self.header;

        let proj = &p.projection;
        save_series(self.path(tag, "app.nii.gz"), h, &proj.app, step, start)?;
        save_series(self.path(tag, "rawapp.nii.gz"), h, &proj.rawapp, step, start)?;
        save_series(self.path(tag, "normapp.nii.gz"), h, &proj.normapp, step, start)?;
        save_series(self.path(tag, "cine.nii.gz"), h, &proj.cine, step, start)?;
        save_series(self.path(tag, "maskedapp.nii.gz"), h, &p.vessels.masked_app, step, start)?;

        let v = &p.vessels;
        for (name, vol) in [
            ("vesselmask.nii.gz", &v.vessel_mask),
            ("minphase.nii.gz", &v.min_phase),
            ("maxphase.nii.gz", &v.max_phase),
            ("arteries.nii.gz", &v.arteries),
            ("veins.nii.gz", &v.veins),
            ("vesselmap.nii.gz", &v.vessel_map),
            ("arterymap.nii.gz", &v.artery_map),
            ("veinmap.nii.gz", &v.vein_map),
        ] {
            save_volume(self.path(tag, name), h, vol)?;
        }

        if let (Some(wd), Some(ac)) = (&p.wave_delay, &config.aliased_correlation) {
            let search = ac.search_values();
            let ac_step = search.get(1).zip(search.first()).map_or(1.0, |(b, a)| b - a);
            save_series(self.path(tag, "corrfunc.nii.gz"), h, &wd.corrfunc, ac_step, -ac.width / 2.0)?;
            save_volume(self.path(tag, "wavedelay.nii.gz"), h, &wd.wave_delay)?;
            save_volume(self.path(tag, "waveamp.nii.gz"), h, &wd.wave_amp)?;
        }

        let std = config.std_freq;
        let vectors: [(String, &[f64]); 11] = [
            ("cardfromfmri_sliceres.txt".into(), &p.image.cardiac),
            ("normcardfromfmri_sliceres.txt".into(), &p.image_cleaned),
            (format!("cardfromfmri_{std}Hz.txt"), &p.image_std),
            ("respfromfmri_sliceres.txt".into(), &p.image.respiratory),
            ("cycleaverage_fmri.txt".into(), &p.image.cycle_average),
            ("driver_sliceres.txt".into(), &p.driver),
            ("fundamental_sliceres.txt".into(), &p.fundamental),
            ("instphase_unwrapped.txt".into(), &p.phase.unwrapped),
            ("envelope_sliceres.txt".into(), &p.phase.envelope),
            ("cardiaccycleaverage.txt".into(), &p.cycle_average.waveform),
            ("pulsetimeaverage.txt".into(), &p.pulse_average.waveform),
        ];
        for (name, data) in vectors {
            vecio::write_vec(self.path(tag, &name), data)?;
        }
        let bad: Vec<f64> = p.bad.iter().map(|&b| f64::from(u8::from(b))).collect();
        vecio::write_vec(self.path(tag, "badpts_sliceres.txt"), &bad)?;
        if let Some(physio) = &p.physio {
            vecio::write_vec(self.path(tag, "pleth_sliceres.txt"), &physio.slice_res)?;
            vecio::write_vec(self.path(tag, &format!("pleth_{std}Hz.txt")), &physio.std_res)?;
            vecio::write_vec(self.path(tag, "pleth_badpts_sliceres.txt"), &physio.slice_bad.as_f64())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let header = NiftiHeader::default();
        let w = OutputWriter::new("/tmp/out/sub-01", &header);
        assert_eq!(w.path("", "app.nii.gz"), PathBuf::from("/tmp/out/sub-01_app.nii.gz"));
        assert_eq!(
            w.path("_pass2", "vesselmask.nii.gz"),
            PathBuf::from("/tmp/out/sub-01_pass2_vesselmask.nii.gz")
        );
    }
}
