//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::Idx3d;

pub use crate::data::{AcquisitionGeometry, FmriScan, NiftiHeaderAttr};
pub use crate::{AliasedCorrelation, PipelineError, PipelineResult, ProcessConfig};

pub use crate::badpts::BadPointMethod;
pub use crate::filter::FilterBand;
pub use crate::glm::GlmMode;
pub use crate::phase::{PhaseBinGrid, PhaseConvention};
pub use crate::resample::GridKernel;

pub use crate::physio::PhysioRecording;
pub use crate::pipeline::{Pipeline, PipelineInputs, RunOutput};
pub use crate::output::OutputWriter;

pub use crate::dataset::home_dataset_dir_with;
pub use crate::dataset::{self, run_loader, RunLoader};
