//! Confound assembly: motion extension, aCompCor, concatenation.
pub mod assemble;
pub mod compcor;
pub mod motion;

pub use assemble::{
    concat_confound_files, concat_confounds, ConfoundFiles, ConfoundSources, ALL_CONFOUNDS_FILE,
};
pub use compcor::{compartment_mask, compcor_file, compcor_from_series, erode, extract_components};
pub use motion::{
    extend_motion_file, extend_motion_parameters, read_motion_parameters, MotionOutputs,
    MotionTables,
};
