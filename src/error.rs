use std::path::PathBuf;

use thiserror::Error;

/// Failures the demo recognizes and reports before or while running.
#[derive(Debug, Error)]
pub enum DemoError {
    #[error("Parameter -{0} is not set")]
    MissingParameter(&'static str),
    #[error("Cannot open input file or camera: {0}")]
    OpenInput(String),
    #[error("Failed to get frame from the input source {0}")]
    EmptyInput(String),
    #[error("Cannot read reference image or stream: {0}")]
    OpenReference(String),
    #[error("No human pose found in the reference {0}")]
    NoReferencePose(String),
    #[error("Model file not found: {}", .0.display())]
    ModelNotFound(PathBuf),
    #[error("Unsupported device {0:?}, expected CPU or CUDA")]
    UnsupportedDevice(String),
    #[error("Frame size {got_w}x{got_h} does not match video size {want_w}x{want_h}")]
    FrameSizeMismatch {
        got_w: u32,
        got_h: u32,
        want_w: u32,
        want_h: u32,
    },
}
