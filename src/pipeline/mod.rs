#[cfg(feature = "camera-nokhwa")]
pub mod camera;
pub mod capture;
pub mod display;
pub mod estimator;
#[cfg(feature = "camera-nokhwa")]
pub mod rgb_converter;
pub mod skeleton;
pub mod video;

// Re-exports for convenience
pub use capture::{FrameSource, open_source};
pub use display::{KeyAction, PreviewWindow};
pub use estimator::HumanPoseEstimator;
pub use skeleton::render_human_pose;
pub use video::{OUTPUT_FPS, VideoWriter};
