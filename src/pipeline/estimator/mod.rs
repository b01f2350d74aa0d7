mod feature_map;
mod grouping;
mod peaks;
mod preprocess;

use std::{
    fmt::Write as _,
    path::Path,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, anyhow};
use ort::session::{Session, builder::GraphOptimizationLevel, builder::SessionBuilder};
use ort::value::Tensor;
use rayon::prelude::*;

use self::{
    feature_map::{FeatureMap, split_channels},
    grouping::group_peaks_to_poses,
    peaks::{assign_global_ids, find_peaks},
    preprocess::{InputGeometry, prepare_input},
};
use crate::{
    cli::Device,
    types::{Frame, HumanPose, KEYPOINTS_NUMBER},
};

const HEATMAP_CHANNELS: usize = KEYPOINTS_NUMBER + 1;
const PAF_CHANNELS: usize = 38;
/// ORT writes `<prefix>_<timestamp>.json` into the working directory.
const PROFILE_PREFIX: &str = "ort_profile";

#[derive(Clone, Debug)]
pub struct EstimatorConfig {
    pub input_height: u32,
    pub stride: u32,
    pub upsample_ratio: u32,
    pub pad_value: u8,
    pub mean: f32,
    pub scale: f32,
    pub peak_threshold: f32,
    pub min_peaks_distance: f32,
    pub mid_points_score_threshold: f32,
    pub found_mid_points_ratio_threshold: f32,
    pub min_joints: usize,
    pub min_subset_score: f32,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            input_height: 256,
            stride: 8,
            upsample_ratio: 4,
            pad_value: 128,
            mean: 128.0,
            scale: 1.0 / 256.0,
            peak_threshold: 0.1,
            min_peaks_distance: 3.0,
            mid_points_score_threshold: 0.05,
            found_mid_points_ratio_threshold: 0.8,
            min_joints: 3,
            min_subset_score: 0.2,
        }
    }
}

/// Accumulated wall time per estimation stage.
#[derive(Clone, Debug, Default)]
pub struct PerfCounters {
    pub invocations: u64,
    pub preprocess: Duration,
    pub inference: Duration,
    pub postprocess: Duration,
}

impl PerfCounters {
    pub fn report(&self) -> String {
        let calls = self.invocations.max(1) as f64;
        let mut out = format!("performance counts over {} estimations:", self.invocations);
        for (stage, total) in [
            ("preprocess", self.preprocess),
            ("inference", self.inference),
            ("postprocess", self.postprocess),
        ] {
            let _ = write!(
                out,
                "\n  {stage:<12} total {:>10.2} ms  avg {:>8.2} ms",
                total.as_secs_f64() * 1000.0,
                total.as_secs_f64() * 1000.0 / calls
            );
        }
        out
    }
}

/// Multi-person 2D pose estimator over an OpenPose-style network that
/// outputs keypoint heatmaps and part affinity fields.
pub struct HumanPoseEstimator {
    session: Session,
    config: EstimatorConfig,
    counters: Option<PerfCounters>,
}

impl HumanPoseEstimator {
    pub fn new(model_path: &Path, device: Device, perf_counters: bool) -> Result<Self> {
        Self::with_config(model_path, device, perf_counters, EstimatorConfig::default())
    }

    pub fn with_config(
        model_path: &Path,
        device: Device,
        perf_counters: bool,
        config: EstimatorConfig,
    ) -> Result<Self> {
        let mut builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(num_threads())?;
        builder = register_device(builder, device)?;
        if perf_counters {
            builder = builder.with_profiling(PROFILE_PREFIX)?;
        }

        let session = builder
            .commit_from_file(model_path)
            .with_context(|| format!("failed to load ORT session from {}", model_path.display()))?;

        log::info!(
            "pose estimator ready on {device} using {} ({} inputs, {} outputs)",
            model_path.display(),
            session.inputs.len(),
            session.outputs.len()
        );

        Ok(Self {
            session,
            config,
            counters: perf_counters.then(PerfCounters::default),
        })
    }

    pub fn perf_counters(&self) -> Option<&PerfCounters> {
        self.counters.as_ref()
    }

    /// Detects every person in `frame`, most confident first. Keypoints are
    /// in frame pixel coordinates.
    pub fn estimate(&mut self, frame: &Frame) -> Result<Vec<HumanPose>> {
        let started = Instant::now();
        let (input, geometry) = prepare_input(frame, &self.config)?;
        let prepared = Instant::now();

        let (heatmaps, pafs) = self.infer(input)?;
        let inferred = Instant::now();

        let mut poses = self.postprocess(&heatmaps, &pafs, &geometry)?;
        poses.sort_by(|a, b| b.score.total_cmp(&a.score));
        let finished = Instant::now();

        if let Some(counters) = self.counters.as_mut() {
            counters.invocations += 1;
            counters.preprocess += prepared - started;
            counters.inference += inferred - prepared;
            counters.postprocess += finished - inferred;
        }
        log::trace!(
            "estimated {} poses in {:?} (inference {:?})",
            poses.len(),
            finished - started,
            inferred - prepared
        );

        Ok(poses)
    }

    fn infer(&mut self, input: ndarray::Array4<f32>) -> Result<(Vec<FeatureMap>, Vec<FeatureMap>)> {
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run ORT session")?;

        let mut heatmaps = None;
        let mut pafs = None;
        for idx in 0..outputs.len() {
            let array = outputs[idx].try_extract_array::<f32>()?;
            match array.shape().get(1).copied() {
                Some(HEATMAP_CHANNELS) => heatmaps = Some(split_channels(&array)?),
                Some(PAF_CHANNELS) => pafs = Some(split_channels(&array)?),
                other => log::debug!("ignoring output {idx} with {other:?} channels"),
            }
        }

        match (heatmaps, pafs) {
            (Some(heatmaps), Some(pafs)) => Ok((heatmaps, pafs)),
            _ => Err(anyhow!(
                "model must output {HEATMAP_CHANNELS}-channel heatmaps and {PAF_CHANNELS}-channel PAFs"
            )),
        }
    }

    fn postprocess(
        &self,
        heatmaps: &[FeatureMap],
        pafs: &[FeatureMap],
        geometry: &InputGeometry,
    ) -> Result<Vec<HumanPose>> {
        let cfg = &self.config;
        let ratio = cfg.upsample_ratio;

        let heatmaps = heatmaps[..KEYPOINTS_NUMBER]
            .par_iter()
            .map(|map| map.upsample(ratio))
            .collect::<Result<Vec<_>>>()?;
        let pafs = pafs
            .par_iter()
            .map(|map| map.upsample(ratio))
            .collect::<Result<Vec<_>>>()?;

        let mut all_peaks: Vec<_> = heatmaps
            .par_iter()
            .map(|map| find_peaks(map, cfg.peak_threshold, cfg.min_peaks_distance))
            .collect();
        assign_global_ids(&mut all_peaks);

        let mut poses = group_peaks_to_poses(&all_peaks, &pafs, cfg);
        let map_size = heatmaps
            .first()
            .map(|map| (map.width, map.height))
            .unwrap_or((0, 0));
        correct_coordinates(&mut poses, map_size, geometry, cfg);
        Ok(poses)
    }
}

/// Maps keypoints from upsampled feature map coordinates back to the
/// original frame.
pub fn correct_coordinates(
    poses: &mut [HumanPose],
    map_size: (u32, u32),
    geometry: &InputGeometry,
    cfg: &EstimatorConfig,
) {
    let to_input = cfg.stride as f32 / cfg.upsample_ratio.max(1) as f32;
    let full_w = map_size.0 as f32 * to_input;
    let full_h = map_size.1 as f32 * to_input;
    let scale_x = geometry.orig_w as f32 / (full_w - geometry.pad_right() as f32).max(1.0);
    let scale_y = geometry.orig_h as f32 / (full_h - geometry.pad_bottom() as f32).max(1.0);

    for keypoint in poses.iter_mut().flat_map(|pose| pose.keypoints.iter_mut()) {
        if keypoint.is_present() {
            keypoint.x *= to_input * scale_x;
            keypoint.y *= to_input * scale_y;
        }
    }
}

fn num_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().min(4))
        .unwrap_or(2)
}

#[cfg(feature = "cuda")]
fn register_device(builder: SessionBuilder, device: Device) -> Result<SessionBuilder> {
    use ort::execution_providers::CUDAExecutionProvider;

    match device {
        Device::Cpu => Ok(builder),
        Device::Cuda => {
            Ok(builder.with_execution_providers([CUDAExecutionProvider::default().build()])?)
        }
    }
}

#[cfg(not(feature = "cuda"))]
fn register_device(builder: SessionBuilder, device: Device) -> Result<SessionBuilder> {
    match device {
        Device::Cpu => Ok(builder),
        Device::Cuda => Err(anyhow!(
            "device CUDA requested but this build lacks the cuda feature"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Keypoint;

    #[test]
    fn coordinates_map_back_to_frame_pixels() {
        let cfg = EstimatorConfig::default();
        let geometry = InputGeometry::compute(1280, 720, 256, 8);
        // Network output is 57x32, upsampled x4.
        let map_size = (57 * 4, 32 * 4);

        let mut pose = HumanPose::empty(1.0);
        pose.keypoints[0] = Keypoint::new(100.0, 64.0);
        let mut poses = vec![pose];
        correct_coordinates(&mut poses, map_size, &geometry, &cfg);

        let kp = poses[0].keypoints[0];
        let sx = 1280.0 / 455.0;
        let sy = 720.0 / 256.0;
        assert!((kp.x - 200.0 * sx).abs() < 1e-2);
        assert!((kp.y - 128.0 * sy).abs() < 1e-2);
        assert_eq!(poses[0].keypoints[1], Keypoint::ABSENT);
    }

    #[test]
    fn profiles_use_the_ort_prefix() {
        assert_eq!(PROFILE_PREFIX, "ort_profile");
    }

    #[test]
    fn perf_report_lists_every_stage() {
        let counters = PerfCounters {
            invocations: 2,
            preprocess: Duration::from_millis(4),
            inference: Duration::from_millis(40),
            postprocess: Duration::from_millis(10),
        };
        let report = counters.report();
        assert!(report.contains("over 2 estimations"));
        assert!(report.contains("inference"));
        assert!(report.contains("20.00 ms"));
    }
}
