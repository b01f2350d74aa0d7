use std::{
    fs,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use anyhow::{Context, Result};

use crate::{
    cli::DemoConfig,
    comparison::{self, BACK_KNEE, FRONT_KNEE},
    error::DemoError,
    model_download::resolve_model,
    pipeline::{
        FrameSource, HumanPoseEstimator, KeyAction, OUTPUT_FPS, PreviewWindow, VideoWriter,
        open_source, render_human_pose,
    },
    types::{Frame, HumanPose, KEYPOINT_NAMES},
};

const WINDOW_TITLE: &str = "Human Pose Estimation";
const FRAME_DELAY: Duration = Duration::from_millis(33);
const KEYPOINT_IMAGE: &str = "keypoint.jpg";
const OUTPUT_VIDEO: &str = "output.mp4";

/// Exponential running average of the per-frame inference time.
#[derive(Clone, Copy, Debug, Default)]
pub struct InferenceTimer {
    average_ms: Option<f64>,
}

impl InferenceTimer {
    pub fn update(&mut self, sample: Duration) -> f64 {
        let sample_ms = sample.as_secs_f64() * 1000.0;
        let average = match self.average_ms {
            None => sample_ms,
            Some(avg) => avg * 0.95 + 0.05 * sample_ms,
        };
        self.average_ms = Some(average);
        average
    }

    pub fn average_ms(&self) -> Option<f64> {
        self.average_ms
    }
}

struct Outputs {
    keypoint_image: PathBuf,
    video: VideoWriter,
}

impl Outputs {
    fn create(dir: &Path, width: u32, height: u32) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create output directory {}", dir.display()))?;
        let video = VideoWriter::create(&dir.join(OUTPUT_VIDEO), width, height, OUTPUT_FPS)?;
        Ok(Self {
            keypoint_image: dir.join(KEYPOINT_IMAGE),
            video,
        })
    }

    fn write(&mut self, frame: &Frame) -> Result<()> {
        let image = image::RgbImage::from_raw(frame.width, frame.height, frame.rgb.clone())
            .context("frame buffer does not match its dimensions")?;
        image
            .save(&self.keypoint_image)
            .with_context(|| format!("failed to save {}", self.keypoint_image.display()))?;
        self.video.write(frame)
    }
}

pub fn run(config: &DemoConfig) -> Result<()> {
    let model_path = resolve_model(&config.model)?;
    let mut estimator =
        HumanPoseEstimator::new(&model_path, config.device, config.perf_counters)?;

    println!("Input: {}", config.input);
    let mut source = open_source(&config.input)?;
    let mut frame = source
        .read()?
        .filter(|frame| !frame.is_empty())
        .ok_or_else(|| DemoError::EmptyInput(config.input.clone()))?;
    log::info!("reading from {}", source.describe());
    // Warm-up run so the first measured frame does not pay for session setup.
    estimator.estimate(&frame)?;

    print_instructions(config.no_show);

    let mut outputs = match &config.output_dir {
        Some(dir) => {
            println!("Writing results to {}", dir.display());
            Some(Outputs::create(dir, frame.width, frame.height)?)
        }
        None => None,
    };

    let reference_poses = estimate_reference(&mut estimator, &config.reference)?;
    let reference = &reference_poses[0];
    let knee_angles = [FRONT_KNEE, BACK_KNEE]
        .map(|angle| (angle.name, comparison::measure(reference, &angle)));
    for (name, degrees) in knee_angles {
        match degrees {
            Some(degrees) => println!("reference {name} angle = {degrees}"),
            None => println!("reference {name} angle = n/a"),
        }
    }

    let mut window = if config.no_show {
        None
    } else {
        Some(PreviewWindow::open(WINDOW_TITLE, frame.width, frame.height)?)
    };

    let mut delay = FRAME_DELAY;
    let mut timer = InferenceTimer::default();
    let mut frames = 0u64;

    loop {
        let started = Instant::now();
        let poses = estimator.estimate(&frame)?;
        let scaled = comparison::scale_human_pose(&reference_poses, &poses);
        let average_ms = timer.update(started.elapsed());
        frames += 1;

        log::debug!("reference knee angles {knee_angles:?}");
        report_comparison(reference, &poses);
        if config.raw_output {
            for pose in &poses {
                println!("{}", pose.raw_line());
            }
        }

        if config.needs_rendering() {
            render_human_pose(&scaled, &mut frame);
            log::debug!(
                "frame {frames}: {} poses, inference {average_ms:.1} ms ({:.1} FPS), latency {:?}",
                poses.len(),
                1000.0 / average_ms.max(f64::EPSILON),
                frame.timestamp.elapsed()
            );

            if let Some(outputs) = outputs.as_mut() {
                outputs.write(&frame)?;
            }

            if let Some(window) = window.as_mut() {
                window.show(&frame)?;
                match window.wait_key(delay) {
                    Some(KeyAction::TogglePause) => {
                        delay = if delay.is_zero() { FRAME_DELAY } else { Duration::ZERO };
                    }
                    Some(KeyAction::Exit) => break,
                    Some(KeyAction::Other) | None => {}
                }
            }
        }

        match source.read()? {
            Some(next) => frame = next,
            None => break,
        }
    }

    if let Some(outputs) = outputs {
        outputs.video.finish()?;
    }

    if let Some(avg) = timer.average_ms() {
        println!("Processed {frames} frames, mean inference time {avg:.1} ms");
    }
    if let Some(counters) = estimator.perf_counters() {
        println!("{}", counters.report());
    }
    Ok(())
}

fn print_instructions(no_show: bool) {
    print!("To close the application, press 'CTRL+C' here");
    if !no_show {
        println!(" or switch to the output window and press ESC key");
        print!("To pause execution, switch to the output window and press 'p' key");
    }
    println!();
}

fn estimate_reference(estimator: &mut HumanPoseEstimator, spec: &str) -> Result<Vec<HumanPose>> {
    let mut source: Box<dyn FrameSource> =
        open_source(spec).map_err(|err| err.context(DemoError::OpenReference(spec.to_string())))?;
    let frame = source
        .read()?
        .ok_or_else(|| DemoError::OpenReference(spec.to_string()))?;

    let poses = estimator.estimate(&frame)?;
    if poses.is_empty() {
        return Err(DemoError::NoReferencePose(spec.to_string()).into());
    }
    let missing: Vec<&str> = poses[0]
        .keypoints
        .iter()
        .zip(KEYPOINT_NAMES)
        .filter(|(keypoint, _)| !keypoint.is_present())
        .map(|(_, name)| name)
        .collect();
    log::info!(
        "reference {spec}: {} poses, best has {} keypoints (missing {missing:?})",
        poses.len(),
        poses[0].present_count()
    );
    Ok(poses)
}

fn report_comparison(reference: &HumanPose, poses: &[HumanPose]) {
    let Some(live) = poses.first() else {
        log::debug!("no pose in frame");
        return;
    };
    let comparison = comparison::compare_angles(reference, live);
    if let (Some(mean), Some(worst)) = (comparison.mean_abs_deviation(), comparison.worst()) {
        log::info!(
            "mean joint deviation {mean:.1}°, worst {} {:+}° ({} vs {})",
            worst.name,
            worst.difference,
            worst.live,
            worst.reference
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_is_taken_verbatim() {
        let mut timer = InferenceTimer::default();
        assert_eq!(timer.average_ms(), None);
        assert_eq!(timer.update(Duration::from_millis(40)), 40.0);
    }

    #[test]
    fn later_samples_are_blended() {
        let mut timer = InferenceTimer::default();
        timer.update(Duration::from_millis(40));
        let avg = timer.update(Duration::from_millis(60));
        assert!((avg - 41.0).abs() < 1e-9);
    }
}
