use std::{fmt, path::PathBuf, str::FromStr};

use clap::Parser;

use crate::error::DemoError;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "human-pose-demo",
    version,
    about = "Estimates human poses on a video stream and compares them with a reference pose"
)]
pub struct Args {
    /// Path to a video file or image, or "cam" ("cam:N") for a camera.
    #[arg(short = 'i', value_name = "INPUT")]
    pub input: Option<String>,

    /// Path to the reference image or stream.
    #[arg(short = 'c', value_name = "REFERENCE")]
    pub reference: Option<String>,

    /// Path (or http(s) URL) of the pose estimation ONNX model.
    #[arg(short = 'm', value_name = "MODEL")]
    pub model: Option<String>,

    /// Target device for inference: CPU or CUDA.
    #[arg(short = 'd', value_name = "DEVICE", default_value = "CPU")]
    pub device: String,

    /// Enable per-stage performance counters and runtime profiling.
    #[arg(long = "pc")]
    pub perf_counters: bool,

    /// Do not show the processed video.
    #[arg(long = "no_show", alias = "no-show")]
    pub no_show: bool,

    /// Output directory for keypoint.jpg and output.mp4.
    #[arg(short = 'o', value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Print raw keypoint coordinates and score of every pose.
    #[arg(short = 'r')]
    pub raw_output: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Cuda,
}

impl FromStr for Device {
    type Err = DemoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CPU" => Ok(Device::Cpu),
            "CUDA" | "GPU" => Ok(Device::Cuda),
            _ => Err(DemoError::UnsupportedDevice(s.to_string())),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "CPU"),
            Device::Cuda => write!(f, "CUDA"),
        }
    }
}

/// Validated run configuration.
#[derive(Clone, Debug)]
pub struct DemoConfig {
    pub input: String,
    pub reference: String,
    pub model: String,
    pub device: Device,
    pub perf_counters: bool,
    pub no_show: bool,
    pub output_dir: Option<PathBuf>,
    pub raw_output: bool,
}

impl DemoConfig {
    pub fn from_args(args: Args) -> Result<Self, DemoError> {
        let input = required(args.input, "i")?;
        let reference = required(args.reference, "c")?;
        let model = required(args.model, "m")?;
        let device = args.device.parse()?;

        Ok(Self {
            input,
            reference,
            model,
            device,
            perf_counters: args.perf_counters,
            no_show: args.no_show,
            output_dir: args.output_dir.filter(|dir| !dir.as_os_str().is_empty()),
            raw_output: args.raw_output,
        })
    }

    pub fn needs_rendering(&self) -> bool {
        !self.no_show || self.output_dir.is_some()
    }
}

fn required(value: Option<String>, flag: &'static str) -> Result<String, DemoError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(DemoError::MissingParameter(flag))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Result<DemoConfig, DemoError> {
        let args = Args::try_parse_from(argv).expect("clap parse");
        DemoConfig::from_args(args)
    }

    #[test]
    fn missing_input_is_reported_first() {
        let err = parse(&["demo"]).unwrap_err();
        assert!(err.to_string().contains("Parameter -i is not set"));
    }

    #[test]
    fn missing_reference_and_model() {
        let err = parse(&["demo", "-i", "cam"]).unwrap_err();
        assert_eq!(err.to_string(), "Parameter -c is not set");

        let err = parse(&["demo", "-i", "cam", "-c", "ref.jpg"]).unwrap_err();
        assert_eq!(err.to_string(), "Parameter -m is not set");
    }

    #[test]
    fn full_flag_set() {
        let cfg = parse(&[
            "demo",
            "-i",
            "clip.mp4",
            "-c",
            "warrior.jpg",
            "-m",
            "pose.onnx",
            "-d",
            "cpu",
            "--pc",
            "--no_show",
            "-o",
            "out",
            "-r",
        ])
        .unwrap();

        assert_eq!(cfg.input, "clip.mp4");
        assert_eq!(cfg.reference, "warrior.jpg");
        assert_eq!(cfg.model, "pose.onnx");
        assert_eq!(cfg.device, Device::Cpu);
        assert!(cfg.perf_counters);
        assert!(cfg.no_show);
        assert!(cfg.raw_output);
        assert_eq!(cfg.output_dir, Some(PathBuf::from("out")));
        assert!(cfg.needs_rendering());
    }

    #[test]
    fn headless_without_output_skips_rendering() {
        let cfg = parse(&[
            "demo",
            "-i",
            "cam",
            "-c",
            "r.jpg",
            "-m",
            "m.onnx",
            "--no-show",
        ])
        .unwrap();
        assert!(!cfg.needs_rendering());
    }

    #[test]
    fn unknown_device_is_rejected() {
        let err = parse(&["demo", "-i", "a", "-c", "b", "-m", "c", "-d", "MYRIAD"]).unwrap_err();
        assert!(matches!(err, DemoError::UnsupportedDevice(_)));
    }
}
