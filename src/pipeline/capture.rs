use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

#[cfg(feature = "camera-nokhwa")]
use super::camera::CameraSource;
use super::video::VideoFileSource;
use crate::{error::DemoError, types::Frame};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

/// Anything that yields frames one by one. `Ok(None)` marks the end of the stream.
pub trait FrameSource {
    fn read(&mut self) -> Result<Option<Frame>>;

    fn describe(&self) -> String;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Camera(u32),
    StillImage(PathBuf),
    Video(String),
}

impl SourceKind {
    pub fn parse(spec: &str) -> Result<Self, DemoError> {
        if spec == "cam" {
            return Ok(SourceKind::Camera(0));
        }
        if let Some(index) = spec.strip_prefix("cam:") {
            return index
                .parse()
                .map(SourceKind::Camera)
                .map_err(|_| DemoError::OpenInput(spec.to_string()));
        }

        let is_image = Path::new(spec)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        if is_image {
            Ok(SourceKind::StillImage(PathBuf::from(spec)))
        } else {
            Ok(SourceKind::Video(spec.to_string()))
        }
    }
}

pub fn open_source(spec: &str) -> Result<Box<dyn FrameSource>> {
    let kind = SourceKind::parse(spec)?;
    let opened: Result<Box<dyn FrameSource>> = match kind {
        SourceKind::Camera(index) => open_camera(index),
        SourceKind::StillImage(path) => {
            StillImageSource::open(&path).map(|s| Box::new(s) as Box<dyn FrameSource>)
        }
        SourceKind::Video(uri) => {
            VideoFileSource::open(&uri).map(|s| Box::new(s) as Box<dyn FrameSource>)
        }
    };

    opened.map_err(|err| {
        log::debug!("opening {spec} failed: {err:?}");
        match err.downcast::<DemoError>() {
            Ok(demo) => demo.into(),
            Err(other) => other.context(DemoError::OpenInput(spec.to_string())),
        }
    })
}

#[cfg(feature = "camera-nokhwa")]
fn open_camera(index: u32) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(CameraSource::open(index)?))
}

#[cfg(not(feature = "camera-nokhwa"))]
fn open_camera(index: u32) -> Result<Box<dyn FrameSource>> {
    Err(anyhow::anyhow!(
        "camera {index} requested but the camera-nokhwa feature is disabled"
    ))
}

/// A single decoded image; yields it once and then ends.
pub struct StillImageSource {
    path: PathBuf,
    frame: Option<Frame>,
}

impl StillImageSource {
    pub fn open(path: &Path) -> Result<Self> {
        let image = image::open(path)
            .with_context(|| format!("failed to open image {}", path.display()))?
            .to_rgb8();
        let (width, height) = image.dimensions();
        Ok(Self {
            path: path.to_path_buf(),
            frame: Some(Frame::new(image.into_raw(), width, height)),
        })
    }
}

impl FrameSource for StillImageSource {
    fn read(&mut self) -> Result<Option<Frame>> {
        Ok(self.frame.take())
    }

    fn describe(&self) -> String {
        format!("image {}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_source_specs() {
        assert_eq!(SourceKind::parse("cam").unwrap(), SourceKind::Camera(0));
        assert_eq!(SourceKind::parse("cam:2").unwrap(), SourceKind::Camera(2));
        assert_eq!(
            SourceKind::parse("poses/Warrior.JPG").unwrap(),
            SourceKind::StillImage(PathBuf::from("poses/Warrior.JPG"))
        );
        assert_eq!(
            SourceKind::parse("clip.mp4").unwrap(),
            SourceKind::Video("clip.mp4".to_string())
        );
        assert!(SourceKind::parse("cam:front").is_err());
    }

    #[test]
    fn still_image_yields_once() {
        let path = std::env::temp_dir().join(format!("pose-still-{}.png", std::process::id()));
        image::RgbImage::from_pixel(4, 3, image::Rgb([10, 20, 30]))
            .save(&path)
            .unwrap();

        let mut source = StillImageSource::open(&path).unwrap();
        let frame = source.read().unwrap().expect("first frame");
        assert_eq!((frame.width, frame.height), (4, 3));
        assert_eq!(&frame.rgb[..3], &[10, 20, 30]);
        assert!(source.read().unwrap().is_none());

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn missing_image_reports_open_failure() {
        let err = open_source("no/such/reference.png").err().expect("must fail");
        assert!(err.to_string().contains("Cannot open input file or camera"));
    }
}
