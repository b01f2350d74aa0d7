use anyhow::{Context, Result, anyhow};
use nokhwa::{
    Camera,
    pixel_format::RgbFormat,
    utils::{CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType},
};

use super::{capture::FrameSource, rgb_converter};
use crate::types::Frame;

// Prefer pixel formats that are widely supported on macOS (the built-in cameras
// often reject YUYV even though Nokhwa reports it).
const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
    FrameFormat::RAWRGB,
    FrameFormat::RAWBGR,
    FrameFormat::GRAY,
    FrameFormat::YUYV,
    FrameFormat::NV12,
    FrameFormat::MJPEG,
];

// Consecutive failed reads tolerated before the camera is treated as gone.
const MAX_READ_FAILURES: u32 = 30;

fn requested_formats() -> [RequestedFormat<'static>; 4] {
    [
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestFrameRate,
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestResolution,
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
    ]
}

fn build_camera(index: CameraIndex) -> Result<Camera> {
    let mut last_err = None;

    for requested in requested_formats() {
        match Camera::new(index.clone(), requested) {
            Ok(mut camera) => match camera.open_stream() {
                Ok(()) => return Ok(camera),
                Err(err) => last_err = Some(err.into()),
            },
            Err(err) => last_err = Some(err.into()),
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("failed to open camera with any supported format")))
}

/// Blocking camera reader; every `read` waits for the next frame.
pub struct CameraSource {
    camera: Camera,
    index: u32,
}

impl CameraSource {
    pub fn open(index: u32) -> Result<Self> {
        let camera = build_camera(CameraIndex::Index(index))
            .with_context(|| format!("failed to open camera {index}"))?;
        log::info!(
            "camera {index} ({}) opened with {}",
            camera.info().human_name(),
            camera.camera_format()
        );
        Ok(Self { camera, index })
    }
}

impl FrameSource for CameraSource {
    fn read(&mut self) -> Result<Option<Frame>> {
        let mut failures = 0;
        loop {
            let converted = self
                .camera
                .frame()
                .map_err(anyhow::Error::from)
                .and_then(|buffer| rgb_converter::convert_camera_frame(&buffer));

            match converted {
                Ok(rgb) => return Ok(Some(Frame::new(rgb.rgb, rgb.width, rgb.height))),
                Err(err) => {
                    failures += 1;
                    log::warn!("camera frame read failed ({failures}): {err:?}");
                    if failures >= MAX_READ_FAILURES {
                        return Err(err.context(format!(
                            "camera {} stopped delivering frames",
                            self.index
                        )));
                    }
                }
            }
        }
    }

    fn describe(&self) -> String {
        format!("camera {}", self.index)
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        if let Err(err) = self.camera.stop_stream() {
            log::warn!("failed to stop camera {}: {err:?}", self.index);
        }
    }
}
