use std::{
    ffi::OsString,
    io::{ErrorKind, Read, Write},
    path::{Path, PathBuf},
    process::{Child, ChildStdin, ChildStdout, Command, Stdio},
};

use anyhow::{Context, Result, anyhow};

use super::capture::FrameSource;
use crate::{error::DemoError, types::Frame};

pub const OUTPUT_FPS: u32 = 25;

/// Decodes a video file (or any URI ffmpeg understands) into RGB frames.
pub struct VideoFileSource {
    uri: String,
    child: Child,
    stdout: ChildStdout,
    width: u32,
    height: u32,
}

impl VideoFileSource {
    pub fn open(uri: &str) -> Result<Self> {
        let (width, height) = probe_dimensions(uri)?;

        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(uri)
            .arg("-an")
            .arg("-pix_fmt")
            .arg("rgb24")
            .arg("-f")
            .arg("rawvideo")
            .arg("-");
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = cmd
            .spawn()
            .context("failed to spawn ffmpeg, is it installed and on PATH?")?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("failed to capture ffmpeg stdout"))?;

        log::info!("decoding {uri} at {width}x{height} through ffmpeg");
        Ok(Self {
            uri: uri.to_string(),
            child,
            stdout,
            width,
            height,
        })
    }
}

impl FrameSource for VideoFileSource {
    fn read(&mut self) -> Result<Option<Frame>> {
        let mut buffer = vec![0u8; Frame::expected_len(self.width, self.height)];
        match self.stdout.read_exact(&mut buffer) {
            Ok(()) => Ok(Some(Frame::new(buffer, self.width, self.height))),
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                log::debug!("end of stream for {}", self.uri);
                Ok(None)
            }
            Err(err) => Err(err).with_context(|| format!("failed to read frame from {}", self.uri)),
        }
    }

    fn describe(&self) -> String {
        format!("video {} ({}x{})", self.uri, self.width, self.height)
    }
}

impl Drop for VideoFileSource {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn probe_dimensions(uri: &str) -> Result<(u32, u32)> {
    let output = Command::new("ffprobe")
        .arg("-v")
        .arg("error")
        .arg("-select_streams")
        .arg("v:0")
        .arg("-show_entries")
        .arg("stream=width,height")
        .arg("-of")
        .arg("csv=p=0:s=x")
        .arg(uri)
        .stdin(Stdio::null())
        .output()
        .context("failed to spawn ffprobe, is it installed and on PATH?")?;

    if !output.status.success() {
        return Err(DemoError::OpenInput(uri.to_string()).into());
    }

    parse_dimensions(&String::from_utf8_lossy(&output.stdout))
        .ok_or_else(|| DemoError::OpenInput(uri.to_string()).into())
}

fn parse_dimensions(probe: &str) -> Option<(u32, u32)> {
    let line = probe.lines().map(str::trim).find(|l| !l.is_empty())?;
    let (w, h) = line.split_once('x')?;
    let width: u32 = w.trim().parse().ok()?;
    let height: u32 = h.trim().trim_end_matches('x').parse().ok()?;
    (width > 0 && height > 0).then_some((width, height))
}

/// H.264 writer fed with raw RGB frames over an ffmpeg pipe.
pub struct VideoWriter {
    path: PathBuf,
    child: Child,
    stdin: Option<ChildStdin>,
    width: u32,
    height: u32,
    frames_written: u64,
}

impl VideoWriter {
    pub fn create(path: &Path, width: u32, height: u32, fps: u32) -> Result<Self> {
        let mut cmd = Command::new("ffmpeg");
        cmd.args(encoder_args(path, width, height, fps));
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        let mut child = cmd
            .spawn()
            .context("failed to spawn ffmpeg encoder, is it installed and on PATH?")?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("failed to capture ffmpeg stdin"))?;

        log::info!(
            "writing {} ({width}x{height} @ {fps} fps, H.264)",
            path.display()
        );
        Ok(Self {
            path: path.to_path_buf(),
            child,
            stdin: Some(stdin),
            width,
            height,
            frames_written: 0,
        })
    }

    pub fn write(&mut self, frame: &Frame) -> Result<()> {
        check_frame_size(frame, self.width, self.height)?;
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow!("video writer for {} already finished", self.path.display()))?;
        stdin
            .write_all(&frame.rgb)
            .with_context(|| format!("failed to write frame to {}", self.path.display()))?;
        self.frames_written += 1;
        Ok(())
    }

    /// Closes the pipe and waits for the encoder to flush the file.
    pub fn finish(mut self) -> Result<()> {
        drop(self.stdin.take());
        let status = self
            .child
            .wait()
            .context("failed to wait for ffmpeg encoder")?;
        if !status.success() {
            return Err(anyhow!(
                "ffmpeg encoder for {} exited with {status}",
                self.path.display()
            ));
        }
        log::info!(
            "wrote {} frames to {}",
            self.frames_written,
            self.path.display()
        );
        Ok(())
    }
}

impl Drop for VideoWriter {
    fn drop(&mut self) {
        if self.stdin.take().is_some() {
            // Dropped without finish(): let ffmpeg close the file on EOF.
            let _ = self.child.wait();
        }
    }
}

/// libx264 with yuv420p needs even dimensions, so odd frames are padded by
/// one pixel on the right or bottom.
fn encoder_args(path: &Path, width: u32, height: u32, fps: u32) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "-hide_banner",
        "-loglevel",
        "error",
        "-y",
        "-f",
        "rawvideo",
        "-pix_fmt",
        "rgb24",
    ]
    .into_iter()
    .map(OsString::from)
    .collect();
    args.push("-s".into());
    args.push(format!("{width}x{height}").into());
    args.push("-r".into());
    args.push(fps.to_string().into());
    for arg in [
        "-i",
        "-",
        "-an",
        "-vf",
        "pad=ceil(iw/2)*2:ceil(ih/2)*2",
        "-c:v",
        "libx264",
        "-pix_fmt",
        "yuv420p",
    ] {
        args.push(arg.into());
    }
    args.push(path.as_os_str().to_owned());
    args
}

fn check_frame_size(frame: &Frame, width: u32, height: u32) -> Result<(), DemoError> {
    if frame.width != width || frame.height != height {
        return Err(DemoError::FrameSizeMismatch {
            got_w: frame.width,
            got_h: frame.height,
            want_w: width,
            want_h: height,
        });
    }
    Ok(())
}
