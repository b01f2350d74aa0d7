use std::{
    fs,
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, anyhow};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;

use crate::error::DemoError;

const MODEL_CACHE_DIR: &str = "models";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelSpec {
    Local(PathBuf),
    Remote { url: String, cache_path: PathBuf },
}

impl ModelSpec {
    pub fn parse(spec: &str) -> anyhow::Result<Self> {
        if spec.starts_with("http://") || spec.starts_with("https://") {
            let file_name = spec
                .split(['?', '#'])
                .next()
                .and_then(|s| s.rsplit('/').next())
                .filter(|name| !name.is_empty())
                .ok_or_else(|| anyhow!("model URL {spec} has no file name"))?;
            return Ok(ModelSpec::Remote {
                url: spec.to_string(),
                cache_path: PathBuf::from(MODEL_CACHE_DIR).join(file_name),
            });
        }
        Ok(ModelSpec::Local(PathBuf::from(spec)))
    }
}

/// Turns the `-m` value into a model file on disk, downloading it first when
/// it is a URL that has not been cached yet.
pub fn resolve_model(spec: &str) -> anyhow::Result<PathBuf> {
    match ModelSpec::parse(spec)? {
        ModelSpec::Local(path) => {
            if path.is_file() {
                Ok(path)
            } else {
                Err(DemoError::ModelNotFound(path).into())
            }
        }
        ModelSpec::Remote { url, cache_path } => {
            ensure_model_ready(&url, &cache_path)?;
            Ok(cache_path)
        }
    }
}

/// Downloads `url` to `model_path` unless a previous run already cached it.
pub fn ensure_model_ready(url: &str, model_path: &Path) -> anyhow::Result<()> {
    if model_path.exists() {
        log::info!("using cached model {}", model_path.display());
        return Ok(());
    }

    if let Some(parent) = model_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create model directory {}", parent.display()))?;
    }
    download_to_path(url, model_path)
}

fn download_to_path(url: &str, dest: &Path) -> anyhow::Result<()> {
    log::info!("downloading pose model from {url} to {}", dest.display());

    let mut response = Client::new()
        .get(url)
        .send()
        .context("failed to start model download")?
        .error_for_status()
        .context("model download returned error status")?;

    let progress = create_progress_bar(response.content_length());
    let tmp_path = partial_path(dest);
    let mut file = fs::File::create(&tmp_path)
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;

    let copied = io::copy(&mut progress.wrap_read(&mut response), &mut file);
    let written = match copied {
        Ok(bytes) => bytes,
        Err(err) => {
            progress.abandon_with_message("model download failed");
            drop(file);
            let _ = fs::remove_file(&tmp_path);
            return Err(err).context("failed while downloading model bytes");
        }
    };

    file.sync_all()
        .context("failed to flush downloaded model to disk")?;
    fs::rename(&tmp_path, dest).with_context(|| {
        format!(
            "failed to move {} into place at {}",
            tmp_path.display(),
            dest.display()
        )
    })?;

    progress.finish_with_message("pose model ready");
    log::info!("downloaded {written} bytes to {}", dest.display());
    Ok(())
}

/// Temporary name used while a download is in flight: `pose.onnx` becomes
/// `pose.onnx.download`.
fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".download");
    PathBuf::from(name)
}

fn create_progress_bar(total_size: Option<u64>) -> ProgressBar {
    match total_size {
        Some(total) if total > 0 => {
            let pb = ProgressBar::new(total);
            if let Ok(style) = ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            ) {
                pb.set_style(style.progress_chars("=>-"));
            }
            pb
        }
        _ => {
            let pb = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template("{spinner:.green} downloading model") {
                pb.set_style(style);
            }
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        }
    }
}
