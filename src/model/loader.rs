//! Model fetching and loading.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};

use crate::error::{Error, Result};

use super::{ModelKind, OnnxPredictor, Predictor};

/// Fetches and deserializes a model.
///
/// The [`ModelCache`](super::ModelCache) calls this at most once per kind.
pub trait ModelLoader: Send + Sync {
    /// Load the model for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ModelLoad`] or [`Error::Download`] on failure.
    fn load(&self, kind: ModelKind) -> Result<Arc<dyn Predictor>>;
}

/// Loads ONNX models from a directory, downloading missing files when a base
/// URL is configured.
#[derive(Debug, Clone)]
pub struct OnnxLoader {
    model_dir: PathBuf,
    base_url: Option<String>,
}

impl OnnxLoader {
    /// Create a loader for `model_dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(model_dir: impl Into<PathBuf>) -> Result<Self> {
        let model_dir = model_dir.into();

        fs::create_dir_all(&model_dir).map_err(|source| Error::CacheDir {
            path: model_dir.clone(),
            source,
        })?;

        Ok(Self {
            model_dir,
            base_url: None,
        })
    }

    /// Platform-appropriate default model directory.
    ///
    /// - Windows: `%LOCALAPPDATA%\stylemix\models`
    /// - Linux: `~/.cache/stylemix/models`
    /// - macOS: `~/Library/Caches/stylemix/models`
    #[must_use]
    pub fn default_dir() -> PathBuf {
        let base = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
        base.join("stylemix").join("models")
    }

    /// Download missing models from `base_url`.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    #[must_use]
    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    /// Get the path to a model file, downloading it if necessary.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing and cannot be downloaded.
    pub fn model_path(&self, kind: ModelKind) -> Result<PathBuf> {
        let path = self.model_dir.join(kind.filename());
        if path.exists() {
            return Ok(path);
        }

        let Some(base_url) = &self.base_url else {
            return Err(Error::ModelLoad {
                name: kind.to_string(),
                source: format!("{} does not exist", path.display()).into(),
            });
        };

        let url = format!("{}/{}", base_url.trim_end_matches('/'), kind.filename());
        download_file(&url, &path, kind.filename())?;
        Ok(path)
    }
}

impl ModelLoader for OnnxLoader {
    fn load(&self, kind: ModelKind) -> Result<Arc<dyn Predictor>> {
        let path = self.model_path(kind)?;
        tracing::info!("Loading {kind} model from {}", path.display());

        let predictor = OnnxPredictor::load(kind.to_string(), &path)?;
        Ok(Arc::new(predictor))
    }
}

/// Fetch a URL into memory.
pub(crate) fn fetch_bytes(url: &str) -> Result<Vec<u8>> {
    off_runtime(|| {
        tracing::info!("Fetching {url}");
        let download_error = |source| Error::Download {
            name: url.to_string(),
            source,
        };

        let response = reqwest::blocking::get(url)
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(download_error)?;
        let bytes = response.bytes().map_err(download_error)?;
        Ok(bytes.to_vec())
    })
}

/// Download a file from a URL to a path with progress indication.
fn download_file(url: &str, path: &Path, name: &str) -> Result<()> {
    off_runtime(|| {
        tracing::info!("Downloading {name} from {url}");

        let client = reqwest::blocking::Client::new();
        let response = client
            .get(url)
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(|source| Error::Download {
                name: name.to_string(),
                source,
            })?;

        let pb = ProgressBar::new(response.content_length().unwrap_or(0));
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                .expect("valid template")
                .progress_chars("#>-"),
        );
        pb.set_message(format!("Downloading {name}"));

        let mut reader = response;
        write_atomically(&mut reader, path, |downloaded| pb.set_position(downloaded))?;

        pb.finish_with_message(format!("Downloaded {name}"));
        Ok(())
    })
}

/// Stream `reader` into `path` through a temporary file, renamed into place
/// once complete. The temporary file is removed if anything fails.
fn write_atomically(
    reader: &mut impl Read,
    path: &Path,
    mut on_progress: impl FnMut(u64),
) -> Result<()> {
    let temp_path = path.with_extension("tmp");

    let result = (|| {
        let mut file = fs::File::create(&temp_path)?;
        let mut downloaded = 0u64;
        let mut buffer = [0u8; 8192];

        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            file.write_all(&buffer[..bytes_read])?;
            downloaded += bytes_read as u64;
            on_progress(downloaded);
        }

        file.flush()?;
        drop(file);
        fs::rename(&temp_path, path)
    })();

    if let Err(err) = result {
        if let Err(cleanup) = fs::remove_file(&temp_path) {
            tracing::debug!("Could not remove {}: {cleanup}", temp_path.display());
        }
        return Err(err.into());
    }
    Ok(())
}

/// Run blocking network IO on its own thread.
///
/// reqwest's blocking client panics when used from an async runtime thread,
/// and models are loaded from inside jobs.
fn off_runtime<T: Send>(f: impl FnOnce() -> Result<T> + Send) -> Result<T> {
    std::thread::scope(|scope| {
        scope
            .spawn(f)
            .join()
            .unwrap_or_else(|_| Err(Error::Io(std::io::Error::other("download thread panicked"))))
    })
}
