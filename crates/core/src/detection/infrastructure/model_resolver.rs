use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelResolveError {
    #[error("cannot create model cache: {0}")]
    CacheDir(#[source] io::Error),
    #[error("download failed for {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to write model to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not determine cache directory")]
    NoCacheDir,
    #[error("model {name} not found and no download URL configured")]
    NotFound { name: String },
}

/// Called with `(bytes so far, expected total)`; the total is 0 when the
/// server sends no length.
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send>;

/// Where to look for a model file.
pub struct ModelLocation<'a> {
    pub name: &'a str,
    /// Cache directory; `None` uses [`model_cache_dir`].
    pub cache_dir: Option<&'a Path>,
    pub bundled_dir: Option<&'a Path>,
    pub url: Option<&'a str>,
}

/// Finds `location.name` in the cache, then the bundled directory, and
/// finally downloads it into the cache if a URL is configured.
pub fn resolve(
    location: &ModelLocation<'_>,
    progress: Option<ProgressFn>,
) -> Result<PathBuf, ModelResolveError> {
    let cache_dir = location
        .cache_dir
        .map_or_else(model_cache_dir, |dir| Ok(dir.to_path_buf()))?;
    let target = cache_dir.join(location.name);

    let local = std::iter::once(target.clone())
        .chain(location.bundled_dir.map(|dir| dir.join(location.name)))
        .find(|candidate| candidate.is_file());
    if let Some(found) = local {
        log::debug!("Model found at {}", found.display());
        return Ok(found);
    }

    let url = location.url.ok_or_else(|| ModelResolveError::NotFound {
        name: location.name.to_owned(),
    })?;
    fs::create_dir_all(&cache_dir).map_err(ModelResolveError::CacheDir)?;
    log::info!("Fetching {} from {url}", location.name);
    download(url, &target, progress)?;
    Ok(target)
}

/// `Sharpface/models` under the platform data dir on macOS and the cache
/// dir elsewhere.
pub fn model_cache_dir() -> Result<PathBuf, ModelResolveError> {
    #[cfg(target_os = "macos")]
    let base = dirs::data_dir();
    #[cfg(not(target_os = "macos"))]
    let base = dirs::cache_dir();
    base.map(|dir| dir.join("Sharpface").join("models"))
        .ok_or(ModelResolveError::NoCacheDir)
}

/// Counts bytes written to the inner file and reports them to the callback.
struct ProgressWriter<W> {
    inner: W,
    written: u64,
    total: u64,
    progress: Option<ProgressFn>,
}

impl<W: Write> Write for ProgressWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        if let Some(report) = &self.progress {
            report(self.written, self.total);
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Streams `url` into `<dest>.part` and renames it into place, so an
/// interrupted download never leaves a truncated model behind.
fn download(url: &str, dest: &Path, progress: Option<ProgressFn>) -> Result<(), ModelResolveError> {
    let part = dest.with_extension("part");
    let outcome = fetch_to(url, &part, progress).and_then(|()| {
        fs::rename(&part, dest).map_err(|source| ModelResolveError::Write {
            path: dest.to_path_buf(),
            source,
        })
    });
    if outcome.is_err() {
        let _ = fs::remove_file(&part);
    }
    outcome
}

fn fetch_to(url: &str, part: &Path, progress: Option<ProgressFn>) -> Result<(), ModelResolveError> {
    let failed_write = |source| ModelResolveError::Write {
        path: part.to_path_buf(),
        source,
    };
    let mut response = reqwest::blocking::get(url)
        .and_then(reqwest::blocking::Response::error_for_status)
        .map_err(|source| ModelResolveError::Download {
            url: url.to_owned(),
            source,
        })?;

    let mut writer = ProgressWriter {
        inner: io::BufWriter::new(fs::File::create(part).map_err(failed_write)?),
        written: 0,
        total: response.content_length().unwrap_or(0),
        progress,
    };
    io::copy(&mut response, &mut writer).map_err(failed_write)?;
    writer.flush().map_err(failed_write)?;
    log::debug!("Downloaded {} bytes from {url}", writer.written);
    Ok(())
}
