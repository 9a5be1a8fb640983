use std::io::Cursor;
use std::path::{Component, Path, PathBuf};

use base64::Engine;
use bytes::Bytes;
use tempfile::TempDir;
use thiserror::Error;

/// Where a function package comes from. Both variants carry a zip archive.
#[derive(Debug, Clone)]
pub enum PackageSource {
    /// Base64-encoded archive sent with the request.
    Inline(String),
    /// Archive fetched over HTTP(S).
    Url(String),
}

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("package is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("fetching package failed: {0}")]
    Fetch(String),
    #[error("package is not a valid zip archive: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("invalid subfolder path {0:?}")]
    Subpath(String),
    #[error("staging I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl PackageError {
    pub fn is_invalid_input(&self) -> bool {
        !matches!(self, PackageError::Io(_))
    }
}

/// An extracted package. The staging directory is removed on drop.
#[derive(Debug)]
pub struct StagedPackage {
    dir: TempDir,
    root: PathBuf,
}

impl StagedPackage {
    /// Function source root (the extraction dir or the chosen subfolder).
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn staging_dir(&self) -> &Path {
        self.dir.path()
    }
}

/// Materialize `source` under a fresh directory in `staging_dir`.
pub async fn stage(
    client: &reqwest::Client,
    source: &PackageSource,
    staging_dir: &Path,
    subpath: Option<&str>,
) -> Result<StagedPackage, PackageError> {
    let archive = match source {
        PackageSource::Inline(encoded) => Bytes::from(
            base64::engine::general_purpose::STANDARD.decode(encoded.trim().as_bytes())?,
        ),
        PackageSource::Url(url) => fetch(client, url).await?,
    };

    tokio::fs::create_dir_all(staging_dir).await?;
    let dir = tempfile::Builder::new()
        .prefix("nimbus-")
        .tempdir_in(staging_dir)?;

    let target = dir.path().to_path_buf();
    tokio::task::spawn_blocking(move || extract(archive, &target))
        .await
        .map_err(|err| PackageError::Io(std::io::Error::other(err)))??;

    let root = resolve_subpath(dir.path(), subpath)?;
    tracing::debug!(root = %root.display(), "staged package");
    Ok(StagedPackage { dir, root })
}

async fn fetch(client: &reqwest::Client, url: &str) -> Result<Bytes, PackageError> {
    let response = client
        .get(url)
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(|err| PackageError::Fetch(err.to_string()))?;
    response
        .bytes()
        .await
        .map_err(|err| PackageError::Fetch(err.to_string()))
}

fn extract(archive: Bytes, target: &Path) -> Result<(), PackageError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(archive))?;
    archive.extract(target)?;
    Ok(())
}

/// Resolve `subpath` below `base`. It must be relative, must not climb out
/// of `base`, and must name an existing directory.
fn resolve_subpath(base: &Path, subpath: Option<&str>) -> Result<PathBuf, PackageError> {
    let Some(subpath) = subpath.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(base.to_path_buf());
    };

    let relative = Path::new(subpath);
    let escapes = relative.components().any(|component| {
        matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes {
        return Err(PackageError::Subpath(subpath.to_string()));
    }

    let root = base.join(relative);
    if !root.is_dir() {
        return Err(PackageError::Subpath(subpath.to_string()));
    }
    Ok(root)
}
