//! Metadata sources and the fetcher that reads them.
//!
//! Three source kinds are supported:
//!
//! - **Filesystem**: a local metadata file
//! - **Http**: a metadata URL fetched with a bounded timeout
//! - **FileBackedHttp**: a metadata URL whose last good response is mirrored
//!   to a local backup file and served from there while the URL is down
//!
//! The backup file holds the exact fetched bytes, so it can be fed back in
//! through a `Filesystem` source after a restart.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use reqwest::header::{HeaderName, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::{Client, ClientBuilder, StatusCode, Url};
use tracing::{debug, info, instrument, warn};

use crate::error::MetadataError;

/// Upper bound on the TCP connect phase of a fetch.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Where metadata is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataSource {
    /// Local metadata file.
    Filesystem {
        /// Path to the metadata file.
        path: PathBuf,
    },
    /// Remote metadata URL.
    Http {
        /// Metadata URL.
        url: Url,
    },
    /// Remote metadata URL with a local backup of the last good response.
    FileBackedHttp {
        /// Metadata URL.
        url: Url,
        /// Backup file path.
        backup_path: PathBuf,
    },
}

impl MetadataSource {
    /// A local metadata file.
    ///
    /// The file is not checked here; a missing or unreadable file is reported
    /// by the first fetch.
    pub fn filesystem(path: impl Into<PathBuf>) -> Self {
        Self::Filesystem { path: path.into() }
    }

    /// A remote metadata URL.
    ///
    /// # Errors
    ///
    /// Returns `MetadataError::Configuration` if the URL does not parse or is
    /// not http(s).
    pub fn http(url: &str) -> Result<Self, MetadataError> {
        Ok(Self::Http {
            url: parse_url(url)?,
        })
    }

    /// A remote metadata URL backed by a local file.
    ///
    /// # Errors
    ///
    /// Returns `MetadataError::Configuration` if the URL is invalid or the
    /// backup path cannot be written (an existing directory, a read-only
    /// file, or a missing parent directory).
    pub fn file_backed_http(
        url: &str,
        backup_path: impl Into<PathBuf>,
    ) -> Result<Self, MetadataError> {
        let backup_path = backup_path.into();
        validate_backup_path(&backup_path)?;
        Ok(Self::FileBackedHttp {
            url: parse_url(url)?,
            backup_path,
        })
    }

    /// Backup file path, if this source has one.
    #[must_use]
    pub fn backup_path(&self) -> Option<&Path> {
        match self {
            Self::FileBackedHttp { backup_path, .. } => Some(backup_path),
            _ => None,
        }
    }
}

impl fmt::Display for MetadataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Filesystem { path } => write!(f, "file:{}", path.display()),
            Self::Http { url } => write!(f, "{url}"),
            Self::FileBackedHttp { url, backup_path } => {
                write!(f, "{url} (backup {})", backup_path.display())
            },
        }
    }
}

fn parse_url(url: &str) -> Result<Url, MetadataError> {
    let parsed = Url::parse(url)
        .map_err(|e| MetadataError::configuration(format!("Invalid metadata URL '{url}': {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(MetadataError::configuration(format!(
            "Unsupported URL scheme '{scheme}' in '{url}'"
        ))),
    }
}

fn validate_backup_path(path: &Path) -> Result<(), MetadataError> {
    if path.is_dir() {
        return Err(MetadataError::configuration(format!(
            "Backup path {} is a directory",
            path.display()
        )));
    }

    if path.exists() {
        let readonly = std::fs::metadata(path)
            .map(|m| m.permissions().readonly())
            .map_err(|e| {
                MetadataError::configuration(format!(
                    "Backup path {} cannot be inspected: {e}",
                    path.display()
                ))
            })?;
        if readonly {
            return Err(MetadataError::configuration(format!(
                "Backup path {} is not writable",
                path.display()
            )));
        }
        return Ok(());
    }

    let parent = backup_parent(path);
    if !parent.is_dir() {
        return Err(MetadataError::configuration(format!(
            "Parent directory of backup path {} does not exist",
            path.display()
        )));
    }
    Ok(())
}

fn backup_parent(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

/// Where the bytes of a successful fetch came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOrigin {
    /// Local metadata file.
    File,
    /// Metadata URL.
    Http,
    /// Backup file, because the metadata URL failed.
    Backup,
}

impl FetchOrigin {
    /// Check if the data is being served from the backup file.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Backup)
    }
}

/// Freshness markers of the last published fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheValidators {
    /// HTTP response validators.
    Http {
        /// `ETag` response header.
        etag: Option<String>,
        /// `Last-Modified` response header.
        last_modified: Option<String>,
    },
    /// File modification time.
    File {
        /// Modification time when the file was read.
        modified: SystemTime,
    },
}

/// Bytes of a successful fetch.
#[derive(Debug, Clone)]
pub struct FetchedMetadata {
    /// Raw metadata document.
    pub bytes: Vec<u8>,
    /// Where the bytes came from.
    pub origin: FetchOrigin,
    /// Validators to send on the next fetch once this data is published.
    pub validators: Option<CacheValidators>,
}

/// Result of a fetch.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// New bytes were read.
    Fetched(FetchedMetadata),
    /// The source reports no change since the validators were recorded.
    NotModified,
}

/// Reads metadata bytes from a [`MetadataSource`].
pub struct SourceFetcher {
    source: MetadataSource,
    client: Option<Client>,
}

impl SourceFetcher {
    /// Create a fetcher.
    ///
    /// # Errors
    ///
    /// Returns `MetadataError::Configuration` if the HTTP client cannot be built.
    pub fn new(source: MetadataSource, timeout: Duration) -> Result<Self, MetadataError> {
        let client = match source {
            MetadataSource::Filesystem { .. } => None,
            MetadataSource::Http { .. } | MetadataSource::FileBackedHttp { .. } => Some(
                ClientBuilder::new()
                    .timeout(timeout)
                    .connect_timeout(timeout.min(CONNECT_TIMEOUT))
                    .user_agent(format!("fedmeta/{}", env!("CARGO_PKG_VERSION")))
                    .build()
                    .map_err(|e| {
                        MetadataError::configuration(format!("Failed to create HTTP client: {e}"))
                    })?,
            ),
        };

        Ok(Self { source, client })
    }

    /// The source this fetcher reads.
    #[must_use]
    pub fn source(&self) -> &MetadataSource {
        &self.source
    }

    /// Fetch the metadata document.
    ///
    /// `previous` holds the validators of the last published fetch; when the
    /// source confirms nothing changed, returns `FetchOutcome::NotModified`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`/`Unreadable` for filesystem problems and `Fetch` for
    /// network failures with no usable backup.
    #[instrument(skip_all, fields(source = %self.source))]
    pub async fn fetch(
        &self,
        previous: Option<&CacheValidators>,
    ) -> Result<FetchOutcome, MetadataError> {
        match &self.source {
            MetadataSource::Filesystem { path } => read_file(path, previous).await,
            MetadataSource::Http { url } => self.fetch_http(url, previous).await,
            MetadataSource::FileBackedHttp { url, backup_path } => {
                match self.fetch_http(url, previous).await {
                    Ok(FetchOutcome::Fetched(fetched)) => {
                        write_backup(backup_path, &fetched.bytes).await;
                        Ok(FetchOutcome::Fetched(fetched))
                    },
                    Ok(FetchOutcome::NotModified) => Ok(FetchOutcome::NotModified),
                    Err(fetch_err) => read_backup(backup_path, fetch_err).await,
                }
            },
        }
    }

    async fn fetch_http(
        &self,
        url: &Url,
        previous: Option<&CacheValidators>,
    ) -> Result<FetchOutcome, MetadataError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| MetadataError::configuration("HTTP client not configured"))?;

        let mut request = client.get(url.clone());
        if let Some(CacheValidators::Http {
            etag,
            last_modified,
        }) = previous
        {
            if let Some(etag) = etag {
                request = request.header(IF_NONE_MATCH, etag);
            }
            if let Some(last_modified) = last_modified {
                request = request.header(IF_MODIFIED_SINCE, last_modified);
            }
        }

        debug!(url = %url, "Fetching metadata");
        let response = request.send().await.map_err(|e| {
            warn!(url = %url, error = %e, "Metadata request failed");
            MetadataError::fetch(format!("Request to {url} failed: {e}"))
        })?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            debug!(url = %url, "Metadata not modified");
            return Ok(FetchOutcome::NotModified);
        }
        if !status.is_success() {
            warn!(url = %url, status = %status, "Non-success status fetching metadata");
            return Err(MetadataError::fetch(format!("HTTP {status} from {url}")));
        }

        let header = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };
        let validators = CacheValidators::Http {
            etag: header(ETAG),
            last_modified: header(LAST_MODIFIED),
        };

        let bytes = response.bytes().await.map_err(|e| {
            MetadataError::fetch(format!("Failed to read response body from {url}: {e}"))
        })?;

        info!(url = %url, len = bytes.len(), "Metadata fetched");
        Ok(FetchOutcome::Fetched(FetchedMetadata {
            bytes: bytes.to_vec(),
            origin: FetchOrigin::Http,
            validators: Some(validators),
        }))
    }
}

async fn read_file(
    path: &Path,
    previous: Option<&CacheValidators>,
) -> Result<FetchOutcome, MetadataError> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| file_error(path, &e))?;
    if meta.is_dir() {
        return Err(MetadataError::Unreadable {
            path: path.to_path_buf(),
            reason: "path is a directory".into(),
        });
    }

    let modified = meta.modified().ok();
    if let (Some(modified), Some(CacheValidators::File { modified: seen })) = (modified, previous) {
        if modified <= *seen {
            debug!(path = %path.display(), "Metadata file unchanged");
            return Ok(FetchOutcome::NotModified);
        }
    }

    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| file_error(path, &e))?;

    debug!(path = %path.display(), len = bytes.len(), "Metadata file read");
    Ok(FetchOutcome::Fetched(FetchedMetadata {
        bytes,
        origin: FetchOrigin::File,
        validators: modified.map(|modified| CacheValidators::File { modified }),
    }))
}

fn file_error(path: &Path, e: &std::io::Error) -> MetadataError {
    match e.kind() {
        std::io::ErrorKind::NotFound => MetadataError::NotFound {
            path: path.to_path_buf(),
        },
        _ => MetadataError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        },
    }
}

async fn read_backup(
    backup_path: &Path,
    fetch_err: MetadataError,
) -> Result<FetchOutcome, MetadataError> {
    match tokio::fs::read(backup_path).await {
        Ok(bytes) if !bytes.is_empty() => {
            warn!(
                backup = %backup_path.display(),
                error = %fetch_err,
                "Metadata URL unavailable, serving backup file"
            );
            Ok(FetchOutcome::Fetched(FetchedMetadata {
                bytes,
                origin: FetchOrigin::Backup,
                validators: None,
            }))
        },
        Ok(_) => {
            warn!(backup = %backup_path.display(), "Backup file is empty");
            Err(fetch_err)
        },
        Err(e) => {
            debug!(backup = %backup_path.display(), error = %e, "No usable backup file");
            Err(fetch_err)
        },
    }
}

/// Replace the backup file with `bytes`.
///
/// The bytes go to a temporary file in the same directory which is then
/// renamed over the backup, so readers see either the old or the new file.
/// A failure leaves the old backup in place and is only logged.
async fn write_backup(backup_path: &Path, bytes: &[u8]) {
    let path = backup_path.to_path_buf();
    let bytes = bytes.to_vec();
    let result = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(backup_parent(&path))?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    })
    .await;

    match result {
        Ok(Ok(())) => debug!(backup = %backup_path.display(), "Backup file updated"),
        Ok(Err(e)) => warn!(backup = %backup_path.display(), error = %e, "Failed to write backup file"),
        Err(e) => warn!(backup = %backup_path.display(), error = %e, "Backup write task failed"),
    }
}
