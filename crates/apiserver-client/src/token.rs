//! Bearer token providers.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Supplies the bearer token attached to every request.
///
/// Implementations may return a fixed value or re-acquire the token when it
/// rotates.
pub trait TokenProvider: Send + Sync + fmt::Debug {
    fn token(&self) -> Option<String>;
}

/// A token that never changes.
#[derive(Clone)]
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticToken").finish_non_exhaustive()
    }
}

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        (!self.token.is_empty()).then(|| self.token.clone())
    }
}

/// A token backed by a file, typically the projected service account token.
///
/// The kubelet rewrites that file when the token is reissued, so the cached
/// value is re-read once it is older than the refresh interval.
pub struct FileToken {
    path: PathBuf,
    refresh: Duration,
    cached: RwLock<CachedToken>,
}

struct CachedToken {
    value: String,
    read_at: Instant,
}

impl FileToken {
    /// Default interval between re-reads of the token file.
    pub const DEFAULT_REFRESH: Duration = Duration::from_secs(60);

    /// Reads the token file once; fails if it cannot be read.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        Self::with_refresh(path, Self::DEFAULT_REFRESH)
    }

    pub fn with_refresh(path: impl AsRef<Path>, refresh: Duration) -> Result<Self, std::io::Error> {
        let path = path.as_ref().to_path_buf();
        let value = read_token(&path)?;

        Ok(Self {
            path,
            refresh,
            cached: RwLock::new(CachedToken {
                value,
                read_at: Instant::now(),
            }),
        })
    }

    fn reload(&self) {
        match read_token(&self.path) {
            Ok(value) => {
                let mut cached = self.cached.write().unwrap_or_else(PoisonError::into_inner);
                if cached.value != value {
                    debug!("Token file {} changed, using new token", self.path.display());
                }
                cached.value = value;
                cached.read_at = Instant::now();
            }
            Err(e) => {
                // Keep serving the previous token; the file may be mid-rotation.
                warn!("Failed to re-read token file {}: {}", self.path.display(), e);
            }
        }
    }
}

impl fmt::Debug for FileToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileToken")
            .field("path", &self.path)
            .field("refresh", &self.refresh)
            .finish_non_exhaustive()
    }
}

impl TokenProvider for FileToken {
    fn token(&self) -> Option<String> {
        let stale = {
            let cached = self.cached.read().unwrap_or_else(PoisonError::into_inner);
            cached.read_at.elapsed() >= self.refresh
        };
        if stale {
            self.reload();
        }

        let cached = self.cached.read().unwrap_or_else(PoisonError::into_inner);
        (!cached.value.is_empty()).then(|| cached.value.clone())
    }
}

fn read_token(path: &Path) -> Result<String, std::io::Error> {
    Ok(std::fs::read_to_string(path)?.trim().to_string())
}
