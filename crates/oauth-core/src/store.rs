//! Durable credential storage
//!
//! The coordinator reads the stored [`Login`] at the start of every
//! lifecycle decision and writes each new generation back. `LoginStore` is
//! the seam; embedding applications supply their own backend or use one of
//! the two provided here:
//!
//! - [`MemoryLoginStore`]: process-local, for tests and short-lived tools
//! - [`FileLoginStore`]: a JSON file written atomically (temp file + rename,
//!   0600 permissions)

use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::http::BoxFuture;
use crate::model::Login;

/// Load/save/clear for the single login a coordinator manages.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn LoginStore>`).
pub trait LoginStore: Send + Sync {
    fn load(&self) -> BoxFuture<'_, Result<Option<Login>>>;

    fn save(&self, login: Login) -> BoxFuture<'_, Result<()>>;

    fn clear(&self) -> BoxFuture<'_, Result<()>>;
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryLoginStore {
    login: Mutex<Option<Login>>,
}

impl MemoryLoginStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-populated with `login`.
    pub fn with_login(login: Login) -> Self {
        Self {
            login: Mutex::new(Some(login)),
        }
    }
}

impl LoginStore for MemoryLoginStore {
    fn load(&self) -> BoxFuture<'_, Result<Option<Login>>> {
        Box::pin(async move { Ok(self.login.lock().await.clone()) })
    }

    fn save(&self, login: Login) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            *self.login.lock().await = Some(login);
            Ok(())
        })
    }

    fn clear(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            *self.login.lock().await = None;
            Ok(())
        })
    }
}

/// JSON file store.
///
/// A missing file means "no login". The Mutex serializes writes so a save
/// racing a clear can't interleave the temp-file dance.
pub struct FileLoginStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileLoginStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LoginStore for FileLoginStore {
    fn load(&self) -> BoxFuture<'_, Result<Option<Login>>> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            let contents = match tokio::fs::read_to_string(&self.path).await {
                Ok(contents) => contents,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %self.path.display(), "no stored login");
                    return Ok(None);
                }
                Err(e) => return Err(Error::Io(format!("reading login file: {e}"))),
            };
            let login: Login = serde_json::from_str(&contents)
                .map_err(|e| Error::Parse(format!("parsing login file: {e}")))?;
            info!(path = %self.path.display(), "loaded stored login");
            Ok(Some(login))
        })
    }

    fn save(&self, login: Login) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            write_atomic(&self.path, &login).await
        })
    }

    fn clear(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => {
                    info!(path = %self.path.display(), "cleared stored login");
                    Ok(())
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(Error::Io(format!("removing login file: {e}"))),
            }
        })
    }
}

/// Write a login to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Permissions are 0600 (owner read/write only) since the file
/// contains tokens.
async fn write_atomic(path: &Path, login: &Login) -> Result<()> {
    let json = serde_json::to_string_pretty(login)
        .map_err(|e| Error::Parse(format!("serializing login: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("login path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".login.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp login file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting login file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp login file: {e}")))?;

    debug!(path = %path.display(), "persisted login");
    Ok(())
}
