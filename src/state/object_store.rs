//! Backing object stores for versioned state.
//!
//! # Responsibilities
//! - Immutable versioned writes with an optional latest-version precondition
//! - Report bucket policy (encryption, public access, deletion protection)
//! - Refuse anonymous callers and whole-store deletion
//!
//! # Design Decisions
//! - Versions are numbered 1, 2, 3... per object key and never reused
//! - `FileObjectStore` creates every version with `create_new`, so an
//!   existing version file is never opened for writing again

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

/// Version identifier, strictly increasing per object key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(pub u64);

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// An immutable stored version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateVersion {
    pub version: VersionId,
    pub payload: Vec<u8>,
    pub created_at: SystemTime,
}

/// Encryption at rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Encryption {
    None,
    #[default]
    ProviderManaged,
    CustomerKey {
        key_id: String,
    },
}

/// Container-level safety settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketSettings {
    pub versioning: bool,
    pub encryption: Encryption,
    pub block_public_access: bool,
    pub deletion_protection: bool,
}

impl Default for BucketSettings {
    fn default() -> Self {
        Self {
            versioning: true,
            encryption: Encryption::ProviderManaged,
            block_public_access: true,
            deletion_protection: true,
        }
    }
}

impl BucketSettings {
    /// Every setting that makes the container unsafe for control-plane state.
    pub fn violations(&self) -> Vec<String> {
        let mut out = Vec::new();
        if !self.versioning {
            out.push("versioning must be enabled".to_string());
        }
        if self.encryption == Encryption::None {
            out.push("encryption at rest must be enabled".to_string());
        }
        if !self.block_public_access {
            out.push("public access must be blocked".to_string());
        }
        if !self.deletion_protection {
            out.push("deletion protection must be enabled".to_string());
        }
        out
    }
}

/// Caller identity presented to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Anonymous,
    Principal(String),
}

/// Write precondition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// Always append.
    None,
    /// Append only if the latest version is exactly this (`None` = empty).
    LatestIs(Option<VersionId>),
}

/// Store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("store policy violation: {}", .0.join("; "))]
    PolicyViolation(Vec<String>),

    #[error("stale write: expected latest {expected:?}, found {actual:?}")]
    StaleWrite {
        expected: Option<VersionId>,
        actual: Option<VersionId>,
    },

    #[error("version {0} not found")]
    VersionNotFound(VersionId),

    #[error("no versions stored")]
    Empty,

    #[error("store is protected against deletion")]
    DeletionProtected,

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Versioned blob storage.
pub trait ObjectStore: Send + Sync + fmt::Debug {
    fn settings(&self) -> &BucketSettings;

    fn put_version(
        &self,
        credentials: &Credentials,
        key: &str,
        payload: &[u8],
        precondition: Precondition,
    ) -> Result<VersionId, StoreError>;

    /// `None` reads the latest version.
    fn get_version(
        &self,
        credentials: &Credentials,
        key: &str,
        version: Option<VersionId>,
    ) -> Result<StateVersion, StoreError>;

    /// Ascending.
    fn list_versions(&self, credentials: &Credentials, key: &str) -> Result<Vec<VersionId>, StoreError>;

    /// Delete the whole container.
    fn destroy(&self, credentials: &Credentials) -> Result<(), StoreError>;
}

fn authorize(settings: &BucketSettings, credentials: &Credentials) -> Result<(), StoreError> {
    match credentials {
        Credentials::Anonymous if settings.block_public_access => Err(StoreError::AccessDenied(
            "anonymous access is blocked".to_string(),
        )),
        _ => Ok(()),
    }
}

fn check_precondition(
    precondition: Precondition,
    latest: Option<VersionId>,
) -> Result<(), StoreError> {
    match precondition {
        Precondition::LatestIs(expected) if expected != latest => Err(StoreError::StaleWrite {
            expected,
            actual: latest,
        }),
        _ => Ok(()),
    }
}

/// In-memory object store.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    settings: BucketSettings,
    objects: Mutex<HashMap<String, Vec<StateVersion>>>,
}

impl MemoryObjectStore {
    pub fn new(settings: BucketSettings) -> Self {
        Self {
            settings,
            objects: Mutex::new(HashMap::new()),
        }
    }
}

impl ObjectStore for MemoryObjectStore {
    fn settings(&self) -> &BucketSettings {
        &self.settings
    }

    fn put_version(
        &self,
        credentials: &Credentials,
        key: &str,
        payload: &[u8],
        precondition: Precondition,
    ) -> Result<VersionId, StoreError> {
        authorize(&self.settings, credentials)?;
        let mut objects = self.objects.lock().expect("object store mutex poisoned");
        let versions = objects.entry(key.to_string()).or_default();

        let latest = versions.last().map(|v| v.version);
        check_precondition(precondition, latest)?;

        let version = VersionId(latest.map_or(1, |v| v.0 + 1));
        versions.push(StateVersion {
            version,
            payload: payload.to_vec(),
            created_at: SystemTime::now(),
        });
        Ok(version)
    }

    fn get_version(
        &self,
        credentials: &Credentials,
        key: &str,
        version: Option<VersionId>,
    ) -> Result<StateVersion, StoreError> {
        authorize(&self.settings, credentials)?;
        let objects = self.objects.lock().expect("object store mutex poisoned");
        let versions = objects.get(key).ok_or(StoreError::Empty)?;
        match version {
            None => versions.last().cloned().ok_or(StoreError::Empty),
            Some(id) => versions
                .iter()
                .find(|v| v.version == id)
                .cloned()
                .ok_or(StoreError::VersionNotFound(id)),
        }
    }

    fn list_versions(&self, credentials: &Credentials, key: &str) -> Result<Vec<VersionId>, StoreError> {
        authorize(&self.settings, credentials)?;
        let objects = self.objects.lock().expect("object store mutex poisoned");
        Ok(objects
            .get(key)
            .map(|versions| versions.iter().map(|v| v.version).collect())
            .unwrap_or_default())
    }

    fn destroy(&self, credentials: &Credentials) -> Result<(), StoreError> {
        authorize(&self.settings, credentials)?;
        if self.settings.deletion_protection {
            return Err(StoreError::DeletionProtected);
        }
        self.objects.lock().expect("object store mutex poisoned").clear();
        Ok(())
    }
}

/// Directory-backed object store: `<root>/<key>/<version>.bin`.
#[derive(Debug)]
pub struct FileObjectStore {
    root: PathBuf,
    settings: BucketSettings,
    write_lock: Mutex<()>,
}

impl FileObjectStore {
    pub fn open(root: impl Into<PathBuf>, settings: BucketSettings) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        tracing::info!(path = ?root, "Opened file object store");
        Ok(Self {
            root,
            settings,
            write_lock: Mutex::new(()),
        })
    }

    fn key_dir(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key != "."
            && key != ".."
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }

    fn version_path(dir: &Path, version: VersionId) -> PathBuf {
        dir.join(format!("{:020}.bin", version.0))
    }

    fn scan(dir: &Path) -> Result<Vec<VersionId>, StoreError> {
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut versions = Vec::new();
        for entry in fs::read_dir(dir)? {
            let name = entry?.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".bin")) else {
                continue;
            };
            if let Ok(n) = stem.parse::<u64>() {
                versions.push(VersionId(n));
            }
        }
        versions.sort();
        Ok(versions)
    }
}

impl ObjectStore for FileObjectStore {
    fn settings(&self) -> &BucketSettings {
        &self.settings
    }

    fn put_version(
        &self,
        credentials: &Credentials,
        key: &str,
        payload: &[u8],
        precondition: Precondition,
    ) -> Result<VersionId, StoreError> {
        authorize(&self.settings, credentials)?;
        let dir = self.key_dir(key)?;
        let _guard = self.write_lock.lock().expect("file store mutex poisoned");
        fs::create_dir_all(&dir)?;

        let latest = Self::scan(&dir)?.last().copied();
        check_precondition(precondition, latest)?;

        let version = VersionId(latest.map_or(1, |v| v.0 + 1));
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(Self::version_path(&dir, version))?;
        file.write_all(payload)?;
        file.sync_all()?;
        Ok(version)
    }

    fn get_version(
        &self,
        credentials: &Credentials,
        key: &str,
        version: Option<VersionId>,
    ) -> Result<StateVersion, StoreError> {
        authorize(&self.settings, credentials)?;
        let dir = self.key_dir(key)?;
        let version = match version {
            Some(v) => v,
            None => *Self::scan(&dir)?.last().ok_or(StoreError::Empty)?,
        };

        let path = Self::version_path(&dir, version);
        if !path.exists() {
            return Err(StoreError::VersionNotFound(version));
        }
        let payload = fs::read(&path)?;
        let created_at = fs::metadata(&path)?.modified()?;
        Ok(StateVersion {
            version,
            payload,
            created_at,
        })
    }

    fn list_versions(&self, credentials: &Credentials, key: &str) -> Result<Vec<VersionId>, StoreError> {
        authorize(&self.settings, credentials)?;
        Self::scan(&self.key_dir(key)?)
    }

    fn destroy(&self, credentials: &Credentials) -> Result<(), StoreError> {
        authorize(&self.settings, credentials)?;
        if self.settings.deletion_protection {
            return Err(StoreError::DeletionProtected);
        }
        fs::remove_dir_all(&self.root)?;
        Ok(())
    }
}
