//! Append-only versioned state store.

use std::sync::Arc;

use crate::state::object_store::{
    Credentials, ObjectStore, Precondition, StateVersion, StoreError, VersionId,
};

/// Append-only view over one object key of a backing [`ObjectStore`].
#[derive(Debug, Clone)]
pub struct VersionedStateStore {
    backend: Arc<dyn ObjectStore>,
    credentials: Credentials,
    key: String,
}

impl VersionedStateStore {
    /// Open the store, failing closed on any unsafe container setting or
    /// unauthenticated credentials.
    pub fn open(
        backend: Arc<dyn ObjectStore>,
        credentials: Credentials,
        key: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let mut violations = backend.settings().violations();
        if credentials == Credentials::Anonymous {
            violations.push("credentials must be authenticated".to_string());
        }
        if !violations.is_empty() {
            tracing::error!(violations = ?violations, "Refusing to open state store");
            return Err(StoreError::PolicyViolation(violations));
        }

        Ok(Self {
            backend,
            credentials,
            key: key.into(),
        })
    }

    /// Append a new version. Never overwrites.
    pub fn put(&self, payload: &[u8]) -> Result<VersionId, StoreError> {
        self.backend
            .put_version(&self.credentials, &self.key, payload, Precondition::None)
    }

    /// Append only if the latest version is still `expected`.
    pub fn put_expecting(
        &self,
        expected: Option<VersionId>,
        payload: &[u8],
    ) -> Result<VersionId, StoreError> {
        self.backend.put_version(
            &self.credentials,
            &self.key,
            payload,
            Precondition::LatestIs(expected),
        )
    }

    /// Read a version; `None` reads the latest.
    pub fn get(&self, version: Option<VersionId>) -> Result<StateVersion, StoreError> {
        self.backend.get_version(&self.credentials, &self.key, version)
    }

    /// Latest version, or `None` for an empty store.
    pub fn latest(&self) -> Result<Option<StateVersion>, StoreError> {
        match self.get(None) {
            Ok(v) => Ok(Some(v)),
            Err(StoreError::Empty) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// All version ids, ascending.
    pub fn list_versions(&self) -> Result<Vec<VersionId>, StoreError> {
        self.backend.list_versions(&self.credentials, &self.key)
    }
}
