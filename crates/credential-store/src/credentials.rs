//! Credential records and the in-memory store
//!
//! The store is an ordered list of records keyed by identifier. Order is the
//! order the medium returned them in and is preserved on save, so a
//! hand-edited accounts file keeps its layout across batches.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use common::Secret;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::medium::StoreMedium;

/// A single account's credential.
///
/// Fields are private: the secret and `last_rotated_at` only change through
/// [`crate::rotate`]. The legacy `username`/`password` field names are
/// accepted when reading older account files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRecord {
    #[serde(alias = "username")]
    identifier: String,
    #[serde(alias = "password")]
    secret: Secret<String>,
    #[serde(default)]
    last_rotated_at: Option<DateTime<Utc>>,
}

impl CredentialRecord {
    /// Create a record that has never been rotated.
    pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            secret: Secret::new(secret.into()),
            last_rotated_at: None,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn secret(&self) -> &Secret<String> {
        &self.secret
    }

    pub fn last_rotated_at(&self) -> Option<DateTime<Utc>> {
        self.last_rotated_at
    }

    pub(crate) fn set_secret(&mut self, secret: Secret<String>, rotated_at: DateTime<Utc>) {
        self.secret = secret;
        self.last_rotated_at = Some(rotated_at);
    }
}

/// Ordered set of credential records with unique identifiers.
///
/// The store itself holds no lock. During a dispatch the records are moved
/// out with [`take_records`](Self::take_records), each into its own task, and
/// moved back with [`restore_records`](Self::restore_records) before the
/// single save.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    records: Vec<CredentialRecord>,
}

impl CredentialStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from records, rejecting empty or duplicate identifiers.
    pub fn from_records(records: Vec<CredentialRecord>) -> Result<Self> {
        validate(&records)?;
        Ok(Self { records })
    }

    /// Load every record from the medium.
    ///
    /// A missing source yields an empty store. A source that exists but does
    /// not parse, or that holds empty or duplicate identifiers, is
    /// `CorruptStore`.
    pub async fn load(medium: &dyn StoreMedium) -> Result<Self> {
        let records = medium.load().await?;
        validate(&records).map_err(|e| Error::CorruptStore {
            location: medium.location(),
            reason: e.to_string(),
        })?;
        info!(
            location = %medium.location(),
            accounts = records.len(),
            "loaded credential store"
        );
        Ok(Self { records })
    }

    /// Persist every record to the medium as one atomic unit.
    pub async fn save(&self, medium: &dyn StoreMedium) -> Result<()> {
        medium.save(&self.records).await?;
        debug!(
            location = %medium.location(),
            accounts = self.records.len(),
            "persisted credential store"
        );
        Ok(())
    }

    /// Append a record. Fails if the identifier is empty or already present.
    pub fn insert(&mut self, record: CredentialRecord) -> Result<()> {
        if record.identifier.is_empty() {
            return Err(Error::EmptyIdentifier);
        }
        if self.get(&record.identifier).is_some() {
            return Err(Error::DuplicateIdentifier(record.identifier));
        }
        self.records.push(record);
        Ok(())
    }

    /// Look up a record by identifier.
    pub fn get(&self, identifier: &str) -> Option<&CredentialRecord> {
        self.records.iter().find(|r| r.identifier == identifier)
    }

    /// All records in store order.
    pub fn records(&self) -> &[CredentialRecord] {
        &self.records
    }

    /// All identifiers in store order.
    pub fn identifiers(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.identifier.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Move every record out, leaving the store empty.
    pub fn take_records(&mut self) -> Vec<CredentialRecord> {
        std::mem::take(&mut self.records)
    }

    /// Put records back after a dispatch. Validates like `from_records`.
    pub fn restore_records(&mut self, records: Vec<CredentialRecord>) -> Result<()> {
        validate(&records)?;
        self.records = records;
        Ok(())
    }
}

fn validate(records: &[CredentialRecord]) -> Result<()> {
    let mut seen = HashSet::with_capacity(records.len());
    for record in records {
        if record.identifier.is_empty() {
            return Err(Error::EmptyIdentifier);
        }
        if !seen.insert(record.identifier.as_str()) {
            return Err(Error::DuplicateIdentifier(record.identifier.clone()));
        }
    }
    Ok(())
}
