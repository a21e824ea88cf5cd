//! Request fingerprints
//!
//! A fingerprint is the Base64-encoded SHA-256 digest of a canonical string
//! built from a request's semantic fields. It is the deduplication key for
//! the result cache, so it must be a pure function of those fields: the same
//! semantic input produces the same digest on every call and every host, and
//! transport identity (client connection, target server) never participates.
//!
//! # Canonical string
//!
//! ```text
//! {filters}.{slices}.{values}.{custom_members}.{custom_sets}.{model}.{target}.{format}.{default_measure}
//! ```
//!
//! Array fields are joined with `#`. Absent arrays count as empty, except
//! `values`, whose absence is a caller error.

use crate::error::{Error, Result};
use crate::request::{LaunchRequest, MetadataRequest, QueryRequest};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Opaque Base64 SHA-256 digest of a request's semantic fields
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint any request kind
    pub fn of<R: Fingerprinted + ?Sized>(request: &R) -> Result<Self> {
        request.fingerprint()
    }

    /// Digest an already-built canonical string
    pub fn from_canonical(canonical: &str) -> Self {
        Fingerprint(hash_text(canonical))
    }

    /// Borrow the digest text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// SHA-256 of the UTF-8 bytes of `text`, standard Base64 with padding
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Requests that can be reduced to a deduplication key
pub trait Fingerprinted {
    /// Canonical string the digest is computed over
    fn canonical_string(&self) -> Result<String>;

    /// Digest of [`Fingerprinted::canonical_string`]
    fn fingerprint(&self) -> Result<Fingerprint> {
        Ok(Fingerprint::from_canonical(&self.canonical_string()?))
    }
}

fn join(parts: Option<&[String]>) -> String {
    parts.map(|p| p.join("#")).unwrap_or_default()
}

impl Fingerprinted for QueryRequest {
    fn canonical_string(&self) -> Result<String> {
        let values = self.values.as_deref().ok_or(Error::MissingField("values"))?;

        Ok(format!(
            "{}.{}.{}.{}.{}.{}.{}.{}.{}",
            join(self.filters.as_deref()),
            join(self.slices.as_deref()),
            values.join("#"),
            join(self.custom_members.as_deref()),
            join(self.custom_sets.as_deref()),
            self.model_name.as_deref().unwrap_or_default(),
            self.compilation_target.name(),
            self.output_format.code(),
            self.default_measure.as_deref().unwrap_or_default(),
        ))
    }
}

impl Fingerprinted for LaunchRequest {
    fn canonical_string(&self) -> Result<String> {
        let ctx = &self.context;
        Ok(format!(
            "{}.{}",
            ctx.unique_client_identifier.as_deref().unwrap_or_default(),
            ctx.request_metadata.as_deref().unwrap_or_default(),
        ))
    }
}

impl Fingerprinted for MetadataRequest {
    fn canonical_string(&self) -> Result<String> {
        let ctx = &self.context;
        Ok(format!(
            "{}.{}.{}.{}.{}",
            ctx.resource_group.as_deref().unwrap_or_default(),
            ctx.region.as_deref().unwrap_or_default(),
            ctx.target_server.as_deref().unwrap_or_default(),
            ctx.target_database.as_deref().unwrap_or_default(),
            ctx.request_metadata.as_deref().unwrap_or_default(),
        ))
    }
}
