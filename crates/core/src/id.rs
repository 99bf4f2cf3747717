//! Job identifiers.

use core::str::FromStr;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Identifier of a queued upload.
///
/// Supplied by the caller. The same value names the record and payload files
/// on disk and is sent to the remote sink as the idempotency key, so it must
/// be a plain file name: non-empty, no path separators, no control
/// characters, no leading `.`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Longest accepted identifier, in bytes.
    ///
    /// Leaves room under the common 255-byte file name limit for the record
    /// extension and temp-file decoration.
    pub const MAX_LEN: usize = 200;

    /// Validate and wrap a caller-supplied identifier.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        validate(&id)?;
        Ok(Self(id))
    }

    /// Generate a fresh identifier.
    ///
    /// Uses UUIDv7 so generated ids sort by creation time.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

fn validate(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() {
        return Err(ValidationError::EmptyId);
    }
    if id.len() > JobId::MAX_LEN {
        return Err(ValidationError::IdTooLong {
            len: id.len(),
            max: JobId::MAX_LEN,
        });
    }
    if id.starts_with('.') {
        return Err(ValidationError::unsafe_id(id, "leading '.'"));
    }
    if id.contains(['/', '\\']) {
        return Err(ValidationError::unsafe_id(id, "path separator"));
    }
    if id.chars().any(char::is_control) {
        return Err(ValidationError::unsafe_id(id, "control character"));
    }
    Ok(())
}

impl core::fmt::Display for JobId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for JobId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for JobId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for JobId {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<JobId> for String {
    fn from(value: JobId) -> Self {
        value.0
    }
}

// Records read back from disk go through the same validation as caller input.
impl<'de> Deserialize<'de> for JobId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        JobId::new(raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn accepts_plain_names() {
        assert!(JobId::new("IMG_0001.heic").is_ok());
        assert!(JobId::new("a").is_ok());
        assert!(JobId::new("photo 2024-01-01").is_ok());
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(JobId::new(""), Err(ValidationError::EmptyId));
    }

    #[test]
    fn rejects_path_tricks() {
        for bad in [".", "..", ".hidden", "a/b", "a\\b", "../etc", "nul\0byte", "tab\tname"] {
            assert!(
                matches!(JobId::new(bad), Err(ValidationError::UnsafeId { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_overlong() {
        let id = "x".repeat(JobId::MAX_LEN + 1);
        assert!(matches!(
            JobId::new(id),
            Err(ValidationError::IdTooLong { .. })
        ));
        assert!(JobId::new("x".repeat(JobId::MAX_LEN)).is_ok());
    }

    #[test]
    fn generated_ids_are_valid_and_distinct() {
        let a = JobId::generate();
        let b = JobId::generate();
        assert_ne!(a, b);
        assert!(JobId::new(a.as_str()).is_ok());
    }

    #[test]
    fn deserialize_validates() {
        let ok: JobId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(ok.as_str(), "abc");
        assert!(serde_json::from_str::<JobId>("\"../x\"").is_err());
    }

    proptest! {
        #[test]
        fn accepted_ids_are_single_path_components(s in "\\PC{0,64}") {
            if let Ok(id) = JobId::new(s.clone()) {
                let path = std::path::Path::new(id.as_str());
                prop_assert_eq!(path.components().count(), 1);
                prop_assert!(matches!(
                    path.components().next(),
                    Some(std::path::Component::Normal(_))
                ));
                prop_assert_eq!(id.to_string(), s);
            }
        }
    }
}
