//! Canonical identifier newtypes.

use crate::{UuidError, UuidResult};
use std::path::{Path, PathBuf};
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// Returns true if `input` is exactly 32 lowercase hex characters.
fn is_canonical(input: &str) -> bool {
    input.len() == 32
        && input
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

macro_rules! canonical_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Uuid);

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl $name {
            /// Allocates a fresh random (v4) identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parses an identifier that must already be in canonical form.
            ///
            /// # Errors
            ///
            /// Returns [`UuidError::InvalidInput`] if `input` is not 32 lowercase hex characters.
            pub fn parse(input: &str) -> UuidResult<Self> {
                if !is_canonical(input) {
                    return Err(UuidError::InvalidInput(format!(
                        "{} must be 32 lowercase hex characters without hyphens, got: '{}'",
                        $label, input
                    )));
                }
                Uuid::parse_str(input)
                    .map(Self)
                    .map_err(|e| UuidError::InvalidInput(e.to_string()))
            }

            /// Returns `parent_dir/<s1>/<s2>/<id>/` where `s1`/`s2` are the first two pairs of
            /// hex characters of the id.
            pub fn sharded_dir(&self, parent_dir: &Path) -> PathBuf {
                let canonical = self.to_string();
                parent_dir
                    .join(&canonical[0..2])
                    .join(&canonical[2..4])
                    .join(&canonical)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0.simple())
            }
        }

        impl FromStr for $name {
            type Err = UuidError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        #[cfg(feature = "serde")]
        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.collect_str(self)
            }
        }

        #[cfg(feature = "serde")]
        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::parse(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

canonical_id!(
    /// Store identifier of a patient record.
    ///
    /// Ordering is the byte order of the UUID; the merge lock table relies on it to acquire
    /// locks for an identifier set in a stable order.
    PatientId,
    "patient id"
);

canonical_id!(
    /// Identifier of one audited merge operation.
    MergeId,
    "merge id"
);
