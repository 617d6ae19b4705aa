//! Patient records as the resolution engine sees them.
//!
//! A [`PatientDraft`] is the transient input of a duplicate check; a [`StoredPatient`] is a
//! persisted identity owned by the record store. The engine only reads stored patients, except
//! for the merge path which asks the store to mark duplicates as merged.

use crate::constants::{MAX_ACTOR_LEN, SYSTEM_ACTOR};
use crate::{MpiError, MpiResult};
use chrono::{DateTime, NaiveDate, Utc};
use mpi_uuid::PatientId;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
    Unknown,
}

/// Demographics submitted for a duplicate check.
///
/// `id` is set when an existing record is being re-checked; that record is then excluded from
/// every candidate search.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PatientDraft {
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub id: Option<PatientId>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub national_id: Option<String>,
    #[serde(default)]
    pub health_account_id: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub gender: Option<Gender>,
}

impl PatientDraft {
    /// Rejects drafts that carry nothing a rule could search on.
    ///
    /// # Errors
    ///
    /// Returns `MpiError::InvalidInput` if first name, phone, national ID and health-account ID
    /// are all blank.
    pub fn validate(&self) -> MpiResult<()> {
        let blank = |s: &str| s.trim().is_empty();
        let searchable = !blank(&self.first_name)
            || !blank(&self.phone)
            || self.national_id.as_deref().is_some_and(|v| !blank(v))
            || self.health_account_id.as_deref().is_some_and(|v| !blank(v));

        if !searchable {
            return Err(MpiError::InvalidInput(
                "draft needs at least one of first_name, phone, national_id or health_account_id"
                    .into(),
            ));
        }
        Ok(())
    }

    /// National ID, if present and non-blank.
    pub fn national_id(&self) -> Option<&str> {
        self.national_id.as_deref().map(str::trim).filter(|v| !v.is_empty())
    }

    /// Health-account ID, if present and non-blank.
    pub fn health_account_id(&self) -> Option<&str> {
        self.health_account_id
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

/// Lifecycle of a stored identity. `Merged` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatientStatus {
    Active,
    Merged { into: PatientId },
}

/// A persisted patient identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StoredPatient {
    #[schema(value_type = String)]
    pub id: PatientId,
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub national_id: Option<String>,
    #[serde(default)]
    pub health_account_id: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub gender: Option<Gender>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_visit: Option<DateTime<Utc>>,
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub merged_into: Option<PatientId>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

impl StoredPatient {
    /// Builds a new live record from a draft, allocating an id unless the draft carries one.
    pub fn from_draft(draft: &PatientDraft, created_at: DateTime<Utc>) -> Self {
        Self {
            id: draft.id.unwrap_or_default(),
            first_name: draft.first_name.trim().to_string(),
            last_name: draft.last_name.trim().to_string(),
            phone: draft.phone.trim().to_string(),
            national_id: draft.national_id().map(str::to_string),
            health_account_id: draft.health_account_id().map(str::to_string),
            date_of_birth: draft.date_of_birth,
            gender: draft.gender,
            created_at,
            last_visit: None,
            merged_into: None,
            is_active: true,
            updated_at: None,
        }
    }

    pub fn status(&self) -> PatientStatus {
        match self.merged_into {
            Some(into) => PatientStatus::Merged { into },
            None => PatientStatus::Active,
        }
    }

    pub fn is_merged(&self) -> bool {
        self.merged_into.is_some()
    }

    /// Applies the `Active -> Merged` transition.
    pub(crate) fn mark_merged(&mut self, primary: PatientId, at: DateTime<Utc>) {
        self.merged_into = Some(primary);
        self.is_active = false;
        self.updated_at = Some(at);
    }
}

/// The principal a merge is recorded against.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "String", into = "String")]
#[schema(value_type = String)]
pub struct Actor(String);

impl Actor {
    /// # Errors
    ///
    /// Returns `MpiError::InvalidInput` if the trimmed name is empty, longer than
    /// `MAX_ACTOR_LEN` characters, or contains control characters.
    pub fn new(input: impl AsRef<str>) -> MpiResult<Self> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(MpiError::InvalidInput("actor cannot be empty".into()));
        }
        if trimmed.chars().count() > MAX_ACTOR_LEN {
            return Err(MpiError::InvalidInput(format!(
                "actor exceeds maximum length of {} characters",
                MAX_ACTOR_LEN
            )));
        }
        if trimmed.chars().any(char::is_control) {
            return Err(MpiError::InvalidInput(
                "actor must not contain control characters".into(),
            ));
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn system() -> Self {
        Self(SYSTEM_ACTOR.to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Actor {
    type Error = MpiError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Actor::new(value)
    }
}

impl From<Actor> for String {
    fn from(actor: Actor) -> Self {
        actor.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_empty_draft() {
        let draft = PatientDraft {
            last_name: "Only".into(),
            ..Default::default()
        };
        assert!(matches!(draft.validate(), Err(MpiError::InvalidInput(_))));
    }

    #[test]
    fn test_validate_accepts_identifier_only_draft() {
        let draft = PatientDraft {
            national_id: Some("123456789012".into()),
            ..Default::default()
        };
        assert!(draft.validate().is_ok());
    }

    #[test]
    fn test_blank_identifiers_read_as_absent() {
        let draft = PatientDraft {
            national_id: Some("   ".into()),
            health_account_id: Some(" abc ".into()),
            ..Default::default()
        };
        assert_eq!(draft.national_id(), None);
        assert_eq!(draft.health_account_id(), Some("abc"));
    }

    #[test]
    fn test_mark_merged_is_terminal_status() {
        let draft = PatientDraft {
            first_name: "Jane".into(),
            ..Default::default()
        };
        let mut patient = StoredPatient::from_draft(&draft, Utc::now());
        assert_eq!(patient.status(), PatientStatus::Active);
        assert!(patient.is_active);

        let primary = PatientId::new();
        patient.mark_merged(primary, Utc::now());

        assert_eq!(patient.status(), PatientStatus::Merged { into: primary });
        assert!(!patient.is_active);
        assert!(patient.updated_at.is_some());
    }

    #[test]
    fn test_draft_deserialises_with_missing_fields() {
        let draft: PatientDraft =
            serde_json::from_str(r#"{"first_name":"Jane","date_of_birth":"1990-04-01"}"#)
                .expect("draft should deserialise");
        assert_eq!(draft.first_name, "Jane");
        assert_eq!(draft.phone, "");
        assert_eq!(
            draft.date_of_birth,
            NaiveDate::from_ymd_opt(1990, 4, 1)
        );
    }

    #[test]
    fn test_actor_validation() {
        assert_eq!(Actor::new("  dr.smith ").unwrap().as_str(), "dr.smith");
        assert!(Actor::new("   ").is_err());
        assert!(Actor::new("a".repeat(MAX_ACTOR_LEN + 1)).is_err());
        assert!(Actor::new("bad\nname").is_err());
        assert_eq!(Actor::system().as_str(), "system");
    }

    #[test]
    fn test_actor_serde_validates() {
        let ok: Actor = serde_json::from_str("\"registrar\"").unwrap();
        assert_eq!(ok.as_str(), "registrar");
        assert!(serde_json::from_str::<Actor>("\"\"").is_err());
    }
}
