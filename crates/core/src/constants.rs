//! Scoring thresholds, fixed confidences and reason texts used by the resolution engine.
//!
//! The confidence values are tied to action buckets, not derived from match scores; callers
//! read them as-is.

/// Minimum aggregated score for an exact match (block).
pub const EXACT_MATCH_THRESHOLD: u8 = 90;

/// Minimum aggregated score for a potential match (warn).
pub const POTENTIAL_MATCH_THRESHOLD: u8 = 70;

/// Score assigned by the exact-identifier rules.
pub const EXACT_IDENTIFIER_SCORE: u8 = 100;

/// Similarity returned when one string contains the other.
pub const CONTAINS_SIMILARITY: u8 = 80;

/// Component gate for the name + date-of-birth rule.
pub const NAME_DOB_COMPONENT_GATE: u8 = 80;
pub const NAME_DOB_NAME_WEIGHT: f64 = 0.6;
pub const NAME_DOB_DOB_WEIGHT: f64 = 0.4;

/// Component gate for the name + phone rule.
pub const NAME_PHONE_COMPONENT_GATE: u8 = 70;
pub const NAME_PHONE_NAME_WEIGHT: f64 = 0.5;
pub const NAME_PHONE_PHONE_WEIGHT: f64 = 0.5;

/// Phone similarity at or above which the phone rule reports "very similar".
pub const VERY_SIMILAR_PHONE: u8 = 90;

pub const CONFIDENCE_BLOCK: u8 = 95;
pub const CONFIDENCE_WARN: u8 = 70;
/// "Absence of evidence", not evidence of absence.
pub const CONFIDENCE_ALLOW: u8 = 10;
/// Confidence of the fail-open default returned when a check cannot complete.
pub const CONFIDENCE_FAILED: u8 = 0;

/// Leading country code stripped from phone numbers.
pub const PHONE_COUNTRY_CODE: &str = "91";

/// Digits used for the phone prefix and suffix blocking keys.
pub const PHONE_BLOCK_DIGITS: usize = 5;

pub const DEFAULT_CANDIDATE_WINDOW: usize = 10;
pub const DEFAULT_EXACT_LOOKUP_LIMIT: usize = 5;
pub const DEFAULT_NATIONAL_ID_LENGTH: usize = 12;

/// Principal recorded when no acting user is supplied.
pub const SYSTEM_ACTOR: &str = "system";
pub const MAX_ACTOR_LEN: usize = 128;

pub const REASON_NATIONAL_ID: &str = "Exact national-ID match";
pub const REASON_HEALTH_ACCOUNT: &str = "Exact health-account match";
pub const REASON_PHONE_EXACT: &str = "Exact phone number match";
pub const REASON_PHONE_VERY_SIMILAR: &str = "Very similar phone number";
pub const REASON_PHONE_SIMILAR: &str = "Similar phone number";

/// Default directory for the file-backed store when none is configured.
pub const DEFAULT_PATIENT_DATA_DIR: &str = "patient_data";

/// Directory name for patient records inside the data directory.
pub const PATIENTS_DIR_NAME: &str = "patients";

/// Directory name for merge audit rows inside the data directory.
pub const MERGE_AUDIT_DIR_NAME: &str = "merge_audit";
pub const PENDING_DIR_NAME: &str = "pending";
pub const COMMITTED_DIR_NAME: &str = "committed";

/// Filename for patient YAML files.
pub const PATIENT_YAML_FILENAME: &str = "patient.yaml";

/// Length of a local-format phone number; prefixes are only stripped from longer inputs.
pub const LOCAL_PHONE_DIGITS: usize = 10;
