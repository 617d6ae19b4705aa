//! The five match rules.
//!
//! Each rule is side-effect free: it queries the store, scores what comes back and returns
//! zero or more [`MatchCandidate`]s. A failed store query makes that rule contribute nothing;
//! the failure is logged and the check carries on with the other rules.
//!
//! The fuzzy rules gate every component before weighting it, so one strong partial match
//! cannot carry a weak one over the threshold.

use crate::config::{CandidateStrategy, MatchConfig};
use crate::constants::{
    EXACT_IDENTIFIER_SCORE, NAME_DOB_COMPONENT_GATE, NAME_DOB_DOB_WEIGHT, NAME_DOB_NAME_WEIGHT,
    NAME_PHONE_COMPONENT_GATE, NAME_PHONE_NAME_WEIGHT, NAME_PHONE_PHONE_WEIGHT,
    POTENTIAL_MATCH_THRESHOLD, REASON_HEALTH_ACCOUNT, REASON_NATIONAL_ID, REASON_PHONE_EXACT,
    REASON_PHONE_SIMILAR, REASON_PHONE_VERY_SIMILAR, VERY_SIMILAR_PHONE,
};
use crate::error::StoreResult;
use crate::patient::{PatientDraft, StoredPatient};
use crate::similarity::{normalise_phone, string_similarity};
use crate::store::{blocking_keys, CandidateIndex, ExactField, RecordStore};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MatchRule {
    NationalId,
    HealthAccount,
    Phone,
    NameAndDateOfBirth,
    NameAndPhone,
}

impl fmt::Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MatchRule::NationalId => "national_id",
            MatchRule::HealthAccount => "health_account",
            MatchRule::Phone => "phone",
            MatchRule::NameAndDateOfBirth => "name_dob",
            MatchRule::NameAndPhone => "name_phone",
        };
        f.write_str(name)
    }
}

/// One rule's opinion about one stored patient.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchCandidate {
    pub patient: StoredPatient,
    pub score: u8,
    pub reasons: Vec<String>,
    pub rule: MatchRule,
}

impl MatchCandidate {
    fn new(patient: StoredPatient, score: u8, reasons: Vec<String>, rule: MatchRule) -> Self {
        Self {
            patient,
            score: score.min(100),
            reasons,
            rule,
        }
    }
}

fn weighted(score: f64) -> u8 {
    score.round().clamp(0.0, 100.0) as u8
}

fn name_similarity(draft: &PatientDraft, patient: &StoredPatient) -> u8 {
    string_similarity(&draft.first_name, &patient.first_name)
        .max(string_similarity(&draft.last_name, &patient.last_name))
}

/// Scores a stored patient on phone similarity alone.
pub fn score_phone(normalised_phone: &str, patient: &StoredPatient) -> Option<MatchCandidate> {
    let candidate_phone = normalise_phone(&patient.phone);
    if normalised_phone.is_empty() || candidate_phone.is_empty() {
        return None;
    }

    let similarity = string_similarity(normalised_phone, &candidate_phone);
    if similarity < POTENTIAL_MATCH_THRESHOLD {
        return None;
    }

    let reason = match similarity {
        100 => REASON_PHONE_EXACT,
        s if s >= VERY_SIMILAR_PHONE => REASON_PHONE_VERY_SIMILAR,
        _ => REASON_PHONE_SIMILAR,
    };

    Some(MatchCandidate::new(
        patient.clone(),
        similarity,
        vec![reason.to_string()],
        MatchRule::Phone,
    ))
}

/// Scores a stored patient on name (60%) and date of birth (40%), each gated at 80.
pub fn score_name_and_dob(draft: &PatientDraft, patient: &StoredPatient) -> Option<MatchCandidate> {
    let mut score = 0.0;
    let mut reasons = Vec::new();

    let name = name_similarity(draft, patient);
    if name >= NAME_DOB_COMPONENT_GATE {
        score += f64::from(name) * NAME_DOB_NAME_WEIGHT;
        reasons.push(format!("Name similarity: {}%", name));
    }

    if let (Some(draft_dob), Some(patient_dob)) = (draft.date_of_birth, patient.date_of_birth) {
        let dob = string_similarity(
            &draft_dob.format("%Y-%m-%d").to_string(),
            &patient_dob.format("%Y-%m-%d").to_string(),
        );
        if dob >= NAME_DOB_COMPONENT_GATE {
            score += f64::from(dob) * NAME_DOB_DOB_WEIGHT;
            reasons.push(format!("Date of birth match: {}%", dob));
        }
    }

    let score = weighted(score);
    (score >= POTENTIAL_MATCH_THRESHOLD).then(|| {
        MatchCandidate::new(patient.clone(), score, reasons, MatchRule::NameAndDateOfBirth)
    })
}

/// Scores a stored patient on name (50%) and phone (50%), each gated at 70.
pub fn score_name_and_phone(
    draft: &PatientDraft,
    normalised_phone: &str,
    patient: &StoredPatient,
) -> Option<MatchCandidate> {
    let mut score = 0.0;
    let mut reasons = Vec::new();

    let name = name_similarity(draft, patient);
    if name >= NAME_PHONE_COMPONENT_GATE {
        score += f64::from(name) * NAME_PHONE_NAME_WEIGHT;
        reasons.push(format!("Name similarity: {}%", name));
    }

    let candidate_phone = normalise_phone(&patient.phone);
    if !candidate_phone.is_empty() {
        let phone = string_similarity(normalised_phone, &candidate_phone);
        if phone >= NAME_PHONE_COMPONENT_GATE {
            score += f64::from(phone) * NAME_PHONE_PHONE_WEIGHT;
            reasons.push(format!("Phone similarity: {}%", phone));
        }
    }

    let score = weighted(score);
    (score >= POTENTIAL_MATCH_THRESHOLD)
        .then(|| MatchCandidate::new(patient.clone(), score, reasons, MatchRule::NameAndPhone))
}

/// Logs a failed rule query and turns it into "no candidates".
fn soft_fail<T>(rule: MatchRule, result: StoreResult<Vec<T>>) -> Vec<T> {
    result.unwrap_or_else(|e| {
        tracing::warn!(%rule, error = %e, "match rule query failed; rule contributes no candidates");
        Vec::new()
    })
}

async fn exact_rule<S>(
    store: &S,
    cfg: &MatchConfig,
    draft: &PatientDraft,
    field: ExactField,
    value: &str,
    rule: MatchRule,
    reason: &str,
) -> Vec<MatchCandidate>
where
    S: RecordStore + ?Sized,
{
    let found = soft_fail(rule, store.find_by_exact_field(field, value, draft.id).await);
    found
        .into_iter()
        .take(cfg.exact_lookup_limit())
        .map(|p| MatchCandidate::new(p, EXACT_IDENTIFIER_SCORE, vec![reason.to_string()], rule))
        .collect()
}

/// Exact national-ID rule. Only fires for IDs of the configured length.
pub async fn national_id_rule<S>(store: &S, cfg: &MatchConfig, draft: &PatientDraft) -> Vec<MatchCandidate>
where
    S: RecordStore + ?Sized,
{
    let Some(national_id) = draft.national_id() else {
        return Vec::new();
    };
    if national_id.chars().count() != cfg.national_id_length() {
        return Vec::new();
    }
    exact_rule(
        store,
        cfg,
        draft,
        ExactField::NationalId,
        national_id,
        MatchRule::NationalId,
        REASON_NATIONAL_ID,
    )
    .await
}

/// Exact health-account rule.
pub async fn health_account_rule<S>(store: &S, cfg: &MatchConfig, draft: &PatientDraft) -> Vec<MatchCandidate>
where
    S: RecordStore + ?Sized,
{
    let Some(account) = draft.health_account_id() else {
        return Vec::new();
    };
    exact_rule(
        store,
        cfg,
        draft,
        ExactField::HealthAccountId,
        account,
        MatchRule::HealthAccount,
        REASON_HEALTH_ACCOUNT,
    )
    .await
}

/// Fetches the candidate pool for a fuzzy rule per the configured strategy.
async fn fuzzy_pool<S>(
    store: &S,
    cfg: &MatchConfig,
    draft: &PatientDraft,
    rule: MatchRule,
) -> Vec<StoredPatient>
where
    S: RecordStore + CandidateIndex + ?Sized,
{
    let result = match cfg.candidate_strategy() {
        CandidateStrategy::BoundedScan => {
            store.list_candidates(draft.id, cfg.candidate_window()).await
        }
        CandidateStrategy::Blocking => {
            let keys = blocking_keys(draft);
            if keys.is_empty() {
                return Vec::new();
            }
            store
                .indexed_candidates(&keys, draft.id, cfg.candidate_window())
                .await
        }
    };
    soft_fail(rule, result)
}

/// Phone rule.
pub async fn phone_rule<S>(store: &S, cfg: &MatchConfig, draft: &PatientDraft) -> Vec<MatchCandidate>
where
    S: RecordStore + CandidateIndex + ?Sized,
{
    let phone = normalise_phone(&draft.phone);
    if phone.is_empty() {
        return Vec::new();
    }
    fuzzy_pool(store, cfg, draft, MatchRule::Phone)
        .await
        .iter()
        .filter_map(|p| score_phone(&phone, p))
        .collect()
}

/// Name + date-of-birth rule.
pub async fn name_and_dob_rule<S>(store: &S, cfg: &MatchConfig, draft: &PatientDraft) -> Vec<MatchCandidate>
where
    S: RecordStore + CandidateIndex + ?Sized,
{
    if draft.first_name.trim().is_empty() || draft.date_of_birth.is_none() {
        return Vec::new();
    }
    fuzzy_pool(store, cfg, draft, MatchRule::NameAndDateOfBirth)
        .await
        .iter()
        .filter_map(|p| score_name_and_dob(draft, p))
        .collect()
}

/// Name + phone rule.
pub async fn name_and_phone_rule<S>(store: &S, cfg: &MatchConfig, draft: &PatientDraft) -> Vec<MatchCandidate>
where
    S: RecordStore + CandidateIndex + ?Sized,
{
    let phone = normalise_phone(&draft.phone);
    if draft.first_name.trim().is_empty() || phone.is_empty() {
        return Vec::new();
    }
    fuzzy_pool(store, cfg, draft, MatchRule::NameAndPhone)
        .await
        .iter()
        .filter_map(|p| score_name_and_phone(draft, &phone, p))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    fn stored(first: &str, last: &str, phone: &str, dob: Option<NaiveDate>) -> StoredPatient {
        let draft = PatientDraft {
            first_name: first.into(),
            last_name: last.into(),
            phone: phone.into(),
            date_of_birth: dob,
            ..Default::default()
        };
        StoredPatient::from_draft(&draft, Utc::now())
    }

    fn dob(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    #[test]
    fn test_phone_rule_reason_bands() {
        let exact = score_phone("9876543210", &stored("A", "", "+91 98765 43210", None)).unwrap();
        assert_eq!(exact.score, 100);
        assert_eq!(exact.reasons, vec!["Exact phone number match"]);

        let very = score_phone("9876543210", &stored("A", "", "9876543211", None)).unwrap();
        assert_eq!(very.score, 90);
        assert_eq!(very.reasons, vec!["Very similar phone number"]);

        let similar = score_phone("9876543210", &stored("A", "", "9876543299", None)).unwrap();
        assert_eq!(similar.score, 80);
        assert_eq!(similar.reasons, vec!["Similar phone number"]);
    }

    #[test]
    fn test_phone_rule_drops_weak_and_empty() {
        assert!(score_phone("9876543210", &stored("A", "", "9800000000", None)).is_none());
        assert!(score_phone("9876543210", &stored("A", "", "", None)).is_none());
    }

    #[test]
    fn test_name_and_dob_needs_both_components() {
        let draft = PatientDraft {
            first_name: "Priya".into(),
            last_name: "Sharma".into(),
            date_of_birth: dob(1990, 4, 1),
            ..Default::default()
        };

        // name alone caps at 60
        let name_only = stored("Priya", "Sharma", "", dob(1975, 12, 30));
        assert!(score_name_and_dob(&draft, &name_only).is_none());

        let both = stored("Priya", "Verma", "", dob(1990, 4, 2));
        let m = score_name_and_dob(&draft, &both).unwrap();
        // 100 * 0.6 + 90 * 0.4
        assert_eq!(m.score, 96);
        assert_eq!(
            m.reasons,
            vec!["Name similarity: 100%", "Date of birth match: 90%"]
        );
        assert_eq!(m.rule, MatchRule::NameAndDateOfBirth);
    }

    #[test]
    fn test_name_and_dob_uses_best_of_first_or_last_name() {
        let draft = PatientDraft {
            first_name: "Ann".into(),
            last_name: "Fernandes".into(),
            date_of_birth: dob(1988, 7, 15),
            ..Default::default()
        };
        let patient = stored("Maria", "Fernandez", "", dob(1988, 7, 15));
        let m = score_name_and_dob(&draft, &patient).unwrap();
        // fernandes/fernandez: one edit over nine -> 89; 89 * 0.6 + 100 * 0.4 = 93.4
        assert_eq!(m.score, 93);
    }

    #[test]
    fn test_name_and_phone_gates_components() {
        let draft = PatientDraft {
            first_name: "Jane".into(),
            phone: "9876543210".into(),
            ..Default::default()
        };

        let m = score_name_and_phone(&draft, "9876543210", &stored("Janet", "", "9876543299", None))
            .unwrap();
        // 80 * 0.5 + 80 * 0.5
        assert_eq!(m.score, 80);
        assert_eq!(m.reasons, vec!["Name similarity: 80%", "Phone similarity: 80%"]);

        // name passes, phone below the gate: 50 on its own is dropped
        assert!(
            score_name_and_phone(&draft, "9876543210", &stored("Jane", "", "1234567890", None))
                .is_none()
        );
    }

    #[test]
    fn test_scores_are_clamped() {
        let c = MatchCandidate::new(stored("A", "", "", None), 250, vec![], MatchRule::Phone);
        assert_eq!(c.score, 100);
        assert_eq!(weighted(-3.0), 0);
        assert_eq!(weighted(100.4), 100);
    }
}
