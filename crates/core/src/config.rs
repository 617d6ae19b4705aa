//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into the resolution
//! service as an `Arc`. Binaries read environment variables and hand the raw values to the
//! `*_from_env_value` helpers below; core code never reads the process environment during a
//! check.

use crate::constants::{
    DEFAULT_CANDIDATE_WINDOW, DEFAULT_EXACT_LOOKUP_LIMIT, DEFAULT_NATIONAL_ID_LENGTH,
};
use crate::{MpiError, MpiResult};
use std::str::FromStr;
use std::time::Duration;

/// What a check reports when it cannot complete (malformed draft, timeout).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Return a permissive "no duplicates" result so registration stays available.
    #[default]
    FailOpen,
    /// Surface the error to the caller.
    FailClosed,
}

impl FromStr for FailurePolicy {
    type Err = MpiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "open" | "fail-open" => Ok(FailurePolicy::FailOpen),
            "closed" | "fail-closed" => Ok(FailurePolicy::FailClosed),
            other => Err(MpiError::InvalidInput(format!(
                "unknown failure policy '{}' (expected 'open' or 'closed')",
                other
            ))),
        }
    }
}

/// Where the fuzzy rules draw their candidates from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CandidateStrategy {
    /// A bounded window of other live records, as listed by the store.
    #[default]
    BoundedScan,
    /// Records sharing a blocking key (phone prefix/suffix, name code, birth date).
    Blocking,
}

impl FromStr for CandidateStrategy {
    type Err = MpiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "scan" | "bounded-scan" => Ok(CandidateStrategy::BoundedScan),
            "blocking" | "index" => Ok(CandidateStrategy::Blocking),
            other => Err(MpiError::InvalidInput(format!(
                "unknown candidate strategy '{}' (expected 'scan' or 'blocking')",
                other
            ))),
        }
    }
}

/// Matching configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct MatchConfig {
    candidate_window: usize,
    exact_lookup_limit: usize,
    national_id_length: usize,
    check_timeout: Option<Duration>,
    failure_policy: FailurePolicy,
    candidate_strategy: CandidateStrategy,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            candidate_window: DEFAULT_CANDIDATE_WINDOW,
            exact_lookup_limit: DEFAULT_EXACT_LOOKUP_LIMIT,
            national_id_length: DEFAULT_NATIONAL_ID_LENGTH,
            check_timeout: None,
            failure_policy: FailurePolicy::default(),
            candidate_strategy: CandidateStrategy::default(),
        }
    }
}

impl MatchConfig {
    /// Create a new `MatchConfig`.
    ///
    /// # Errors
    ///
    /// Returns `MpiError::InvalidInput` if `candidate_window` or `exact_lookup_limit` is zero,
    /// or if a zero timeout is supplied.
    pub fn new(
        candidate_window: usize,
        exact_lookup_limit: usize,
        check_timeout: Option<Duration>,
        failure_policy: FailurePolicy,
        candidate_strategy: CandidateStrategy,
    ) -> MpiResult<Self> {
        if candidate_window == 0 {
            return Err(MpiError::InvalidInput(
                "candidate_window must be at least 1".into(),
            ));
        }
        if exact_lookup_limit == 0 {
            return Err(MpiError::InvalidInput(
                "exact_lookup_limit must be at least 1".into(),
            ));
        }
        if check_timeout.is_some_and(|t| t.is_zero()) {
            return Err(MpiError::InvalidInput(
                "check_timeout must be greater than zero".into(),
            ));
        }

        Ok(Self {
            candidate_window,
            exact_lookup_limit,
            national_id_length: DEFAULT_NATIONAL_ID_LENGTH,
            check_timeout,
            failure_policy,
            candidate_strategy,
        })
    }

    /// Overrides the national-ID length the exact rule insists on.
    ///
    /// # Errors
    ///
    /// Returns `MpiError::InvalidInput` if `length` is zero.
    pub fn with_national_id_length(mut self, length: usize) -> MpiResult<Self> {
        if length == 0 {
            return Err(MpiError::InvalidInput(
                "national_id_length must be at least 1".into(),
            ));
        }
        self.national_id_length = length;
        Ok(self)
    }

    pub fn candidate_window(&self) -> usize {
        self.candidate_window
    }

    pub fn exact_lookup_limit(&self) -> usize {
        self.exact_lookup_limit
    }

    pub fn national_id_length(&self) -> usize {
        self.national_id_length
    }

    pub fn check_timeout(&self) -> Option<Duration> {
        self.check_timeout
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    pub fn candidate_strategy(&self) -> CandidateStrategy {
        self.candidate_strategy
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse the candidate window from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns the default window.
pub fn candidate_window_from_env_value(value: Option<String>) -> MpiResult<usize> {
    match non_empty(value) {
        None => Ok(DEFAULT_CANDIDATE_WINDOW),
        Some(v) => v
            .parse::<usize>()
            .map_err(|_| MpiError::InvalidInput(format!("invalid candidate window '{}'", v))),
    }
}

/// Parse the national-ID length from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns the default length.
pub fn national_id_length_from_env_value(value: Option<String>) -> MpiResult<usize> {
    match non_empty(value) {
        None => Ok(DEFAULT_NATIONAL_ID_LENGTH),
        Some(v) => v
            .parse::<usize>()
            .map_err(|_| MpiError::InvalidInput(format!("invalid national ID length '{}'", v))),
    }
}

/// Parse the per-check timeout (milliseconds) from an optional string value.
///
/// `None`, empty and `0` all mean "no timeout".
pub fn check_timeout_from_env_value(value: Option<String>) -> MpiResult<Option<Duration>> {
    let Some(v) = non_empty(value) else {
        return Ok(None);
    };
    let millis = v
        .parse::<u64>()
        .map_err(|_| MpiError::InvalidInput(format!("invalid check timeout '{}'", v)))?;
    Ok((millis > 0).then(|| Duration::from_millis(millis)))
}

/// Parse the failure policy from an optional string value, defaulting to fail-open.
pub fn failure_policy_from_env_value(value: Option<String>) -> MpiResult<FailurePolicy> {
    Ok(non_empty(value)
        .map(|v| v.parse::<FailurePolicy>())
        .transpose()?
        .unwrap_or_default())
}

/// Parse the candidate strategy from an optional string value, defaulting to bounded scan.
pub fn candidate_strategy_from_env_value(value: Option<String>) -> MpiResult<CandidateStrategy> {
    Ok(non_empty(value)
        .map(|v| v.parse::<CandidateStrategy>())
        .transpose()?
        .unwrap_or_default())
}

/// Resolve a [`MatchConfig`] from raw environment values.
///
/// The arguments are the values of `MPI_CANDIDATE_WINDOW`, `MPI_CHECK_TIMEOUT_MS`,
/// `MPI_FAILURE_POLICY`, `MPI_CANDIDATE_STRATEGY` and `MPI_NATIONAL_ID_LENGTH` respectively.
pub fn match_config_from_env_values(
    candidate_window: Option<String>,
    check_timeout_ms: Option<String>,
    failure_policy: Option<String>,
    candidate_strategy: Option<String>,
    national_id_length: Option<String>,
) -> MpiResult<MatchConfig> {
    MatchConfig::new(
        candidate_window_from_env_value(candidate_window)?,
        DEFAULT_EXACT_LOOKUP_LIMIT,
        check_timeout_from_env_value(check_timeout_ms)?,
        failure_policy_from_env_value(failure_policy)?,
        candidate_strategy_from_env_value(candidate_strategy)?,
    )?
    .with_national_id_length(national_id_length_from_env_value(national_id_length)?)
}

/// Resolve a [`MatchConfig`] from the process environment.
///
/// # Errors
///
/// Returns `MpiError::InvalidInput` if any of the variables is set to an unparseable value.
pub fn match_config_from_env() -> MpiResult<MatchConfig> {
    match_config_from_env_values(
        std::env::var("MPI_CANDIDATE_WINDOW").ok(),
        std::env::var("MPI_CHECK_TIMEOUT_MS").ok(),
        std::env::var("MPI_FAILURE_POLICY").ok(),
        std::env::var("MPI_CANDIDATE_STRATEGY").ok(),
        std::env::var("MPI_NATIONAL_ID_LENGTH").ok(),
    )
}
