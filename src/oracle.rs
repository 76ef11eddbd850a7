use crate::error::OracleError;

/// Judges whether a candidate is the secret being searched for.
///
/// Calls may block and run concurrently from several worker threads, each
/// with a different candidate. An `Err` counts as a failed attempt, not a
/// non-match.
pub trait Oracle: Send + Sync {
    fn verify(&self, candidate: &str) -> Result<bool, OracleError>;
}

/// Plain comparison against a known target. Useful for auditing how long a
/// given password survives a brute-force run.
#[derive(Debug, Clone)]
pub struct ExactMatchOracle {
    target: String,
}

impl ExactMatchOracle {
    pub fn new(target: impl Into<String>) -> Self {
        ExactMatchOracle {
            target: target.into(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Oracle for ExactMatchOracle {
    fn verify(&self, candidate: &str) -> Result<bool, OracleError> {
        Ok(candidate == self.target)
    }
}

/// Adapts an infallible predicate into an [`Oracle`]
///
/// # Examples
///
/// ```
/// use keyspace_finder::{Oracle, PredicateOracle};
///
/// let oracle = PredicateOracle::new(|candidate: &str| candidate.ends_with("42"));
/// assert!(oracle.verify("1042").unwrap());
/// ```
pub struct PredicateOracle<F> {
    predicate: F,
}

impl<F> PredicateOracle<F>
where
    F: Fn(&str) -> bool + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        PredicateOracle { predicate }
    }
}

impl<F> Oracle for PredicateOracle<F>
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn verify(&self, candidate: &str) -> Result<bool, OracleError> {
        Ok((self.predicate)(candidate))
    }
}

/// Mask a secret for display, keeping the first `show_chars` characters.
///
/// Secrets not longer than `show_chars` are masked entirely.
pub fn mask_secret(secret: &str, show_chars: usize) -> String {
    let length = secret.chars().count();
    if length <= show_chars {
        return "*".repeat(length);
    }
    let shown: String = secret.chars().take(show_chars).collect();
    format!("{}{}", shown, "*".repeat(length - show_chars))
}
