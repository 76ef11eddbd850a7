use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, SearchError};

/// Longest candidate a search space may describe.
pub const MAX_CANDIDATE_LENGTH: usize = 256;

/// The set of strings a brute-force run walks through.
///
/// Symbols keep their order and duplicates: `alphabet[d]` is the symbol for digit `d`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub alphabet: String,
    pub min_length: usize,
    pub max_length: usize,
}

impl SearchSpace {
    /// Create a validated search space
    ///
    /// # Examples
    ///
    /// ```
    /// use keyspace_finder::SearchSpace;
    ///
    /// let space = SearchSpace::new("01", 1, 3).unwrap();
    /// assert_eq!(space.radix(), 2);
    /// assert!(SearchSpace::new("", 1, 3).is_err());
    /// ```
    pub fn new(alphabet: impl Into<String>, min_length: usize, max_length: usize) -> Result<Self> {
        let space = SearchSpace {
            alphabet: alphabet.into(),
            min_length,
            max_length,
        };
        space.validate()?;
        Ok(space)
    }

    pub fn validate(&self) -> Result<()> {
        if self.alphabet.is_empty() {
            return Err(SearchError::Configuration(
                "alphabet must contain at least one symbol".to_string(),
            ));
        }
        if self.min_length == 0 {
            return Err(SearchError::Configuration(
                "minimum length must be at least 1".to_string(),
            ));
        }
        if self.max_length < self.min_length {
            return Err(SearchError::Configuration(format!(
                "maximum length {} is smaller than minimum length {}",
                self.max_length, self.min_length
            )));
        }
        if self.max_length > MAX_CANDIDATE_LENGTH {
            return Err(SearchError::Configuration(format!(
                "maximum length {} exceeds the supported {}",
                self.max_length, MAX_CANDIDATE_LENGTH
            )));
        }
        Ok(())
    }

    pub fn symbols(&self) -> Vec<char> {
        self.alphabet.chars().collect()
    }

    pub fn radix(&self) -> usize {
        self.alphabet.chars().count()
    }

    /// Whether `position` names an existing candidate of this space.
    pub fn contains(&self, position: &EnumerationPosition) -> bool {
        position.length >= self.min_length
            && position.length <= self.max_length
            && position.ordinal < combinations_for_length(self.radix(), position.length)
    }
}

impl fmt::Display for SearchSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "alphabet {:?} with lengths {}..={}",
            self.alphabet, self.min_length, self.max_length
        )
    }
}

/// Next candidate to produce: the `ordinal`-th string of size `length`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumerationPosition {
    pub length: usize,
    pub ordinal: BigUint,
}

impl EnumerationPosition {
    pub fn new(length: usize, ordinal: impl Into<BigUint>) -> Self {
        EnumerationPosition {
            length,
            ordinal: ordinal.into(),
        }
    }
}

impl fmt::Display for EnumerationPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "length={}, ordinal={}", self.length, self.ordinal)
    }
}

/// Maps ordinals to candidate strings and back.
///
/// Candidate `n` of length `L` is the base-`radix` expansion of `n` on `L`
/// digits, most significant digit first, each digit replaced by its symbol.
#[derive(Debug, Clone)]
pub struct AlphabetEnumerator {
    symbols: Vec<char>,
}

impl AlphabetEnumerator {
    pub fn new(alphabet: &str) -> Self {
        AlphabetEnumerator {
            symbols: alphabet.chars().collect(),
        }
    }

    pub fn for_space(space: &SearchSpace) -> Self {
        Self::new(&space.alphabet)
    }

    pub fn radix(&self) -> usize {
        self.symbols.len()
    }

    /// Number of distinct ordinals for strings of `length` symbols.
    pub fn combinations(&self, length: usize) -> BigUint {
        combinations_for_length(self.radix(), length)
    }

    /// Candidate at `ordinal` among strings of `length` symbols
    ///
    /// Returns `None` when the ordinal is out of range or the alphabet is empty.
    ///
    /// # Examples
    ///
    /// ```
    /// use keyspace_finder::AlphabetEnumerator;
    /// use num_bigint::BigUint;
    ///
    /// let enumerator = AlphabetEnumerator::new("01");
    /// assert_eq!(enumerator.candidate_at(2, &BigUint::from(1u32)), Some("01".to_string()));
    /// assert_eq!(enumerator.candidate_at(2, &BigUint::from(4u32)), None);
    /// ```
    pub fn candidate_at(&self, length: usize, ordinal: &BigUint) -> Option<String> {
        self.digits_at(length, ordinal)
            .map(|digits| self.render(&digits))
    }

    /// Inverse of [`candidate_at`](Self::candidate_at)
    ///
    /// Every symbol maps to its first position in the alphabet, so the result
    /// is only the unique inverse when the alphabet has no duplicates.
    pub fn ordinal_of(&self, candidate: &str) -> Option<BigUint> {
        let digits = candidate
            .chars()
            .map(|c| self.symbols.iter().position(|&s| s == c))
            .collect::<Option<Vec<usize>>>()?;
        Some(self.ordinal_of_digits(&digits))
    }

    pub(crate) fn digits_at(&self, length: usize, ordinal: &BigUint) -> Option<Vec<usize>> {
        if self.symbols.is_empty() || *ordinal >= self.combinations(length) {
            return None;
        }

        let base = BigUint::from(self.radix());
        let mut rest = ordinal.clone();
        let mut digits = vec![0usize; length];
        for slot in digits.iter_mut().rev() {
            *slot = (&rest % &base).to_usize().unwrap_or_default();
            rest /= &base;
        }
        Some(digits)
    }

    pub(crate) fn ordinal_of_digits(&self, digits: &[usize]) -> BigUint {
        let base = BigUint::from(self.radix());
        digits
            .iter()
            .fold(BigUint::zero(), |acc, &d| acc * &base + BigUint::from(d))
    }

    pub(crate) fn render(&self, digits: &[usize]) -> String {
        digits.iter().map(|&d| self.symbols[d]).collect()
    }
}

/// Digit cursor over the strings of one length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Odometer {
    digits: Vec<usize>,
}

impl Odometer {
    pub(crate) fn zero(length: usize) -> Self {
        Odometer {
            digits: vec![0; length],
        }
    }

    pub(crate) fn from_digits(digits: Vec<usize>) -> Self {
        Odometer { digits }
    }

    pub(crate) fn length(&self) -> usize {
        self.digits.len()
    }

    pub(crate) fn digits(&self) -> &[usize] {
        &self.digits
    }

    /// Step to the next ordinal of the same length. Returns `false` on wrap-around.
    pub(crate) fn advance(&mut self, radix: usize) -> bool {
        for digit in self.digits.iter_mut().rev() {
            *digit += 1;
            if *digit < radix {
                return true;
            }
            *digit = 0;
        }
        false
    }
}

/// `radix ^ length`, the number of candidates of one length.
pub fn combinations_for_length(radix: usize, length: usize) -> BigUint {
    num_traits::pow(BigUint::from(radix), length)
}

/// Size of the whole space, summed over every length
///
/// # Examples
///
/// ```
/// use keyspace_finder::{total_combinations, SearchSpace};
/// use num_bigint::BigUint;
///
/// let space = SearchSpace::new("01", 1, 3).unwrap();
/// assert_eq!(total_combinations(&space), BigUint::from(14u32));
/// ```
pub fn total_combinations(space: &SearchSpace) -> BigUint {
    let radix = space.radix();
    (space.min_length..=space.max_length)
        .map(|length| combinations_for_length(radix, length))
        .sum()
}

/// Clamp a combination count into `u64`. Only for display and progress math.
pub fn saturating_u64(value: &BigUint) -> u64 {
    value.to_u64().unwrap_or(u64::MAX)
}

/// Percentage of `total` covered by `attempts`, between 0.0 and 100.0.
///
/// Spaces too large for an `f64` report 0.0 instead of failing.
pub fn progress_percentage(attempts: u64, total: &BigUint) -> f64 {
    if total.is_zero() {
        return 0.0;
    }
    match total.to_f64() {
        Some(total) if total.is_finite() => ((attempts as f64 / total) * 100.0).min(100.0),
        _ => 0.0,
    }
}
