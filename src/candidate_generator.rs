use log::{debug, info, warn};
use num_bigint::BigUint;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::alphabet::{total_combinations, AlphabetEnumerator, EnumerationPosition, Odometer, SearchSpace};
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::coordinator::RunOutcome;
use crate::error::{Result, SearchError};

/// A candidate handed out for verification.
///
/// The ticket must be passed back to [`CandidateSource::record_attempt`]
/// once the attempt completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub ticket: u64,
    pub value: String,
}

/// Ordered, resumable supply of candidates driven by the coordinator.
///
/// All methods are called from the single producer thread.
pub trait CandidateSource {
    /// Next candidate, or `None` once the source is exhausted.
    fn next_candidate(&mut self) -> Option<Candidate>;

    /// Report that the attempt for `ticket` completed, whatever its result.
    fn record_attempt(&mut self, ticket: u64);

    /// Attempts recorded so far, including those carried over from a checkpoint.
    fn attempts(&self) -> u64;

    /// Progress record that would be persisted right now.
    fn checkpoint_state(&self) -> Checkpoint;

    /// Size of the whole space, when known.
    fn total_candidates(&self) -> Option<BigUint> {
        None
    }

    /// Called exactly once with the run's terminal outcome.
    fn finish(&mut self, outcome: &RunOutcome);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    Fresh,
    Resumed,
    Enumerating,
    Exhausted,
}

/// What to do with an existing checkpoint at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeMode {
    /// Continue from the latest checkpoint of the run identity, if any.
    Resume,
    /// Ignore existing checkpoints and start at the first candidate.
    Fresh,
}

#[derive(Debug, Clone)]
pub struct GeneratorOptions {
    pub run_identity: String,
    /// Attempts between two checkpoint saves. 0 disables periodic saves.
    pub checkpoint_interval: u64,
    pub resume: ResumeMode,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        GeneratorOptions {
            run_identity: "brute-force".to_string(),
            checkpoint_interval: 1000,
            resume: ResumeMode::Fresh,
        }
    }
}

/// Walks every string of a [`SearchSpace`], shortest first, in alphabet order,
/// persisting its position through a [`CheckpointStore`].
///
/// Candidates handed out through [`CandidateSource::next_candidate`] stay
/// pending until their attempt is recorded. Checkpoints point at the earliest
/// pending candidate, so a crash never skips one; at worst a few completed
/// attempts are retried after resume. Those completed attempts are left out
/// of the persisted count, which therefore always equals the number of
/// candidates ahead of the persisted position.
///
/// Iterating with [`Iterator`] yields plain strings and tracks nothing.
pub struct ResumableCandidateGenerator {
    space: SearchSpace,
    enumerator: AlphabetEnumerator,
    store: Arc<dyn CheckpointStore>,
    run_identity: String,
    checkpoint_interval: u64,
    state: GeneratorState,
    cursor: Option<Odometer>,
    pending: BTreeMap<u64, Odometer>,
    /// Completed tickets issued after the earliest pending one.
    completed_ahead: BTreeSet<u64>,
    next_ticket: u64,
    attempts: u64,
    last_checkpoint_attempts: u64,
    checkpoints_enabled: bool,
}

impl ResumableCandidateGenerator {
    /// Create a generator, resuming from the store when asked to
    ///
    /// Fails on an invalid space, or when resuming a checkpoint that was
    /// produced by a different space. Store I/O failures only log a warning
    /// and start fresh.
    ///
    /// # Examples
    ///
    /// ```
    /// use keyspace_finder::{GeneratorOptions, MemoryCheckpointStore, ResumableCandidateGenerator, SearchSpace};
    /// use std::sync::Arc;
    ///
    /// let space = SearchSpace::new("01", 1, 2).unwrap();
    /// let generator = ResumableCandidateGenerator::new(
    ///     space,
    ///     Arc::new(MemoryCheckpointStore::new()),
    ///     GeneratorOptions::default(),
    /// )
    /// .unwrap();
    /// let all: Vec<String> = generator.collect();
    /// assert_eq!(all, vec!["0", "1", "00", "01", "10", "11"]);
    /// ```
    pub fn new(
        space: SearchSpace,
        store: Arc<dyn CheckpointStore>,
        options: GeneratorOptions,
    ) -> Result<Self> {
        space.validate()?;

        let enumerator = AlphabetEnumerator::for_space(&space);
        let mut generator = ResumableCandidateGenerator {
            cursor: Some(Odometer::zero(space.min_length)),
            space,
            enumerator,
            store,
            run_identity: options.run_identity,
            checkpoint_interval: options.checkpoint_interval,
            state: GeneratorState::Fresh,
            pending: BTreeMap::new(),
            completed_ahead: BTreeSet::new(),
            next_ticket: 0,
            attempts: 0,
            last_checkpoint_attempts: 0,
            checkpoints_enabled: true,
        };

        if options.resume == ResumeMode::Resume {
            generator.resume_from_store()?;
        }
        Ok(generator)
    }

    fn resume_from_store(&mut self) -> Result<()> {
        let checkpoint = match self.store.load_latest(&self.run_identity) {
            Ok(Some(checkpoint)) => checkpoint,
            Ok(None) => {
                info!("No checkpoint for {}, starting fresh", self.run_identity);
                return Ok(());
            }
            Err(e) => {
                warn!(
                    "Could not load checkpoint for {}: {}. Starting fresh",
                    self.run_identity, e
                );
                return Ok(());
            }
        };

        if checkpoint.search_space != self.space {
            return Err(SearchError::CheckpointMismatch {
                identity: self.run_identity.clone(),
                expected: self.space.clone(),
                found: checkpoint.search_space,
            });
        }

        self.cursor = match &checkpoint.position {
            Some(position) => match self.enumerator.digits_at(position.length, &position.ordinal) {
                Some(digits) if self.space.contains(position) => Some(Odometer::from_digits(digits)),
                _ => {
                    warn!(
                        "Checkpoint position {} is outside {}, starting fresh",
                        position, self.space
                    );
                    return Ok(());
                }
            },
            None => None,
        };
        self.attempts = checkpoint.attempts;
        self.last_checkpoint_attempts = checkpoint.attempts;

        match &checkpoint.position {
            Some(position) => {
                self.state = GeneratorState::Resumed;
                info!(
                    "Resuming from {} with {} attempts already made",
                    position, checkpoint.attempts
                );
            }
            None => {
                self.state = GeneratorState::Exhausted;
                info!(
                    "Checkpoint marks the space as exhausted after {} attempts",
                    checkpoint.attempts
                );
            }
        }
        Ok(())
    }

    pub fn state(&self) -> GeneratorState {
        self.state
    }

    pub fn search_space(&self) -> &SearchSpace {
        &self.space
    }

    pub fn run_identity(&self) -> &str {
        &self.run_identity
    }

    /// Candidates handed out whose attempt has not been recorded yet.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Position of the next candidate to produce, `None` once exhausted.
    pub fn position(&self) -> Option<EnumerationPosition> {
        self.cursor.as_ref().map(|cursor| self.position_of(cursor))
    }

    fn position_of(&self, odometer: &Odometer) -> EnumerationPosition {
        EnumerationPosition {
            length: odometer.length(),
            ordinal: self.enumerator.ordinal_of_digits(odometer.digits()),
        }
    }

    /// Produce the candidate under the cursor and move the cursor past it.
    fn advance(&mut self, track: bool) -> Option<Candidate> {
        if self.state == GeneratorState::Exhausted {
            return None;
        }
        self.state = GeneratorState::Enumerating;

        let cursor = match self.cursor.as_mut() {
            Some(cursor) => cursor,
            None => {
                self.state = GeneratorState::Exhausted;
                return None;
            }
        };

        let value = self.enumerator.render(cursor.digits());
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        if track {
            self.pending.insert(ticket, cursor.clone());
        }

        if !cursor.advance(self.enumerator.radix()) {
            let next_length = cursor.length() + 1;
            if next_length > self.space.max_length {
                debug!("Enumeration reached the end of {}", self.space);
                self.cursor = None;
            } else {
                debug!("Generating candidates of length {}", next_length);
                *cursor = Odometer::zero(next_length);
            }
        }

        Some(Candidate { ticket, value })
    }

    fn persist(&mut self) {
        if !self.checkpoints_enabled {
            return;
        }
        let checkpoint = self.checkpoint_state();
        match self.store.save(&checkpoint) {
            Ok(()) => debug!(
                "Checkpoint stored at {} attempts",
                checkpoint.attempts
            ),
            Err(e) => warn!(
                "Failed to save checkpoint for {}: {}",
                self.run_identity, e
            ),
        }
        self.last_checkpoint_attempts = self.attempts;
    }
}

impl CandidateSource for ResumableCandidateGenerator {
    fn next_candidate(&mut self) -> Option<Candidate> {
        self.advance(true)
    }

    fn record_attempt(&mut self, ticket: u64) {
        if self.pending.remove(&ticket).is_some() {
            self.completed_ahead.insert(ticket);
        } else {
            debug!("Attempt recorded for unknown ticket {}", ticket);
        }
        match self.pending.keys().next() {
            Some(&earliest) => self.completed_ahead = self.completed_ahead.split_off(&earliest),
            None => self.completed_ahead.clear(),
        }
        self.attempts += 1;

        if self.checkpoint_interval > 0
            && self.attempts - self.last_checkpoint_attempts >= self.checkpoint_interval
        {
            self.persist();
        }
    }

    fn attempts(&self) -> u64 {
        self.attempts
    }

    fn checkpoint_state(&self) -> Checkpoint {
        let position = self
            .pending
            .values()
            .next()
            .or(self.cursor.as_ref())
            .map(|odometer| self.position_of(odometer));
        Checkpoint::new(
            self.run_identity.clone(),
            self.space.clone(),
            position,
            self.attempts - self.completed_ahead.len() as u64,
        )
    }

    fn total_candidates(&self) -> Option<BigUint> {
        Some(total_combinations(&self.space))
    }

    fn finish(&mut self, outcome: &RunOutcome) {
        match outcome {
            RunOutcome::Success { .. } => {
                self.checkpoints_enabled = false;
                match self.store.delete(&self.run_identity) {
                    Ok(()) => debug!("Checkpoint for {} deleted", self.run_identity),
                    Err(e) => warn!(
                        "Failed to delete checkpoint for {}: {}",
                        self.run_identity, e
                    ),
                }
            }
            RunOutcome::Exhausted { .. } => {
                self.state = GeneratorState::Exhausted;
                self.persist();
            }
            RunOutcome::Interrupted { .. } | RunOutcome::Failed { .. } => self.persist(),
        }
    }
}

impl Iterator for ResumableCandidateGenerator {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.advance(false).map(|candidate| candidate.value)
    }
}
