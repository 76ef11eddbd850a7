use log::{debug, error, info, warn};
use num_bigint::BigUint;
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::alphabet::progress_percentage;
use crate::candidate_generator::{Candidate, CandidateSource};
use crate::error::{Result, SearchError};
use crate::oracle::Oracle;
use crate::stats::RunStatistics;

/// Terminal value of a run, produced exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Success { password: String, attempts: u64 },
    Exhausted { attempts: u64 },
    Interrupted { attempts: u64 },
    Failed { attempts: u64, error: String },
}

impl RunOutcome {
    pub fn attempts(&self) -> u64 {
        match self {
            RunOutcome::Success { attempts, .. }
            | RunOutcome::Exhausted { attempts }
            | RunOutcome::Interrupted { attempts }
            | RunOutcome::Failed { attempts, .. } => *attempts,
        }
    }

    pub fn password(&self) -> Option<&str> {
        match self {
            RunOutcome::Success { password, .. } => Some(password),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Match,
    NoMatch,
    OracleError(String),
}

/// Result of one verification, as sent back by a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub ticket: u64,
    pub candidate: String,
    pub outcome: AttemptOutcome,
}

/// Cooperative stop request shared between the coordinator and whoever
/// wants to interrupt it (a signal handler, a UI, a test).
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Snapshot handed to the progress callback.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// Cumulative attempts, resumed ones included.
    pub attempts: u64,
    /// Attempts made since this run started.
    pub session_attempts: u64,
    pub elapsed: Duration,
    pub total: Option<BigUint>,
}

impl ProgressUpdate {
    pub fn percentage(&self) -> Option<f64> {
        self.total
            .as_ref()
            .map(|total| progress_percentage(self.attempts, total))
    }

    pub fn attempts_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.session_attempts as f64 / secs
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Maximum number of oracle calls in flight at once.
    pub concurrency: usize,
    /// How long in-flight attempts may finish after an interruption.
    pub grace_period: Duration,
    /// Oracle errors in a row that abort the run.
    pub max_consecutive_errors: u32,
    /// Minimum time between two progress callbacks.
    pub progress_interval: Duration,
    /// How often the cancellation token is polled while waiting on workers.
    pub poll_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            concurrency: 4,
            grace_period: Duration::from_secs(5),
            max_consecutive_errors: 5,
            progress_interval: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
        }
    }
}

struct RunState {
    in_flight: usize,
    consecutive_errors: u32,
    started: Instant,
    last_progress: Instant,
    session_start: u64,
    total: Option<BigUint>,
}

/// Runs a bounded window of concurrent oracle calls over a [`CandidateSource`].
///
/// Candidates are dispatched in enumeration order but may complete in any
/// order; the first match *observed* wins, even if an earlier candidate was
/// still in flight. Once a terminal outcome is decided, queued workers skip
/// the oracle and late results are discarded.
pub struct VerificationCoordinator {
    config: CoordinatorConfig,
    cancel: CancellationToken,
}

impl VerificationCoordinator {
    pub fn new(config: CoordinatorConfig) -> Result<Self> {
        if config.concurrency == 0 {
            return Err(SearchError::Configuration(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if config.max_consecutive_errors == 0 {
            return Err(SearchError::Configuration(
                "max consecutive oracle errors must be at least 1".to_string(),
            ));
        }
        Ok(VerificationCoordinator {
            config,
            cancel: CancellationToken::new(),
        })
    }

    /// Use an externally owned token instead of the coordinator's own.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn run<S, O>(&self, source: &mut S, oracle: Arc<O>, stats: &RunStatistics) -> RunOutcome
    where
        S: CandidateSource + ?Sized,
        O: Oracle + ?Sized + 'static,
    {
        self.run_with_progress(source, oracle, stats, |_| {})
    }

    /// Run the search to a terminal outcome
    ///
    /// `progress` is called from the coordinating thread at most once per
    /// `progress_interval` and should return quickly.
    ///
    /// # Examples
    ///
    /// ```
    /// use keyspace_finder::{
    ///     CoordinatorConfig, ExactMatchOracle, GeneratorOptions, MemoryCheckpointStore,
    ///     ResumableCandidateGenerator, RunOutcome, RunStatistics, SearchSpace, VerificationCoordinator,
    /// };
    /// use std::sync::Arc;
    ///
    /// let space = SearchSpace::new("0123456789", 1, 3).unwrap();
    /// let mut generator = ResumableCandidateGenerator::new(
    ///     space,
    ///     Arc::new(MemoryCheckpointStore::new()),
    ///     GeneratorOptions::default(),
    /// )
    /// .unwrap();
    /// let coordinator = VerificationCoordinator::new(CoordinatorConfig::default()).unwrap();
    /// let stats = RunStatistics::new();
    ///
    /// let outcome = coordinator.run_with_progress(
    ///     &mut generator,
    ///     Arc::new(ExactMatchOracle::new("042")),
    ///     &stats,
    ///     |update| println!("{} attempts", update.attempts),
    /// );
    /// assert_eq!(outcome.password(), Some("042"));
    /// ```
    pub fn run_with_progress<S, O, F>(
        &self,
        source: &mut S,
        oracle: Arc<O>,
        stats: &RunStatistics,
        mut progress: F,
    ) -> RunOutcome
    where
        S: CandidateSource + ?Sized,
        O: Oracle + ?Sized + 'static,
        F: FnMut(&ProgressUpdate),
    {
        stats.seed_attempts(source.attempts());
        stats.start();
        info!(
            "Starting verification with {} workers from {} previous attempts",
            self.config.concurrency,
            source.attempts()
        );

        let outcome = match self.build_pool() {
            Ok(pool) => self.drive(&pool, source, oracle, stats, &mut progress),
            Err(e) => {
                error!("{}", e);
                RunOutcome::Failed {
                    attempts: source.attempts(),
                    error: e.to_string(),
                }
            }
        };

        source.finish(&outcome);
        stats.stop();

        match &outcome {
            RunOutcome::Success { attempts, .. } => info!("Match found after {} attempts", attempts),
            RunOutcome::Exhausted { attempts } => {
                info!("Search space exhausted after {} attempts", attempts)
            }
            RunOutcome::Interrupted { attempts } => {
                info!("Run interrupted after {} attempts", attempts)
            }
            RunOutcome::Failed { attempts, error } => {
                error!("Run failed after {} attempts: {}", attempts, error)
            }
        }
        outcome
    }

    fn build_pool(&self) -> Result<rayon::ThreadPool> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.concurrency)
            .thread_name(|i| format!("keyspace-verifier-{}", i))
            .build()
            .map_err(|e| SearchError::WorkerPool(e.to_string()))
    }

    fn drive<S, O, F>(
        &self,
        pool: &rayon::ThreadPool,
        source: &mut S,
        oracle: Arc<O>,
        stats: &RunStatistics,
        progress: &mut F,
    ) -> RunOutcome
    where
        S: CandidateSource + ?Sized,
        O: Oracle + ?Sized + 'static,
        F: FnMut(&ProgressUpdate),
    {
        let (tx, rx) = mpsc::channel::<AttemptRecord>();
        let halt = Arc::new(AtomicBool::new(false));
        let now = Instant::now();
        let mut state = RunState {
            in_flight: 0,
            consecutive_errors: 0,
            started: now,
            last_progress: now,
            session_start: source.attempts(),
            total: source.total_candidates(),
        };
        let mut source_drained = false;

        let outcome = loop {
            if self.cancel.is_cancelled() {
                info!(
                    "Interruption requested, waiting for {} in-flight attempts",
                    state.in_flight
                );
                break self.drain(&rx, source, stats, &mut state);
            }

            while state.in_flight < self.config.concurrency && !source_drained {
                match source.next_candidate() {
                    Some(candidate) => {
                        dispatch(pool, candidate, &oracle, &tx, &halt);
                        state.in_flight += 1;
                    }
                    None => source_drained = true,
                }
            }

            if state.in_flight == 0 {
                break RunOutcome::Exhausted {
                    attempts: source.attempts(),
                };
            }

            let mut ready = match rx.recv_timeout(self.config.poll_interval) {
                Ok(record) => Some(record),
                Err(RecvTimeoutError::Timeout) => {
                    self.report_progress(source.attempts(), &mut state, progress);
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    break RunOutcome::Failed {
                        attempts: source.attempts(),
                        error: "verification workers disconnected".to_string(),
                    };
                }
            };

            let mut settled = None;
            while let Some(record) = ready.take() {
                state.in_flight -= 1;
                if let Some(outcome) = self.settle(record, source, stats, &mut state) {
                    settled = Some(outcome);
                    break;
                }
                ready = rx.try_recv().ok();
            }
            if let Some(outcome) = settled {
                break outcome;
            }

            self.report_progress(source.attempts(), &mut state, progress);
        };

        halt.store(true, Ordering::Release);
        if state.in_flight > 0 {
            debug!("Discarding {} in-flight attempts", state.in_flight);
        }
        outcome
    }

    /// Account for one completed attempt. Returns the terminal outcome it
    /// causes, if any.
    fn settle<S>(
        &self,
        record: AttemptRecord,
        source: &mut S,
        stats: &RunStatistics,
        state: &mut RunState,
    ) -> Option<RunOutcome>
    where
        S: CandidateSource + ?Sized,
    {
        stats.record_attempt();
        source.record_attempt(record.ticket);

        match record.outcome {
            AttemptOutcome::Match => Some(RunOutcome::Success {
                password: record.candidate,
                attempts: source.attempts(),
            }),
            AttemptOutcome::NoMatch => {
                state.consecutive_errors = 0;
                None
            }
            AttemptOutcome::OracleError(message) => {
                state.consecutive_errors += 1;
                warn!(
                    "Oracle failed on candidate #{}: {} ({} in a row)",
                    record.ticket, message, state.consecutive_errors
                );
                if state.consecutive_errors >= self.config.max_consecutive_errors {
                    Some(RunOutcome::Failed {
                        attempts: source.attempts(),
                        error: format!(
                            "{} consecutive oracle errors, last: {}",
                            state.consecutive_errors, message
                        ),
                    })
                } else {
                    None
                }
            }
        }
    }

    /// Stop dispatching and let in-flight attempts finish within the grace period.
    fn drain<S>(
        &self,
        rx: &Receiver<AttemptRecord>,
        source: &mut S,
        stats: &RunStatistics,
        state: &mut RunState,
    ) -> RunOutcome
    where
        S: CandidateSource + ?Sized,
    {
        let deadline = Instant::now() + self.config.grace_period;
        while state.in_flight > 0 {
            let now = Instant::now();
            if now >= deadline {
                warn!(
                    "Grace period elapsed, abandoning {} in-flight attempts",
                    state.in_flight
                );
                break;
            }
            match rx.recv_timeout(deadline - now) {
                Ok(record) => {
                    state.in_flight -= 1;
                    if let Some(outcome @ RunOutcome::Success { .. }) =
                        self.settle(record, source, stats, state)
                    {
                        return outcome;
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        RunOutcome::Interrupted {
            attempts: source.attempts(),
        }
    }

    fn report_progress<F>(&self, attempts: u64, state: &mut RunState, progress: &mut F)
    where
        F: FnMut(&ProgressUpdate),
    {
        if state.last_progress.elapsed() < self.config.progress_interval {
            return;
        }
        state.last_progress = Instant::now();
        progress(&ProgressUpdate {
            attempts,
            session_attempts: attempts.saturating_sub(state.session_start),
            elapsed: state.started.elapsed(),
            total: state.total.clone(),
        });
    }
}

fn dispatch<O>(
    pool: &rayon::ThreadPool,
    candidate: Candidate,
    oracle: &Arc<O>,
    tx: &Sender<AttemptRecord>,
    halt: &Arc<AtomicBool>,
) where
    O: Oracle + ?Sized + 'static,
{
    let oracle = Arc::clone(oracle);
    let tx = tx.clone();
    let halt = Arc::clone(halt);
    pool.spawn(move || {
        if halt.load(Ordering::Acquire) {
            return;
        }
        let outcome = verify_candidate(oracle.as_ref(), &candidate.value);
        // The receiver is gone once the run has decided its outcome.
        let _ = tx.send(AttemptRecord {
            ticket: candidate.ticket,
            candidate: candidate.value,
            outcome,
        });
    });
}

/// Call the oracle, turning errors and panics into an [`AttemptOutcome`].
pub fn verify_candidate<O>(oracle: &O, candidate: &str) -> AttemptOutcome
where
    O: Oracle + ?Sized,
{
    match panic::catch_unwind(AssertUnwindSafe(|| oracle.verify(candidate))) {
        Ok(Ok(true)) => AttemptOutcome::Match,
        Ok(Ok(false)) => AttemptOutcome::NoMatch,
        Ok(Err(e)) => AttemptOutcome::OracleError(e.to_string()),
        Err(_) => AttemptOutcome::OracleError("oracle panicked".to_string()),
    }
}
