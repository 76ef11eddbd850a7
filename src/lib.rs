pub mod alphabet;
pub mod candidate_generator;
pub mod checkpoint;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod io_utils;
pub mod oracle;
pub mod report;
pub mod stats;

pub use alphabet::{
    combinations_for_length, progress_percentage, saturating_u64, total_combinations,
    AlphabetEnumerator, EnumerationPosition, SearchSpace, MAX_CANDIDATE_LENGTH,
};
pub use candidate_generator::{
    Candidate, CandidateSource, GeneratorOptions, GeneratorState, ResumableCandidateGenerator,
    ResumeMode,
};
pub use checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use config::EngineConfig;
pub use coordinator::{
    AttemptOutcome, AttemptRecord, CancellationToken, CoordinatorConfig, ProgressUpdate,
    RunOutcome, VerificationCoordinator,
};
pub use error::{OracleError, Result, SearchError};
pub use oracle::{mask_secret, ExactMatchOracle, Oracle, PredicateOracle};
pub use report::{ReportFormat, RunReport};
pub use stats::{
    NoopSampler, ProcessSampler, ResourceSample, ResourceSampler, RunStatistics,
    RunStatisticsSnapshot,
};
