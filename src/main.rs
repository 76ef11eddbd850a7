use clap::{Parser, Subcommand};
use keyspace_finder::{
    io_utils, mask_secret, total_combinations, CancellationToken, CandidateSource, CheckpointStore,
    EngineConfig, EnumerationPosition, ExactMatchOracle, FileCheckpointStore, GeneratorState,
    ProgressUpdate, ResumableCandidateGenerator, ResumeMode, RunReport, RunStatistics,
    RunStatisticsSnapshot, VerificationCoordinator,
};
use log::{debug, info, warn};
use mimalloc::MiMalloc;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "keyspace-finder")]
#[command(about = "Resumable brute-force search over a fixed alphabet", long_about = None)]
struct Cli {
    #[arg(short, long, global = true, help = "Debug logging (RUST_LOG takes precedence)")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Search the keyspace for a target password")]
    Run {
        #[arg(help = "The password the search should recover")]
        target: String,

        #[arg(long, help = "Configuration file (JSON) - CLI options override config file values")]
        config: Option<String>,

        #[arg(long, help = "Alphabet to enumerate (overrides config file)")]
        charset: Option<String>,

        #[arg(long, help = "Shortest candidate length (overrides config file)")]
        min_length: Option<usize>,

        #[arg(long, help = "Longest candidate length (overrides config file)")]
        max_length: Option<usize>,

        #[arg(short, long, help = "Concurrent verifications (overrides config file)")]
        threads: Option<usize>,

        #[arg(short = 'c', long, help = "Save checkpoint every N attempts (use 0 to disable)")]
        checkpoint_interval: Option<u64>,

        #[arg(short = 'd', long, help = "Checkpoint directory (overrides config file)")]
        checkpoint_dir: Option<String>,

        #[arg(short, long, help = "Run identity used to name checkpoints")]
        method: Option<String>,

        #[arg(long, help = "Resume from the latest checkpoint of this run identity")]
        resume: bool,

        #[arg(long, help = "Report directory (overrides config file)")]
        report_dir: Option<String>,

        #[arg(long, help = "Show the recovered password unmasked in the report")]
        show_password: bool,

        #[arg(short, long, help = "Extra copy of the run report as JSON at this path")]
        output: Option<String>,
    },

    #[command(about = "Show the latest checkpoint of a run identity")]
    Status {
        #[arg(long, help = "Configuration file (JSON)")]
        config: Option<String>,

        #[arg(short, long, help = "Run identity (overrides config file)")]
        method: Option<String>,

        #[arg(short = 'd', long, help = "Checkpoint directory (overrides config file)")]
        checkpoint_dir: Option<String>,
    },

    #[command(about = "Delete checkpoint files older than N days")]
    Purge {
        #[arg(long, help = "Configuration file (JSON)")]
        config: Option<String>,

        #[arg(long, help = "Age in days (overrides config file)")]
        days: Option<u64>,

        #[arg(short = 'd', long, help = "Checkpoint directory (overrides config file)")]
        checkpoint_dir: Option<String>,
    },

    #[command(about = "Generate a default engine configuration file")]
    InitConfig {
        #[arg(help = "Output file path (default: engine_config.json)")]
        output: Option<String>,
    },
}

struct RunOverrides {
    charset: Option<String>,
    min_length: Option<usize>,
    max_length: Option<usize>,
    threads: Option<usize>,
    checkpoint_interval: Option<u64>,
    checkpoint_dir: Option<String>,
    method: Option<String>,
    report_dir: Option<String>,
    show_password: bool,
}

/// Log sink copying every record to stderr and to the log file.
struct TeeWriter {
    file: File,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

fn init_logging(verbose: bool, log_file: Option<&Path>) {
    let level = if verbose { "debug" } else { "info" };
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));

    if let Some(path) = log_file {
        match open_log_file(path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(TeeWriter { file })));
            }
            Err(e) => eprintln!("Warning: Cannot open log file '{}': {}", path.display(), e),
        }
    }
    builder.init();
}

fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let verbose = cli.verbose;

    match cli.command {
        Commands::Run {
            target,
            config,
            charset,
            min_length,
            max_length,
            threads,
            checkpoint_interval,
            checkpoint_dir,
            method,
            resume,
            report_dir,
            show_password,
            output,
        } => {
            let mut config = load_config(config.as_deref());
            apply_overrides(
                &mut config,
                RunOverrides {
                    charset,
                    min_length,
                    max_length,
                    threads,
                    checkpoint_interval,
                    checkpoint_dir,
                    method,
                    report_dir,
                    show_password,
                },
            );
            init_logging(verbose, config.log_file().as_deref());
            run_search(&config, &target, resume, output.as_deref())
        }
        Commands::Status {
            config,
            method,
            checkpoint_dir,
        } => {
            let mut config = load_config(config.as_deref());
            if let Some(v) = method {
                config.method = v;
            }
            if let Some(v) = checkpoint_dir {
                config.checkpoint_dir = v;
            }
            init_logging(verbose, None);
            show_status(&config)
        }
        Commands::Purge {
            config,
            days,
            checkpoint_dir,
        } => {
            let mut config = load_config(config.as_deref());
            if let Some(v) = days {
                config.purge_after_days = v;
            }
            if let Some(v) = checkpoint_dir {
                config.checkpoint_dir = v;
            }
            init_logging(verbose, config.log_file().as_deref());
            purge_checkpoints(&config)
        }
        Commands::InitConfig { output } => {
            init_logging(verbose, None);
            init_config_file(output.as_deref().unwrap_or("engine_config.json"))
        }
    }
}

fn load_config(path: Option<&str>) -> EngineConfig {
    let Some(path) = path else {
        return EngineConfig::default();
    };
    match EngineConfig::load_from_file(Path::new(path)) {
        Ok(c) => {
            println!("✓ Loaded configuration from: {}\n", path);
            c
        }
        Err(e) => {
            eprintln!("Error loading config file '{}': {}", path, e);
            eprintln!("Using default configuration instead.\n");
            EngineConfig::default()
        }
    }
}

fn apply_overrides(config: &mut EngineConfig, overrides: RunOverrides) {
    if let Some(v) = overrides.charset {
        config.charset = v;
    }
    if let Some(v) = overrides.min_length {
        config.min_length = v;
    }
    if let Some(v) = overrides.max_length {
        config.max_length = v;
    }
    if let Some(v) = overrides.threads {
        config.threads = v;
    }
    if let Some(v) = overrides.checkpoint_interval {
        config.checkpoint_interval = v;
    }
    if let Some(v) = overrides.checkpoint_dir {
        config.checkpoint_dir = v;
    }
    if let Some(v) = overrides.method {
        config.method = v;
    }
    if let Some(v) = overrides.report_dir {
        config.report_dir = v;
    }
    if overrides.show_password {
        config.show_password = true;
    }
}

fn open_store(config: &EngineConfig) -> Option<FileCheckpointStore> {
    match FileCheckpointStore::new(config.checkpoint_dir()) {
        Ok(store) => Some(store),
        Err(e) => {
            eprintln!("Error: Cannot open checkpoint directory '{}': {}", config.checkpoint_dir, e);
            None
        }
    }
}

fn run_search(config: &EngineConfig, target: &str, resume: bool, output: Option<&str>) -> ExitCode {
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }
    let space = match config.search_space() {
        Ok(space) => space,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let total = total_combinations(&space);

    println!("🔍 ═══════════════════════════════════════════");
    println!("   KEYSPACE SEARCH");
    println!("═══════════════════════════════════════════");
    println!("Configuration:");
    println!("  Target:              {}", mask_secret(target, 2));
    println!("  Charset:             {}", config.charset);
    println!("  Lengths:             {} - {}", config.min_length, config.max_length);
    println!("  Keyspace:            {}", total);
    println!("  Threads:             {}", config.threads);
    println!("  Checkpoint interval: {} attempts", config.checkpoint_interval);
    println!("  Checkpoint dir:      {}", config.checkpoint_dir);
    println!("  Method:              {}", config.method);
    println!("  Report dir:          {}", config.report_dir);
    println!("═══════════════════════════════════════════\n");
    info!(
        "Starting {} over {} with {} threads",
        config.method, space, config.threads
    );

    let Some(store) = open_store(config) else {
        return ExitCode::FAILURE;
    };
    match store.purge_older_than(config.purge_age()) {
        Ok(0) => {}
        Ok(removed) => info!("Removed {} stale checkpoint files", removed),
        Err(e) => warn!("Could not purge old checkpoints: {}", e),
    }

    let mode = if resume { ResumeMode::Resume } else { ResumeMode::Fresh };
    let mut generator = match ResumableCandidateGenerator::new(
        space.clone(),
        Arc::new(store),
        config.generator_options(mode),
    ) {
        Ok(generator) => generator,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    print_resume_state(&generator, resume);

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, saving progress...");
        handler_token.cancel();
    }) {
        warn!("Could not install Ctrl-C handler: {}", e);
    }

    let coordinator = match VerificationCoordinator::new(config.coordinator_config()) {
        Ok(coordinator) => coordinator.with_cancellation(cancel),
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let stats = RunStatistics::new();
    let oracle = Arc::new(ExactMatchOracle::new(target));
    let outcome = coordinator.run_with_progress(&mut generator, oracle, &stats, print_progress);
    let snapshot = stats.snapshot();
    let report = RunReport::new(
        &config.method,
        &space,
        config.threads,
        &outcome,
        &snapshot,
        config.show_password,
    );

    print_summary(&report, &snapshot);

    match report.write(&config.report_dir(), config.report_format) {
        Ok(paths) => {
            for path in paths {
                println!("✓ Report saved to: {}", path.display());
            }
        }
        Err(e) => warn!("Failed to write report to {}: {}", config.report_dir, e),
    }

    if let Some(path) = output {
        match io_utils::save_to_file(&report, Path::new(path)) {
            Ok(_) => println!("✓ Results saved to: {}", path),
            Err(e) => eprintln!("Error: Failed to save results: {}", e),
        }
    }
    debug!("Run finished with status {}", report.status);

    if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print_resume_state(generator: &ResumableCandidateGenerator, resume: bool) {
    let position = generator.position();
    if let Some(message) =
        resume_message(generator.state(), position.as_ref(), generator.attempts(), resume)
    {
        println!("{}\n", message);
    }
}

fn resume_message(
    state: GeneratorState,
    position: Option<&EnumerationPosition>,
    attempts: u64,
    resume: bool,
) -> Option<String> {
    match (state, position) {
        (GeneratorState::Resumed, Some(position)) => Some(format!(
            "✓ Resuming at {} after {} attempts",
            position, attempts
        )),
        (GeneratorState::Exhausted, _) if resume => Some(format!(
            "✓ Checkpoint marks the keyspace as exhausted after {} attempts",
            attempts
        )),
        _ if resume => Some("No checkpoint found, starting from the beginning".to_string()),
        _ => None,
    }
}

fn print_progress(update: &ProgressUpdate) {
    let percent = update
        .percentage()
        .map(|p| format!("{:.4}%", p))
        .unwrap_or_else(|| "?".to_string());
    println!(
        "[Run] Attempts: {} ({}) | {:.0} attempts/s | Elapsed: {}",
        update.attempts,
        percent,
        update.attempts_per_second(),
        format_duration(update.elapsed)
    );
}

fn print_summary(report: &RunReport, snapshot: &RunStatisticsSnapshot) {
    println!("\n📊 FINAL SUMMARY");
    println!("═══════════════════════════════════════════");
    if report.password_found {
        println!("Status:              FOUND");
        println!("Password:            {}", report.password.as_deref().unwrap_or_default());
    } else {
        println!("Status:              {}", report.status.to_uppercase());
        println!(
            "Reason:              {}",
            report.failure_reason.as_deref().unwrap_or("unknown")
        );
        if report.status == "interrupted" {
            println!("Resume with:         --resume");
        }
    }
    println!("Threads:             {}", report.threads_used);
    println!("Attempts:            {}", report.attempts);
    if snapshot.resumed_attempts > 0 {
        println!("  this session:      {}", snapshot.session_attempts());
    }
    println!("Time elapsed:        {}", format_duration(snapshot.duration));
    println!("Average rate:        {:.0} attempts/second", snapshot.attempts_per_second());
    if snapshot.peak_memory_bytes > 0 {
        println!("Peak memory:         {:.2} MB", snapshot.peak_memory_mb());
        println!("Average CPU:         {:.1}%", snapshot.avg_cpu_percent);
    }
    println!("═══════════════════════════════════════════\n");
}

fn show_status(config: &EngineConfig) -> ExitCode {
    let Some(store) = open_store(config) else {
        return ExitCode::FAILURE;
    };
    let checkpoint = match store.load_latest(&config.method) {
        Ok(Some(checkpoint)) => checkpoint,
        Ok(None) => {
            println!("No checkpoint found for '{}' in {}", config.method, config.checkpoint_dir);
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("Error: Failed to load checkpoint: {}", e);
            return ExitCode::FAILURE;
        }
    };

    println!("========================================");
    println!("  CHECKPOINT: {}", checkpoint.run_identity);
    println!("========================================");
    println!("  Search space: {}", checkpoint.search_space);
    match &checkpoint.position {
        Some(position) => println!("  Next position: {}", position),
        None => println!("  Next position: exhausted"),
    }
    println!("  Attempts: {}", checkpoint.attempts);
    println!("  Progress: {:.2}%", checkpoint.progress_percentage());
    println!("  Saved at: {}", checkpoint.created_at);
    println!("========================================");
    ExitCode::SUCCESS
}

fn purge_checkpoints(config: &EngineConfig) -> ExitCode {
    let Some(store) = open_store(config) else {
        return ExitCode::FAILURE;
    };
    match store.purge_older_than(config.purge_age()) {
        Ok(removed) => {
            println!(
                "✓ Removed {} checkpoint files older than {} days from {}",
                removed, config.purge_after_days, config.checkpoint_dir
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: Failed to purge checkpoints: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_config_file(output: &str) -> ExitCode {
    let config = EngineConfig::default();

    match config.save_to_file(Path::new(output)) {
        Ok(_) => {
            println!("✓ Default configuration file created: {}", output);
            println!("\nConfiguration:");
            println!("  Charset:             {}", config.charset);
            println!("  Lengths:             {} - {}", config.min_length, config.max_length);
            println!("  Threads:             {}", config.threads);
            println!("  Checkpoint interval: {}", config.checkpoint_interval);
            println!("  Checkpoint dir:      {}", config.checkpoint_dir);
            println!("  Method:              {}", config.method);
            println!("  Report dir:          {}", config.report_dir);
            println!("  Log file:            {}", config.log_file);
            println!("\nYou can now edit this file and use:");
            println!("  cargo run --release -- run <target> --config {}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error creating config file: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}h {:02}m {:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.2}s", duration.as_secs_f64())
    }
}
