use chrono::{DateTime, Local};
use log::debug;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// One reading of the process' resource usage. Missing values are `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceSample {
    pub memory_bytes: Option<u64>,
    pub cpu_percent: Option<f64>,
}

/// Source of resource readings for [`RunStatistics`].
pub trait ResourceSampler: Send {
    fn sample(&mut self) -> ResourceSample;
}

/// Sampler that never reports anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSampler;

impl ResourceSampler for NoopSampler {
    fn sample(&mut self) -> ResourceSample {
        ResourceSample::default()
    }
}

/// Reads resident memory and CPU time of the current process from procfs.
///
/// CPU percent is computed between consecutive samples, so the first
/// sample carries no CPU value. Off Linux every sample is empty.
#[derive(Debug, Default)]
pub struct ProcessSampler {
    last_cpu: Option<(Instant, u64)>,
}

impl ProcessSampler {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(target_os = "linux")]
mod procfs {
    /// Clock ticks per second of the utime/stime fields (`USER_HZ`).
    const USER_HZ: f64 = 100.0;

    pub(super) fn resident_bytes() -> Option<u64> {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        let line = status.lines().find(|line| line.starts_with("VmRSS:"))?;
        let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
        Some(kib * 1024)
    }

    /// utime + stime of this process, in clock ticks.
    pub(super) fn cpu_ticks() -> Option<u64> {
        let stat = std::fs::read_to_string("/proc/self/stat").ok()?;
        // The command name may contain spaces; fields resume after its closing paren.
        let rest = &stat[stat.rfind(')')? + 1..];
        let fields: Vec<&str> = rest.split_whitespace().collect();
        let utime: u64 = fields.get(11)?.parse().ok()?;
        let stime: u64 = fields.get(12)?.parse().ok()?;
        Some(utime + stime)
    }

    pub(super) fn ticks_to_secs(ticks: u64) -> f64 {
        ticks as f64 / USER_HZ
    }
}

impl ResourceSampler for ProcessSampler {
    #[cfg(target_os = "linux")]
    fn sample(&mut self) -> ResourceSample {
        let now = Instant::now();
        let cpu_percent = procfs::cpu_ticks().and_then(|ticks| {
            let previous = self.last_cpu.replace((now, ticks));
            previous.and_then(|(at, previous_ticks)| {
                let wall = now.duration_since(at).as_secs_f64();
                if wall <= 0.0 {
                    return None;
                }
                let busy = procfs::ticks_to_secs(ticks.saturating_sub(previous_ticks));
                Some(busy / wall * 100.0)
            })
        });

        ResourceSample {
            memory_bytes: procfs::resident_bytes(),
            cpu_percent,
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn sample(&mut self) -> ResourceSample {
        ResourceSample::default()
    }
}

struct Timing {
    started: Option<Instant>,
    started_at: Option<DateTime<Local>>,
    ended_at: Option<DateTime<Local>>,
    elapsed_at_stop: Option<Duration>,
}

struct ResourceTracker {
    sampler: Box<dyn ResourceSampler>,
    last_sample: Option<Instant>,
    peak_memory_bytes: u64,
    cpu_total: f64,
    cpu_samples: u64,
}

impl ResourceTracker {
    fn take_sample(&mut self) {
        let sample = self.sampler.sample();
        self.last_sample = Some(Instant::now());
        if let Some(bytes) = sample.memory_bytes {
            self.peak_memory_bytes = self.peak_memory_bytes.max(bytes);
        }
        if let Some(cpu) = sample.cpu_percent {
            self.cpu_total += cpu;
            self.cpu_samples += 1;
        }
    }

    fn is_due(&self, interval: Duration) -> bool {
        self.last_sample
            .map_or(true, |last| last.elapsed() >= interval)
    }

    fn average_cpu(&self) -> f64 {
        if self.cpu_samples == 0 {
            0.0
        } else {
            self.cpu_total / self.cpu_samples as f64
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Attempt counter, timing window and resource usage of one run.
///
/// Shared by reference between the coordinator and observers; every method
/// takes `&self`. Attempts are only counted between [`start`](Self::start)
/// and [`stop`](Self::stop).
pub struct RunStatistics {
    attempts: AtomicU64,
    resumed_attempts: AtomicU64,
    running: AtomicBool,
    timing: Mutex<Timing>,
    resources: Mutex<ResourceTracker>,
    sample_interval: Duration,
}

impl Default for RunStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStatistics {
    pub fn new() -> Self {
        Self::with_sampler(Box::new(ProcessSampler::new()))
    }

    pub fn with_sampler(sampler: Box<dyn ResourceSampler>) -> Self {
        RunStatistics {
            attempts: AtomicU64::new(0),
            resumed_attempts: AtomicU64::new(0),
            running: AtomicBool::new(false),
            timing: Mutex::new(Timing {
                started: None,
                started_at: None,
                ended_at: None,
                elapsed_at_stop: None,
            }),
            resources: Mutex::new(ResourceTracker {
                sampler,
                last_sample: None,
                peak_memory_bytes: 0,
                cpu_total: 0.0,
                cpu_samples: 0,
            }),
            sample_interval: Duration::from_secs(1),
        }
    }

    /// Minimum time between two resource samples taken by `record_attempt`.
    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    /// Carry over attempts made by earlier runs of a resumed search.
    pub fn seed_attempts(&self, attempts: u64) {
        self.resumed_attempts.store(attempts, Ordering::SeqCst);
        self.attempts.store(attempts, Ordering::SeqCst);
    }

    pub fn start(&self) {
        {
            let mut timing = lock(&self.timing);
            timing.started = Some(Instant::now());
            timing.started_at = Some(Local::now());
            timing.ended_at = None;
            timing.elapsed_at_stop = None;
        }
        lock(&self.resources).take_sample();
        self.running.store(true, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        lock(&self.resources).take_sample();
        let mut timing = lock(&self.timing);
        timing.ended_at = Some(Local::now());
        timing.elapsed_at_stop = timing.started.map(|started| started.elapsed());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Count one completed attempt. Returns `false` (and counts nothing)
    /// outside the start/stop window.
    pub fn record_attempt(&self) -> bool {
        if !self.is_running() {
            debug!("Attempt recorded outside the statistics window, ignoring");
            return false;
        }
        self.attempts.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut tracker) = self.resources.try_lock() {
            if tracker.is_due(self.sample_interval) {
                tracker.take_sample();
            }
        }
        true
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> RunStatisticsSnapshot {
        let (started_at, ended_at, duration) = {
            let timing = lock(&self.timing);
            let duration = timing
                .elapsed_at_stop
                .or_else(|| timing.started.map(|started| started.elapsed()))
                .unwrap_or(Duration::ZERO);
            (timing.started_at, timing.ended_at, duration)
        };
        let (peak_memory_bytes, avg_cpu_percent) = {
            let tracker = lock(&self.resources);
            (tracker.peak_memory_bytes, tracker.average_cpu())
        };

        RunStatisticsSnapshot {
            attempts: self.attempts(),
            resumed_attempts: self.resumed_attempts.load(Ordering::SeqCst),
            started_at,
            ended_at,
            duration,
            peak_memory_bytes,
            avg_cpu_percent,
        }
    }
}

/// Read-only view of [`RunStatistics`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStatisticsSnapshot {
    /// Cumulative attempts, including those carried over from a checkpoint.
    pub attempts: u64,
    pub resumed_attempts: u64,
    pub started_at: Option<DateTime<Local>>,
    pub ended_at: Option<DateTime<Local>>,
    pub duration: Duration,
    pub peak_memory_bytes: u64,
    pub avg_cpu_percent: f64,
}

impl RunStatisticsSnapshot {
    /// Attempts made by this run alone.
    pub fn session_attempts(&self) -> u64 {
        self.attempts.saturating_sub(self.resumed_attempts)
    }

    pub fn attempts_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.session_attempts() as f64 / secs
        } else {
            0.0
        }
    }

    pub fn peak_memory_mb(&self) -> f64 {
        self.peak_memory_bytes as f64 / (1024.0 * 1024.0)
    }
}

impl fmt::Display for RunStatisticsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run Statistics:")?;
        writeln!(f, "  Attempts: {}", self.attempts)?;
        if self.resumed_attempts > 0 {
            writeln!(f, "  Resumed from: {}", self.resumed_attempts)?;
        }
        writeln!(f, "  Duration (secs): {:.3}", self.duration.as_secs_f64())?;
        writeln!(f, "  Rate: {:.1} attempts/s", self.attempts_per_second())?;
        writeln!(f, "  Peak memory: {:.2} MB", self.peak_memory_mb())?;
        write!(f, "  Average CPU: {:.1}%", self.avg_cpu_percent)
    }
}
