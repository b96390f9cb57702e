//! Opt-in wall-clock sampling of merge phases.
//!
//! Samples are kept per thread and drained by [`take_report`]. Collection is
//! off unless `MDMERGE_TIMING` is truthy or [`set_enabled`] turns it on.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

pub const TIMING_ENV: &str = "MDMERGE_TIMING";

thread_local! {
    static SAMPLES: RefCell<Vec<(&'static str, Duration)>> = const { RefCell::new(Vec::new()) };
}

static ENABLED: AtomicBool = AtomicBool::new(false);

/// Latency distribution of one phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseTiming {
    pub phase: &'static str,
    pub count: usize,
    #[serde(rename = "total_us", serialize_with = "as_micros")]
    pub total: Duration,
    #[serde(rename = "p50_us", serialize_with = "as_micros")]
    pub p50: Duration,
    #[serde(rename = "p95_us", serialize_with = "as_micros")]
    pub p95: Duration,
    #[serde(rename = "p99_us", serialize_with = "as_micros")]
    pub p99: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct TimingReport {
    pub phases: Vec<PhaseTiming>,
}

/// True when `MDMERGE_TIMING` is `1`, `true`, `yes` or `on`.
#[must_use]
pub fn enabled_from_env() -> bool {
    std::env::var(TIMING_ENV).is_ok_and(|value| is_truthy(&value))
}

/// Turning collection off also drops this thread's pending samples.
pub fn set_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::Relaxed);
    if !enabled {
        SAMPLES.with(|samples| samples.borrow_mut().clear());
    }
}

#[must_use]
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

/// Run `f`, recording its duration under `phase` when collection is on.
pub fn timed<R>(phase: &'static str, f: impl FnOnce() -> R) -> R {
    if !is_enabled() {
        return f();
    }
    let started = Instant::now();
    let out = f();
    record(phase, started.elapsed());
    out
}

fn record(phase: &'static str, elapsed: Duration) {
    SAMPLES.with(|samples| samples.borrow_mut().push((phase, elapsed)));
}

/// Drain this thread's samples into a report, phases sorted by name.
#[must_use]
pub fn take_report() -> TimingReport {
    let samples = SAMPLES.with(|samples| std::mem::take(&mut *samples.borrow_mut()));
    let mut by_phase: BTreeMap<&'static str, Vec<Duration>> = BTreeMap::new();
    for (phase, elapsed) in samples {
        by_phase.entry(phase).or_default().push(elapsed);
    }
    let phases = by_phase
        .into_iter()
        .map(|(phase, mut values)| {
            values.sort_unstable();
            PhaseTiming {
                phase,
                count: values.len(),
                total: values.iter().sum(),
                p50: percentile(&values, 50),
                p95: percentile(&values, 95),
                p99: percentile(&values, 99),
            }
        })
        .collect();
    TimingReport { phases }
}

impl TimingReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Fixed-width table for terminal output.
    #[must_use]
    pub fn table(&self) -> String {
        if self.phases.is_empty() {
            return "no timing samples recorded\n".to_string();
        }
        let mut out = String::from(
            "phase                    count      total        p50        p95        p99\n",
        );
        for op in &self.phases {
            let _ = writeln!(
                out,
                "{:<24} {:>5} {:>10} {:>10} {:>10} {:>10}",
                op.phase,
                op.count,
                human(op.total),
                human(op.p50),
                human(op.p95),
                human(op.p99),
            );
        }
        out
    }
}

fn percentile(sorted: &[Duration], pct: usize) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let rank = (pct.min(100) * sorted.len()).div_ceil(100);
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}

fn human(duration: Duration) -> String {
    let micros = duration.as_micros();
    match micros {
        0..1_000 => format!("{micros}µs"),
        1_000..1_000_000 => format!("{}.{:03}ms", micros / 1_000, micros % 1_000),
        _ => format!("{}.{:03}s", micros / 1_000_000, (micros % 1_000_000) / 1_000),
    }
}

fn as_micros<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u128(duration.as_micros())
}

fn is_truthy(value: &str) -> bool {
    ["1", "true", "yes", "on"]
        .iter()
        .any(|truthy| value.trim().eq_ignore_ascii_case(truthy))
}

#[cfg(test)]
mod tests {
    use super::*;

    static GUARD: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[test]
    fn disabled_collection_records_nothing() {
        let _guard = GUARD.lock().expect("guard");
        set_enabled(false);
        assert_eq!(timed("collect", || 3_u8), 3);
        assert!(take_report().is_empty());
    }

    #[test]
    fn enabled_collection_groups_by_phase() {
        let _guard = GUARD.lock().expect("guard");
        set_enabled(true);
        let _ = take_report();
        record("insert", Duration::from_micros(3_000));
        record("insert", Duration::from_micros(1_000));
        record("insert", Duration::from_micros(2_000));
        record("collect", Duration::from_micros(10));
        timed("finalize", || ());
        let report = take_report();
        set_enabled(false);

        let names: Vec<_> = report.phases.iter().map(|p| p.phase).collect();
        assert_eq!(names, vec!["collect", "finalize", "insert"]);
        let insert = &report.phases[2];
        assert_eq!(insert.count, 3);
        assert_eq!(insert.total, Duration::from_micros(6_000));
        assert_eq!(insert.p50, Duration::from_micros(2_000));
        assert_eq!(insert.p99, Duration::from_micros(3_000));
    }

    #[test]
    fn report_serializes_micros() {
        let report = TimingReport {
            phases: vec![PhaseTiming {
                phase: "splice",
                count: 1,
                total: Duration::from_micros(1_500),
                p50: Duration::from_micros(1_500),
                p95: Duration::from_micros(1_500),
                p99: Duration::from_micros(1_500),
            }],
        };
        let json = serde_json::to_value(&report).expect("json");
        assert_eq!(json["phases"][0]["p50_us"], 1_500);
        assert!(report.table().contains("1.500ms"));
    }

    #[test]
    fn truthy_values() {
        assert!(is_truthy("On"));
        assert!(is_truthy(" 1 "));
        assert!(!is_truthy("off"));
    }
}
