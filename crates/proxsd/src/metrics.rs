use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct Gauge {
    value: Arc<AtomicU64>,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn set(&self, value: f64) {
        let bits = value.to_bits();
        self.value.store(bits, Ordering::Relaxed);
    }

    pub fn get(&self) -> f64 {
        let bits = self.value.load(Ordering::Relaxed);
        f64::from_bits(bits)
    }
}

impl Default for Gauge {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Gauge {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
        }
    }
}

pub struct Counter {
    value: Arc<AtomicU64>,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Counter {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
        }
    }
}

/// Cache figures sampled at render time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStatus {
    pub cached_targets: usize,
    /// Time since the last refresh attempt; `None` before the first one.
    pub age: Option<Duration>,
}

impl CacheStatus {
    pub fn age_secs(&self) -> Option<u64> {
        self.age.map(|age| age.as_secs())
    }
}

/// Process-wide discovery counters. Reset only by restart.
#[derive(Default)]
pub struct DiscoveryMetrics {
    pub requests_total: Counter,
    pub cache_hits: Counter,
    pub cache_misses: Counter,
    pub errors_total: Counter,
    pub last_discovery_duration_seconds: Gauge,
}

impl DiscoveryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render_prometheus(&self, cache: &CacheStatus) -> String {
        let mut output = String::new();

        write_sample(
            &mut output,
            "discovery_requests_total",
            "Total number of target requests",
            "counter",
            self.requests_total.get(),
        );
        write_sample(
            &mut output,
            "discovery_cache_hits_total",
            "Number of cache hits",
            "counter",
            self.cache_hits.get(),
        );
        write_sample(
            &mut output,
            "discovery_cache_misses_total",
            "Number of cache misses",
            "counter",
            self.cache_misses.get(),
        );
        write_sample(
            &mut output,
            "discovery_errors_total",
            "Number of discovery errors",
            "counter",
            self.errors_total.get(),
        );
        write_sample(
            &mut output,
            "discovery_targets_count",
            "Current number of discovered targets",
            "gauge",
            cache.cached_targets,
        );
        write_sample(
            &mut output,
            "discovery_cache_age_seconds",
            "Age of the cache in seconds",
            "gauge",
            cache.age_secs().unwrap_or(0),
        );
        write_sample(
            &mut output,
            "discovery_last_duration_seconds",
            "Duration of last discovery run",
            "gauge",
            format_args!("{:.3}", self.last_discovery_duration_seconds.get()),
        );

        output
    }
}

fn write_sample(out: &mut String, name: &str, help: &str, kind: &str, value: impl std::fmt::Display) {
    if !out.is_empty() {
        out.push('\n');
    }
    // Writing into a String cannot fail.
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} {}", name, kind);
    let _ = writeln!(out, "{} {}", name, value);
}
