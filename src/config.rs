//! Run configuration for the export and load subcommands.
//!
//! Everything is supplied through CLI flags; this module owns defaults,
//! window resolution, and validation so the rest of the crate only ever sees
//! a checked configuration.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

use crate::prom::promql::LatencyUnit;

/// Resolved wall-clock query window, RFC3339 in UTC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: String,
    pub end: String,
}

impl TimeWindow {
    /// Resolve the window from either an explicit start/end pair or an
    /// injection timestamp with a symmetric width around it. The injection
    /// shortcut only applies when neither explicit bound is given.
    pub fn resolve(
        start: Option<&str>,
        end: Option<&str>,
        inject: Option<i64>,
        window_minutes: u64,
    ) -> Result<Self> {
        if let (Some(inject), None, None) = (inject, start, end) {
            let half = (window_minutes * 60) as i64;
            return Ok(Self {
                start: rfc3339_from_epoch(inject - half)?,
                end: rfc3339_from_epoch(inject + half)?,
            });
        }

        match (start, end) {
            (Some(start), Some(end)) => {
                let start_ts = parse_rfc3339(start)?;
                let end_ts = parse_rfc3339(end)?;
                if end_ts <= start_ts {
                    bail!("window end {end} is not after start {start}");
                }
                Ok(Self {
                    start: start.to_string(),
                    end: end.to_string(),
                })
            }
            _ => bail!("either --start and --end, or --inject, must be provided"),
        }
    }
}

/// Format an epoch second as RFC3339 UTC with a `Z` suffix.
pub fn rfc3339_from_epoch(epoch: i64) -> Result<String> {
    let ts = Utc
        .timestamp_opt(epoch, 0)
        .single()
        .with_context(|| format!("epoch {epoch} is out of range"))?;
    Ok(ts.to_rfc3339_opts(SecondsFormat::Secs, true))
}

fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
}

/// Checked configuration for one export run.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Metrics backend base URL.
    pub prom_url: String,

    /// Service entities to collect, in collection order.
    pub services: Vec<String>,

    /// Kubernetes namespace for container and mesh selectors.
    pub namespace: String,

    /// Query window.
    pub window: TimeWindow,

    /// Sampling step passed to the backend (e.g. "15s").
    pub step: String,

    /// Rate window used inside every rate() expression (e.g. "3m").
    pub rate_window: String,

    /// Output CSV path.
    pub out: PathBuf,

    /// Per-request transport timeout ceiling.
    pub timeout: Duration,

    /// Unit used in the mesh latency histogram's metric name.
    pub latency_unit: LatencyUnit,

    /// Collect worker-node metrics as well.
    pub collect_nodes: bool,

    /// Regex matching control-plane node names to exclude from discovery.
    pub controlplane_re: String,
}

impl ExportConfig {
    pub fn validate(&self) -> Result<()> {
        if self.prom_url.is_empty() {
            bail!("backend URL is required");
        }
        if self.services.is_empty() {
            bail!("at least one service is required");
        }
        if self.step.is_empty() {
            bail!("step is required");
        }
        if self.rate_window.is_empty() {
            bail!("rate window is required");
        }
        if self.timeout.is_zero() {
            bail!("timeout must be positive");
        }
        Ok(())
    }
}

/// Relative weights of the simulated user behaviors.
#[derive(Debug, Clone, Copy)]
pub struct TaskWeights {
    pub browse: u32,
    pub cart: u32,
    pub login: u32,
    pub checkout: u32,
}

impl Default for TaskWeights {
    fn default() -> Self {
        // Mostly browsing, some cart traffic, a trickle of auth and
        // checkout so payment/shipping/orders still see load.
        Self {
            browse: 6,
            cart: 3,
            login: 1,
            checkout: 1,
        }
    }
}

impl TaskWeights {
    pub fn total(&self) -> u32 {
        self.browse + self.cart + self.login + self.checkout
    }
}

/// Checked configuration for one load-generation run.
#[derive(Debug, Clone)]
pub struct LoadConfig {
    /// Storefront base URL.
    pub target: String,

    /// Number of simulated concurrent users.
    pub users: usize,

    /// Run duration; zero means run until interrupted.
    pub duration: Duration,

    /// Time over which user starts are staggered.
    pub ramp: Duration,

    /// Bounds of the uniform think-time between tasks.
    pub wait_min: Duration,
    pub wait_max: Duration,

    pub weights: TaskWeights,

    /// Register/login each user at session start.
    pub enable_auth: bool,

    /// Issue checkout orders (requires auth to have succeeded).
    pub enable_checkout: bool,
}

impl LoadConfig {
    pub fn validate(&self) -> Result<()> {
        if self.target.is_empty() {
            bail!("target URL is required");
        }
        if self.users == 0 {
            bail!("users must be positive");
        }
        if self.wait_min > self.wait_max {
            bail!("wait-min must not exceed wait-max");
        }
        if self.weights.total() == 0 {
            bail!("at least one task weight must be positive");
        }
        if self.enable_checkout && !self.enable_auth {
            bail!("checkout requires auth to be enabled");
        }
        Ok(())
    }
}
