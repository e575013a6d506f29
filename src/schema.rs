//! Entity catalog and output schema contract.
//!
//! The original export contract is a fixed, kind-major column order: `time`,
//! then every entity's cpu column, then mem, workload, error, latency-50,
//! latency-90. Which entities report which kinds is declarative data here, so
//! adding an entity or a metric kind is a catalog change, not a code change.

use std::collections::HashSet;

/// Category of signal collected per entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Cpu,
    Mem,
    Workload,
    Error,
    Latency50,
    Latency90,
}

impl MetricKind {
    /// All kinds in output-schema order.
    pub const fn all() -> &'static [MetricKind] {
        &[
            MetricKind::Cpu,
            MetricKind::Mem,
            MetricKind::Workload,
            MetricKind::Error,
            MetricKind::Latency50,
            MetricKind::Latency90,
        ]
    }

    /// Column-name suffix for this kind.
    pub fn suffix(&self) -> &'static str {
        match self {
            MetricKind::Cpu => "cpu",
            MetricKind::Mem => "mem",
            MetricKind::Workload => "workload",
            MetricKind::Error => "error",
            MetricKind::Latency50 => "latency-50",
            MetricKind::Latency90 => "latency-90",
        }
    }

    /// How multiple replica series (e.g. pods of one deployment) combine
    /// into one value at a shared timestamp. Counter-rate signals are
    /// additive across replicas; working-set memory is not, so it takes the
    /// replica maximum.
    pub fn policy(&self) -> AggregationPolicy {
        match self {
            MetricKind::Mem => AggregationPolicy::Max,
            _ => AggregationPolicy::Sum,
        }
    }
}

/// Replica-combine policy applied by the series normalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationPolicy {
    Sum,
    Max,
    Avg,
    Last,
}

/// How an entity's request workload is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadSource {
    /// HTTP request rate from the mesh telemetry.
    Http,
    /// Sent TCP bytes per second, for entities with no HTTP traffic.
    TcpBytes,
}

/// Whether the backend actually has telemetry for a metric kind the entity
/// is contracted to report. `Unavailable` columns appear in the schema but no
/// query is ever issued for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Telemetry {
    Available,
    Unavailable,
}

/// Capability row for one service entity.
#[derive(Debug, Clone)]
pub struct EntitySpec {
    pub name: String,
    /// Workload reporting, if any.
    pub workload: Option<WorkloadSource>,
    /// Error-rate reporting, if any.
    pub error: Option<Telemetry>,
    /// Latency-percentile reporting, if any.
    pub latency: Option<Telemetry>,
}

impl EntitySpec {
    /// An entity that only reports cpu and mem.
    pub fn plain(name: &str) -> Self {
        Self {
            name: name.to_string(),
            workload: None,
            error: None,
            latency: None,
        }
    }

    /// Full column name for one of this entity's metric kinds.
    pub fn column(&self, kind: MetricKind) -> String {
        format!("{}_{}", self.name, kind.suffix())
    }

    /// Whether this entity's output contract includes the given kind.
    pub fn reports(&self, kind: MetricKind) -> bool {
        match kind {
            MetricKind::Cpu | MetricKind::Mem => true,
            MetricKind::Workload => self.workload.is_some(),
            MetricKind::Error => self.error.is_some(),
            MetricKind::Latency50 | MetricKind::Latency90 => self.latency.is_some(),
        }
    }

    /// Whether a query should actually be issued for the given kind.
    pub fn queryable(&self, kind: MetricKind) -> bool {
        match kind {
            MetricKind::Cpu | MetricKind::Mem => true,
            MetricKind::Workload => self.workload.is_some(),
            MetricKind::Error => self.error == Some(Telemetry::Available),
            MetricKind::Latency50 | MetricKind::Latency90 => {
                self.latency == Some(Telemetry::Available)
            }
        }
    }
}

/// Ordered set of entities defining the output contract.
#[derive(Debug, Clone)]
pub struct EntityCatalog {
    pub entities: Vec<EntitySpec>,
}

/// Name of the row-key column.
pub const TIME_COLUMN: &str = "time";

impl EntityCatalog {
    /// The sock-shop deployment this tool was built around. The catalog
    /// includes entities (session-db, catalogue-db) that the default service
    /// list does not collect; their columns come out entirely missing, which
    /// downstream analysis relies on being present.
    pub fn sock_shop() -> Self {
        use Telemetry::{Available, Unavailable};
        use WorkloadSource::{Http, TcpBytes};

        let http = |name: &str, error: Option<Telemetry>, latency: bool| EntitySpec {
            name: name.to_string(),
            workload: Some(Http),
            error,
            latency: latency.then_some(Available),
        };

        Self {
            entities: vec![
                http("carts", Some(Available), true),
                EntitySpec::plain("carts-db"),
                http("catalogue", None, true),
                EntitySpec::plain("catalogue-db"),
                http("front-end", Some(Available), true),
                http("orders", Some(Available), true),
                EntitySpec::plain("orders-db"),
                http("payment", None, true),
                EntitySpec {
                    // AMQP-only: workload is TCP bytes/sec; no standard
                    // percentile or HTTP error telemetry exists for it.
                    name: "queue-master".to_string(),
                    workload: Some(TcpBytes),
                    error: Some(Unavailable),
                    latency: None,
                },
                EntitySpec::plain("rabbitmq"),
                EntitySpec::plain("session-db"),
                http("shipping", Some(Available), true),
                http("user", None, true),
                EntitySpec::plain("user-db"),
            ],
        }
    }

    /// Look up an entity by name.
    pub fn get(&self, name: &str) -> Option<&EntitySpec> {
        self.entities.iter().find(|e| e.name == name)
    }

    /// The fixed output column order: `time`, then for each metric kind every
    /// contracted entity's column, entities in catalog order.
    pub fn fixed_schema(&self) -> Vec<String> {
        let mut cols = vec![TIME_COLUMN.to_string()];
        for kind in MetricKind::all() {
            for entity in &self.entities {
                if entity.reports(*kind) {
                    cols.push(entity.column(*kind));
                }
            }
        }
        cols
    }

    /// Columns where "no data" means zero, not unknown: absent error-rate
    /// samples mean no errors were observed.
    pub fn zeroable_columns(&self) -> HashSet<String> {
        self.entities
            .iter()
            .filter(|e| e.error.is_some())
            .map(|e| e.column(MetricKind::Error))
            .collect()
    }
}
