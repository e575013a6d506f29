//! Series normalization: raw backend matrices to canonical columns.
//!
//! A range query returns zero or more labeled series (one per pod when a
//! service runs replicated). Normalization truncates timestamps to whole
//! epoch seconds, parses raw values with a missing sentinel for anything
//! non-numeric, and combines replica series at each shared timestamp under
//! the metric kind's aggregation policy. A missing value is the combine
//! identity; it never poisons a result, and a timestamp where every replica
//! is missing stays missing.

use std::collections::BTreeMap;

use crate::prom::{RawSeries, Sample};
use crate::schema::AggregationPolicy;

/// Ordered samples on an integer epoch-second index. `None` marks a value
/// the backend did not provide or could not be parsed as a finite number.
pub type TimeSeries = BTreeMap<i64, Option<f64>>;

/// A named time series destined for one output column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub points: TimeSeries,
}

impl Column {
    /// A column with no timestamps, used when the backend returned no series
    /// or a metric kind is structurally unavailable for an entity.
    pub fn empty(name: &str) -> Self {
        Self {
            name: name.to_string(),
            points: TimeSeries::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Convert one raw query response into the column named `name`.
pub fn normalize(series: &[RawSeries], name: &str, policy: AggregationPolicy) -> Column {
    let mut grouped: BTreeMap<i64, Vec<Option<f64>>> = BTreeMap::new();

    for raw in series {
        for Sample(ts, value) in &raw.values {
            // Truncation toward zero, matching how the index was built
            // everywhere downstream of the original exporter.
            grouped.entry(*ts as i64).or_default().push(parse_value(value));
        }
    }

    let points = grouped
        .into_iter()
        .map(|(ts, values)| (ts, combine(&values, policy)))
        .collect();

    Column {
        name: name.to_string(),
        points,
    }
}

/// Parse a raw sample value. The backend encodes values as JSON strings;
/// "NaN", "Inf"/"-Inf"/"+Inf", null, and anything unparseable all map to the
/// missing sentinel rather than an error — a single bad sample must not
/// abort a run.
pub fn parse_value(raw: &serde_json::Value) -> Option<f64> {
    let parsed = match raw {
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
        serde_json::Value::Number(n) => n.as_f64()?,
        _ => return None,
    };

    parsed.is_finite().then_some(parsed)
}

fn combine(values: &[Option<f64>], policy: AggregationPolicy) -> Option<f64> {
    let present: Vec<f64> = values.iter().filter_map(|v| *v).collect();
    if present.is_empty() {
        return None;
    }

    let combined = match policy {
        AggregationPolicy::Sum => present.iter().sum(),
        AggregationPolicy::Max => present.iter().copied().fold(f64::MIN, f64::max),
        AggregationPolicy::Avg => present.iter().sum::<f64>() / present.len() as f64,
        AggregationPolicy::Last => *present.last().expect("present is non-empty"),
    };

    Some(combined)
}
