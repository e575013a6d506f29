//! Wide-table assembly: outer-join merge and schema enforcement.
//!
//! Columns arrive one at a time from the collector, each on its own
//! timestamp index. The table keeps the union of all row keys (outer join);
//! a cell a column never provided stays missing. Because each cell is
//! written only by its own column, the finished table is independent of the
//! order columns were merged in.

use std::collections::{HashMap, HashSet};

use crate::schema::TIME_COLUMN;
use crate::series::Column;

/// Table keyed by epoch-second row, with column order tracked separately
/// from the cells.
#[derive(Debug, Clone, Default)]
pub struct WideTable {
    rows: std::collections::BTreeMap<i64, HashMap<String, Option<f64>>>,
    columns: Vec<String>,
}

impl WideTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one column in. Merging into an empty table seeds the row index
    /// from the column itself.
    pub fn merge(&mut self, column: Column) {
        if !self.columns.contains(&column.name) {
            self.columns.push(column.name.clone());
        }

        for (ts, value) in column.points {
            self.rows.entry(ts).or_default().insert(column.name.clone(), value);
        }
    }

    /// Data columns in merge order (the row-key column is implicit).
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Row keys in ascending order.
    pub fn timestamps(&self) -> impl Iterator<Item = i64> + '_ {
        self.rows.keys().copied()
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value at (row, column); `None` covers both an explicit missing sample
    /// and a cell the column never provided.
    pub fn cell(&self, ts: i64, column: &str) -> Option<f64> {
        self.rows.get(&ts)?.get(column).copied().flatten()
    }

    /// Reconcile the computed table against the output contract:
    /// 1. inject every schema column absent from the table as all-missing,
    /// 2. zero-fill missing cells of zeroable columns (after injection, so a
    ///    never-computed zeroable column comes out all-zero),
    /// 3. project and reorder to exactly the schema, dropping extras.
    pub fn enforce(&self, schema: &[String], zeroable: &HashSet<String>) -> WideTable {
        let columns: Vec<String> = schema
            .iter()
            .filter(|name| name.as_str() != TIME_COLUMN)
            .cloned()
            .collect();

        let rows = self
            .rows
            .iter()
            .map(|(ts, cells)| {
                let projected = columns
                    .iter()
                    .map(|name| {
                        let value = cells.get(name).copied().flatten();
                        let value = match value {
                            None if zeroable.contains(name) => Some(0.0),
                            other => other,
                        };
                        (name.clone(), value)
                    })
                    .collect();
                (*ts, projected)
            })
            .collect();

        WideTable { rows, columns }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::TimeSeries;

    fn column(name: &str, points: &[(i64, Option<f64>)]) -> Column {
        Column {
            name: name.to_string(),
            points: points.iter().copied().collect::<TimeSeries>(),
        }
    }

    fn schema(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_seed_from_first_column() {
        let mut table = WideTable::new();
        table.merge(column("a", &[(100, Some(1.0)), (115, None)]));

        assert_eq!(table.num_rows(), 2);
        assert_eq!(table.cell(100, "a"), Some(1.0));
        assert_eq!(table.cell(115, "a"), None);
    }

    #[test]
    fn test_outer_join_preserves_all_row_keys() {
        let mut table = WideTable::new();
        table.merge(column("a", &[(100, Some(1.0)), (130, Some(2.0))]));
        table.merge(column("b", &[(115, Some(5.0)), (130, Some(6.0))]));

        assert_eq!(table.timestamps().collect::<Vec<_>>(), vec![100, 115, 130]);
        // Cells a column never provided are missing, not dropped.
        assert_eq!(table.cell(115, "a"), None);
        assert_eq!(table.cell(100, "b"), None);
        assert_eq!(table.cell(130, "b"), Some(6.0));
    }

    #[test]
    fn test_merge_order_independence() {
        let cols = [
            column("a", &[(100, Some(1.0)), (115, Some(2.0))]),
            column("b", &[(115, Some(3.0)), (130, None)]),
            column("c", &[(100, Some(4.0)), (145, Some(5.0))]),
        ];

        let orderings: [[usize; 3]; 6] = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];

        let reference: Vec<(i64, Vec<Option<f64>>)> = {
            let mut table = WideTable::new();
            for col in &cols {
                table.merge(col.clone());
            }
            table
                .timestamps()
                .map(|ts| {
                    (
                        ts,
                        ["a", "b", "c"].iter().map(|c| table.cell(ts, c)).collect(),
                    )
                })
                .collect()
        };

        for ordering in orderings {
            let mut table = WideTable::new();
            for idx in ordering {
                table.merge(cols[idx].clone());
            }

            let got: Vec<(i64, Vec<Option<f64>>)> = table
                .timestamps()
                .map(|ts| {
                    (
                        ts,
                        ["a", "b", "c"].iter().map(|c| table.cell(ts, c)).collect(),
                    )
                })
                .collect();

            assert_eq!(got, reference, "ordering {ordering:?} diverged");
        }
    }

    #[test]
    fn test_enforce_injects_missing_columns_in_order() {
        let mut table = WideTable::new();
        table.merge(column("b", &[(100, Some(1.0))]));

        let out = table.enforce(&schema(&["time", "a", "b", "c"]), &HashSet::new());

        assert_eq!(out.columns(), &["a", "b", "c"]);
        assert_eq!(out.cell(100, "a"), None);
        assert_eq!(out.cell(100, "b"), Some(1.0));
        assert_eq!(out.cell(100, "c"), None);
    }

    #[test]
    fn test_enforce_drops_columns_outside_schema() {
        let mut table = WideTable::new();
        table.merge(column("a", &[(100, Some(1.0))]));
        table.merge(column("node_10.0.0.5:9100_cpu-usage", &[(100, Some(0.4))]));

        let out = table.enforce(&schema(&["time", "a"]), &HashSet::new());

        assert_eq!(out.columns(), &["a"]);
        assert_eq!(out.cell(100, "node_10.0.0.5:9100_cpu-usage"), None);
    }

    #[test]
    fn test_enforce_zero_fills_after_injection() {
        let mut table = WideTable::new();
        table.merge(column("a_cpu", &[(100, Some(1.0)), (115, Some(2.0))]));

        let zeroable: HashSet<String> = ["a_error".to_string()].into_iter().collect();
        let out = table.enforce(&schema(&["time", "a_cpu", "a_error"]), &zeroable);

        // Never computed, but zeroable: all zeros rather than all missing.
        assert_eq!(out.cell(100, "a_error"), Some(0.0));
        assert_eq!(out.cell(115, "a_error"), Some(0.0));
    }

    #[test]
    fn test_enforce_zero_fills_partial_column_gaps_only() {
        let mut table = WideTable::new();
        table.merge(column("a_error", &[(100, Some(3.0)), (115, None)]));
        table.merge(column("a_cpu", &[(130, Some(1.0))]));

        let zeroable: HashSet<String> = ["a_error".to_string()].into_iter().collect();
        let out = table.enforce(&schema(&["time", "a_cpu", "a_error"]), &zeroable);

        assert_eq!(out.cell(100, "a_error"), Some(3.0));
        assert_eq!(out.cell(115, "a_error"), Some(0.0));
        assert_eq!(out.cell(130, "a_error"), Some(0.0));
        // Non-zeroable gaps stay missing.
        assert_eq!(out.cell(100, "a_cpu"), None);
    }

    #[test]
    fn test_empty_table_stays_empty_through_enforce() {
        let table = WideTable::new();
        let out = table.enforce(&schema(&["time", "a"]), &HashSet::new());
        assert!(out.is_empty());
    }
}
