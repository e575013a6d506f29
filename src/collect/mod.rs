//! Column assembly: one range query per (entity, metric kind).
//!
//! Queries run strictly sequentially — issued, awaited, normalized, folded —
//! which keeps a failed query attributable and the run reproducible. Any
//! backend failure aborts the whole export; there is no partial-result
//! salvage.

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::config::ExportConfig;
use crate::prom::promql::QueryBuilder;
use crate::prom::{PromClient, RawSeries};
use crate::schema::{EntityCatalog, EntitySpec, MetricKind, WorkloadSource};
use crate::series::{normalize, Column};
use crate::table::WideTable;

/// Drives the full collection pass for one export run.
pub struct Collector {
    client: PromClient,
    builder: QueryBuilder,
    catalog: EntityCatalog,
    cfg: ExportConfig,
}

impl Collector {
    pub fn new(cfg: ExportConfig, catalog: EntityCatalog) -> Result<Self> {
        let client = PromClient::new(&cfg.prom_url, cfg.timeout)?;
        let builder = QueryBuilder::new(&cfg.namespace, &cfg.rate_window, cfg.latency_unit);

        Ok(Self {
            client,
            builder,
            catalog,
            cfg,
        })
    }

    /// Collect every configured service (and optionally every discovered
    /// worker node) into one merged wide table. The table is raw: schema
    /// enforcement happens afterwards.
    pub async fn run(&self) -> Result<WideTable> {
        let mut table = WideTable::new();

        for service in &self.cfg.services {
            // Services missing from the catalog still get cpu/mem columns.
            let entity = self
                .catalog
                .get(service)
                .cloned()
                .unwrap_or_else(|| EntitySpec::plain(service));

            self.collect_service(&entity, &mut table).await?;
        }

        if self.cfg.collect_nodes {
            let instances = self.discover_worker_nodes().await?;
            if instances.is_empty() {
                warn!("no worker instances discovered; check node_exporter / node_uname_info");
            }
            for instance in instances {
                self.collect_node(&instance, &mut table).await?;
            }
        }

        Ok(table)
    }

    async fn collect_service(&self, entity: &EntitySpec, table: &mut WideTable) -> Result<()> {
        for kind in MetricKind::all() {
            if !entity.reports(*kind) {
                continue;
            }

            let name = entity.column(*kind);

            if !entity.queryable(*kind) {
                // Contracted but structurally unavailable: the column exists
                // and stays entirely missing, and no query is issued.
                debug!(column = %name, "telemetry unavailable, skipping query");
                table.merge(Column::empty(&name));
                continue;
            }

            let expr = self.service_expr(entity, *kind);
            let column = self.fetch_column(&expr, &name, *kind).await?;
            table.merge(column);
        }

        info!(service = %entity.name, rows = table.num_rows(), "collected service");
        Ok(())
    }

    fn service_expr(&self, entity: &EntitySpec, kind: MetricKind) -> String {
        match kind {
            MetricKind::Cpu => self.builder.container_cpu(&entity.name),
            MetricKind::Mem => self.builder.container_mem(&entity.name),
            MetricKind::Workload => match entity.workload {
                Some(WorkloadSource::TcpBytes) => self.builder.tcp_sent_bytes(&entity.name),
                _ => self.builder.http_requests(&entity.name),
            },
            MetricKind::Error => self.builder.http_errors(&entity.name),
            MetricKind::Latency50 => self.builder.latency_quantile(&entity.name, 0.5),
            MetricKind::Latency90 => self.builder.latency_quantile(&entity.name, 0.9),
        }
    }

    async fn collect_node(&self, instance: &str, table: &mut WideTable) -> Result<()> {
        let queries = [
            (
                format!("node_{instance}_cpu-usage"),
                self.builder.node_cpu_usage(instance),
            ),
            (
                format!("node_{instance}_mem-available-bytes"),
                self.builder.node_mem_available(instance),
            ),
            (
                format!("node_{instance}_net-rx-errors"),
                self.builder.node_net_rx_errors(instance),
            ),
            (
                format!("node_{instance}_net-tx-errors"),
                self.builder.node_net_tx_errors(instance),
            ),
        ];

        for (name, expr) in queries {
            let series = self
                .client
                .query_range(
                    &expr,
                    &self.cfg.window.start,
                    &self.cfg.window.end,
                    &self.cfg.step,
                )
                .await?;
            table.merge(normalize(
                &series,
                &name,
                crate::schema::AggregationPolicy::Sum,
            ));
        }

        info!(instance = %instance, "collected node");
        Ok(())
    }

    /// Find worker-node instances, preferring uname info (which lets the
    /// control-plane be excluded by name) and falling back to any instance
    /// exporting CPU counters.
    pub async fn discover_worker_nodes(&self) -> Result<Vec<String>> {
        let primary = self.builder.node_discovery(&self.cfg.controlplane_re);
        match self.client.query_instant(&primary).await {
            Ok(series) => {
                let instances = instance_labels(&series);
                if !instances.is_empty() {
                    return Ok(instances);
                }
            }
            Err(e) => {
                warn!(error = %e, "node_uname_info discovery failed, falling back");
            }
        }

        let fallback = self.builder.node_discovery_fallback();
        let series = self.client.query_instant(&fallback).await?;
        Ok(instance_labels(&series))
    }

    async fn fetch_column(&self, expr: &str, name: &str, kind: MetricKind) -> Result<Column> {
        let series = self
            .client
            .query_range(
                expr,
                &self.cfg.window.start,
                &self.cfg.window.end,
                &self.cfg.step,
            )
            .await?;

        debug!(column = %name, series = series.len(), "normalizing");
        Ok(normalize(&series, name, kind.policy()))
    }
}

/// Extract the `instance` label from every series that carries one.
fn instance_labels(series: &[RawSeries]) -> Vec<String> {
    series
        .iter()
        .filter_map(|s| s.metric.get("instance").cloned())
        .collect()
}
