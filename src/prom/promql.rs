//! PromQL expression builders.
//!
//! Selector semantics mirror the deployment this tool collects from:
//! container metrics come from cAdvisor/Kubelet (filtered to real containers,
//! `container!="POD"`), request/error/latency metrics from Istio keyed by
//! destination service name, and node metrics from node_exporter. The rate
//! window is explicit state on the builder so nothing here depends on a
//! process-wide constant.

/// Unit used in the Istio duration histogram's metric name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyUnit {
    Millis,
    Seconds,
}

impl LatencyUnit {
    /// Histogram bucket metric name for this unit.
    pub fn bucket_metric(&self) -> &'static str {
        match self {
            LatencyUnit::Millis => "istio_request_duration_milliseconds_bucket",
            LatencyUnit::Seconds => "istio_request_duration_seconds_bucket",
        }
    }
}

/// Builds entity- and node-specific query expressions.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    namespace: String,
    rate_window: String,
    latency_unit: LatencyUnit,
}

impl QueryBuilder {
    pub fn new(namespace: &str, rate_window: &str, latency_unit: LatencyUnit) -> Self {
        Self {
            namespace: namespace.to_string(),
            rate_window: rate_window.to_string(),
            latency_unit,
        }
    }

    /// Per-pod CPU usage rate for a service's pods.
    pub fn container_cpu(&self, service: &str) -> String {
        format!(
            r#"sum by (pod) (rate(container_cpu_usage_seconds_total{{namespace="{ns}", pod=~"{svc}.*", container!="POD", container!=""}}[{w}]))"#,
            ns = self.namespace,
            svc = service,
            w = self.rate_window,
        )
    }

    /// Per-pod working-set memory. Working set tracks real memory pressure
    /// better than RSS for containerized workloads.
    pub fn container_mem(&self, service: &str) -> String {
        format!(
            r#"max by (pod) (container_memory_working_set_bytes{{namespace="{ns}", pod=~"{svc}.*", container!="POD", container!=""}})"#,
            ns = self.namespace,
            svc = service,
        )
    }

    /// Total HTTP request rate toward a destination service.
    pub fn http_requests(&self, service: &str) -> String {
        format!(
            r#"sum (rate(istio_requests_total{{reporter="source", destination_service_name="{svc}", destination_service_namespace="{ns}"}}[{w}]))"#,
            ns = self.namespace,
            svc = service,
            w = self.rate_window,
        )
    }

    /// 5xx response rate toward a destination service.
    pub fn http_errors(&self, service: &str) -> String {
        format!(
            r#"sum (rate(istio_requests_total{{reporter="source", destination_service_name="{svc}", destination_service_namespace="{ns}", response_code=~"5.."}}[{w}]))"#,
            ns = self.namespace,
            svc = service,
            w = self.rate_window,
        )
    }

    /// Request-duration quantile (e.g. 0.5, 0.9) toward a destination
    /// service, derived from the mesh histogram.
    pub fn latency_quantile(&self, service: &str, quantile: f64) -> String {
        format!(
            r#"histogram_quantile({q}, sum by (le) (rate({metric}{{reporter="source", destination_service_name="{svc}", destination_service_namespace="{ns}"}}[{w}])))"#,
            q = quantile,
            metric = self.latency_unit.bucket_metric(),
            ns = self.namespace,
            svc = service,
            w = self.rate_window,
        )
    }

    /// Sent TCP bytes/sec originating from a workload. Stands in for request
    /// rate on services that speak AMQP rather than HTTP.
    pub fn tcp_sent_bytes(&self, service: &str) -> String {
        format!(
            r#"sum(rate(istio_tcp_sent_bytes_total{{reporter="source", source_workload="{svc}", source_workload_namespace="{ns}"}}[{w}]))"#,
            ns = self.namespace,
            svc = service,
            w = self.rate_window,
        )
    }

    /// Fraction of node CPU time spent non-idle.
    pub fn node_cpu_usage(&self, instance: &str) -> String {
        format!(
            r#"sum by (instance) (rate(node_cpu_seconds_total{{mode!="idle", instance="{i}"}}[{w}])) / sum by (instance) (rate(node_cpu_seconds_total{{instance="{i}"}}[{w}]))"#,
            i = instance,
            w = self.rate_window,
        )
    }

    /// Available node memory in bytes.
    pub fn node_mem_available(&self, instance: &str) -> String {
        format!(r#"node_memory_MemAvailable_bytes{{instance="{instance}"}}"#)
    }

    /// Node NIC receive-error rate, loopback excluded.
    pub fn node_net_rx_errors(&self, instance: &str) -> String {
        format!(
            r#"sum by (instance) (rate(node_network_receive_errs_total{{instance="{i}", device!="lo"}}[{w}]))"#,
            i = instance,
            w = self.rate_window,
        )
    }

    /// Node NIC transmit-error rate, loopback excluded.
    pub fn node_net_tx_errors(&self, instance: &str) -> String {
        format!(
            r#"sum by (instance) (rate(node_network_transmit_errs_total{{instance="{i}", device!="lo"}}[{w}]))"#,
            i = instance,
            w = self.rate_window,
        )
    }

    /// Worker-node discovery via uname info, excluding control-plane nodes.
    pub fn node_discovery(&self, controlplane_re: &str) -> String {
        format!(
            r#"sum by (instance, nodename) (node_uname_info{{nodename!~"{controlplane_re}"}})"#
        )
    }

    /// Fallback discovery when node_uname_info is absent: any instance
    /// exporting CPU counters.
    pub fn node_discovery_fallback(&self) -> String {
        r#"sum by (instance) (rate(node_cpu_seconds_total[2m]))"#.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> QueryBuilder {
        QueryBuilder::new("sock-shop", "3m", LatencyUnit::Millis)
    }

    #[test]
    fn test_container_cpu_selectors() {
        let q = builder().container_cpu("carts");
        assert!(q.contains(r#"namespace="sock-shop""#));
        assert!(q.contains(r#"pod=~"carts.*""#));
        assert!(q.contains(r#"container!="POD""#));
        assert!(q.contains("[3m]"));
        assert!(q.starts_with("sum by (pod)"));
    }

    #[test]
    fn test_mem_uses_working_set_without_rate() {
        let q = builder().container_mem("orders");
        assert!(q.contains("container_memory_working_set_bytes"));
        assert!(!q.contains("rate("));
        assert!(q.starts_with("max by (pod)"));
    }

    #[test]
    fn test_error_rate_filters_5xx() {
        let q = builder().http_errors("front-end");
        assert!(q.contains(r#"response_code=~"5..""#));
        assert!(q.contains(r#"destination_service_name="front-end""#));
    }

    #[test]
    fn test_latency_unit_selects_histogram_metric() {
        let ms = builder().latency_quantile("user", 0.5);
        assert!(ms.contains("istio_request_duration_milliseconds_bucket"));
        assert!(ms.starts_with("histogram_quantile(0.5,"));

        let s = QueryBuilder::new("sock-shop", "3m", LatencyUnit::Seconds)
            .latency_quantile("user", 0.9);
        assert!(s.contains("istio_request_duration_seconds_bucket"));
        assert!(s.starts_with("histogram_quantile(0.9,"));
    }

    #[test]
    fn test_tcp_workload_keys_on_source_workload() {
        let q = builder().tcp_sent_bytes("queue-master");
        assert!(q.contains(r#"source_workload="queue-master""#));
        assert!(q.contains("istio_tcp_sent_bytes_total"));
    }

    #[test]
    fn test_rate_window_is_threaded_through() {
        let q = QueryBuilder::new("sock-shop", "5m", LatencyUnit::Millis).container_cpu("carts");
        assert!(q.contains("[5m]"));
        assert!(!q.contains("[3m]"));
    }

    #[test]
    fn test_node_discovery_excludes_controlplane() {
        let q = builder().node_discovery(".*(control-plane|master).*");
        assert!(q.contains(r#"nodename!~".*(control-plane|master).*""#));
    }
}
