use std::sync::Arc;

use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};

/// Prometheus-backed counters for plan materialization.
///
/// Cheap to clone; clones share the same underlying registry.
#[derive(Clone, Debug)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    operator_rows_in: CounterVec,
    operator_rows_out: CounterVec,
    operator_batches_in: CounterVec,
    operator_batches_out: CounterVec,
    operator_time_seconds: HistogramVec,
    kernel_invocations: CounterVec,
    kernel_rows: CounterVec,
    dataset_files_written: CounterVec,
    dataset_rows_written: CounterVec,
}

/// Input/output volume of one operator evaluation.
#[derive(Debug, Clone, Copy, Default)]
pub struct OperatorStats {
    pub rows_in: u64,
    pub rows_out: u64,
    pub batches_in: u64,
    pub batches_out: u64,
    pub secs: f64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    pub fn record_operator(&self, operator: &str, stats: OperatorStats) {
        let labels = [operator];
        self.inner
            .operator_rows_in
            .with_label_values(&labels)
            .inc_by(stats.rows_in as f64);
        self.inner
            .operator_rows_out
            .with_label_values(&labels)
            .inc_by(stats.rows_out as f64);
        self.inner
            .operator_batches_in
            .with_label_values(&labels)
            .inc_by(stats.batches_in as f64);
        self.inner
            .operator_batches_out
            .with_label_values(&labels)
            .inc_by(stats.batches_out as f64);
        self.inner
            .operator_time_seconds
            .with_label_values(&labels)
            .observe(stats.secs.max(0.0));
    }

    pub fn record_kernel_call(&self, function: &str, rows: u64) {
        self.inner
            .kernel_invocations
            .with_label_values(&[function])
            .inc();
        self.inner
            .kernel_rows
            .with_label_values(&[function])
            .inc_by(rows as f64);
    }

    pub fn record_dataset_write(&self, root: &str, files: u64, rows: u64) {
        self.inner
            .dataset_files_written
            .with_label_values(&[root])
            .inc_by(files as f64);
        self.inner
            .dataset_rows_written
            .with_label_values(&[root])
            .inc_by(rows as f64);
    }

    pub fn render_prometheus(&self) -> String {
        let metric_families = self.inner.registry.gather();
        let mut out = Vec::new();
        let enc = TextEncoder::new();
        if enc.encode(&metric_families, &mut out).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&out).to_string()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsInner {
    fn new() -> Self {
        let registry = Registry::new();

        let operator_rows_in = counter_vec(
            &registry,
            "kflow_operator_rows_in_total",
            "Input rows processed per operator",
            &["operator"],
        );
        let operator_rows_out = counter_vec(
            &registry,
            "kflow_operator_rows_out_total",
            "Output rows produced per operator",
            &["operator"],
        );
        let operator_batches_in = counter_vec(
            &registry,
            "kflow_operator_batches_in_total",
            "Input batches processed per operator",
            &["operator"],
        );
        let operator_batches_out = counter_vec(
            &registry,
            "kflow_operator_batches_out_total",
            "Output batches produced per operator",
            &["operator"],
        );
        let operator_time_seconds = histogram_vec(
            &registry,
            "kflow_operator_time_seconds",
            "Time spent in each operator",
            &["operator"],
        );
        let kernel_invocations = counter_vec(
            &registry,
            "kflow_kernel_invocations_total",
            "Registered function invocations",
            &["function"],
        );
        let kernel_rows = counter_vec(
            &registry,
            "kflow_kernel_rows_total",
            "Rows passed through registered functions",
            &["function"],
        );
        let dataset_files_written = counter_vec(
            &registry,
            "kflow_dataset_files_written_total",
            "Dataset files written",
            &["root"],
        );
        let dataset_rows_written = counter_vec(
            &registry,
            "kflow_dataset_rows_written_total",
            "Dataset rows written",
            &["root"],
        );

        Self {
            registry,
            operator_rows_in,
            operator_rows_out,
            operator_batches_in,
            operator_batches_out,
            operator_time_seconds,
            kernel_invocations,
            kernel_rows,
            dataset_files_written,
            dataset_rows_written,
        }
    }
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> CounterVec {
    let c = CounterVec::new(Opts::new(name, help), labels).expect("counter vec");
    registry
        .register(Box::new(c.clone()))
        .expect("register counter");
    c
}

fn histogram_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> HistogramVec {
    let h = HistogramVec::new(HistogramOpts::new(name, help), labels).expect("histogram vec");
    registry
        .register(Box::new(h.clone()))
        .expect("register histogram");
    h
}
