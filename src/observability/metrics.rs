use prometheus::{
	Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

const NAMESPACE: &str = "fieldsync";

/// Central registry for all Prometheus metrics
pub struct MetricsRegistry {
	registry: Registry,

	// Pull metrics
	pub pull_requests_total: IntCounter,
	pub pull_source_types_total: IntCounterVec,
	pub pull_records_total: IntCounterVec,
	pub pull_duration_seconds: Histogram,

	// Push metrics
	pub push_requests_total: IntCounter,
	pub push_records_total: IntCounterVec,
	pub push_conflicts_total: IntCounter,
	pub push_duration_seconds: Histogram,

	/// Requests rejected as a whole (bad source type names, oversized batches).
	pub rejected_requests_total: IntCounter,
}

impl MetricsRegistry {
	pub fn new() -> prometheus::Result<Self> {
		let registry = Registry::new();

		let pull_requests_total = IntCounter::with_opts(
			Opts::new("pull_requests_total", "Total number of pull requests received")
				.namespace(NAMESPACE),
		)?;

		let pull_source_types_total = IntCounterVec::new(
			Opts::new(
				"pull_source_types_total",
				"Source types served by pull, by access outcome",
			)
			.namespace(NAMESPACE),
			&["source_type", "outcome"],
		)?;

		let pull_records_total = IntCounterVec::new(
			Opts::new(
				"pull_records_total",
				"Records returned by pull, split into updates and deletes",
			)
			.namespace(NAMESPACE),
			&["source_type", "kind"],
		)?;

		let pull_duration_seconds = Histogram::with_opts(
			HistogramOpts::new("pull_duration_seconds", "Duration of pull requests in seconds")
				.namespace(NAMESPACE)
				.buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]),
		)?;

		let push_requests_total = IntCounter::with_opts(
			Opts::new("push_requests_total", "Total number of push requests received")
				.namespace(NAMESPACE),
		)?;

		let push_records_total = IntCounterVec::new(
			Opts::new("push_records_total", "Pushed records by result status code")
				.namespace(NAMESPACE),
			&["source_type", "status"],
		)?;

		let push_conflicts_total = IntCounter::with_opts(
			Opts::new(
				"push_conflicts_total",
				"Pushed records rejected because the server held a newer revision",
			)
			.namespace(NAMESPACE),
		)?;

		let push_duration_seconds = Histogram::with_opts(
			HistogramOpts::new("push_duration_seconds", "Duration of push requests in seconds")
				.namespace(NAMESPACE)
				.buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]),
		)?;

		let rejected_requests_total = IntCounter::with_opts(
			Opts::new(
				"rejected_requests_total",
				"Pull or push requests rejected before any per-record work",
			)
			.namespace(NAMESPACE),
		)?;

		registry.register(Box::new(pull_requests_total.clone()))?;
		registry.register(Box::new(pull_source_types_total.clone()))?;
		registry.register(Box::new(pull_records_total.clone()))?;
		registry.register(Box::new(pull_duration_seconds.clone()))?;
		registry.register(Box::new(push_requests_total.clone()))?;
		registry.register(Box::new(push_records_total.clone()))?;
		registry.register(Box::new(push_conflicts_total.clone()))?;
		registry.register(Box::new(push_duration_seconds.clone()))?;
		registry.register(Box::new(rejected_requests_total.clone()))?;

		Ok(Self {
			registry,
			pull_requests_total,
			pull_source_types_total,
			pull_records_total,
			pull_duration_seconds,
			push_requests_total,
			push_records_total,
			push_conflicts_total,
			push_duration_seconds,
			rejected_requests_total,
		})
	}

	pub fn observe_pull_source(&self, source_type: &str, outcome: &str, updates: usize, deletes: usize) {
		self.pull_source_types_total
			.with_label_values(&[source_type, outcome])
			.inc();
		if updates > 0 {
			self.pull_records_total
				.with_label_values(&[source_type, "update"])
				.inc_by(updates as u64);
		}
		if deletes > 0 {
			self.pull_records_total
				.with_label_values(&[source_type, "delete"])
				.inc_by(deletes as u64);
		}
	}

	pub fn observe_push_record(&self, source_type: &str, status: u16) {
		self.push_records_total
			.with_label_values(&[source_type, &status.to_string()])
			.inc();
		if status == 409 {
			self.push_conflicts_total.inc();
		}
	}

	/// Encode metrics in Prometheus text format
	pub fn encode(&self) -> String {
		let encoder = TextEncoder::new();
		let metric_families = self.registry.gather();
		match encoder.encode_to_string(&metric_families) {
			Ok(s) => s,
			Err(e) => {
				log::error!("Failed to encode metrics: {}", e);
				String::new()
			}
		}
	}
}

/// Initialize the metrics registry
pub fn init_metrics() -> anyhow::Result<Arc<MetricsRegistry>> {
	Ok(Arc::new(MetricsRegistry::new()?))
}
