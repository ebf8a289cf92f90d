use crate::manager::{now_unix, ManagerSnapshot};
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub healthcheck_score: Gauge,
    pub healthcheck_ready: Gauge,
    pub healthcheck_uptime_seconds: Gauge,
    pub healthcheck_check_value: GaugeVec,
    pub healthcheck_check_percentage: GaugeVec,
    pub healthcheck_check_up: GaugeVec,
    pub healthcheck_check_runs_total: GaugeVec,
    pub healthcheck_check_failures_total: GaugeVec,
    pub healthcheck_scrape_count_total: Counter,
    pub healthcheck_control_requests_total: CounterVec,
    pub healthcheck_aggregation_errors_total: Counter,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let healthcheck_score = Gauge::with_opts(opts!(
            "healthcheck_score",
            "Global machine health score (NaN while not computed)"
        ))?;
        let healthcheck_ready = Gauge::with_opts(opts!(
            "healthcheck_ready",
            "1 once the first full run completed"
        ))?;
        let healthcheck_uptime_seconds = Gauge::with_opts(opts!(
            "healthcheck_uptime_seconds",
            "Daemon uptime in seconds"
        ))?;
        let healthcheck_check_value = GaugeVec::new(
            opts!("healthcheck_check_value", "Last raw reading of a check"),
            &["check"],
        )?;
        let healthcheck_check_percentage = GaugeVec::new(
            opts!(
                "healthcheck_check_percentage",
                "Normalized percentage of a check within its range"
            ),
            &["check"],
        )?;
        let healthcheck_check_up = GaugeVec::new(
            opts!("healthcheck_check_up", "1 if the last run of a check succeeded"),
            &["check"],
        )?;
        let healthcheck_check_runs_total = GaugeVec::new(
            opts!("healthcheck_check_runs_total", "Runs of a check since start"),
            &["check"],
        )?;
        let healthcheck_check_failures_total = GaugeVec::new(
            opts!(
                "healthcheck_check_failures_total",
                "Failed runs of a check since start"
            ),
            &["check"],
        )?;
        let healthcheck_scrape_count_total = Counter::with_opts(opts!(
            "healthcheck_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;
        let healthcheck_control_requests_total = CounterVec::new(
            opts!(
                "healthcheck_control_requests_total",
                "Control requests by operation"
            ),
            &["operation"],
        )?;
        let healthcheck_aggregation_errors_total = Counter::with_opts(opts!(
            "healthcheck_aggregation_errors_total",
            "Passes that ended without a score"
        ))?;

        register(&registry, &healthcheck_score)?;
        register(&registry, &healthcheck_ready)?;
        register(&registry, &healthcheck_uptime_seconds)?;
        register(&registry, &healthcheck_check_value)?;
        register(&registry, &healthcheck_check_percentage)?;
        register(&registry, &healthcheck_check_up)?;
        register(&registry, &healthcheck_check_runs_total)?;
        register(&registry, &healthcheck_check_failures_total)?;
        register(&registry, &healthcheck_scrape_count_total)?;
        register(&registry, &healthcheck_control_requests_total)?;
        register(&registry, &healthcheck_aggregation_errors_total)?;

        healthcheck_score.set(f64::NAN);

        Ok(Arc::new(Self {
            registry,
            healthcheck_score,
            healthcheck_ready,
            healthcheck_uptime_seconds,
            healthcheck_check_value,
            healthcheck_check_percentage,
            healthcheck_check_up,
            healthcheck_check_runs_total,
            healthcheck_check_failures_total,
            healthcheck_scrape_count_total,
            healthcheck_control_requests_total,
            healthcheck_aggregation_errors_total,
        }))
    }

    pub fn update_from_snapshot(&self, snapshot: &ManagerSnapshot) {
        self.healthcheck_score
            .set(snapshot.score.unwrap_or(f64::NAN));
        self.healthcheck_ready
            .set(if snapshot.ready { 1.0 } else { 0.0 });
        if snapshot.error.is_some() {
            self.healthcheck_aggregation_errors_total.inc();
        }

        self.healthcheck_check_value.reset();
        self.healthcheck_check_percentage.reset();
        self.healthcheck_check_up.reset();
        self.healthcheck_check_runs_total.reset();
        self.healthcheck_check_failures_total.reset();

        for c in &snapshot.checks {
            let labels = [c.name.as_str()];
            if let Some(value) = c.value {
                self.healthcheck_check_value
                    .with_label_values(&labels)
                    .set(value);
            }
            if c.runs > 0 {
                self.healthcheck_check_up
                    .with_label_values(&labels)
                    .set(if c.value.is_some() { 1.0 } else { 0.0 });
            }
            self.healthcheck_check_runs_total
                .with_label_values(&labels)
                .set(c.runs as f64);
            self.healthcheck_check_failures_total
                .with_label_values(&labels)
                .set(c.failures as f64);
        }

        for contribution in &snapshot.contributions {
            if let Some(percentage) = contribution.percentage {
                self.healthcheck_check_percentage
                    .with_label_values(&[&contribution.name])
                    .set(percentage);
            }
        }

        let uptime = now_unix().saturating_sub(snapshot.started_at_unix) as f64;
        self.healthcheck_uptime_seconds.set(uptime);
    }

    pub fn inc_scrape_count(&self) {
        self.healthcheck_scrape_count_total.inc();
    }

    pub fn inc_control_request(&self, operation: &str) {
        self.healthcheck_control_requests_total
            .with_label_values(&[operation])
            .inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::CheckStatus;
    use crate::score::{Contribution, ContributionStatus};

    fn status(name: &str, value: Option<f64>, runs: u64, failures: u64) -> CheckStatus {
        CheckStatus {
            name: name.to_string(),
            kind: "command",
            performed: true,
            value,
            last_run: None,
            next_due_in_secs: None,
            runs,
            failures,
            last_error: None,
        }
    }

    fn snapshot() -> ManagerSnapshot {
        ManagerSnapshot {
            ready: true,
            started_at_unix: now_unix(),
            score: Some(62.5),
            raw_score: Some(37.5),
            error: None,
            checks: vec![
                status("cpu", Some(37.5), 3, 0),
                status("disk_io", None, 2, 2),
                status("idle", None, 0, 0),
            ],
            contributions: vec![Contribution {
                name: "cpu".to_string(),
                percentage: Some(37.5),
                coefficient: 2.0,
                weighted: Some(75.0),
                status: ContributionStatus::Included,
            }],
        }
    }

    #[test]
    fn snapshot_is_exported() {
        let metrics = Metrics::new().expect("регистрация метрик");
        metrics.update_from_snapshot(&snapshot());
        metrics.inc_scrape_count();
        metrics.inc_control_request("run_all");

        let body = String::from_utf8(metrics.encode_metrics().unwrap()).unwrap();
        assert!(body.contains("healthcheck_score 62.5"));
        assert!(body.contains("healthcheck_ready 1"));
        assert!(body.contains("healthcheck_check_up{check=\"cpu\"} 1"));
        assert!(body.contains("healthcheck_check_up{check=\"disk_io\"} 0"));
        assert!(!body.contains("healthcheck_check_up{check=\"idle\"}"));
        assert!(body.contains("healthcheck_check_failures_total{check=\"disk_io\"} 2"));
        assert!(body.contains("healthcheck_check_percentage{check=\"cpu\"} 37.5"));
        assert!(body.contains("healthcheck_scrape_count_total 1"));
        assert!(body.contains("healthcheck_control_requests_total{operation=\"run_all\"} 1"));
    }

    #[test]
    fn degenerate_snapshot_counts_aggregation_error() {
        let metrics = Metrics::new().unwrap();
        let mut snap = snapshot();
        snap.score = None;
        snap.error = Some("нет оценки".to_string());
        metrics.update_from_snapshot(&snap);

        let body = String::from_utf8(metrics.encode_metrics().unwrap()).unwrap();
        assert!(body.contains("healthcheck_score NaN"));
        assert!(body.contains("healthcheck_aggregation_errors_total 1"));
    }
}
