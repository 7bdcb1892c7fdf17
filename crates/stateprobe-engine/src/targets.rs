//! Target metrics for guided generation

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use stateprobe_core::{Case, Response};

/// Receives the best observed score of each metric.
pub trait TargetFeedback {
    fn target(&mut self, label: &str, value: f64, case: &Case);
}

/// A numeric score computed from a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetMetric {
    /// Seconds between sending the request and receiving the response
    ResponseTime,
    /// Body length in bytes
    ResponseSize,
}

impl TargetMetric {
    pub const ALL: [Self; 2] = [Self::ResponseTime, Self::ResponseSize];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ResponseTime => "response_time",
            Self::ResponseSize => "response_size",
        }
    }

    #[must_use]
    pub fn evaluate(self, response: &Response) -> f64 {
        match self {
            Self::ResponseTime => response.elapsed.as_secs_f64(),
            Self::ResponseSize => response.content.len() as f64,
        }
    }
}

impl fmt::Display for TargetMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TargetMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or_else(|| {
                let known: Vec<_> = Self::ALL.iter().map(|m| m.name()).collect();
                format!("unknown target `{s}` (known: {})", known.join(", "))
            })
    }
}

/// Per-metric samples gathered during one suite.
#[derive(Debug, Default)]
pub struct MetricCollector {
    metrics: Vec<TargetMetric>,
    samples: Vec<Vec<(f64, Arc<Case>)>>,
}

impl MetricCollector {
    #[must_use]
    pub fn new(metrics: Vec<TargetMetric>) -> Self {
        let samples = vec![Vec::new(); metrics.len()];
        Self { metrics, samples }
    }

    #[must_use]
    pub fn metrics(&self) -> &[TargetMetric] {
        &self.metrics
    }

    /// Evaluate every metric against `response`.
    pub fn store(&mut self, case: &Arc<Case>, response: &Response) {
        for (metric, samples) in self.metrics.iter().zip(&mut self.samples) {
            samples.push((metric.evaluate(response), Arc::clone(case)));
        }
    }

    /// Send the maximum sample of each metric to `feedback`.
    pub fn maximize(&self, feedback: &mut dyn TargetFeedback) {
        for (metric, samples) in self.metrics.iter().zip(&self.samples) {
            let best = samples
                .iter()
                .max_by(|(a, _), (b, _)| a.total_cmp(b));
            if let Some((value, case)) = best {
                feedback.target(metric.name(), *value, case);
            }
        }
    }

    pub fn reset(&mut self) {
        for samples in &mut self.samples {
            samples.clear();
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.iter().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stateprobe_core::{Headers, OperationRef};
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder(Vec<(String, f64, String)>);

    impl TargetFeedback for Recorder {
        fn target(&mut self, label: &str, value: f64, case: &Case) {
            self.0.push((label.to_string(), value, case.id.clone()));
        }
    }

    fn case(id: &str) -> Arc<Case> {
        Arc::new(Case::new(id, Arc::new(OperationRef::new("GET", "/", "http://x"))))
    }

    fn response(millis: u64, body: &str) -> Response {
        Response {
            status_code: 200,
            message: "OK".into(),
            headers: Headers::new(),
            content: body.as_bytes().to_vec(),
            http_version: "HTTP/1.1".into(),
            elapsed: Duration::from_millis(millis),
            verify: true,
        }
    }

    #[test]
    fn parse_names() {
        assert_eq!("response_time".parse::<TargetMetric>(), Ok(TargetMetric::ResponseTime));
        assert_eq!("response_size".parse::<TargetMetric>(), Ok(TargetMetric::ResponseSize));
        assert!("latency".parse::<TargetMetric>().is_err());
    }

    #[test]
    fn maximize_reports_best_sample_per_metric() {
        let mut collector =
            MetricCollector::new(vec![TargetMetric::ResponseTime, TargetMetric::ResponseSize]);
        collector.store(&case("slow"), &response(900, "x"));
        collector.store(&case("big"), &response(10, "xxxxxxxx"));

        let mut recorder = Recorder::default();
        collector.maximize(&mut recorder);
        assert_eq!(recorder.0.len(), 2);
        assert_eq!(recorder.0[0].0, "response_time");
        assert_eq!(recorder.0[0].2, "slow");
        assert_eq!(recorder.0[1], ("response_size".into(), 8.0, "big".into()));
    }

    #[test]
    fn reset_clears_samples() {
        let mut collector = MetricCollector::new(vec![TargetMetric::ResponseSize]);
        collector.store(&case("a"), &response(1, "abc"));
        assert_eq!(collector.len(), 1);
        collector.reset();
        assert!(collector.is_empty());

        let mut recorder = Recorder::default();
        collector.maximize(&mut recorder);
        assert!(recorder.0.is_empty());
    }

    #[test]
    fn no_metrics_collects_nothing() {
        let mut collector = MetricCollector::default();
        collector.store(&case("a"), &response(1, "abc"));
        assert!(collector.is_empty());
    }
}
