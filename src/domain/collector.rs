//! PuppetDB collector. Turns one round of PuppetDB queries into samples.
//!
//! Every call to [`PuppetDbCollector::collect`] starts from scratch:
//!   list nodes → per-node outcome (+ report metrics) → status counts → duration
//!
//! A failure to list nodes fails the whole scrape and is reported as one
//! invalid sample per descriptor. Anything that goes wrong for a single node
//! only drops that node's affected samples.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::client::PuppetDb;

use super::schema::{
    category_key, MetricSchema, COLLECT_DURATION, NODE_LAST_REPORT_STATUS,
    NODE_REPORT_STATUS_COUNT, REPORT,
};
use super::types::{Node, ReportMetric};

/// Status bucket for nodes without a (recent) report.
pub const UNREPORTED: &str = "unreported";

/// `YYYY-MM-DDTHH:MM:SSZ`; PuppetDB appends milliseconds, which `%.f` accepts.
const REPORT_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

/// Byte layout of `YYYY-MM-DDTHH:MM:SS`: `d` is an ASCII digit, anything
/// else must match literally.
const REPORT_TIMESTAMP_SHAPE: &[u8; 19] = b"dddd-dd-ddTdd:dd:dd";

#[derive(Debug, Error)]
enum TimestampError {
    #[error("expected YYYY-MM-DDTHH:MM:SS[.fff]Z")]
    Shape,
    #[error("leap seconds are not accepted")]
    LeapSecond,
    #[error(transparent)]
    Parse(#[from] chrono::ParseError),
}

/// One observation produced by a scrape, keyed by descriptor key.
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    Value {
        metric: String,
        value: f64,
        labels: Vec<String>,
    },
    /// The metric could not be collected this scrape.
    Invalid { metric: String, error: String },
}

impl Sample {
    fn value(metric: impl Into<String>, value: f64, labels: Vec<String>) -> Self {
        Self::Value {
            metric: metric.into(),
            value,
            labels,
        }
    }

    pub fn metric(&self) -> &str {
        match self {
            Self::Value { metric, .. } | Self::Invalid { metric, .. } => metric,
        }
    }
}

/// What a single node contributed to the scrape.
#[derive(Debug)]
enum NodeOutcome {
    /// No report timestamp at all.
    Unreported,
    /// The node could not be processed and contributes nothing.
    Skipped { reason: String },
    Reported {
        status: String,
        stale: bool,
        samples: Vec<Sample>,
    },
}

pub struct PuppetDbCollector {
    client: Arc<dyn PuppetDb>,
    schema: Arc<MetricSchema>,
    unreported_after: Duration,
}

impl PuppetDbCollector {
    pub fn new(
        client: Arc<dyn PuppetDb>,
        schema: Arc<MetricSchema>,
        unreported_after: Duration,
    ) -> Self {
        Self {
            client,
            schema,
            unreported_after,
        }
    }

    pub fn schema(&self) -> &MetricSchema {
        &self.schema
    }

    /// Run one scrape against PuppetDB.
    pub async fn collect(&self) -> Vec<Sample> {
        let started = Instant::now();

        let nodes = match self.client.list_nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                error!(error = %e, "failed to list PuppetDB nodes");
                let message = e.to_string();
                return self
                    .schema
                    .iter()
                    .map(|(key, _)| Sample::Invalid {
                        metric: key.to_string(),
                        error: message.clone(),
                    })
                    .collect();
            }
        };

        let mut statuses: BTreeMap<String, u64> = BTreeMap::new();
        let mut samples = Vec::with_capacity(nodes.len() * 2 + self.schema.len());

        for node in &nodes {
            match self.process_node(node).await {
                NodeOutcome::Unreported => {
                    *statuses.entry(UNREPORTED.to_string()).or_default() += 1;
                }
                NodeOutcome::Skipped { reason } => {
                    warn!(certname = %node.certname, reason = %reason, "skipping node");
                }
                NodeOutcome::Reported {
                    status,
                    stale,
                    samples: node_samples,
                } => {
                    if stale {
                        *statuses.entry(UNREPORTED.to_string()).or_default() += 1;
                    }
                    *statuses.entry(status).or_default() += 1;
                    samples.extend(node_samples);
                }
            }
        }

        for (status, count) in statuses {
            samples.push(Sample::value(
                NODE_REPORT_STATUS_COUNT,
                count as f64,
                vec![status],
            ));
        }

        let elapsed = started.elapsed();
        samples.push(Sample::value(
            COLLECT_DURATION,
            elapsed.as_micros() as f64,
            Vec::new(),
        ));

        debug!(
            nodes = nodes.len(),
            samples = samples.len(),
            duration_us = elapsed.as_micros() as u64,
            "scrape completed"
        );

        samples
    }

    async fn process_node(&self, node: &Node) -> NodeOutcome {
        let deactivated = node.is_deactivated().to_string();

        let Some(raw_timestamp) = node.report_timestamp() else {
            return NodeOutcome::Unreported;
        };

        let reported_at = match parse_report_timestamp(raw_timestamp) {
            Ok(ts) => ts,
            Err(e) => {
                return NodeOutcome::Skipped {
                    reason: format!("failed to parse report timestamp {raw_timestamp:?}: {e}"),
                }
            }
        };

        let environment = node.environment().to_string();
        let host = node.certname.clone();
        let mut samples = vec![Sample::value(
            REPORT,
            reported_at.timestamp() as f64,
            vec![environment.clone(), host.clone(), deactivated],
        )];

        let stale = is_stale(reported_at, self.unreported_after, Utc::now());
        let status = node
            .latest_report_status()
            .unwrap_or(UNREPORTED)
            .to_string();

        samples.push(Sample::value(
            NODE_LAST_REPORT_STATUS,
            1.0,
            vec![status.clone(), host.clone()],
        ));

        if let Some(hash) = node.latest_report_hash() {
            match self.client.list_report_metrics(hash).await {
                Ok(metrics) => {
                    samples.extend(self.category_samples(&metrics, &environment, &host));
                }
                Err(e) => {
                    warn!(
                        certname = %host,
                        report_hash = %hash,
                        error = %e,
                        "failed to fetch report metrics"
                    );
                }
            }
        }

        NodeOutcome::Reported {
            status,
            stale,
            samples,
        }
    }

    /// Samples for the report metrics of one node, restricted to the
    /// configured categories. A repeated (category, name) keeps the last value.
    fn category_samples(&self, metrics: &[ReportMetric], environment: &str, host: &str) -> Vec<Sample> {
        let mut samples: Vec<Sample> = Vec::new();
        let mut seen: HashMap<(&str, &str), usize> = HashMap::new();

        for metric in metrics {
            if !self.schema.has_category(&metric.category) {
                continue;
            }

            let sample = Sample::value(
                category_key(&metric.category),
                metric.value,
                vec![
                    humanize_metric_name(&metric.name),
                    environment.to_string(),
                    host.to_string(),
                ],
            );

            match seen.get(&(metric.category.as_str(), metric.name.as_str())) {
                Some(&idx) => samples[idx] = sample,
                None => {
                    seen.insert((metric.category.as_str(), metric.name.as_str()), samples.len());
                    samples.push(sample);
                }
            }
        }

        samples
    }
}

/// Parse a report timestamp. Every field is zero-padded to its fixed width
/// and the only optional part is a `.digits` fraction before the `Z`.
fn parse_report_timestamp(raw: &str) -> Result<DateTime<Utc>, TimestampError> {
    let bytes = raw.as_bytes();
    let Some((head, tail)) = bytes.split_first_chunk::<19>() else {
        return Err(TimestampError::Shape);
    };

    let head_ok = head
        .iter()
        .zip(REPORT_TIMESTAMP_SHAPE)
        .all(|(b, want)| match *want {
            b'd' => b.is_ascii_digit(),
            _ => b == want,
        });
    let tail_ok = match tail {
        [b'Z'] => true,
        [b'.', fraction @ .., b'Z'] => {
            !fraction.is_empty() && fraction.iter().all(u8::is_ascii_digit)
        }
        _ => false,
    };
    if !head_ok || !tail_ok {
        return Err(TimestampError::Shape);
    }
    if &head[17..19] == b"60" {
        return Err(TimestampError::LeapSecond);
    }

    Ok(NaiveDateTime::parse_from_str(raw, REPORT_TIMESTAMP_FORMAT)?.and_utc())
}

/// True when `reported_at + unreported_after` lies strictly before `now`.
fn is_stale(reported_at: DateTime<Utc>, unreported_after: Duration, now: DateTime<Utc>) -> bool {
    TimeDelta::from_std(unreported_after)
        .ok()
        .and_then(|window| reported_at.checked_add_signed(window))
        .is_some_and(|deadline| deadline < now)
}

/// `total_time` → `Total Time`.
///
/// Underscores become spaces. A letter is upper-cased when it starts the
/// name or follows a word separator: whitespace or any ASCII character other
/// than a letter or digit, so `foo-bar` becomes `Foo-Bar`. The rest of each
/// word is left as is.
fn humanize_metric_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut at_word_start = true;
    for c in name.chars() {
        let c = if c == '_' { ' ' } else { c };
        if at_word_start {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = is_word_separator(c);
    }
    out
}

fn is_word_separator(c: char) -> bool {
    if c.is_ascii() {
        !c.is_ascii_alphanumeric()
    } else {
        c.is_whitespace()
    }
}
