//! Metric schema: the descriptors exported on every scrape.
//!
//! The four fixed kinds are always present; every configured report category
//! adds one `puppet_report_<category>` descriptor. The schema is built once
//! from configuration and shared read-only afterwards.

use std::collections::{BTreeMap, BTreeSet};

pub const NODE_LAST_REPORT_STATUS: &str = "node_last_report_status";
pub const NODE_REPORT_STATUS_COUNT: &str = "node_report_status_count";
pub const REPORT: &str = "report";
pub const COLLECT_DURATION: &str = "collect_duration";

const CATEGORY_LABELS: &[&str] = &["name", "environment", "host"];

/// Name, help text and ordered label names of one exported metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDescriptor {
    pub name: String,
    pub help: String,
    pub labels: &'static [&'static str],
}

impl MetricDescriptor {
    fn new(name: impl Into<String>, help: impl Into<String>, labels: &'static [&'static str]) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            labels,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSchema {
    descriptors: BTreeMap<String, MetricDescriptor>,
    categories: BTreeSet<String>,
}

impl MetricSchema {
    pub fn build<I, S>(categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let categories: BTreeSet<String> = categories.into_iter().map(Into::into).collect();
        let mut descriptors = BTreeMap::new();

        descriptors.insert(
            NODE_LAST_REPORT_STATUS.to_string(),
            MetricDescriptor::new(
                "puppetdb_node_last_report_status",
                "Last report status for a node by type",
                &["status", "host"],
            ),
        );
        descriptors.insert(
            NODE_REPORT_STATUS_COUNT.to_string(),
            MetricDescriptor::new(
                "puppetdb_node_report_status_count",
                "Total count of reports status by type",
                &["status"],
            ),
        );
        descriptors.insert(
            REPORT.to_string(),
            MetricDescriptor::new(
                "puppet_report",
                "Timestamp of latest report",
                &["environment", "host", "deactivated"],
            ),
        );
        descriptors.insert(
            COLLECT_DURATION.to_string(),
            MetricDescriptor::new(
                "puppetdb_exporter_collect_duration",
                "Time taken to talk to puppetdb and generate metrics in microseconds",
                &[],
            ),
        );

        for category in &categories {
            let key = category_key(category);
            descriptors.insert(
                key.clone(),
                MetricDescriptor::new(
                    format!("puppet_{key}"),
                    format!("Total count of {category} per status"),
                    CATEGORY_LABELS,
                ),
            );
        }

        Self {
            descriptors,
            categories,
        }
    }

    pub fn get(&self, key: &str) -> Option<&MetricDescriptor> {
        self.descriptors.get(key)
    }

    /// Iterate `(key, descriptor)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetricDescriptor)> {
        self.descriptors.iter().map(|(k, d)| (k.as_str(), d))
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.categories.contains(category)
    }
}

/// Descriptor key for a report category, e.g. `time` → `report_time`.
pub fn category_key(category: &str) -> String {
    format!("report_{category}")
}
