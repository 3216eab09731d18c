use serde::{Deserialize, Serialize};

/// A node record as returned by PuppetDB's `nodes` endpoint.
///
/// PuppetDB reports missing values as `null`; empty strings are treated the
/// same way by the accessors below.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub certname: String,
    #[serde(default)]
    pub deactivated: Option<String>,
    #[serde(default)]
    pub report_environment: Option<String>,
    #[serde(default)]
    pub report_timestamp: Option<String>,
    #[serde(default)]
    pub latest_report_hash: Option<String>,
    #[serde(default)]
    pub latest_report_status: Option<String>,
}

impl Node {
    pub fn is_deactivated(&self) -> bool {
        non_empty(&self.deactivated).is_some()
    }

    pub fn environment(&self) -> &str {
        non_empty(&self.report_environment).unwrap_or_default()
    }

    pub fn report_timestamp(&self) -> Option<&str> {
        non_empty(&self.report_timestamp)
    }

    pub fn latest_report_hash(&self) -> Option<&str> {
        non_empty(&self.latest_report_hash)
    }

    pub fn latest_report_status(&self) -> Option<&str> {
        non_empty(&self.latest_report_status)
    }
}

/// One entry of `reports/<hash>/metrics`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetric {
    pub category: String,
    pub name: String,
    pub value: f64,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}
