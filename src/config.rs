//! Exporter configuration: defaults ← optional YAML file ← flags/env.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use figment::providers::{Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::client::ClientOptions;

pub const DEFAULT_CATEGORIES: &str = "resources,time,changes,events";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

/// Flags shared by every subcommand. Only values that were actually given
/// (on the command line or via the environment) override the config file.
#[derive(Debug, Default, Args, Serialize)]
pub struct ExporterArgs {
    /// PuppetDB query root, e.g. https://puppetdb:8081/pdb/query
    #[arg(short = 'u', long, env = "PUPPETDB_URL")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub puppetdb_url: Option<String>,

    /// A PEM encoded client certificate file
    #[arg(long, env = "PUPPETDB_CERT_FILE")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_file: Option<PathBuf>,

    /// A PEM encoded private key file
    #[arg(long, env = "PUPPETDB_KEY_FILE")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,

    /// A PEM encoded CA certificate
    #[arg(long, env = "PUPPETDB_CA_FILE")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<PathBuf>,

    /// Skip TLS certificate verification
    #[arg(long, env = "PUPPETDB_SSL_SKIP_VERIFY")]
    #[serde(skip_serializing_if = "is_false")]
    pub ssl_skip_verify: bool,

    /// Address to listen on for the web interface and telemetry
    #[arg(long, env = "PUPPETDB_LISTEN_ADDRESS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen_address: Option<String>,

    /// Path under which to expose metrics
    #[arg(long, env = "PUPPETDB_METRIC_PATH")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric_path: Option<String>,

    /// Enable debug logging
    #[arg(long, env = "PUPPETDB_VERBOSE")]
    #[serde(skip_serializing_if = "is_false")]
    pub verbose: bool,

    /// Count nodes as unreported when their latest report is older than this
    #[arg(long, env = "PUPPETDB_UNREPORTED_NODE")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unreported_node: Option<String>,

    /// Comma-separated report metric categories to export
    #[arg(long, env = "REPORT_METRICS_CATEGORIES")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categories: Option<String>,

    /// Timeout for each request to PuppetDB
    #[arg(long, env = "PUPPETDB_REQUEST_TIMEOUT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<String>,

    /// Log output format
    #[arg(long, env = "PUPPETDB_LOG_FORMAT", value_enum)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_format: Option<LogFormat>,

    /// Path to a YAML config file
    #[arg(long, env = "PUPPETDB_EXPORTER_CONFIG")]
    #[serde(skip)]
    pub config: Option<PathBuf>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Unvalidated configuration as merged from all sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub puppetdb_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<PathBuf>,
    pub ssl_skip_verify: bool,
    pub listen_address: String,
    pub metric_path: String,
    pub verbose: bool,
    pub unreported_node: String,
    pub categories: String,
    pub request_timeout: String,
    pub log_format: LogFormat,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            puppetdb_url: None,
            cert_file: None,
            key_file: None,
            ca_file: None,
            ssl_skip_verify: false,
            listen_address: "0.0.0.0:9121".to_string(),
            metric_path: "/metrics".to_string(),
            verbose: false,
            unreported_node: "2h".to_string(),
            categories: DEFAULT_CATEGORIES.to_string(),
            request_timeout: "30s".to_string(),
            log_format: LogFormat::Json,
        }
    }
}

/// Validated exporter configuration.
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    pub client: ClientOptions,
    pub listen_address: String,
    pub metric_path: String,
    pub verbose: bool,
    pub log_format: LogFormat,
    pub unreported_after: Duration,
    pub categories: BTreeSet<String>,
}

/// Merge defaults, the optional config file and the given flags, then validate.
pub fn load(args: &ExporterArgs) -> Result<ExporterConfig> {
    let mut figment = Figment::from(Serialized::defaults(RawConfig::default()));
    if let Some(path) = &args.config {
        if !path.exists() {
            bail!("config file {} does not exist", path.display());
        }
        figment = figment.merge(Yaml::file(path));
    }
    let raw: RawConfig = figment
        .merge(Serialized::defaults(args))
        .extract()
        .context("merging configuration")?;
    raw.validate()
}

impl RawConfig {
    pub fn validate(self) -> Result<ExporterConfig> {
        let url = self
            .puppetdb_url
            .filter(|u| !u.trim().is_empty())
            .context("a PuppetDB URL is required (--puppetdb-url or PUPPETDB_URL)")?;

        let unreported_after = humantime::parse_duration(&self.unreported_node)
            .with_context(|| format!("failed to parse unreported duration {:?}", self.unreported_node))?;
        let timeout = humantime::parse_duration(&self.request_timeout)
            .with_context(|| format!("failed to parse request timeout {:?}", self.request_timeout))?;
        if timeout.is_zero() {
            bail!("request timeout must be greater than zero");
        }

        if !self.metric_path.starts_with('/') || self.metric_path == "/" {
            bail!(
                "metric path {:?} must start with '/' and must not be the root path",
                self.metric_path
            );
        }

        let categories = parse_categories(&self.categories)?;

        Ok(ExporterConfig {
            client: ClientOptions {
                url,
                cert_path: self.cert_file,
                key_path: self.key_file,
                ca_cert_path: self.ca_file,
                ssl_verify: !self.ssl_skip_verify,
                timeout,
            },
            listen_address: self.listen_address,
            metric_path: self.metric_path,
            verbose: self.verbose,
            log_format: self.log_format,
            unreported_after,
            categories,
        })
    }
}

/// Split a comma-separated category list. Names end up in metric names, so
/// they are restricted to `[A-Za-z0-9_]`.
pub fn parse_categories(raw: &str) -> Result<BTreeSet<String>> {
    let mut categories = BTreeSet::new();
    for category in raw.split(',').map(str::trim).filter(|c| !c.is_empty()) {
        if !category
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            bail!("invalid report metrics category {category:?}");
        }
        categories.insert(category.to_string());
    }
    Ok(categories)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(url: &str) -> ExporterArgs {
        ExporterArgs {
            puppetdb_url: Some(url.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_apply() {
        let cfg = load(&args("http://puppetdb:8080/pdb/query")).unwrap();
        assert_eq!(cfg.listen_address, "0.0.0.0:9121");
        assert_eq!(cfg.metric_path, "/metrics");
        assert_eq!(cfg.unreported_after, Duration::from_secs(2 * 3600));
        assert_eq!(cfg.client.timeout, Duration::from_secs(30));
        assert!(cfg.client.ssl_verify);
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert_eq!(
            cfg.categories.iter().map(String::as_str).collect::<Vec<_>>(),
            ["changes", "events", "resources", "time"]
        );
    }

    #[test]
    fn url_is_required() {
        let err = load(&ExporterArgs::default()).unwrap_err();
        assert!(err.to_string().contains("PuppetDB URL is required"));
    }

    #[test]
    fn bad_duration_is_fatal() {
        let mut a = args("http://puppetdb:8080/pdb/query");
        a.unreported_node = Some("two hours".to_string());
        let err = load(&a).unwrap_err();
        assert!(err.to_string().contains("unreported duration"));
    }

    #[test]
    fn metric_path_must_be_absolute() {
        let mut a = args("http://puppetdb:8080/pdb/query");
        a.metric_path = Some("metrics".to_string());
        assert!(load(&a).is_err());
        a.metric_path = Some("/".to_string());
        assert!(load(&a).is_err());
    }

    #[test]
    fn file_values_are_overridden_by_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exporter.yaml");
        std::fs::write(
            &path,
            "puppetdb_url: https://puppetdb:8081/pdb/query\n\
             ssl_skip_verify: true\n\
             unreported_node: 90m\n\
             categories: time, events\n\
             metric_path: /puppetdb\n\
             log_format: text\n",
        )
        .unwrap();

        let cfg = load(&ExporterArgs {
            config: Some(path.clone()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(cfg.client.url, "https://puppetdb:8081/pdb/query");
        assert!(!cfg.client.ssl_verify);
        assert_eq!(cfg.unreported_after, Duration::from_secs(90 * 60));
        assert_eq!(cfg.categories.len(), 2);
        assert_eq!(cfg.metric_path, "/puppetdb");
        assert_eq!(cfg.log_format, LogFormat::Text);

        let cfg = load(&ExporterArgs {
            config: Some(path),
            categories: Some("resources".to_string()),
            metric_path: Some("/metrics".to_string()),
            ..args("http://localhost:8080/pdb/query")
        })
        .unwrap();
        assert_eq!(cfg.client.url, "http://localhost:8080/pdb/query");
        assert!(!cfg.client.ssl_verify);
        assert!(cfg.categories.contains("resources"));
        assert_eq!(cfg.categories.len(), 1);
        assert_eq!(cfg.metric_path, "/metrics");
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let a = ExporterArgs {
            config: Some(PathBuf::from("/nonexistent/exporter.yaml")),
            ..args("http://puppetdb:8080/pdb/query")
        };
        assert!(load(&a).is_err());
    }

    #[test]
    fn categories_are_trimmed_and_deduplicated() {
        let cats = parse_categories(" time,events,,time ").unwrap();
        assert_eq!(cats.len(), 2);
        assert!(cats.contains("time"));
        assert!(parse_categories("").unwrap().is_empty());
        assert!(parse_categories("time,bad-name").is_err());
    }
}
