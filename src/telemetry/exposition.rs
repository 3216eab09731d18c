use std::collections::HashMap;

use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use thiserror::Error;

use crate::domain::collector::Sample;
use crate::domain::schema::MetricSchema;

#[derive(Debug, Error)]
pub enum ExpositionError {
    /// The scrape itself failed; one entry per affected metric.
    #[error("{}", .0.join("\n"))]
    Collect(Vec<String>),
    #[error("sample for undeclared metric {0:?}")]
    UnknownMetric(String),
    #[error(transparent)]
    Prometheus(#[from] prometheus::Error),
    #[error("encoded metrics are not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Labels of the `puppetdb_exporter_build_info` gauge.
#[derive(Debug, Clone)]
pub struct BuildInfo {
    pub version: &'static str,
    pub commit_sha: &'static str,
    pub build_date: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            commit_sha: option_env!("GIT_COMMIT").unwrap_or("unknown"),
            build_date: option_env!("BUILD_DATE").unwrap_or("unknown"),
        }
    }
}

/// Render one scrape's samples in the Prometheus text format.
///
/// Any invalid sample fails the whole rendering; the error lists every
/// failed metric by its exported name.
pub fn render(
    schema: &MetricSchema,
    samples: &[Sample],
    build_info: &BuildInfo,
) -> Result<String, ExpositionError> {
    let failures: Vec<String> = samples
        .iter()
        .filter_map(|sample| match sample {
            Sample::Invalid { error, .. } => {
                let metric = sample.metric();
                let name = schema.get(metric).map_or(metric, |d| d.name.as_str());
                Some(format!("collecting metric {name}: {error}"))
            }
            Sample::Value { .. } => None,
        })
        .collect();
    if !failures.is_empty() {
        return Err(ExpositionError::Collect(failures));
    }

    let registry = Registry::new();
    let mut gauges: HashMap<&str, GaugeVec> = HashMap::with_capacity(schema.len());
    for (key, descriptor) in schema.iter() {
        let gauge = GaugeVec::new(
            Opts::new(descriptor.name.as_str(), descriptor.help.as_str()),
            descriptor.labels,
        )?;
        registry.register(Box::new(gauge.clone()))?;
        gauges.insert(key, gauge);
    }

    let build = GaugeVec::new(
        Opts::new(
            "puppetdb_exporter_build_info",
            "puppetdb exporter build informations",
        ),
        &["version", "commit_sha", "build_date"],
    )?;
    registry.register(Box::new(build.clone()))?;
    build
        .get_metric_with_label_values(&[
            build_info.version,
            build_info.commit_sha,
            build_info.build_date,
        ])?
        .set(1.0);

    for sample in samples {
        if let Sample::Value {
            metric,
            value,
            labels,
        } = sample
        {
            let gauge = gauges
                .get(metric.as_str())
                .ok_or_else(|| ExpositionError::UnknownMetric(metric.clone()))?;
            let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
            gauge.get_metric_with_label_values(&labels)?.set(*value);
        }
    }

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
