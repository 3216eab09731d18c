//! Metrics sink. Exposes PuppetDB scrapes in the Prometheus text format.
//!
//! Each HTTP scrape runs the collector once and renders its samples into a
//! fresh registry; nothing is kept between scrapes.

pub mod exposition;

use crate::domain::collector::PuppetDbCollector;
use crate::domain::schema::MetricDescriptor;

use self::exposition::{BuildInfo, ExpositionError};

pub struct MetricsExporter {
    collector: PuppetDbCollector,
    build_info: BuildInfo,
}

impl MetricsExporter {
    pub fn new(collector: PuppetDbCollector) -> Self {
        Self {
            collector,
            build_info: BuildInfo::current(),
        }
    }

    /// Descriptors exported by every successful scrape.
    pub fn describe(&self) -> Vec<&MetricDescriptor> {
        self.collector.schema().iter().map(|(_, d)| d).collect()
    }

    /// Scrape PuppetDB and render the result.
    pub async fn scrape(&self) -> Result<String, ExpositionError> {
        let samples = self.collector.collect().await;
        exposition::render(self.collector.schema(), &samples, &self.build_info)
    }
}
