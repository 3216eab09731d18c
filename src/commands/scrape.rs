//! `puppetdb-exporter scrape`: run a single scrape and print the exposition.

use anyhow::{Context, Result};

use crate::config::{self, ExporterArgs};

pub fn run(args: &ExporterArgs) -> Result<()> {
    let config = config::load(args)?;
    crate::server::init_tracing(&config);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let exporter = crate::server::build_exporter(&config)?;
        let body = exporter
            .scrape()
            .await
            .with_context(|| format!("scraping {}", config.client.url))?;
        print!("{body}");
        Ok::<(), anyhow::Error>(())
    })
}
