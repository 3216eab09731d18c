use anyhow::Result;

use crate::config::{self, ExporterArgs};

pub fn run(args: &ExporterArgs) -> Result<()> {
    let config = config::load(args)?;
    crate::server::init_tracing(&config);

    // Build tokio runtime explicitly (no #[tokio::main] on fn main)
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(crate::server::run(config))
}
