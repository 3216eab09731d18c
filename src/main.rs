mod api;
mod client;
mod commands;
mod config;
mod domain;
mod server;
mod telemetry;

use clap::{Parser, Subcommand};

use crate::config::ExporterArgs;

#[derive(Parser)]
#[command(name = "puppetdb-exporter", version, about = "Prometheus exporter for PuppetDB")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve PuppetDB metrics over HTTP
    Serve {
        #[command(flatten)]
        args: ExporterArgs,
    },

    /// Scrape PuppetDB once and print the metrics to stdout
    Scrape {
        #[command(flatten)]
        args: ExporterArgs,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { args } => commands::serve::run(&args),
        Commands::Scrape { args } => commands::scrape::run(&args),
    }
}
