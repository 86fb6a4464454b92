//! Entry point: parse arguments, install logging, run the trace.

use clap::Parser;

use weft_cli::{cli, driver, logger};

#[tokio::main]
async fn main() -> miette::Result<()> {
    let args = cli::Cli::parse();
    logger::init_logger(args.verbose, args.quiet);

    let report = driver::execute(args)
        .await
        .map_err(|e| miette::Report::msg(e.to_string()))?;

    if report.errors.is_empty() {
        Ok(())
    } else {
        Err(miette::miette!(
            "{} of {} file(s) failed to trace",
            report.errors.len(),
            report.nodes.len()
        ))
    }
}
