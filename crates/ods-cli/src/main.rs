//! ODS import binary.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use ods_cli::{exit_code, init_tracing, install_signal_handler, log_report, Args, EXIT_FAILURE};
use ods_loader::{CancellationController, Importer};

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let controller = Arc::new(CancellationController::new());
    if let Err(e) = install_signal_handler(Arc::clone(&controller)) {
        tracing::error!("Could not install interrupt handler: {}", e);
        return ExitCode::from(EXIT_FAILURE);
    }

    let config = args.to_config();
    tracing::info!(
        "Importing {} into {}",
        config.source.display(),
        config.output_root.display()
    );

    let result = Importer::new(config).and_then(|importer| importer.run(&controller));
    match &result {
        Ok(report) => log_report(report),
        Err(e) => tracing::error!("Import failed: {}", e),
    }

    ExitCode::from(exit_code(&result))
}
