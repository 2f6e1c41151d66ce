use clap::Parser;
use covidsafe_scanner::app::{
    self, BatchSummary, EXIT_ERROR, EXIT_INTERRUPTED, EXIT_PANIC, Options, RunError,
};
use covidsafe_scanner::logging;
use covidsafe_scanner::output::csv::CsvSink;
use covidsafe_scanner::radio::bluer::BluerRadio;
use std::panic::{self, PanicHookInfo};

/// Open the radio and record file, then run one batch.
///
/// # Errors
/// Returns `RunError` if Bluetooth initialization, the scan, or opening the
/// record file fails. Per-device failures are reported, not returned.
async fn run(options: Options) -> Result<BatchSummary, RunError> {
    let radio = BluerRadio::new().await?;
    let mut sink = CsvSink::open(&options.output).map_err(|source| RunError::StorageOpen {
        path: options.output.clone(),
        source,
    })?;

    let mut out = std::io::stdout();
    let mut err = std::io::stderr();
    app::run_with_io(&options, &radio, &mut sink, &mut out, &mut err).await
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for callers that
    // monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();

    let guard = match logging::init(&options.log_file, options.verbose) {
        Ok(guard) => guard,
        Err(why) => {
            eprintln!("error: {why}");
            std::process::exit(EXIT_ERROR);
        }
    };

    // Records are appended synchronously between awaits, so an interrupt
    // never leaves a partial row behind.
    let code = tokio::select! {
        result = run(options) => app::exit_code(&result, &mut std::io::stderr()),
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted");
            EXIT_INTERRUPTED
        }
    };

    // process::exit skips destructors; flush the log file first.
    drop(guard);
    std::process::exit(code);
}
