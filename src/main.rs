use clap::Parser;
use speaker_broker::broker::Broker;
use speaker_broker::cli::Cli;
use speaker_broker::logging::LoggingConfig;

#[tokio::main]
async fn main() {
    // Parse CLI arguments first to get logging configuration
    let cli = Cli::parse();

    let log_config = LoggingConfig::from_args(cli.quiet, cli.verbose, cli.json)
        .with_file_output(cli.log_file.clone());

    if let Err(e) = speaker_broker::logging::init_logging(log_config) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    let broker = match Broker::new(cli.into_config()) {
        Ok(broker) => broker,
        Err(e) => {
            eprintln!("Error [{}]: {}", e.to_error_code(), e);
            std::process::exit(1);
        },
    };

    if let Err(e) = broker.run().await {
        tracing::error!(error = %e, "Broker failed");
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
