mod cmd;

use clap::Parser;
use clap::error::ErrorKind;
use cmd::config::{Effective, LogLevel, NodeEnv, PublisherArgs, invalid_args, parse_failure_filter};

#[derive(Parser)]
#[command(name = "file-publisher", version, about = "Replays recorded values from a JSON file onto an MQTT topic")]
struct Cli {
    #[command(flatten)]
    args: PublisherArgs,
}

fn init_logging(default_filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            let node_env = std::env::var("NODE_ENV").ok();
            init_logging(parse_failure_filter(node_env.as_deref()));
            let err = invalid_args(&e);
            tracing::error!("{err}");
            std::process::exit(err.exit_code());
        }
    };

    let eff = match Effective::new(&cli.args) {
        Ok(e) => e,
        Err(e) => {
            let filter = match cli.args.node_env {
                Some(NodeEnv::Test) => "off",
                _ => cli.args.log_level.unwrap_or(LogLevel::Info).as_filter(),
            };
            init_logging(filter);
            tracing::error!("{e}");
            std::process::exit(e.exit_code());
        }
    };
    init_logging(eff.log_filter());

    match cmd::run::run(&eff).await {
        Ok(outcome) => std::process::exit(outcome.exit_code()),
        Err(e) => {
            tracing::error!(error = %e, "file data publisher failed");
            std::process::exit(e.exit_code());
        }
    }
}
