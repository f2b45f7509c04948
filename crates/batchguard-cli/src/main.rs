use batchguard_core::{exit_codes, Error};
use batchguard_db::{NoticeSink, NOTICE_TARGET};
use chrono::Local;
use clap::error::ErrorKind;
use clap::Parser;
use std::process::ExitCode;
use std::time::Instant;
use tracing_subscriber::filter::{EnvFilter, Targets};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

mod cli;
mod commands;
mod settings;

use cli::Cli;
use settings::{LogFormat, Settings};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Load environment variables
    dotenv::dotenv().ok();

    let started_at = Local::now();
    let clock = Instant::now();

    let code = run().await;

    println!();
    println!("Started:     {}", started_at.format(TIMESTAMP_FORMAT));
    println!("Finished:    {}", Local::now().format(TIMESTAMP_FORMAT));
    println!("Return code: {}", code);
    println!("Elapsed:     {:.3}s", clock.elapsed().as_secs_f64());

    ExitCode::from(code)
}

async fn run() -> u8 {
    // Parse CLI arguments
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => exit_codes::SUCCESS,
                _ => cli::rejected_exit_code(std::env::args()),
            };
        }
    };

    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("✗ {:#}", err);
            return cli.command.usage_exit_code();
        }
    };

    let context = commands::Context {
        settings: &settings,
        notices: init_tracing(&settings),
    };

    match commands::execute(&cli.command, &context).await {
        Ok(()) => exit_codes::SUCCESS,
        Err(Error::CalendarNotReady(block)) if block.is_non_business_day() => {
            println!("• {}", block);
            block.exit_code()
        }
        Err(err) => {
            eprintln!("✗ {}", err);
            cli.command.exit_code(&err)
        }
    }
}

/// Install the log output and the server notice capture. The capture layer
/// has its own filter so notices reach it whatever the log filter says.
fn init_tracing(settings: &Settings) -> NoticeSink {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| settings.log_filter.as_str().into());
    let notices = NoticeSink::new();
    let capture = notices
        .layer()
        .with_filter(Targets::new().with_target(NOTICE_TARGET, tracing::Level::TRACE));
    let registry = tracing_subscriber::registry().with(capture);

    match settings.log_format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_filter(filter))
            .init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_filter(filter))
            .init(),
    }

    notices
}
