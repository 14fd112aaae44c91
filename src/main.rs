//! agent-media command line entry point.
//!
//! Every action command prints exactly one JSON result envelope on stdout;
//! logs go to stderr and to a daily log file under the output directory.

use anyhow::Result;
use clap::Parser;
use serde_json::json;
use std::path::Path;
use std::process::ExitCode;
use tracing::{debug, warn, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use agent_media::action::{Action, ActionContext};
use agent_media::backends::register_all_providers;
use agent_media::cli::Args;
use agent_media::config::{Config, OUTPUT_DIR_ENV};
use agent_media::media::MediaProcessorFactory;
use agent_media::provider::{detect_provider_from_env, execute_action, ProcessEnv, ProviderRegistry};
use agent_media::result::MediaResult;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;

    let invocation = args.command.into_request();
    let cli_out = match &invocation {
        Some(Ok((_, output))) => output.out.clone(),
        _ => None,
    };
    let env_dir = std::env::var(OUTPUT_DIR_ENV).ok();
    let output_dir = config.resolve_output_dir(cli_out.as_deref(), env_dir.as_deref())?;

    let _guard = setup_logging(args.verbose, &output_dir)?;
    debug!("Output directory: {}", output_dir.display());

    let registry = register_all_providers(&config)?;

    let Some(invocation) = invocation else {
        print_providers(&registry, &config).await;
        return Ok(ExitCode::SUCCESS);
    };

    let result = match invocation {
        Ok((request, output)) => {
            let context = ActionContext::new(output_dir.clone())
                .with_provider(output.provider)
                .with_output_name(output.name)
                .with_input_source(request.input().map(|input| input.source.clone()));
            execute_action(&registry, &request, &context).await
        }
        Err(e) => MediaResult::from(e),
    };

    println!("{}", result.to_json_pretty());
    Ok(if result.is_ok() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

async fn print_providers(registry: &ProviderRegistry, config: &Config) {
    let providers: Vec<_> = registry
        .provider_names()
        .iter()
        .filter_map(|name| registry.get(name))
        .map(|provider| {
            let actions: Vec<Action> = Action::ALL.into_iter().filter(|a| provider.supports(*a)).collect();
            json!({ "name": provider.name(), "actions": actions })
        })
        .collect();

    let ffmpeg = MediaProcessorFactory::create_processor(config.media.clone())
        .check_availability()
        .await;
    if let Err(e) = &ffmpeg {
        warn!("{}", e);
    }

    let report = json!({
        "providers": providers,
        "detected": detect_provider_from_env(&ProcessEnv),
        "ffmpeg": ffmpeg.is_ok(),
    });
    println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
}

fn setup_logging(verbose: bool, output_dir: &Path) -> Result<WorkerGuard> {
    let log_dir = output_dir.join("log");
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = rolling::daily(&log_dir, "agent-media.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);

    let log_level = if verbose { Level::DEBUG } else { Level::WARN };

    // stdout carries the JSON envelope only
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(verbose)
        .with_line_number(verbose);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(guard)
}
