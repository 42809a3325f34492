mod app;
mod cli;
mod error;
mod metrics;
mod mqtt;
mod output;
mod web;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, LogFormat};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

/// Install the global subscriber. `RUST_LOG` wins over everything else.
fn init_tracing(level: &str, verbosity: u8, format: LogFormat) {
    let level = match verbosity {
        0 => level,
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
        LogFormat::Console => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
    }
}

fn log_format(flag: Option<LogFormat>, configured: &str) -> LogFormat {
    flag.unwrap_or(if configured == "console" {
        LogFormat::Console
    } else {
        LogFormat::Json
    })
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "z2m-homekit", &mut std::io::stdout());
            Ok(())
        }

        Command::Check => {
            let settings = app::load_settings(&cli.global)?;
            init_tracing(
                "warn",
                cli.global.verbose,
                cli.global.log_format.unwrap_or(LogFormat::Console),
            );
            let registry = app::load_registry(&settings.devices_path)?;
            if registry.homekit_count() == 0 {
                return Err(CliError::NoAccessories);
            }
            let config = &settings.config;
            let web_visible = registry.iter().filter(|d| d.web).count();
            output::print_output(&format!(
                "Configuration OK\n\
                 config:   {}\n\
                 devices:  {} ({} devices, {} HomeKit, {} web)\n\
                 mqtt:     {}:{}\n\
                 web:      {}:{}\n\
                 bridge:   {}",
                settings.config_path.display(),
                settings.devices_path.display(),
                registry.len(),
                registry.homekit_count(),
                web_visible,
                config.mqtt_host,
                config.mqtt_port,
                config.web_bind_address,
                config.web_port,
                config.bridge_name,
            ));
            Ok(())
        }

        Command::Devices(args) => {
            let settings = app::load_settings(&cli.global)?;
            init_tracing(
                "warn",
                cli.global.verbose,
                cli.global.log_format.unwrap_or(LogFormat::Console),
            );
            let registry = app::load_registry(&settings.devices_path)?;
            let rendered = output::render_devices(args.output, registry.iter().map(|d| &**d))?;
            output::print_output(&rendered);
            Ok(())
        }

        Command::Run => {
            let settings = app::load_settings(&cli.global)?;
            init_tracing(
                &settings.config.log_level,
                cli.global.verbose,
                log_format(cli.global.log_format, &settings.config.log_format),
            );
            tracing::debug!(config = %settings.config_path.display(), "configuration loaded");
            app::run(settings).await
        }
    }
}
