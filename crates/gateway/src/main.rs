use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use gb_domain::config::Config;
use gb_gateway::{api, bootstrap};

#[derive(Parser)]
#[command(name = "growbal", about = "Growbal service-provider discovery gateway")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "growbal.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP gateway (the default).
    Serve,
    /// Config inspection.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version.
    Version,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Validate the config file and report issues.
    Validate,
    /// Print the resolved config.
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let config = Config::load(&cli.config).context("loading config")?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let config = Config::load(&cli.config)?;
            let issues = config.validate();
            if issues.is_empty() {
                println!("config ok");
                return Ok(());
            }
            for issue in &issues {
                println!("{issue}");
            }
            if issues
                .iter()
                .any(|i| i.severity == gb_domain::config::ConfigSeverity::Error)
            {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let config = Config::load(&cli.config)?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Some(Command::Version) => {
            println!("growbal {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,gb_gateway=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    let state = bootstrap::build_app_state(config.clone()).await?;
    let app = api::router(state);

    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(addr = %addr, "gateway listening");

    axum::serve(listener, app).await.context("serving")
}
