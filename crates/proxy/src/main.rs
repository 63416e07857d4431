use anyhow::Result;
use clap::{CommandFactory, Parser, error::ErrorKind};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use unrelated_openapi_proxy::cli::{Args, LogFormat};
use unrelated_openapi_proxy::server;

fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(fmt::layer().with_target(false)).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level, args.log_format);

    let config = match args.into_run_config() {
        Ok(config) => config,
        Err(e) => Args::command().error(ErrorKind::ValueValidation, e).exit(),
    };

    tracing::info!(
        host = %config.host,
        port = config.port,
        prefix = %config.path_prefix,
        "Starting unrelated-openapi-proxy v{}",
        env!("CARGO_PKG_VERSION")
    );
    server::run(config).await
}
