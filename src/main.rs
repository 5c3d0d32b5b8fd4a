use anyhow::Context;
use clap::Parser;
use pathwise::config::{AppConfig, Cli};
use pathwise::db;
use pathwise::gateway::PlanGateway;
use pathwise::http::{create_router, AppState};
use pathwise::providers::ProviderRuntime;
use std::sync::Arc;
use tracing::info;

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter =
        tracing_subscriber::EnvFilter::from_default_env().add_directive("pathwise=info".parse()?);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;
    let config = AppConfig::try_from(cli)?;

    // Create the schema once up front so a bad path fails at startup.
    db::open_connection(&config.db_path)
        .with_context(|| format!("opening database at {}", config.db_path.display()))?;

    let runtime = ProviderRuntime::from_mode(
        config.transport,
        config.api_key.clone(),
        config.provider_timeout,
    )
    .map_err(|err| anyhow::anyhow!(err.message))?;
    info!(
        transport = runtime.transport_name(),
        model = %config.model,
        safety_policy = config.options.safety_policy.as_str(),
        "provider configured"
    );
    let gateway = PlanGateway::new(runtime, config.model.clone(), config.options);

    let state = Arc::new(AppState::new(config.db_path.clone(), gateway));
    let app = create_router(state);

    info!("Starting pathwise on {}", config.bind);
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
