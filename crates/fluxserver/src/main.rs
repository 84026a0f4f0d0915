use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use fluxserver::{build_runtime, configure, AppState, ServerConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("🚀 Starting Flux Server");

    let config = ServerConfig::from_env()?;
    let runtime = build_runtime(config.runtime.clone());
    info!(
        "✅ Runtime initialized with {} node types (max {} parallel nodes)",
        runtime.registry().list_node_types().len(),
        config.runtime.max_parallel_nodes
    );

    let app_state = web::Data::new(AppState::new(runtime));

    info!("🌐 Server starting on http://{}", config.bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(Logger::default())
            .configure(configure)
    })
    .bind(&config.bind_address)?
    .run()
    .await?;

    Ok(())
}
