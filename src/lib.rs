use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{
    middleware::{NormalizePath, TrailingSlash},
    web::{Data, JsonConfig},
    App, HttpServer,
};
use tracing::level_filters::LevelFilter;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter, FmtSubscriber};

use config::Config;
use scheduler::Scheduler;
use sender::Sender;
use store::{s3::S3ObjectStore, StateStore};

pub mod api;
pub mod clock;
pub mod config;
pub mod error;
pub mod message;
pub mod retry;
pub mod scheduler;
pub mod sender;
pub mod store;

/// Returns a builder for the main application.
///
/// Loads configuration, recovers pending state from the object store,
/// starts the dispatcher, and serves the HTTP surface until interrupted.
/// The sender factory receives the loaded configuration so demo and real
/// carriers alike can be wired from the environment.
#[bon::builder(finish_fn = start)]
pub async fn run<F>(sender_factory: F) -> eyre::Result<()>
where
    F: FnOnce(&Config) -> Arc<dyn Sender>,
{
    let config = Config::load()?;

    let default_level: LevelFilter = config.log_level().parse()?;

    #[cfg(debug_assertions)]
    FmtSubscriber::builder()
        .pretty()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("COURIER_LOG")
                .with_default_directive(default_level.into())
                .from_env()?,
        )
        .finish()
        .try_init()?;

    #[cfg(not(debug_assertions))]
    FmtSubscriber::builder()
        .json()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("COURIER_LOG")
                .with_default_directive(default_level.into())
                .from_env()?,
        )
        .finish()
        .try_init()?;

    let sender = sender_factory(&config);

    let store = StateStore::new(
        Arc::new(S3ObjectStore::from_config(&config).await),
        config.active_prefix(),
        config.success_prefix(),
        config.failed_prefix(),
    );

    let scheduler = Scheduler::start()
        .store(store)
        .sender(sender)
        .batch_size(config.dispatch_batch_size())
        .skip_corrupt(config.recovery_skip_corrupt())
        .call()
        .await?;

    let data = Data::new(scheduler);

    tracing::info!(
        host = config.api_host(),
        port = config.api_port(),
        bucket = config.bucket(),
        "starting api server"
    );

    HttpServer::new({
        let data = data.clone();
        move || {
            let cors = Cors::default()
                .allow_any_origin()
                .allow_any_header()
                .allow_any_method();

            App::new()
                .wrap(TracingLogger::default())
                .wrap(NormalizePath::new(TrailingSlash::Trim))
                .wrap(cors)
                .service(api::service())
                .service(api::health)
                .app_data(JsonConfig::default().content_type_required(false))
                .app_data(data.clone())
        }
    })
    .bind((config.api_host().to_owned(), config.api_port()))?
    .run()
    .await?;

    data.shutdown().await;

    Ok(())
}
