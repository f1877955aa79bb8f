use std::sync::Arc;

use tokio::signal;
use tracing::info;

use doccontrol::{
    config::AppConfig,
    db, default_handlers, init_tracing,
    notifications::{LogSink, NotificationSink, WebhookSink},
    Worker,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    info!(
        component = "worker",
        database_url = %config.redacted_database_url(),
        pool_size = 1,
        webhook_enabled = config.notification_webhook_url.is_some(),
        "loaded configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;

    let sink: Arc<dyn NotificationSink> = match &config.notification_webhook_url {
        Some(url) => Arc::new(WebhookSink::new(url.clone())),
        None => Arc::new(LogSink),
    };
    let worker = Worker::new(pool, default_handlers(sink), config.worker_poll_interval());

    tokio::select! {
        _ = worker.run() => {}
        _ = signal::ctrl_c() => {
            info!("worker received shutdown signal");
        }
    }

    Ok(())
}
