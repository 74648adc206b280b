use std::sync::Arc;

use anyhow::{bail, Context};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use adbot_core::{
    config::Config,
    store::{bounded::BoundedStore, memory::InMemoryStore, Store},
};
use adbot_postgres::PgStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    adbot_core::logging::init("adbot").context("installing log subscriber")?;

    let cfg = Arc::new(Config::load().context("loading configuration")?);

    let inner: Arc<dyn Store> = match cfg.database_url.as_deref() {
        Some(url) => {
            let store = PgStore::connect(url)
                .await
                .context("connecting to database")?;
            store.migrate().await.context("running migrations")?;
            Arc::new(store)
        }
        None if cfg.test_mode => {
            warn!("DATABASE_URL not set; using the in-memory store");
            Arc::new(InMemoryStore::new())
        }
        None => bail!("DATABASE_URL is required outside test mode"),
    };
    let store: Arc<dyn Store> = Arc::new(BoundedStore::new(inner, cfg.call_timeout));

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, shutting down");
                on_signal.cancel();
            }
            Err(e) => warn!(error = %e, "cannot listen for interrupts"),
        }
    });

    adbot_telegram::router::run_polling(cfg, store, shutdown)
        .await
        .context("telegram bot failed")
}
