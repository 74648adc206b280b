use std::sync::Arc;

use anyhow::Context;
use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use adbot_core::{
    allowlist::AllowList,
    audit::AuditLog,
    clock::SystemClock,
    config::Config,
    domain::ChatId,
    lifecycle::PostLifecycle,
    messaging::{
        port::MessagingPort,
        throttled::{ThrottleConfig, ThrottledMessenger},
    },
    pipeline::{Pipeline, PipelineDeps, PipelineSettings},
    store::Store,
};

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

/// Long-poll Telegram until `shutdown` fires. Background tasks (expiry sweep,
/// allow-list refresh, media-group timers) stop with the same token.
pub async fn run_polling(
    cfg: Arc<Config>,
    store: Arc<dyn Store>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.bot_token.clone());
    let me = bot.get_me().await.context("fetching bot identity")?;
    let bot_username = me.username().to_string();
    info!(bot = %bot_username, test_mode = cfg.test_mode, admins = cfg.admin_user_ids.len(), "adbot started");

    // Throttle outbound calls to stay under Telegram's flood limits; 429 RetryAfter
    // is still retried once inside the adapter.
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(
        bot.clone(),
        cfg.payment_provider_token.clone().unwrap_or_default(),
    ));
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        ThrottleConfig {
            call_timeout: cfg.call_timeout,
            ..ThrottleConfig::default()
        },
    ));

    let audit = match cfg.log_channel_id {
        Some(id) => AuditLog::to_channel(messenger.clone(), ChatId(id)),
        None => AuditLog::disabled(),
    };

    let allow_list = Arc::new(AllowList::new());
    if let Err(e) = allow_list.refresh(store.as_ref()).await {
        warn!(error = %e, "initial allow-list load failed; starting empty");
    }
    tokio::spawn(allow_list.clone().run_refresh(
        store.clone(),
        cfg.allowlist_refresh,
        shutdown.child_token(),
    ));

    let clock = Arc::new(SystemClock);
    let lifecycle = Arc::new(PostLifecycle::new(
        store.clone(),
        messenger.clone(),
        clock.clone(),
        audit.clone(),
        bot_username.clone(),
        cfg.currency.clone(),
    ));
    tokio::spawn(lifecycle.run(cfg.expiry_sweep_interval, shutdown.child_token()));

    let pipeline = Pipeline::new(
        PipelineSettings::from_config(&cfg, bot_username),
        PipelineDeps {
            store,
            messenger,
            allow_list,
            clock,
            audit,
            shutdown: shutdown.child_token(),
        },
    );
    let state = Arc::new(AppState { pipeline });

    let handler = dptree::entry()
        .branch(Update::filter_pre_checkout_query().endpoint(handlers::handle_pre_checkout))
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .default_handler(|_| async {})
        .build();

    let stop = dispatcher.shutdown_token();
    let watcher = shutdown.clone();
    tokio::spawn(async move {
        watcher.cancelled().await;
        match stop.shutdown() {
            Ok(done) => done.await,
            Err(_) => warn!("dispatcher was not running at shutdown"),
        }
    });

    dispatcher.dispatch().await;
    shutdown.cancel();
    info!("adbot stopped");
    Ok(())
}
