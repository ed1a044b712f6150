use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use tagwatch::application::rate_limiter::RateLimiter;
use tagwatch::application::scheduler::Scheduler;
use tagwatch::application::usecases::{
    FollowUseCase, InfoUseCase, PopularDigestUseCase, SubscriberSettingsUseCase, UnfollowUseCase,
};
use tagwatch::application::worker::WorkerDeps;
use tagwatch::application::{Notifier, SubscriberStore, WatchStore};
use tagwatch::infrastructure::{
    booru_source::BooruSource, console_notifier::ConsoleNotifier, embed_renderer::EmbedRenderer,
    multi_notifier::MultiNotifier, sqlite_store::SqliteStore, webhook_notifier::WebhookNotifier,
};
use tagwatch::interfaces::config::Config;
use tagwatch::interfaces::http_api::{ApiState, build_router};

#[derive(Parser, Debug)]
#[command(name = "tagwatch")]
struct Args {
    /// Path to config.yaml
    #[arg(long, default_value = "config.yaml")]
    config: String,

    /// Do not send external notifications (console only)
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("tagwatch=info".parse()?))
        .init();
    if dotenvy::dotenv().is_err() {
        let _ = dotenvy::from_path(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env"));
    }
    let args = Args::parse();

    // 1) load config
    let cfg = match Config::load_from_file(&args.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load config {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // 2) build infra
    let db_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| cfg.database_url.clone());
    let store = Arc::new(SqliteStore::new(&db_url).await?);
    let watches: Arc<dyn WatchStore> = store.clone();
    let subscribers: Arc<dyn SubscriberStore> = store;

    let source = Arc::new(BooruSource::new(&cfg.source.base_url, &cfg.source.user_agent));
    let renderer = Arc::new(EmbedRenderer::new(&cfg.source.base_url, &cfg.source.static_url));
    let limiter = Arc::new(RateLimiter::new(
        cfg.rate_limit.max_requests,
        cfg.rate_limit_per(),
    ));

    // the webhook decides delivery; console output only mirrors it
    let webhook = cfg.webhook_url.as_deref().filter(|u| !u.is_empty());
    let notifier = match (args.dry_run, webhook) {
        (false, Some(hook)) => MultiNotifier::new()
            .mirror("console", Box::new(ConsoleNotifier::new()))
            .with(
                "webhook",
                Box::new(WebhookNotifier::new(hook.to_string()).with_token(api_token(&cfg))),
            ),
        (true, _) => {
            tracing::warn!("--dry-run enabled: only console output");
            MultiNotifier::new().with("console", Box::new(ConsoleNotifier::new()))
        }
        (false, None) => {
            tracing::warn!("webhook_url not set, delivering to console only");
            MultiNotifier::new().with("console", Box::new(ConsoleNotifier::new()))
        }
    };
    let notifier: Arc<dyn Notifier> = Arc::new(notifier);

    // 3) scheduler + usecases
    let deps = WorkerDeps {
        source: source.clone(),
        limiter: limiter.clone(),
        watches: watches.clone(),
        subscribers: subscribers.clone(),
        notifier: notifier.clone(),
        renderer: renderer.clone(),
    };
    let scheduler = Arc::new(Scheduler::new(deps, cfg.timing()));

    // storage failing here means nothing can be scheduled
    let started = scheduler.on_boot().await?;
    tracing::info!(
        workers = started,
        interval = cfg.check_interval_seconds,
        "scheduler started"
    );

    let shutdown = CancellationToken::new();
    let digest_task = if cfg.popular.enabled {
        let digest = PopularDigestUseCase {
            source,
            limiter,
            subscribers: subscribers.clone(),
            notifier,
            renderer,
            limit: cfg.popular.limit,
            at: cfg.popular_at()?,
        };
        let cancel = shutdown.child_token();
        Some(tokio::spawn(async move { digest.run_daily(cancel).await }))
    } else {
        None
    };

    let state = ApiState {
        follow: Arc::new(FollowUseCase {
            watches: watches.clone(),
            scheduler: scheduler.clone(),
        }),
        unfollow: Arc::new(UnfollowUseCase {
            watches: watches.clone(),
            scheduler: scheduler.clone(),
        }),
        info: Arc::new(InfoUseCase {
            watches,
            scheduler: scheduler.clone(),
        }),
        settings: Arc::new(SubscriberSettingsUseCase { subscribers }),
        api_token: api_token(&cfg),
    };

    // 4) run
    let listener = tokio::net::TcpListener::bind(&cfg.http.bind).await?;
    tracing::info!(bind = %cfg.http.bind, "command api listening");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = server_shutdown.cancelled() => {}
            }
        })
        .await?;

    tracing::info!("shutting down");
    shutdown.cancel();
    scheduler.shutdown().await;
    if let Some(task) = digest_task {
        let _ = task.await;
    }
    Ok(())
}

fn api_token(cfg: &Config) -> Option<String> {
    cfg.http.api_token.clone().filter(|t| !t.is_empty())
}
