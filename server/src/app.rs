//! Core application wiring

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api::auth::{AllowAll, Auther};
use crate::api::server::{ApiServer, ServerState};
use crate::core::cli;
use crate::core::config::Config;
use crate::core::constants::{APP_NAME_LOWER, ENV_LOG};
use crate::core::shutdown::ShutdownService;
use crate::data::cache::{MemoryCache, MessageCache, NoopCache};
use crate::data::files::{FileCache, FilesystemCache};
use crate::data::relay::{Mailer, PushRelay};
use crate::domain::topic::TopicRegistry;
use crate::domain::visitor::VisitorManager;
use crate::manager::Manager;

/// Injectable collaborators. Defaults: allow-all auth, no relay, no mailer.
#[derive(Default)]
pub struct Collaborators {
    pub auther: Option<Arc<dyn Auther>>,
    pub relay: Option<Arc<dyn PushRelay>>,
    pub mailer: Option<Arc<dyn Mailer>>,
}

pub struct CoreApp {
    pub config: Arc<Config>,
    pub state: ServerState,
    pub shutdown: ShutdownService,
    manager: Arc<Manager>,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        let cli = cli::parse();
        let config = Config::load(&cli)?;
        let app = Self::init(config, Collaborators::default()).await?;
        app.start().await
    }

    /// Build the full application from a resolved configuration.
    pub async fn init(config: Config, collaborators: Collaborators) -> Result<Self> {
        let config = Arc::new(config);

        let cache: Arc<dyn MessageCache> = match config.cache_duration {
            Some(_) => Arc::new(MemoryCache::new()),
            None => Arc::new(NoopCache::new()),
        };

        let files: Option<Arc<dyn FileCache>> = match &config.attachment_cache_dir {
            Some(dir) => Some(Arc::new(
                FilesystemCache::new(dir.clone())
                    .await
                    .with_context(|| format!("creating attachment cache at {}", dir.display()))?,
            )),
            None => None,
        };

        let topics = Arc::new(TopicRegistry::new(config.total_topic_limit));
        let visitors = Arc::new(VisitorManager::new(Arc::clone(&config)));
        let shutdown = ShutdownService::new();

        // Recreate topics the cache still has messages for, so replay works
        // right after a restart with a durable cache implementation
        match cache.topics().await {
            Ok(ids) => topics.seed(ids),
            Err(e) => tracing::warn!(error = %e, "Topic reseed failed"),
        }

        let auther = collaborators.auther.unwrap_or_else(|| Arc::new(AllowAll));
        let relay = collaborators.relay;
        let mailer = collaborators.mailer;

        let manager = Arc::new(Manager::new(
            Arc::clone(&config),
            Arc::clone(&topics),
            Arc::clone(&visitors),
            Arc::clone(&cache),
            files.clone(),
            relay.clone(),
        ));

        let state = ServerState {
            config: Arc::clone(&config),
            topics,
            visitors,
            cache,
            files,
            auther,
            relay,
            mailer,
            shutdown_rx: shutdown.subscribe(),
        };

        Ok(Self {
            config,
            state,
            shutdown,
            manager,
        })
    }

    fn init_logging() {
        let default_filter = format!("info,{}=info", APP_NAME_LOWER);

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_target(false)
            .with_level(true)
            .compact()
            .with_env_filter(filter)
            .init();
    }

    /// Start background loops and serve until a shutdown signal arrives.
    pub async fn start(self) -> Result<()> {
        self.shutdown.install_signal_handlers();
        self.start_background_tasks().await;

        tracing::info!(
            host = %self.config.host,
            port = self.config.port,
            caching = self.config.cache_duration.is_some(),
            attachments = self.config.attachments_enabled(),
            "Starting server"
        );

        let server = ApiServer::new(self.state.clone(), self.shutdown.clone());
        server.start().await?;
        self.shutdown.shutdown().await;

        Ok(())
    }

    pub async fn start_background_tasks(&self) {
        self.shutdown
            .register(self.manager.start_pruning_task(self.shutdown.subscribe()))
            .await;
        self.shutdown
            .register(self.manager.start_at_sender_task(self.shutdown.subscribe()))
            .await;
        if let Some(handle) = self
            .manager
            .start_relay_keepalive_task(self.shutdown.subscribe())
        {
            self.shutdown.register(handle).await;
        }
    }
}
