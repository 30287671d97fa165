use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use leadflow_agent::{AgentService, AiProvider, OpenAiProvider, ProviderError};
use leadflow_core::config::{AiConfig, AppConfig, ConfigError, LoadOptions};
use leadflow_core::{NoopCalendarClient, NoopLeadTracker, NoopOperatorNotifier};
use leadflow_db::repositories::{
    SqlAppointmentRepository, SqlConversationRepository, SqlMessageRepository,
};
use leadflow_db::{connect_with_settings, migrations, DbPool, PoolSettings};
use leadflow_engine::{
    AvailabilityService, BookingService, EngineConfig, FollowUpConfig, FollowUpScheduler,
    Orchestrator, SlotValidator,
};
use leadflow_whatsapp::{
    ChatTransport, ConnectionManager, InboundMessage, NoopChatTransport, Outbox, OutboxConfig,
    ReconnectPolicy, SessionJanitor, StartupPolicy, StatusHandle,
};

const INBOUND_CHANNEL_CAPACITY: usize = 64;

/// Fully wired application, ready to start. The transport defaults to the
/// no-op implementation until a real client binding is plugged in; every
/// other component behaves exactly as in production.
pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub status: StatusHandle,
    pub outbox: Arc<Outbox>,
    pub orchestrator: Arc<Orchestrator>,
    transport: Arc<dyn ChatTransport>,
    connection: ConnectionManager,
    follow_up: Arc<FollowUpScheduler>,
    inbound_rx: mpsc::Receiver<InboundMessage>,
}

/// The application with its background tasks spawned.
pub struct RunningApplication {
    pub db_pool: DbPool,
    transport: Arc<dyn ChatTransport>,
    tasks: Vec<JoinHandle<()>>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("AI provider setup failed: {0}")]
    AiProvider(#[from] ProviderError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!("starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        PoolSettings {
            max_connections: config.database.max_connections,
            acquire_timeout: Duration::from_secs(config.database.timeout_secs.max(1)),
        },
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!("database ready");

    let transport: Arc<dyn ChatTransport> = Arc::new(NoopChatTransport);
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
    // The manager re-runs session cleanup before every connect attempt.
    let connection = ConnectionManager::new(
        transport.clone(),
        inbound_tx,
        StartupPolicy::default(),
        ReconnectPolicy::default(),
    )
    .with_janitor(SessionJanitor::new(&config.whatsapp.session_path));
    let status = connection.status_handle();
    let outbox = Arc::new(Outbox::new(transport.clone(), status.clone(), OutboxConfig::default()));
    connection.attach_outbox(outbox.clone());

    let conversations = Arc::new(SqlConversationRepository::new(db_pool.clone()));
    let messages = Arc::new(SqlMessageRepository::new(db_pool.clone()));
    let appointments = Arc::new(SqlAppointmentRepository::new(db_pool.clone()));

    let calendar = Arc::new(NoopCalendarClient);
    let lead_tracker = Arc::new(NoopLeadTracker);
    let notifier = Arc::new(NoopOperatorNotifier);

    let hours = config.bot.business_hours();
    let availability =
        Arc::new(AvailabilityService::new(calendar.clone(), appointments.clone(), hours.clone()));
    let validator = SlotValidator::new(availability.clone(), hours.clone());
    let booking = Arc::new(BookingService::new(
        availability.clone(),
        validator,
        appointments.clone(),
        calendar,
        notifier.clone(),
        config.bot.name.clone(),
    ));

    let agent = Arc::new(AgentService::new(build_providers(&config.ai)?));

    let engine_config = EngineConfig {
        bot_name: config.bot.name.clone(),
        brand_name: config.bot.brand_name.clone(),
        hours,
        ..EngineConfig::default()
    };
    let orchestrator = Arc::new(Orchestrator::new(
        engine_config,
        conversations.clone(),
        messages.clone(),
        appointments.clone(),
        agent,
        availability,
        booking,
        outbox.clone(),
        lead_tracker,
        notifier,
    ));

    let follow_up = Arc::new(FollowUpScheduler::new(
        FollowUpConfig::default(),
        conversations,
        messages,
        appointments,
        outbox.clone(),
    ));

    Ok(Application {
        config,
        db_pool,
        status,
        outbox,
        orchestrator,
        transport,
        connection,
        follow_up,
        inbound_rx,
    })
}

impl Application {
    /// Spawn the connection pump, the inbound dispatch loop, the outbox
    /// flusher and the follow-up sweeper.
    pub fn start(self) -> RunningApplication {
        let mut tasks = Vec::new();

        let connection = self.connection;
        tasks.push(tokio::spawn(async move {
            if let Err(connection_error) = connection.start().await {
                error!(error = %connection_error, "connection loop stopped");
            }
        }));

        let orchestrator = self.orchestrator;
        let mut inbound_rx = self.inbound_rx;
        tasks.push(tokio::spawn(async move {
            while let Some(inbound) = inbound_rx.recv().await {
                let phone = inbound.phone_number.clone();
                if let Err(turn_error) =
                    orchestrator.process_incoming_message(inbound, Utc::now()).await
                {
                    warn!(phone = %phone, error = %turn_error, "message turn failed");
                }
            }
        }));

        tasks.push(self.outbox.spawn_flush_loop());
        tasks.push(self.follow_up.start());

        RunningApplication { db_pool: self.db_pool, transport: self.transport, tasks }
    }
}

impl RunningApplication {
    pub async fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        if let Err(disconnect_error) = self.transport.disconnect().await {
            warn!(error = %disconnect_error, "transport disconnect failed during shutdown");
        }
        self.db_pool.close().await;
    }
}

fn build_providers(ai: &AiConfig) -> Result<Vec<Arc<dyn AiProvider>>, ProviderError> {
    let mut providers: Vec<Arc<dyn AiProvider>> = Vec::new();

    if let Some(api_key) = &ai.api_key {
        providers.push(Arc::new(OpenAiProvider::new(
            "primary",
            ai.base_url.clone(),
            ai.model.clone(),
            api_key.clone(),
            ai.timeout_secs,
        )?));
    }

    if let Some(fallback) = &ai.fallback {
        if let Some(api_key) = &fallback.api_key {
            providers.push(Arc::new(OpenAiProvider::new(
                "fallback",
                fallback.base_url.clone(),
                fallback.model.clone(),
                api_key.clone(),
                ai.timeout_secs,
            )?));
        }
    }

    if providers.is_empty() {
        warn!("no AI provider configured, every conversation will hand off to a human");
    }
    Ok(providers)
}

#[cfg(test)]
mod tests {
    use leadflow_core::config::{ConfigOverrides, LoadOptions};

    use super::bootstrap;

    fn memory_options() -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:?cache=shared".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_migrates_and_wires_the_stack() {
        let app = bootstrap(memory_options()).await.expect("bootstrap");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('conversations', 'messages', 'appointments')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("table query");
        assert_eq!(table_count, 3);

        assert_eq!(app.outbox.depth().await, 0);
        assert!(!app.status.read().await.is_ready());

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn bootstrap_rejects_a_non_sqlite_database_url() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("postgres://localhost/leadflow".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("error").to_string();
        assert!(message.contains("database.url"));
    }
}
