//! Application wiring: configuration in, a runnable scheduler out.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

use crate::application::collector::DataCollector;
use crate::application::cycle::CycleRunner;
use crate::application::executor::Executor;
use crate::application::orchestrator::AgentOrchestrator;
use crate::application::risk_gate::RiskGate;
use crate::application::scheduler::Scheduler;
use crate::config::{AppConfig, Mode, ModelRouter};
use crate::domain::ports::{CompletionClient, ExchangeClient};
use crate::domain::repositories::{
    AccountSnapshotRepository, AgentRepository, BotStateRepository, DecisionRepository,
    OrderRepository, PerformanceRepository,
};
use crate::infrastructure::hyperliquid::HyperliquidClient;
use crate::infrastructure::llm::ChatCompletionClient;
use crate::infrastructure::mock::{MockCompletionClient, MockExchangeClient};
use crate::infrastructure::observability::{Metrics, MetricsReporter};
use crate::infrastructure::persistence::database::Database;
use crate::infrastructure::persistence::repositories::{
    SqliteAccountSnapshotRepository, SqliteAgentRepository, SqliteBotStateRepository,
    SqliteDecisionRepository, SqliteOrderRepository, SqlitePerformanceRepository,
};

pub struct Application {
    pub config: AppConfig,
    pub scheduler: Arc<Scheduler>,
    pub metrics: Metrics,
    pub database: Database,
}

impl Application {
    pub async fn build(config: AppConfig) -> Result<Self> {
        let database = Database::new(&config.database_url).await?;
        let metrics = Metrics::new().context("Failed to register metrics")?;

        let exchange: Arc<dyn ExchangeClient> = match config.mode {
            Mode::Live => Arc::new(HyperliquidClient::new(
                &config.venue_base_url,
                &config.signing_key,
                config.is_testnet,
                config.is_cross_margin,
                config.venue_requests_per_minute,
            )?),
            Mode::Mock => {
                info!("Application: MOCK mode — no venue traffic, no real orders");
                Arc::new(MockExchangeClient::new())
            }
        };

        let model_client: Arc<dyn CompletionClient> = match config.mode {
            Mode::Live => Arc::new(ChatCompletionClient::new(Duration::from_secs(
                config.model_timeout_secs,
            ))),
            Mode::Mock => Arc::new(MockCompletionClient::new()),
        };

        let agents: Arc<dyn AgentRepository> =
            Arc::new(SqliteAgentRepository::new(database.clone()));
        let decisions: Arc<dyn DecisionRepository> =
            Arc::new(SqliteDecisionRepository::new(database.clone()));
        let orders: Arc<dyn OrderRepository> =
            Arc::new(SqliteOrderRepository::new(database.clone()));
        let snapshots: Arc<dyn AccountSnapshotRepository> =
            Arc::new(SqliteAccountSnapshotRepository::new(database.clone()));
        let bot_state: Arc<dyn BotStateRepository> =
            Arc::new(SqliteBotStateRepository::new(database.clone()));
        let performance: Arc<dyn PerformanceRepository> =
            Arc::new(SqlitePerformanceRepository::new(database.clone()));

        let collector = DataCollector::new(Arc::clone(&exchange));
        let orchestrator = AgentOrchestrator::new(
            model_client,
            ModelRouter::from_config(&config),
            metrics.clone(),
            Duration::from_secs(config.model_timeout_secs),
        );
        let gate = RiskGate::new(config.global_max_leverage);
        let executor = Executor::new(
            Arc::clone(&exchange),
            Arc::clone(&orders),
            metrics.clone(),
            config.slippage_pct,
        );

        let runner = Arc::new(CycleRunner::new(
            collector,
            orchestrator,
            gate,
            executor,
            exchange,
            agents,
            decisions,
            snapshots,
            performance,
            metrics.clone(),
        ));

        let scheduler = Arc::new(Scheduler::new(
            runner,
            bot_state,
            metrics.clone(),
            Duration::from_secs(config.cycle_period_secs),
            Duration::from_secs(config.shutdown_timeout_secs),
        ));

        Ok(Self {
            config,
            scheduler,
            metrics,
            database,
        })
    }

    /// Run until the shutdown flag flips. Blocks the caller; spawn signal
    /// handling around it.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        if self.config.observability_enabled {
            let reporter = MetricsReporter::new(
                self.metrics.clone(),
                self.config.observability_interval_secs,
            );
            tokio::spawn(reporter.run());
            info!(
                "Application: metrics reporter started ({}s interval)",
                self.config.observability_interval_secs
            );
        }

        self.scheduler.run(shutdown).await
    }
}
