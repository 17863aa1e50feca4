//! Shared harness for the integration scenarios: in-memory-ish SQLite plus
//! the mock venue and mock model wired through the real pipeline.

use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

use hypermind::application::collector::DataCollector;
use hypermind::application::cycle::CycleRunner;
use hypermind::application::executor::Executor;
use hypermind::application::orchestrator::AgentOrchestrator;
use hypermind::application::risk_gate::RiskGate;
use hypermind::config::{AppConfig, Mode, ModelRouter};
use hypermind::domain::repositories::{
    AccountSnapshotRepository, AgentRepository, BotStateRepository, DecisionRepository,
    OrderRepository, PerformanceRepository,
};
use hypermind::domain::types::{AgentConfig, RiskProfile};
use hypermind::infrastructure::mock::{MockCompletionClient, MockExchangeClient};
use hypermind::infrastructure::observability::Metrics;
use hypermind::infrastructure::persistence::database::Database;
use hypermind::infrastructure::persistence::repositories::{
    SqliteAccountSnapshotRepository, SqliteAgentRepository, SqliteBotStateRepository,
    SqliteDecisionRepository, SqliteOrderRepository, SqlitePerformanceRepository,
};

pub struct Harness {
    pub database: Database,
    pub exchange: Arc<MockExchangeClient>,
    pub model: Arc<MockCompletionClient>,
    pub runner: Arc<CycleRunner>,
    pub metrics: Metrics,
    pub agents: Arc<dyn AgentRepository>,
    pub decisions: Arc<dyn DecisionRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub snapshots: Arc<dyn AccountSnapshotRepository>,
    pub bot_state: Arc<dyn BotStateRepository>,
    pub performance: Arc<dyn PerformanceRepository>,
}

pub fn test_db_url(name: &str) -> String {
    let path = std::env::temp_dir().join(format!(
        "hypermind-test-{}-{}.db",
        name,
        std::process::id()
    ));
    let _ = std::fs::remove_file(&path);
    format!("sqlite://{}", path.display())
}

fn test_router() -> ModelRouter {
    let config = AppConfig {
        mode: Mode::Mock,
        venue_base_url: String::new(),
        is_testnet: true,
        signing_key: String::new(),
        is_cross_margin: true,
        venue_requests_per_minute: 600,
        slippage_pct: dec!(0.05),
        cycle_period_secs: 180,
        shutdown_timeout_secs: 5,
        global_max_leverage: 10,
        official_base_url: "https://official.invalid/v1".to_string(),
        official_api_key: "test".to_string(),
        openrouter_base_url: "https://openrouter.invalid/api/v1".to_string(),
        openrouter_api_key: "test".to_string(),
        model_timeout_secs: 5,
        database_url: String::new(),
        observability_enabled: false,
        observability_interval_secs: 60,
    };
    ModelRouter::from_config(&config)
}

pub async fn build_harness(db_name: &str) -> Harness {
    let database = Database::new(&test_db_url(db_name)).await.unwrap();
    let metrics = Metrics::new().unwrap();

    let exchange = Arc::new(MockExchangeClient::new());
    let model = Arc::new(MockCompletionClient::new());

    let agents: Arc<dyn AgentRepository> = Arc::new(SqliteAgentRepository::new(database.clone()));
    let decisions: Arc<dyn DecisionRepository> =
        Arc::new(SqliteDecisionRepository::new(database.clone()));
    let orders: Arc<dyn OrderRepository> = Arc::new(SqliteOrderRepository::new(database.clone()));
    let snapshots: Arc<dyn AccountSnapshotRepository> =
        Arc::new(SqliteAccountSnapshotRepository::new(database.clone()));
    let bot_state: Arc<dyn BotStateRepository> =
        Arc::new(SqliteBotStateRepository::new(database.clone()));
    let performance: Arc<dyn PerformanceRepository> =
        Arc::new(SqlitePerformanceRepository::new(database.clone()));

    let runner = Arc::new(CycleRunner::new(
        DataCollector::new(exchange.clone()),
        AgentOrchestrator::new(
            model.clone(),
            test_router(),
            metrics.clone(),
            Duration::from_secs(5),
        ),
        RiskGate::new(10),
        Executor::new(
            exchange.clone(),
            Arc::clone(&orders),
            metrics.clone(),
            dec!(0.05),
        ),
        exchange.clone(),
        Arc::clone(&agents),
        Arc::clone(&decisions),
        Arc::clone(&snapshots),
        Arc::clone(&performance),
        metrics.clone(),
    ));

    Harness {
        database,
        exchange,
        model,
        runner,
        metrics,
        agents,
        decisions,
        orders,
        snapshots,
        bot_state,
        performance,
    }
}

pub fn default_agent() -> AgentConfig {
    AgentConfig {
        agent_id: "deepseek-chat".to_string(),
        display_name: "DeepSeek Chat".to_string(),
        is_active: true,
        primary_model: "deepseek-chat".to_string(),
        fallback_model: "openrouter:deepseek/deepseek-chat".to_string(),
        risk_profile: RiskProfile {
            max_leverage: 10,
            max_position_fraction: dec!(0.20),
            max_gross_exposure_fraction: dec!(0.80),
            stop_loss_required: true,
        },
    }
}
