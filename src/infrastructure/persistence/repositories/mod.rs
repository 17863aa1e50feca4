mod account_snapshot_repository;
mod agent_repository;
mod bot_state_repository;
mod decision_repository;
mod order_repository;
mod performance_repository;

pub use account_snapshot_repository::SqliteAccountSnapshotRepository;
pub use agent_repository::SqliteAgentRepository;
pub use bot_state_repository::SqliteBotStateRepository;
pub use decision_repository::SqliteDecisionRepository;
pub use order_repository::SqliteOrderRepository;
pub use performance_repository::SqlitePerformanceRepository;
