pub mod core;
pub mod hyperliquid;
pub mod llm;
pub mod mock;
pub mod observability;
pub mod persistence;
