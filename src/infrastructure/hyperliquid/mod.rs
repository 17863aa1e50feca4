//! Venue client for the perpetual DEX.
//!
//! Public market data goes through the unauthenticated info endpoint; order
//! placement, cancels and leverage updates are signed actions against the
//! exchange endpoint. Asset indices are resolved dynamically from the meta
//! response and cached in-process — never hard-coded.

mod common;
mod exchange;
mod info;
mod signing;
pub mod types;

pub use signing::ActionSigner;

use crate::domain::errors::ExchangeError;
use crate::domain::ports::{
    AssetContext, CandleInterval, ExchangeClient, OrderAck, OrderRequest,
};
use crate::domain::types::{AccountState, Candle, Coin, Position};
use crate::infrastructure::core::http_client_factory::HttpClientFactory;
use crate::infrastructure::core::token_bucket::TokenBucket;
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

pub(crate) struct MetaEntry {
    pub asset_index: u32,
    pub sz_decimals: u32,
}

pub(crate) struct MetaCache {
    pub assets: HashMap<String, MetaEntry>,
    pub fetched_at: std::time::Instant,
}

pub struct HyperliquidClient {
    pub(crate) info_http: ClientWithMiddleware,
    pub(crate) exchange_http: reqwest::Client,
    pub(crate) info_url: String,
    pub(crate) exchange_url: String,
    pub(crate) signer: ActionSigner,
    pub(crate) user_address: String,
    pub(crate) is_cross: bool,
    pub(crate) bucket: Arc<TokenBucket>,
    pub(crate) meta_cache: RwLock<Option<MetaCache>>,
}

impl HyperliquidClient {
    pub fn new(
        base_url: &str,
        signing_key: &str,
        is_testnet: bool,
        is_cross: bool,
        requests_per_minute: u32,
    ) -> anyhow::Result<Self> {
        let signer = ActionSigner::new(signing_key, is_testnet)?;
        let user_address = format!("{:#x}", signer.address());
        let base = base_url.trim_end_matches('/');

        Ok(Self {
            info_http: HttpClientFactory::create_client(),
            exchange_http: HttpClientFactory::create_bare_client(Duration::from_secs(5)),
            info_url: format!("{}/info", base),
            exchange_url: format!("{}/exchange", base),
            signer,
            user_address,
            is_cross,
            bucket: Arc::new(TokenBucket::new(requests_per_minute)),
            meta_cache: RwLock::new(None),
        })
    }
}

#[async_trait]
impl ExchangeClient for HyperliquidClient {
    async fn candles(
        &self,
        coin: Coin,
        interval: CandleInterval,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        self.fetch_candles(coin, interval, limit).await
    }

    async fn asset_contexts(&self) -> Result<HashMap<Coin, AssetContext>, ExchangeError> {
        self.fetch_asset_contexts().await
    }

    async fn positions(&self) -> Result<Vec<Position>, ExchangeError> {
        self.fetch_positions().await
    }

    async fn account(&self) -> Result<AccountState, ExchangeError> {
        self.fetch_account().await
    }

    async fn update_leverage(&self, coin: Coin, leverage: u32) -> Result<(), ExchangeError> {
        self.send_update_leverage(coin, leverage).await
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        self.send_order(request).await
    }

    async fn cancel_order(&self, coin: Coin, exchange_order_id: i64) -> Result<(), ExchangeError> {
        self.send_cancel(coin, exchange_order_id).await
    }
}
