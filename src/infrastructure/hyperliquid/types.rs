//! Wire types for the venue's info and exchange endpoints.
//!
//! Field names and ordering mirror the venue API exactly. Action structs are
//! MessagePack-encoded for the signature hash, so declaration order of the
//! fields is part of the wire contract — do not reorder.

use serde::{Deserialize, Serialize};

// ---- info endpoint ---------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandleSnapshotReq {
    pub coin: String,
    pub interval: String,
    pub start_time: i64,
    pub end_time: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CandleWire {
    /// Open time, ms.
    pub t: i64,
    pub o: String,
    pub h: String,
    pub l: String,
    pub c: String,
    pub v: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMeta {
    pub name: String,
    pub sz_decimals: u32,
    #[serde(default)]
    pub max_leverage: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Meta {
    pub universe: Vec<AssetMeta>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetCtxWire {
    pub funding: String,
    pub open_interest: String,
    pub mark_px: String,
    #[serde(default)]
    pub mid_px: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeverageWire {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionWire {
    pub coin: String,
    /// Signed size in contracts; positive = long.
    pub szi: String,
    #[serde(default)]
    pub entry_px: Option<String>,
    pub position_value: String,
    pub unrealized_pnl: String,
    #[serde(default)]
    pub liquidation_px: Option<String>,
    pub leverage: LeverageWire,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetPositionWire {
    pub position: PositionWire,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarginSummaryWire {
    pub account_value: String,
    pub total_ntl_pos: String,
    pub total_margin_used: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearinghouseStateWire {
    pub asset_positions: Vec<AssetPositionWire>,
    pub margin_summary: MarginSummaryWire,
    pub withdrawable: String,
}

// ---- exchange endpoint (signed actions) ------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct LimitTif {
    pub tif: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TriggerWire {
    #[serde(rename = "isMarket")]
    pub is_market: bool,
    #[serde(rename = "triggerPx")]
    pub trigger_px: String,
    pub tpsl: String,
}

#[derive(Debug, Clone, Serialize)]
pub enum OrderTypeWire {
    #[serde(rename = "limit")]
    Limit(LimitTif),
    #[serde(rename = "trigger")]
    Trigger(TriggerWire),
}

/// One order inside an `order` action. Single-letter keys and field order are
/// the venue's signing format.
#[derive(Debug, Clone, Serialize)]
pub struct OrderWire {
    pub a: u32,
    pub b: bool,
    pub p: String,
    pub s: String,
    pub r: bool,
    pub t: OrderTypeWire,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub c: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Action {
    #[serde(rename = "order")]
    Order {
        orders: Vec<OrderWire>,
        grouping: String,
    },
    #[serde(rename = "cancel")]
    Cancel { cancels: Vec<CancelWire> },
    #[serde(rename = "updateLeverage")]
    UpdateLeverage {
        asset: u32,
        #[serde(rename = "isCross")]
        is_cross: bool,
        leverage: u32,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelWire {
    pub a: u32,
    pub o: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WireSignature {
    pub r: String,
    pub s: String,
    pub v: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRequest {
    pub action: Action,
    pub nonce: u64,
    pub signature: WireSignature,
    pub vault_address: Option<String>,
}

// ---- exchange endpoint responses -------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RestingAck {
    pub oid: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilledAck {
    pub oid: i64,
    pub total_sz: String,
    pub avg_px: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatusAck {
    Resting(RestingAck),
    Filled(FilledAck),
    Error(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderResponseData {
    pub statuses: Vec<OrderStatusAck>,
}
