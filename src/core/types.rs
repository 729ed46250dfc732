use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Normalized instrument identifier, e.g. "BTC-ZAR".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self { Self(s.into().to_uppercase()) }
    pub fn as_str(&self) -> &str { &self.0 }

    /// Venue pair format: "BTC-ZAR" -> "BTCZAR".
    pub fn to_venue(&self) -> String {
        self.0.chars().filter(|c| *c != '-').collect()
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.0) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side { Buy, Sell }

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Order category. LimitMaker is post-only: it may never take liquidity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderCategory { Limit, LimitMaker }

impl OrderCategory {
    pub fn is_post_only(&self) -> bool { matches!(self, OrderCategory::LimitMaker) }
}

/// Order lifecycle states. Transitions are owned by the order tracker;
/// terminal states are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Request handed to the transport, no venue response yet.
    Submitted,
    /// Venue accepted the request. Not proof of anything further.
    Acknowledged,
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl LifecycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Filled | LifecycleState::Cancelled | LifecycleState::Rejected)
    }

    /// Rank used to forbid regressions: an update may only move forward.
    pub fn rank(&self) -> u8 {
        match self {
            LifecycleState::Submitted => 0,
            LifecycleState::Acknowledged => 1,
            LifecycleState::Open => 2,
            LifecycleState::PartiallyFilled => 3,
            LifecycleState::Filled | LifecycleState::Cancelled | LifecycleState::Rejected => 4,
        }
    }
}

/// One aggregated price level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// New order request from the strategy layer.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub symbol: Symbol,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub category: OrderCategory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub available: Decimal,
    pub total: Decimal,
}

/// Health of one transport channel as seen by the strategy layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelHealth {
    Connecting,
    Streaming,
    /// Reconnect ceiling exceeded; REST fallback is in effect. The strategy
    /// layer should halt order submission.
    Degraded,
}

/// Connectivity snapshot over both channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connectivity {
    pub market: ChannelHealth,
    pub account: ChannelHealth,
}

impl Connectivity {
    pub fn order_entry_allowed(&self) -> bool {
        self.account != ChannelHealth::Degraded
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
