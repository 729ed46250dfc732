//! Wire payload models for the VALR REST and WebSocket APIs

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope shared by every inbound WebSocket frame: a `type` discriminator,
/// an optional pair symbol, and the event payload.
#[derive(Debug, Clone, Deserialize)]
pub struct RawFrame {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(rename = "currencyPairSymbol")]
    pub pair: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

/// One aggregated order book level as the venue sends it.
#[derive(Debug, Clone, Deserialize)]
pub struct WireLevel {
    pub price: Decimal,
    pub quantity: Decimal,
    #[serde(rename = "orderCount", default)]
    pub order_count: Option<u32>,
}

/// Order book snapshot (REST `/v1/public/{pair}/orderbook`) and the
/// `FULL_ORDERBOOK_SNAPSHOT` stream payload share this shape.
#[derive(Debug, Clone, Deserialize)]
pub struct BookSnapshot {
    #[serde(rename = "Bids", default)]
    pub bids: Vec<WireLevel>,
    #[serde(rename = "Asks", default)]
    pub asks: Vec<WireLevel>,
    #[serde(rename = "SequenceNumber", default)]
    pub sequence: u64,
}

/// `AGGREGATED_ORDERBOOK_UPDATE` payload: the levels that changed since the
/// previous sequence number. Quantity zero deletes a level.
#[derive(Debug, Clone, Deserialize)]
pub struct BookDiff {
    #[serde(rename = "Bids", default)]
    pub bids: Vec<WireLevel>,
    #[serde(rename = "Asks", default)]
    pub asks: Vec<WireLevel>,
    #[serde(rename = "SequenceNumber")]
    pub sequence: u64,
    /// Venue integrity checksum over the top 25 levels, when provided.
    #[serde(rename = "Checksum", default)]
    pub checksum: Option<u32>,
}

/// `MARKET_SUMMARY_UPDATE` payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSummary {
    pub currency_pair: String,
    #[serde(default)]
    pub last_traded_price: Option<Decimal>,
    #[serde(default)]
    pub bid_price: Option<Decimal>,
    #[serde(default)]
    pub ask_price: Option<Decimal>,
}

/// Public `NEW_TRADE` payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicTrade {
    pub price: Decimal,
    pub quantity: Decimal,
    #[serde(default)]
    pub taker_side: Option<String>,
}

/// Instrument definition from `/v1/public/pairs`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairInfo {
    pub symbol: String,
    pub base_currency: String,
    pub quote_currency: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub min_base_amount: Option<Decimal>,
    #[serde(default)]
    pub max_base_amount: Option<Decimal>,
    #[serde(default)]
    pub tick_size: Option<Decimal>,
    #[serde(default)]
    pub base_decimal_places: Option<u32>,
    #[serde(default)]
    pub min_quote_amount: Option<Decimal>,
}

/// `ORDER_PLACED` / `ORDER_FAILED` payload: the venue's response to a
/// placement request. Acknowledgment only - not an order status.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub customer_order_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Cancel-request acceptance payload. `requested: true` means the venue took
/// the cancel request, nothing more.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelAck {
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub customer_order_id: Option<String>,
    #[serde(default)]
    pub requested: bool,
}

/// `ORDER_STATUS_UPDATE` payload. The definitive per-order status lives in
/// `orderStatusType` - never to be confused with the `status` field of the
/// open-orders list items below.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusUpdate {
    pub order_id: String,
    #[serde(default)]
    pub customer_order_id: Option<String>,
    pub order_status_type: String,
    #[serde(default)]
    pub currency_pair: Option<String>,
    #[serde(default)]
    pub remaining_quantity: Option<Decimal>,
    #[serde(default)]
    pub original_quantity: Option<Decimal>,
    #[serde(default)]
    pub order_updated_at: Option<String>,
    #[serde(default)]
    pub failed_reason: Option<String>,
}

/// One item of `OPEN_ORDERS_UPDATE` / REST `/v1/orders/open`. Carries the
/// venue's `status` field, which is corroborating evidence only.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenOrderItem {
    pub order_id: String,
    #[serde(default)]
    pub customer_order_id: Option<String>,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub remaining_quantity: Option<Decimal>,
    #[serde(default)]
    pub original_quantity: Option<Decimal>,
    #[serde(default)]
    pub currency_pair: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// `NEW_ACCOUNT_TRADE` payload: one fill against one of our orders.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountTrade {
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub customer_order_id: Option<String>,
    pub price: Decimal,
    pub quantity: Decimal,
    #[serde(default)]
    pub currency_pair: Option<String>,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub traded_at: Option<String>,
}

/// One balance entry (`BALANCE_UPDATE` payload item, REST
/// `/v1/account/balances` element).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceEntry {
    pub currency: CurrencyRef,
    pub available: Decimal,
    pub balance: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrencyRef {
    pub currency_code: String,
}

/// `POST /v1/orders/limit` request body. Field order matters for signing:
/// the body is serialized once and the same string is signed and sent.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceLimitOrderRequest {
    pub side: String,
    pub quantity: Decimal,
    pub price: Decimal,
    pub pair: String,
    pub post_only: bool,
    pub customer_order_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaceOrderResponse {
    pub id: String,
}

/// `DELETE /v1/orders/order` request body. Either id form is accepted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_order_id: Option<String>,
    pub pair: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTime {
    pub epoch_time: u64,
}

// ---------------------------------------------------------------------------
// Outbound WebSocket frames
// ---------------------------------------------------------------------------

/// Subscription request: one message declaring instrument/event pairs.
pub fn subscribe_frame(event: &str, venue_pairs: &[String]) -> String {
    serde_json::json!({
        "type": "SUBSCRIBE",
        "subscriptions": [{
            "event": event,
            "pairs": venue_pairs,
        }]
    })
    .to_string()
}

pub fn ping_frame() -> String {
    serde_json::json!({"type": "PING"}).to_string()
}

pub fn pong_frame() -> String {
    serde_json::json!({"type": "PONG"}).to_string()
}

/// Ask the venue to cancel our open orders if this connection drops.
pub fn cancel_on_disconnect_frame(active: bool) -> String {
    serde_json::json!({
        "type": "CANCEL_ON_DISCONNECT",
        "data": { "active": active }
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_frame_shape() {
        let frame = subscribe_frame("AGGREGATED_ORDERBOOK_UPDATE", &["BTCZAR".to_string()]);
        let v: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["type"], "SUBSCRIBE");
        assert_eq!(v["subscriptions"][0]["event"], "AGGREGATED_ORDERBOOK_UPDATE");
        assert_eq!(v["subscriptions"][0]["pairs"][0], "BTCZAR");
    }

    #[test]
    fn test_book_diff_parses_decimal_strings() {
        let raw = r#"{
            "Bids": [{"price": "920001.5", "quantity": "0.025", "orderCount": 3}],
            "Asks": [],
            "SequenceNumber": 42,
            "Checksum": 123456
        }"#;
        let diff: BookDiff = serde_json::from_str(raw).unwrap();
        assert_eq!(diff.sequence, 42);
        assert_eq!(diff.checksum, Some(123456));
        assert_eq!(diff.bids[0].price.to_string(), "920001.5");
    }

    #[test]
    fn test_status_update_and_open_order_use_distinct_fields() {
        let status: OrderStatusUpdate = serde_json::from_str(
            r#"{"orderId": "x1", "orderStatusType": "Filled"}"#,
        )
        .unwrap();
        assert_eq!(status.order_status_type, "Filled");

        let item: OpenOrderItem =
            serde_json::from_str(r#"{"orderId": "x1", "status": "Placed"}"#).unwrap();
        assert_eq!(item.status.as_deref(), Some("Placed"));
    }
}
