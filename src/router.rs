//! Message router - demultiplexes raw frames into typed events
//!
//! Every inbound frame carries a `type` discriminator. The router maps the
//! known discriminators onto closed event enums; anything else becomes an
//! explicit `Unrecognized` variant that the dispatcher logs and drops. No
//! frame is ever silently coerced.

use serde_json::Value;

use crate::core::{Error, Result};
use crate::valr_api::model::{
    AccountTrade, BalanceEntry, BookDiff, BookSnapshot, CancelAck, MarketSummary, OpenOrderItem,
    OrderAck, OrderStatusUpdate, PublicTrade, RawFrame,
};

// Market data stream discriminators.
pub const EV_BOOK_DIFF: &str = "AGGREGATED_ORDERBOOK_UPDATE";
pub const EV_BOOK_SNAPSHOT: &str = "FULL_ORDERBOOK_SNAPSHOT";
pub const EV_TRADE: &str = "NEW_TRADE";
pub const EV_MARKET_SUMMARY: &str = "MARKET_SUMMARY_UPDATE";

// Account stream discriminators.
pub const EV_ORDER_PLACED: &str = "ORDER_PLACED";
pub const EV_ORDER_FAILED: &str = "ORDER_FAILED";
pub const EV_ORDER_STATUS: &str = "ORDER_STATUS_UPDATE";
pub const EV_OPEN_ORDERS: &str = "OPEN_ORDERS_UPDATE";
pub const EV_ACCOUNT_TRADE: &str = "NEW_ACCOUNT_TRADE";
pub const EV_CANCEL_ACCEPTED: &str = "CANCEL_ORDER_WS_RESPONSE";
pub const EV_CANCEL_FAILED: &str = "FAILED_CANCEL_ORDER";
pub const EV_BALANCE: &str = "BALANCE_UPDATE";

// Control / administrative.
pub const EV_PING: &str = "PING";
pub const EV_PONG: &str = "PONG";
pub const EV_AUTHENTICATED: &str = "AUTHENTICATED";
pub const EV_SUBSCRIBED: &str = "SUBSCRIBED";

#[derive(Debug)]
pub enum MarketEvent {
    Diff { pair: String, diff: BookDiff },
    Snapshot { pair: String, snapshot: BookSnapshot },
    Trade { pair: String, trade: PublicTrade },
    Summary(MarketSummary),
    /// Subscription confirmation; nothing to do.
    Subscribed,
    Unrecognized { event_type: String },
}

#[derive(Debug)]
pub enum AccountEvent {
    /// Placement request accepted. Acknowledgment, not an order status.
    Placed(OrderAck),
    /// Placement request definitively rejected.
    Failed(OrderAck),
    /// Authoritative per-order status change.
    Status(OrderStatusUpdate),
    /// Periodic full list of open orders. Corroborating evidence only.
    OpenOrders(Vec<OpenOrderItem>),
    /// One fill against one of our orders.
    Trade(AccountTrade),
    /// Cancel request accepted - the order is not yet gone.
    CancelAccepted(CancelAck),
    /// Cancel request refused - the order is still live.
    CancelFailed(OrderAck),
    Balances(Vec<BalanceEntry>),
    Authenticated,
    Unrecognized { event_type: String },
}

/// Parse the frame envelope. Bare `PING`/`PONG` text frames (the venue sends
/// both forms) are normalized into the envelope shape.
pub fn parse_frame(text: &str) -> Result<RawFrame> {
    let trimmed = text.trim();
    if trimmed.eq_ignore_ascii_case("PONG") || trimmed.eq_ignore_ascii_case("PING") {
        return Ok(RawFrame {
            event_type: trimmed.to_uppercase(),
            pair: None,
            data: None,
        });
    }
    serde_json::from_str(trimmed)
        .map_err(|e| Error::Protocol(format!("unparseable frame: {} ({})", truncate(trimmed), e)))
}

/// True for frames the session layer consumes itself (keepalive).
pub fn is_control(frame: &RawFrame) -> bool {
    frame.event_type == EV_PING || frame.event_type == EV_PONG
}

pub fn classify_market(frame: RawFrame) -> Result<MarketEvent> {
    match frame.event_type.as_str() {
        EV_BOOK_DIFF => {
            let pair = require_pair(&frame)?;
            let diff: BookDiff = payload(frame.data)?;
            Ok(MarketEvent::Diff { pair, diff })
        }
        EV_BOOK_SNAPSHOT => {
            let pair = require_pair(&frame)?;
            let snapshot: BookSnapshot = payload(frame.data)?;
            Ok(MarketEvent::Snapshot { pair, snapshot })
        }
        EV_TRADE => {
            let pair = require_pair(&frame)?;
            let trade: PublicTrade = payload(frame.data)?;
            Ok(MarketEvent::Trade { pair, trade })
        }
        EV_MARKET_SUMMARY => Ok(MarketEvent::Summary(payload(frame.data)?)),
        EV_SUBSCRIBED => Ok(MarketEvent::Subscribed),
        other => Ok(MarketEvent::Unrecognized {
            event_type: other.to_string(),
        }),
    }
}

pub fn classify_account(frame: RawFrame) -> Result<AccountEvent> {
    match frame.event_type.as_str() {
        EV_ORDER_PLACED => Ok(AccountEvent::Placed(payload(frame.data)?)),
        EV_ORDER_FAILED => Ok(AccountEvent::Failed(payload(frame.data)?)),
        EV_ORDER_STATUS => Ok(AccountEvent::Status(payload(frame.data)?)),
        EV_OPEN_ORDERS => Ok(AccountEvent::OpenOrders(payload(frame.data)?)),
        EV_ACCOUNT_TRADE => Ok(AccountEvent::Trade(payload(frame.data)?)),
        EV_CANCEL_ACCEPTED => Ok(AccountEvent::CancelAccepted(payload(frame.data)?)),
        EV_CANCEL_FAILED => Ok(AccountEvent::CancelFailed(payload(frame.data)?)),
        EV_BALANCE => Ok(AccountEvent::Balances(balances(frame.data)?)),
        EV_AUTHENTICATED => Ok(AccountEvent::Authenticated),
        other => Ok(AccountEvent::Unrecognized {
            event_type: other.to_string(),
        }),
    }
}

fn require_pair(frame: &RawFrame) -> Result<String> {
    frame
        .pair
        .clone()
        .ok_or_else(|| Error::Protocol(format!("{} frame without currencyPairSymbol", frame.event_type)))
}

fn payload<T: serde::de::DeserializeOwned>(data: Option<Value>) -> Result<T> {
    let value = data.ok_or_else(|| Error::Protocol("frame without data payload".to_string()))?;
    serde_json::from_value(value).map_err(|e| Error::Protocol(format!("bad payload: {}", e)))
}

/// `BALANCE_UPDATE` arrives as a single entry or a list depending on the
/// trigger; normalize to a list.
fn balances(data: Option<Value>) -> Result<Vec<BalanceEntry>> {
    let value = data.ok_or_else(|| Error::Protocol("balance frame without data".to_string()))?;
    match value {
        Value::Array(_) => {
            serde_json::from_value(value).map_err(|e| Error::Protocol(format!("bad balances: {}", e)))
        }
        obj => {
            let one: BalanceEntry = serde_json::from_value(obj)
                .map_err(|e| Error::Protocol(format!("bad balance: {}", e)))?;
            Ok(vec![one])
        }
    }
}

fn truncate(text: &str) -> &str {
    text.get(..120).unwrap_or(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff_frame_routes_to_market_diff() {
        let text = r#"{
            "type": "AGGREGATED_ORDERBOOK_UPDATE",
            "currencyPairSymbol": "BTCZAR",
            "data": {"Bids": [], "Asks": [], "SequenceNumber": 7}
        }"#;
        let event = classify_market(parse_frame(text).unwrap()).unwrap();
        match event {
            MarketEvent::Diff { pair, diff } => {
                assert_eq!(pair, "BTCZAR");
                assert_eq!(diff.sequence, 7);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_unknown_discriminator_is_explicit() {
        let text = r#"{"type": "SOMETHING_NEW", "data": {}}"#;
        let event = classify_market(parse_frame(text).unwrap()).unwrap();
        assert!(matches!(
            event,
            MarketEvent::Unrecognized { event_type } if event_type == "SOMETHING_NEW"
        ));

        let text = r#"{"type": "SOMETHING_ELSE"}"#;
        let event = classify_account(parse_frame(text).unwrap()).unwrap();
        assert!(matches!(event, AccountEvent::Unrecognized { .. }));
    }

    #[test]
    fn test_malformed_frame_is_protocol_error() {
        assert!(matches!(parse_frame("not json at all"), Err(Error::Protocol(_))));
        // Known type with a broken payload is also a protocol error.
        let frame = parse_frame(r#"{"type": "ORDER_STATUS_UPDATE", "data": {"bogus": 1}}"#).unwrap();
        assert!(matches!(classify_account(frame), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_bare_pong_normalizes_to_control() {
        let frame = parse_frame("PONG").unwrap();
        assert!(is_control(&frame));
        let frame = parse_frame(r#"{"type": "PONG"}"#).unwrap();
        assert!(is_control(&frame));
    }

    #[test]
    fn test_open_orders_routes_with_list_payload() {
        let text = r#"{
            "type": "OPEN_ORDERS_UPDATE",
            "data": [{"orderId": "e1", "customerOrderId": "c1", "status": "Placed"}]
        }"#;
        let event = classify_account(parse_frame(text).unwrap()).unwrap();
        match event {
            AccountEvent::OpenOrders(items) => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].status.as_deref(), Some("Placed"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_balance_single_object_normalized_to_list() {
        let text = r#"{
            "type": "BALANCE_UPDATE",
            "data": {"currency": {"currencyCode": "ZAR"}, "available": "10.5", "balance": "12"}
        }"#;
        let event = classify_account(parse_frame(text).unwrap()).unwrap();
        match event {
            AccountEvent::Balances(entries) => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].currency.currency_code, "ZAR");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
