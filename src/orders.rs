//! Order lifecycle state machine and reconciliation guard
//!
//! The tracker is the authoritative local model of every order this client
//! has submitted. Three event classes drive it, each with a different trust
//! level:
//!
//! 1. Acknowledgments (placement accepted, cancel request accepted) prove a
//!    request was received, never its effect. They can move `Submitted ->
//!    Acknowledged` and set `pending_cancel`; nothing else.
//! 2. Authoritative status events (`orderStatusType`, account trades) are the
//!    only class allowed to reach a terminal state.
//! 3. The periodic open-orders list is corroborating evidence only. Absence
//!    from it infers cancellation strictly under the guard policy below.
//!
//! The market data and account streams are independently ordered, so none of
//! this logic may assume cross-stream timing.

use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::core::{LifecycleState, NewOrder, OrderCategory, Side, Symbol};
use crate::valr_api::model::{AccountTrade, CancelAck, OpenOrderItem, OrderAck, OrderStatusUpdate};

/// Client order id prefix. Lets a restarted process recognize its own orders
/// in the venue's open-orders list. Ids stay within the venue's 36-char cap.
pub const CLIENT_ORDER_ID_PREFIX: &str = "VC-";

/// Tunable guard windows. These are policy constants, not protocol
/// guarantees; the defaults are conservative.
#[derive(Debug, Clone)]
pub struct GuardPolicy {
    /// Minimum order age before absence from the open-orders list may infer
    /// cancellation. Tolerates the delay between submission and the order
    /// showing up in the venue's own book.
    pub reconcile_grace_ms: u64,
    /// An authoritative event this recent vetoes inferred cancellation.
    /// Tolerates event delivery jitter.
    pub status_quiet_ms: u64,
    /// How long a terminal order is retained for duplicate suppression.
    pub eviction_delay_ms: u64,
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self {
            reconcile_grace_ms: 5_000,
            status_quiet_ms: 2_000,
            eviction_delay_ms: 30_000,
        }
    }
}

/// One tracked order. Owned exclusively by the tracker until terminal.
#[derive(Debug, Clone)]
pub struct TrackedOrder {
    /// Client-assigned correlation id, generated before submission. Doubles
    /// as the venue's `customerOrderId`.
    pub local_id: String,
    /// Exchange-assigned id, once known.
    pub exchange_id: Option<String>,
    pub symbol: Symbol,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub category: OrderCategory,
    pub state: LifecycleState,
    /// Cancel requested; not yet confirmed. The strategy layer uses this to
    /// avoid re-requesting.
    pub pending_cancel: bool,
    /// Set after a reconnect until the next open-orders list confirms or
    /// refutes the order's existence.
    pub awaiting_reconciliation: bool,
    pub submitted_at: u64,
    /// Exchange-attributed when available, else local receipt time.
    pub updated_at: u64,
    /// Local per-order event counter; increases on every applied mutation.
    pub event_seq: u64,
    terminal_at: Option<u64>,
    last_authoritative_at: Option<u64>,
}

impl TrackedOrder {
    fn touch(&mut self, ts: u64) {
        self.updated_at = ts;
        self.event_seq += 1;
    }
}

/// Map the venue's status string onto a lifecycle state. Both the
/// authoritative `orderStatusType` field and the open-orders `status` field
/// use this vocabulary, but only the former may drive terminal transitions.
pub fn map_venue_status(status: &str) -> Option<LifecycleState> {
    match status {
        "Placed" | "Open" | "Active" => Some(LifecycleState::Open),
        "Partially Filled" => Some(LifecycleState::PartiallyFilled),
        "Filled" => Some(LifecycleState::Filled),
        "Cancelled" => Some(LifecycleState::Cancelled),
        "Failed" | "Expired" | "Rejected" => Some(LifecycleState::Rejected),
        _ => None,
    }
}

/// Forward-only transition rule. Terminal states are never left; the only
/// backward edge is PartiallyFilled -> Open (the venue reports both while an
/// order rests with residual quantity).
fn can_transition(from: LifecycleState, to: LifecycleState) -> bool {
    if from.is_terminal() {
        return false;
    }
    if from == LifecycleState::PartiallyFilled && to == LifecycleState::Open {
        return true;
    }
    to.rank() >= from.rank()
}

pub struct OrderTracker {
    orders: HashMap<String, TrackedOrder>,
    by_exchange_id: HashMap<String, String>,
    policy: GuardPolicy,
    /// False from reconnect until the first open-orders list is processed.
    full_list_primed: bool,
}

impl OrderTracker {
    pub fn new(policy: GuardPolicy) -> Self {
        Self {
            orders: HashMap::new(),
            by_exchange_id: HashMap::new(),
            policy,
            full_list_primed: false,
        }
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    pub fn get(&self, local_id: &str) -> Option<&TrackedOrder> {
        self.orders.get(local_id)
    }

    pub fn open_orders(&self) -> Vec<TrackedOrder> {
        self.orders
            .values()
            .filter(|o| !o.state.is_terminal())
            .cloned()
            .collect()
    }

    fn resolve(&self, exchange_id: Option<&str>, customer_id: Option<&str>) -> Option<String> {
        if let Some(cid) = customer_id {
            if self.orders.contains_key(cid) {
                return Some(cid.to_string());
            }
        }
        exchange_id.and_then(|eid| self.by_exchange_id.get(eid).cloned())
    }

    // -----------------------------------------------------------------------
    // Submission path
    // -----------------------------------------------------------------------

    /// Register a new order the moment the strategy layer submits it.
    pub fn track_submission(&mut self, local_id: &str, request: &NewOrder, now: u64) {
        let order = TrackedOrder {
            local_id: local_id.to_string(),
            exchange_id: None,
            symbol: request.symbol.clone(),
            side: request.side,
            price: request.price,
            quantity: request.quantity,
            filled_quantity: Decimal::ZERO,
            category: request.category,
            state: LifecycleState::Submitted,
            pending_cancel: false,
            awaiting_reconciliation: false,
            submitted_at: now,
            updated_at: now,
            event_seq: 0,
            terminal_at: None,
            last_authoritative_at: None,
        };
        self.orders.insert(local_id.to_string(), order);
    }

    /// Placement acknowledgment: the venue accepted the request. Advances
    /// Submitted -> Acknowledged and records the exchange id. Never more.
    pub fn on_place_ack(&mut self, ack: &OrderAck, now: u64) {
        let Some(local_id) = self.resolve(ack.order_id.as_deref(), ack.customer_order_id.as_deref())
        else {
            debug!("placement ack for unknown order ({:?}) dropped", ack.customer_order_id);
            return;
        };
        let order = self.orders.get_mut(&local_id).expect("resolved");

        if let Some(eid) = &ack.order_id {
            if order.exchange_id.is_none() {
                order.exchange_id = Some(eid.clone());
                self.by_exchange_id.insert(eid.clone(), local_id.clone());
            }
        }
        if order.state == LifecycleState::Submitted {
            order.state = LifecycleState::Acknowledged;
            order.touch(now);
        }
    }

    /// Placement request definitively rejected by the venue. Authoritative:
    /// the order will never exist.
    pub fn on_place_failed(&mut self, ack: &OrderAck, now: u64) {
        let Some(local_id) = self.resolve(ack.order_id.as_deref(), ack.customer_order_id.as_deref())
        else {
            debug!("placement failure for unknown order dropped");
            return;
        };
        let order = self.orders.get_mut(&local_id).expect("resolved");
        if can_transition(order.state, LifecycleState::Rejected) {
            warn!("{}: placement rejected ({:?})", local_id, ack.message);
            order.state = LifecycleState::Rejected;
            order.terminal_at = Some(now);
            order.last_authoritative_at = Some(now);
            order.touch(now);
        }
    }

    /// The placement request's outcome is unknown (transport failure mid
    /// flight). The order may or may not exist on the venue; the next
    /// open-orders list settles it.
    pub fn mark_unconfirmed(&mut self, local_id: &str, now: u64) {
        if let Some(order) = self.orders.get_mut(local_id) {
            if !order.state.is_terminal() {
                warn!("{}: submission outcome unknown, awaiting reconciliation", local_id);
                order.awaiting_reconciliation = true;
                order.touch(now);
            }
        }
    }

    /// Adopt an order found open on the venue at startup (recognized by our
    /// client id prefix from a previous run).
    pub fn adopt_open_order(&mut self, item: &OpenOrderItem, symbol: Symbol, now: u64) {
        let Some(local_id) = item
            .customer_order_id
            .clone()
            .filter(|id| id.starts_with(CLIENT_ORDER_ID_PREFIX))
        else {
            return;
        };
        if self.orders.contains_key(&local_id) {
            return;
        }
        let quantity = item
            .original_quantity
            .or(item.remaining_quantity)
            .unwrap_or(Decimal::ZERO);
        let order = TrackedOrder {
            local_id: local_id.clone(),
            exchange_id: Some(item.order_id.clone()),
            symbol,
            side: item.side.as_deref().and_then(parse_side).unwrap_or(Side::Buy),
            price: item.price.unwrap_or(Decimal::ZERO),
            quantity,
            filled_quantity: quantity
                - item.remaining_quantity.unwrap_or(quantity),
            category: OrderCategory::Limit,
            state: LifecycleState::Open,
            pending_cancel: false,
            awaiting_reconciliation: false,
            submitted_at: now,
            updated_at: now,
            event_seq: 0,
            terminal_at: None,
            last_authoritative_at: None,
        };
        info!("adopted open order {} from previous run", local_id);
        self.by_exchange_id.insert(item.order_id.clone(), local_id.clone());
        self.orders.insert(local_id, order);
    }

    /// Cancel requested locally. Marks intent immediately; state untouched
    /// until the venue confirms the effect.
    pub fn on_cancel_requested(&mut self, local_id: &str, now: u64) -> bool {
        match self.orders.get_mut(local_id) {
            Some(order) if !order.state.is_terminal() => {
                order.pending_cancel = true;
                order.touch(now);
                true
            }
            _ => false,
        }
    }

    /// Cancel-request acceptance (`requested: true`). Acknowledgment only:
    /// the cancel request was received, the order is not yet gone.
    pub fn on_cancel_ack(&mut self, ack: &CancelAck, _now: u64) {
        let resolved = self.resolve(ack.order_id.as_deref(), ack.customer_order_id.as_deref());
        match resolved {
            Some(local_id) => {
                debug!("cancel request accepted for {} (awaiting confirmation)", local_id)
            }
            None => debug!("cancel ack for unknown order dropped"),
        }
    }

    /// The venue refused the cancel request; the order is still live.
    pub fn on_cancel_failed(&mut self, exchange_id: Option<&str>, customer_id: Option<&str>, now: u64) {
        let Some(local_id) = self.resolve(exchange_id, customer_id) else {
            debug!("failed-cancel event for unknown order dropped");
            return;
        };
        let order = self.orders.get_mut(&local_id).expect("resolved");
        if order.pending_cancel && !order.state.is_terminal() {
            warn!("cancel of {} rejected by venue; order remains {:?}", local_id, order.state);
            order.pending_cancel = false;
            order.touch(now);
        }
    }

    // -----------------------------------------------------------------------
    // Authoritative events
    // -----------------------------------------------------------------------

    /// Definitive per-order status change (`orderStatusType`). The only
    /// event class permitted to reach a terminal state.
    pub fn on_status(&mut self, update: &OrderStatusUpdate, now: u64) {
        let Some(local_id) =
            self.resolve(Some(&update.order_id), update.customer_order_id.as_deref())
        else {
            debug!("status event for unknown order {} dropped", update.order_id);
            return;
        };

        let Some(new_state) = map_venue_status(&update.order_status_type) else {
            warn!(
                "unrecognized orderStatusType {:?} for {} dropped",
                update.order_status_type, local_id
            );
            return;
        };

        let ts = update
            .order_updated_at
            .as_deref()
            .and_then(parse_exchange_ts)
            .unwrap_or(now);

        let order = self.orders.get_mut(&local_id).expect("resolved");
        if order.exchange_id.is_none() {
            order.exchange_id = Some(update.order_id.clone());
            self.by_exchange_id.insert(update.order_id.clone(), local_id.clone());
        }

        if !can_transition(order.state, new_state) {
            // Duplicate delivery of a terminal status lands here; so do
            // late out-of-order intermediates. Both are dropped.
            debug!(
                "{}: status {:?} ignored in state {:?}",
                local_id, new_state, order.state
            );
            return;
        }

        if order.state != new_state {
            info!("{}: {:?} -> {:?}", local_id, order.state, new_state);
        }
        order.state = new_state;
        order.last_authoritative_at = Some(now);
        if new_state.is_terminal() {
            order.terminal_at = Some(now);
        }
        order.touch(ts);
    }

    /// One fill against one of our orders. Authoritative: a fill that
    /// consumes the remaining quantity completes the order.
    pub fn on_fill(&mut self, trade: &AccountTrade, now: u64) {
        let Some(local_id) =
            self.resolve(trade.order_id.as_deref(), trade.customer_order_id.as_deref())
        else {
            debug!("trade for unknown order {:?} dropped", trade.order_id);
            return;
        };
        let order = self.orders.get_mut(&local_id).expect("resolved");
        if order.state.is_terminal() {
            debug!("{}: late fill after terminal state ignored", local_id);
            return;
        }

        order.filled_quantity += trade.quantity;
        let new_state = if order.filled_quantity >= order.quantity {
            LifecycleState::Filled
        } else {
            LifecycleState::PartiallyFilled
        };
        if can_transition(order.state, new_state) {
            order.state = new_state;
            if new_state.is_terminal() {
                order.terminal_at = Some(now);
            }
        }
        order.last_authoritative_at = Some(now);
        order.touch(now);
    }

    // -----------------------------------------------------------------------
    // Full-list reconciliation
    // -----------------------------------------------------------------------

    /// Process a periodic open-orders list (stream event or REST poll).
    ///
    /// Presence corroborates: it can confirm Acknowledged orders as Open and
    /// back-fill exchange ids. Absence infers cancellation only when every
    /// guard condition holds; otherwise it is ignored until the next list.
    /// Returns the local ids inferred cancelled this pass.
    pub fn on_full_list(&mut self, items: &[OpenOrderItem], now: u64) -> Vec<String> {
        let was_primed = self.full_list_primed;

        let mut present: Vec<String> = Vec::new();
        for item in items {
            let Some(local_id) =
                self.resolve(Some(&item.order_id), item.customer_order_id.as_deref())
            else {
                // Orders placed outside this client; not ours to track.
                continue;
            };
            present.push(local_id.clone());

            let order = self.orders.get_mut(&local_id).expect("resolved");
            if order.state.is_terminal() {
                // A list can never resurrect a terminal order.
                debug!("{}: listed after terminal state, ignored", local_id);
                continue;
            }
            if order.exchange_id.is_none() {
                order.exchange_id = Some(item.order_id.clone());
                self.by_exchange_id.insert(item.order_id.clone(), local_id.clone());
            }
            // The list's own `status` field corroborates non-terminal states
            // only - it is a different field from `orderStatusType` and is
            // never trusted for terminal transitions.
            let listed_state = item
                .status
                .as_deref()
                .and_then(map_venue_status)
                .filter(|s| !s.is_terminal())
                .unwrap_or(LifecycleState::Open);
            if can_transition(order.state, listed_state) && order.state != listed_state {
                order.state = listed_state;
                order.touch(now);
            }
        }

        let mut inferred = Vec::new();
        for order in self.orders.values_mut() {
            if order.state.is_terminal() || present.contains(&order.local_id) {
                order.awaiting_reconciliation = false;
                continue;
            }

            let age_ok = now.saturating_sub(order.submitted_at) > self.policy.reconcile_grace_ms;
            let quiet_ok = order
                .last_authoritative_at
                .map_or(true, |t| now.saturating_sub(t) > self.policy.status_quiet_ms);
            let reconcile_ok = !(order.awaiting_reconciliation && !was_primed);

            if age_ok && quiet_ok && reconcile_ok {
                info!(
                    "{}: absent from open-orders list (age {}ms) - inferred cancelled",
                    order.local_id,
                    now.saturating_sub(order.submitted_at)
                );
                order.state = LifecycleState::Cancelled;
                order.terminal_at = Some(now);
                order.touch(now);
                inferred.push(order.local_id.clone());
            } else {
                debug!(
                    "{}: absence ignored this cycle (age_ok={} quiet_ok={} reconcile_ok={})",
                    order.local_id, age_ok, quiet_ok, reconcile_ok
                );
            }
            order.awaiting_reconciliation = false;
        }

        self.full_list_primed = true;
        inferred
    }

    // -----------------------------------------------------------------------
    // Reconnect and eviction
    // -----------------------------------------------------------------------

    /// Account session reconnected. Orders submitted around the outage may
    /// or may not exist on the venue; flag everything non-terminal until the
    /// next open-orders list settles it.
    pub fn on_reconnect(&mut self) {
        self.full_list_primed = false;
        let mut flagged = 0;
        for order in self.orders.values_mut() {
            if !order.state.is_terminal() {
                order.awaiting_reconciliation = true;
                flagged += 1;
            }
        }
        if flagged > 0 {
            info!("{} order(s) awaiting reconciliation after reconnect", flagged);
        }
    }

    /// Drop terminal orders past their retention window. Idempotent.
    pub fn evict_expired(&mut self, now: u64) -> usize {
        let delay = self.policy.eviction_delay_ms;
        let expired: Vec<String> = self
            .orders
            .values()
            .filter(|o| o.terminal_at.is_some_and(|t| now.saturating_sub(t) >= delay))
            .map(|o| o.local_id.clone())
            .collect();
        for local_id in &expired {
            if let Some(order) = self.orders.remove(local_id) {
                if let Some(eid) = order.exchange_id {
                    self.by_exchange_id.remove(&eid);
                }
            }
        }
        expired.len()
    }
}

fn parse_side(raw: &str) -> Option<Side> {
    match raw.to_ascii_uppercase().as_str() {
        "BUY" => Some(Side::Buy),
        "SELL" => Some(Side::Sell),
        _ => None,
    }
}

/// Exchange timestamps arrive as RFC 3339 strings.
fn parse_exchange_ts(raw: &str) -> Option<u64> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.timestamp_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn request() -> NewOrder {
        NewOrder {
            symbol: Symbol::new("BTC-ZAR"),
            side: Side::Buy,
            price: Decimal::from(900_000),
            quantity: Decimal::from(1),
            category: OrderCategory::LimitMaker,
        }
    }

    fn tracker() -> OrderTracker {
        OrderTracker::new(GuardPolicy::default())
    }

    fn submitted(t: &mut OrderTracker, local_id: &str, now: u64) {
        t.track_submission(local_id, &request(), now);
    }

    fn ack(local_id: &str, exchange_id: &str) -> OrderAck {
        OrderAck {
            order_id: Some(exchange_id.to_string()),
            customer_order_id: Some(local_id.to_string()),
            message: None,
        }
    }

    fn status(exchange_id: &str, local_id: &str, s: &str) -> OrderStatusUpdate {
        OrderStatusUpdate {
            order_id: exchange_id.to_string(),
            customer_order_id: Some(local_id.to_string()),
            order_status_type: s.to_string(),
            currency_pair: None,
            remaining_quantity: None,
            original_quantity: None,
            order_updated_at: None,
            failed_reason: None,
        }
    }

    fn listed(exchange_id: &str, local_id: &str) -> OpenOrderItem {
        OpenOrderItem {
            order_id: exchange_id.to_string(),
            customer_order_id: Some(local_id.to_string()),
            side: None,
            price: None,
            remaining_quantity: None,
            original_quantity: None,
            currency_pair: None,
            status: Some("Placed".to_string()),
            created_at: None,
        }
    }

    #[test]
    fn test_ack_never_reaches_terminal() {
        let mut t = tracker();
        submitted(&mut t, "o1", 0);
        t.on_place_ack(&ack("o1", "ex1"), 10);
        assert_eq!(t.get("o1").unwrap().state, LifecycleState::Acknowledged);

        // Replaying the ack changes nothing.
        t.on_place_ack(&ack("o1", "ex1"), 20);
        assert_eq!(t.get("o1").unwrap().state, LifecycleState::Acknowledged);
    }

    #[test]
    fn test_authoritative_fill_is_terminal_and_never_regresses() {
        // Submit O1 at t=0; authoritative "Filled" at t=200.
        let mut t = tracker();
        submitted(&mut t, "o1", 0);
        t.on_place_ack(&ack("o1", "ex1"), 10);
        t.on_status(&status("ex1", "o1", "Filled"), 200);
        assert_eq!(t.get("o1").unwrap().state, LifecycleState::Filled);

        // A late "Open" status must not regress it.
        t.on_status(&status("ex1", "o1", "Open"), 300);
        assert_eq!(t.get("o1").unwrap().state, LifecycleState::Filled);

        // Nor can the open-orders list resurrect it.
        t.on_full_list(&[listed("ex1", "o1")], 400);
        assert_eq!(t.get("o1").unwrap().state, LifecycleState::Filled);
    }

    #[test]
    fn test_absence_within_grace_period_is_ignored() {
        // Submit O2 at t=0; empty list at t=100 (age 100ms < 5s grace).
        let mut t = tracker();
        submitted(&mut t, "o2", 0);
        t.on_place_ack(&ack("o2", "ex2"), 10);

        let inferred = t.on_full_list(&[], 100);
        assert!(inferred.is_empty());
        assert_eq!(t.get("o2").unwrap().state, LifecycleState::Acknowledged);
    }

    #[test]
    fn test_absence_after_grace_infers_cancellation() {
        let mut t = tracker();
        submitted(&mut t, "o1", 0);
        t.on_place_ack(&ack("o1", "ex1"), 10);
        // Prime the guard with one list that still carries the order.
        t.on_full_list(&[listed("ex1", "o1")], 1_000);
        assert_eq!(t.get("o1").unwrap().state, LifecycleState::Open);

        // Well past the grace period, absent, and quiet: inferred cancelled.
        let inferred = t.on_full_list(&[], 10_000);
        assert_eq!(inferred, vec!["o1".to_string()]);
        assert_eq!(t.get("o1").unwrap().state, LifecycleState::Cancelled);
    }

    #[test]
    fn test_recent_authoritative_event_vetoes_inference() {
        let mut t = tracker();
        submitted(&mut t, "o1", 0);
        t.on_place_ack(&ack("o1", "ex1"), 10);
        t.on_full_list(&[listed("ex1", "o1")], 1_000);

        // A partial fill 500ms before the list: the quiet window fails.
        t.on_fill(
            &AccountTrade {
                order_id: Some("ex1".to_string()),
                customer_order_id: Some("o1".to_string()),
                price: Decimal::from(900_000),
                quantity: "0.4".parse().unwrap(),
                currency_pair: None,
                side: None,
                traded_at: None,
            },
            9_500,
        );
        let inferred = t.on_full_list(&[], 10_000);
        assert!(inferred.is_empty());
        assert_eq!(t.get("o1").unwrap().state, LifecycleState::PartiallyFilled);
    }

    #[test]
    fn test_cancel_ack_does_not_transition() {
        // Cancel O3: request marks pending-cancel; the ack changes nothing;
        // only the authoritative "Cancelled" status finishes the job.
        let mut t = tracker();
        submitted(&mut t, "o3", 0);
        t.on_place_ack(&ack("o3", "ex3"), 10);
        t.on_full_list(&[listed("ex3", "o3")], 100);

        assert!(t.on_cancel_requested("o3", 200));
        let order = t.get("o3").unwrap();
        assert!(order.pending_cancel);
        assert_eq!(order.state, LifecycleState::Open);

        t.on_cancel_ack(
            &CancelAck {
                order_id: Some("ex3".to_string()),
                customer_order_id: Some("o3".to_string()),
                requested: true,
            },
            250,
        );
        let order = t.get("o3").unwrap();
        assert_eq!(order.state, LifecycleState::Open);
        assert!(order.pending_cancel);

        t.on_status(&status("ex3", "o3", "Cancelled"), 300);
        assert_eq!(t.get("o3").unwrap().state, LifecycleState::Cancelled);
    }

    #[test]
    fn test_cancel_reject_clears_pending_flag() {
        let mut t = tracker();
        submitted(&mut t, "o1", 0);
        t.on_place_ack(&ack("o1", "ex1"), 10);
        t.on_cancel_requested("o1", 100);
        t.on_cancel_failed(Some("ex1"), Some("o1"), 200);
        let order = t.get("o1").unwrap();
        assert!(!order.pending_cancel);
        assert!(!order.state.is_terminal());
    }

    #[test]
    fn test_reconnect_suppresses_inference_until_primed() {
        let mut t = tracker();
        submitted(&mut t, "o1", 0);
        t.on_place_ack(&ack("o1", "ex1"), 10);
        t.on_full_list(&[listed("ex1", "o1")], 1_000);

        t.on_reconnect();
        assert!(t.get("o1").unwrap().awaiting_reconciliation);

        // First post-reconnect list omits the order. Even though it is old
        // and quiet, the reconnect flag blocks the inference this cycle.
        let inferred = t.on_full_list(&[], 60_000);
        assert!(inferred.is_empty());
        assert!(!t.get("o1").unwrap().awaiting_reconciliation);

        // The second list is conclusive.
        let inferred = t.on_full_list(&[], 70_000);
        assert_eq!(inferred, vec!["o1".to_string()]);
    }

    #[test]
    fn test_full_list_confirms_awaiting_order() {
        let mut t = tracker();
        submitted(&mut t, "o1", 0);
        t.on_place_ack(&ack("o1", "ex1"), 10);
        t.on_reconnect();

        t.on_full_list(&[listed("ex1", "o1")], 60_000);
        let order = t.get("o1").unwrap();
        assert!(!order.awaiting_reconciliation);
        assert_eq!(order.state, LifecycleState::Open);
    }

    #[test]
    fn test_unknown_order_events_are_dropped() {
        let mut t = tracker();
        t.on_status(&status("ghost", "nope", "Filled"), 100);
        t.on_full_list(&[listed("ghost", "nope")], 200);
        assert!(t.open_orders().is_empty());
    }

    #[test]
    fn test_partial_fill_accumulates_to_filled() {
        let mut t = tracker();
        submitted(&mut t, "o1", 0);
        t.on_place_ack(&ack("o1", "ex1"), 10);

        let fill = |qty: &str| AccountTrade {
            order_id: Some("ex1".to_string()),
            customer_order_id: Some("o1".to_string()),
            price: Decimal::from(900_000),
            quantity: qty.parse().unwrap(),
            currency_pair: None,
            side: None,
            traded_at: None,
        };
        t.on_fill(&fill("0.6"), 100);
        assert_eq!(t.get("o1").unwrap().state, LifecycleState::PartiallyFilled);
        t.on_fill(&fill("0.4"), 200);
        let order = t.get("o1").unwrap();
        assert_eq!(order.state, LifecycleState::Filled);
        assert_eq!(order.filled_quantity, Decimal::from(1));
    }

    #[test]
    fn test_eviction_is_idempotent() {
        let mut t = tracker();
        submitted(&mut t, "o1", 0);
        t.on_place_ack(&ack("o1", "ex1"), 10);
        t.on_status(&status("ex1", "o1", "Cancelled"), 100);

        // Too early: retained for duplicate suppression.
        assert_eq!(t.evict_expired(1_000), 0);
        assert!(t.get("o1").is_some());

        assert_eq!(t.evict_expired(100 + 30_000), 1);
        assert!(t.get("o1").is_none());
        // Evicting again is a no-op.
        assert_eq!(t.evict_expired(100 + 60_000), 0);
    }

    #[test]
    fn test_placement_rejection_is_terminal() {
        let mut t = tracker();
        submitted(&mut t, "o1", 0);
        t.on_place_failed(
            &OrderAck {
                order_id: None,
                customer_order_id: Some("o1".to_string()),
                message: Some("post only would take".to_string()),
            },
            50,
        );
        assert_eq!(t.get("o1").unwrap().state, LifecycleState::Rejected);
        // A late placement ack cannot revive it.
        t.on_place_ack(&ack("o1", "ex1"), 60);
        assert_eq!(t.get("o1").unwrap().state, LifecycleState::Rejected);
    }

    #[test]
    fn test_unconfirmed_submission_awaits_reconciliation() {
        let mut t = tracker();
        submitted(&mut t, "o1", 0);
        t.mark_unconfirmed("o1", 100);
        assert!(t.get("o1").unwrap().awaiting_reconciliation);
    }

    #[test]
    fn test_adoption_requires_client_prefix() {
        let mut t = tracker();
        let mut foreign = listed("ex9", "someone-elses-id");
        foreign.customer_order_id = Some("someone-elses-id".to_string());
        t.adopt_open_order(&foreign, Symbol::new("BTC-ZAR"), 0);
        assert!(t.get("someone-elses-id").is_none());

        let mut ours = listed("ex1", "VC-abc123");
        ours.remaining_quantity = Some("0.4".parse().unwrap());
        ours.original_quantity = Some("1".parse().unwrap());
        ours.side = Some("SELL".to_string());
        t.adopt_open_order(&ours, Symbol::new("BTC-ZAR"), 0);
        let order = t.get("VC-abc123").unwrap();
        assert_eq!(order.state, LifecycleState::Open);
        assert_eq!(order.side, Side::Sell);
        assert_eq!(order.filled_quantity.to_string(), "0.6");
    }

    #[test]
    fn test_event_seq_is_monotonic() {
        let mut t = tracker();
        submitted(&mut t, "o1", 0);
        let s0 = t.get("o1").unwrap().event_seq;
        t.on_place_ack(&ack("o1", "ex1"), 10);
        let s1 = t.get("o1").unwrap().event_seq;
        t.on_status(&status("ex1", "o1", "Open"), 20);
        let s2 = t.get("o1").unwrap().event_seq;
        assert!(s0 < s1 && s1 < s2);
    }
}
