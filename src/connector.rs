//! Connector - wires the sessions, router, engines and REST fallback into
//! the strategy-facing API
//!
//! Ownership follows a single-writer discipline: the market dispatcher task
//! is the only writer of the book engine, the account dispatcher task is the
//! only writer applying venue events to the order tracker, and each session
//! task owns its socket. Strategy-facing calls return immediately from
//! cached views; network I/O for placement and cancellation runs on spawned
//! tasks.

use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ConnectorConfig, Credentials};
use crate::core::{
    Balance, ChannelHealth, Connectivity, Error, NewOrder, Result, Symbol, now_ms,
};
use crate::instruments::InstrumentCache;
use crate::orderbook::{BookEngine, BookView};
use crate::orders::{CLIENT_ORDER_ID_PREFIX, OrderTracker, TrackedOrder};
use crate::router::{self, AccountEvent, MarketEvent};
use crate::session::{SessionEvent, SessionHandle, SessionState, TransportSession};
use crate::signer::RequestSigner;
use crate::valr_api::RestClient;
use crate::valr_api::model::{
    CancelOrderRequest, PlaceLimitOrderRequest, cancel_on_disconnect_frame, subscribe_frame,
};

pub struct Connector {
    rest: Arc<RestClient>,
    instruments: Arc<InstrumentCache>,
    books: Arc<RwLock<BookEngine>>,
    orders: Arc<RwLock<OrderTracker>>,
    balances: Arc<RwLock<HashMap<String, Balance>>>,
    market_handle: SessionHandle,
    account_handle: SessionHandle,
    tasks: Vec<JoinHandle<()>>,
}

fn channel_health(state: SessionState) -> ChannelHealth {
    match state {
        SessionState::Ready => ChannelHealth::Streaming,
        SessionState::Degraded => ChannelHealth::Degraded,
        _ => ChannelHealth::Connecting,
    }
}

impl Connector {
    /// Bootstrap from REST (symbol cache, balances, surviving orders), then
    /// bring up both streaming sessions and their dispatchers.
    pub async fn start(config: ConnectorConfig, credentials: Credentials) -> Result<Self> {
        let signer = Arc::new(RequestSigner::new(credentials.api_key, credentials.api_secret));
        let rest = Arc::new(RestClient::new(config.rest_url.clone(), signer.clone()));

        let instruments = Arc::new(InstrumentCache::new());
        let books = Arc::new(RwLock::new(BookEngine::new()));
        let orders = Arc::new(RwLock::new(OrderTracker::new(config.guard_policy())));
        let balances = Arc::new(RwLock::new(HashMap::new()));

        // The symbol cache must be ready before any session is required to
        // be; everything downstream gates on it.
        let pairs = rest.fetch_instruments().await?;
        instruments.populate(&pairs);

        match rest.fetch_balances().await {
            Ok(entries) => apply_balances(&balances, &entries),
            Err(e) => warn!("balance bootstrap failed: {}", e),
        }

        // Orders left open by a previous run are adopted by client id prefix.
        match rest.fetch_open_orders().await {
            Ok(items) => {
                let now = now_ms();
                let mut tracker = orders.write();
                for item in &items {
                    let symbol = item
                        .currency_pair
                        .as_deref()
                        .and_then(|p| instruments.symbol_for_venue(p));
                    if let Some(symbol) = symbol {
                        tracker.adopt_open_order(item, symbol, now);
                    }
                }
            }
            Err(e) => warn!("open-orders bootstrap failed: {}", e),
        }

        let venue_pairs: Vec<String> = config
            .instruments
            .iter()
            .map(|s| Symbol::new(s.clone()).to_venue())
            .collect();

        let market_startup = vec![
            subscribe_frame(router::EV_BOOK_DIFF, &venue_pairs),
            subscribe_frame(router::EV_TRADE, &venue_pairs),
            subscribe_frame(router::EV_MARKET_SUMMARY, &venue_pairs),
        ];
        let (market_session, market_handle, market_rx) =
            TransportSession::new(config.market_session(), None, market_startup);

        // The account stream auto-subscribes after handshake auth; the only
        // startup frame arms cancel-on-disconnect.
        let account_startup = vec![cancel_on_disconnect_frame(true)];
        let (account_session, account_handle, account_rx) =
            TransportSession::new(config.account_session(), Some(signer.clone()), account_startup);

        let (snapshot_tx, snapshot_rx) = flume::unbounded::<Symbol>();

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(market_session.run()));
        tasks.push(tokio::spawn(account_session.run()));
        tasks.push(tokio::spawn(run_market_dispatcher(
            market_rx,
            books.clone(),
            instruments.clone(),
            snapshot_tx,
        )));
        tasks.push(tokio::spawn(run_account_dispatcher(
            account_rx,
            orders.clone(),
            balances.clone(),
            rest.clone(),
        )));
        tasks.push(tokio::spawn(run_snapshot_fetcher(
            snapshot_rx,
            rest.clone(),
            instruments.clone(),
            books.clone(),
        )));
        tasks.push(tokio::spawn(run_order_poller(
            Duration::from_secs(config.open_orders_poll_secs),
            rest.clone(),
            orders.clone(),
            account_handle.clone(),
        )));

        Ok(Self {
            rest,
            instruments,
            books,
            orders,
            balances,
            market_handle,
            account_handle,
            tasks,
        })
    }

    // -----------------------------------------------------------------------
    // Strategy-facing API - every call returns immediately
    // -----------------------------------------------------------------------

    /// Submit a limit order. Validates against the trading rules, registers
    /// the order locally, and hands the placement to a background task.
    /// Returns the client order id for correlation.
    pub fn submit_order(&self, request: NewOrder) -> Result<String> {
        self.instruments.validate(&request)?;
        let rule = self
            .instruments
            .rule(&request.symbol)
            .ok_or_else(|| Error::UnknownEntity(format!("instrument {}", request.symbol)))?;

        let local_id = format!("{}{}", CLIENT_ORDER_ID_PREFIX, Uuid::new_v4().simple());
        self.orders.write().track_submission(&local_id, &request, now_ms());

        let wire = PlaceLimitOrderRequest {
            side: request.side.to_string(),
            quantity: request.quantity,
            price: request.price,
            pair: rule.venue_pair,
            post_only: request.category.is_post_only(),
            customer_order_id: local_id.clone(),
        };

        let rest = self.rest.clone();
        let orders = self.orders.clone();
        let id = local_id.clone();
        tokio::spawn(async move {
            match rest.place_limit_order(&wire).await {
                Ok(resp) => {
                    debug!("{} placement accepted as {}", id, resp.id);
                    orders.write().on_place_ack(
                        &crate::valr_api::model::OrderAck {
                            order_id: Some(resp.id),
                            customer_order_id: Some(id),
                            message: None,
                        },
                        now_ms(),
                    );
                }
                Err(Error::Exchange(msg)) | Err(Error::Auth(msg)) => {
                    // The venue saw the request and said no: definitive.
                    orders.write().on_place_failed(
                        &crate::valr_api::model::OrderAck {
                            order_id: None,
                            customer_order_id: Some(id),
                            message: Some(msg),
                        },
                        now_ms(),
                    );
                }
                Err(e) => {
                    // Outcome unknown - the order may exist. Never assume.
                    warn!("{} placement outcome unknown: {}", id, e);
                    orders.write().mark_unconfirmed(&id, now_ms());
                }
            }
        });

        Ok(local_id)
    }

    /// Request cancellation. Sets `pending_cancel` immediately so the
    /// strategy layer stops resubmitting; the order's state only changes
    /// once the venue confirms the effect.
    pub fn cancel_order(&self, local_id: &str) -> Result<()> {
        let order = self
            .orders
            .read()
            .get(local_id)
            .cloned()
            .ok_or_else(|| Error::UnknownEntity(format!("order {}", local_id)))?;
        if order.state.is_terminal() {
            return Ok(()); // nothing to cancel; idempotent
        }

        self.orders.write().on_cancel_requested(local_id, now_ms());

        let wire = CancelOrderRequest {
            order_id: order.exchange_id.clone(),
            customer_order_id: order.exchange_id.is_none().then(|| local_id.to_string()),
            pair: order.symbol.to_venue(),
        };

        let rest = self.rest.clone();
        let orders = self.orders.clone();
        let id = local_id.to_string();
        tokio::spawn(async move {
            match rest.cancel_order(&wire).await {
                Ok(()) => {
                    // Acceptance of the request only; confirmation arrives as
                    // an authoritative status event.
                    debug!("{} cancel request accepted", id);
                }
                Err(e) => {
                    // Leave pending_cancel set; the open-orders list settles
                    // whether the order still exists.
                    warn!("{} cancel request failed: {}", id, e);
                }
            }
        });

        Ok(())
    }

    pub fn open_orders(&self) -> Vec<TrackedOrder> {
        self.orders.read().open_orders()
    }

    pub fn order(&self, local_id: &str) -> Option<TrackedOrder> {
        self.orders.read().get(local_id).cloned()
    }

    pub fn book(&self, symbol: &Symbol, depth: usize) -> Option<BookView> {
        self.books.read().view(symbol, depth)
    }

    pub fn last_price(&self, symbol: &Symbol) -> Option<Decimal> {
        self.instruments.last_price(symbol)
    }

    pub fn balances(&self) -> Vec<Balance> {
        self.balances.read().values().cloned().collect()
    }

    pub fn connectivity(&self) -> Connectivity {
        Connectivity {
            market: channel_health(self.market_handle.state()),
            account: channel_health(self.account_handle.state()),
        }
    }

    /// Tear down every task: sessions, dispatchers, timers.
    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!("connector shut down");
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ---------------------------------------------------------------------------
// Dispatcher tasks
// ---------------------------------------------------------------------------

/// Market data path: frames arrive in order, each handled to completion
/// before the next.
async fn run_market_dispatcher(
    events: flume::Receiver<SessionEvent>,
    books: Arc<RwLock<BookEngine>>,
    instruments: Arc<InstrumentCache>,
    snapshot_tx: flume::Sender<Symbol>,
) {
    while let Ok(event) = events.recv_async().await {
        match event {
            SessionEvent::Up => debug!("market stream up"),
            SessionEvent::Down => debug!("market stream down, reconnect pending"),
            SessionEvent::Degraded => warn!("market stream degraded"),
            SessionEvent::Frame(frame) => match router::classify_market(frame) {
                Ok(MarketEvent::Diff { pair, diff }) => {
                    let Some(symbol) = instruments.symbol_for_venue(&pair) else {
                        debug!("diff for unknown pair {} dropped", pair);
                        continue;
                    };
                    let resync = books.write().on_diff(&symbol, &diff);
                    if let Some(symbol) = resync {
                        let _ = snapshot_tx.send(symbol);
                    }
                }
                Ok(MarketEvent::Snapshot { pair, snapshot }) => {
                    if let Some(symbol) = instruments.symbol_for_venue(&pair) {
                        books.write().on_snapshot(&symbol, &snapshot);
                    }
                }
                Ok(MarketEvent::Trade { pair, trade }) => {
                    if let Some(symbol) = instruments.symbol_for_venue(&pair) {
                        instruments.note_last_price(&symbol, trade.price);
                    }
                }
                Ok(MarketEvent::Summary(summary)) => {
                    if let (Some(symbol), Some(price)) = (
                        instruments.symbol_for_venue(&summary.currency_pair),
                        summary.last_traded_price,
                    ) {
                        instruments.note_last_price(&symbol, price);
                    }
                }
                Ok(MarketEvent::Subscribed) => {}
                Ok(MarketEvent::Unrecognized { event_type }) => {
                    warn!("unrecognized market frame type {} dropped", event_type);
                }
                Err(e) => warn!("market frame dropped: {}", e),
            },
        }
    }
}

/// Account path: ack, authoritative and full-list events feed the order
/// tracker; reconnects re-prime the reconciliation guard.
async fn run_account_dispatcher(
    events: flume::Receiver<SessionEvent>,
    orders: Arc<RwLock<OrderTracker>>,
    balances: Arc<RwLock<HashMap<String, Balance>>>,
    rest: Arc<RestClient>,
) {
    while let Ok(event) = events.recv_async().await {
        match event {
            SessionEvent::Up => {
                // Also runs on the very first connect, where flagging an
                // empty tracker is harmless.
                orders.write().on_reconnect();
                // Prime the guard with a fresh full-state view right away
                // rather than waiting for the next periodic list.
                match rest.fetch_open_orders().await {
                    Ok(items) => {
                        orders.write().on_full_list(&items, now_ms());
                    }
                    Err(e) => warn!("post-reconnect open-orders refresh failed: {}", e),
                }
                match rest.fetch_balances().await {
                    Ok(entries) => apply_balances(&balances, &entries),
                    Err(e) => warn!("post-reconnect balance refresh failed: {}", e),
                }
            }
            SessionEvent::Down => debug!("account stream down, reconnect pending"),
            SessionEvent::Degraded => {
                warn!("account stream degraded - REST polling takes over order state");
            }
            SessionEvent::Frame(frame) => {
                let now = now_ms();
                match router::classify_account(frame) {
                    Ok(AccountEvent::Placed(ack)) => orders.write().on_place_ack(&ack, now),
                    Ok(AccountEvent::Failed(ack)) => orders.write().on_place_failed(&ack, now),
                    Ok(AccountEvent::Status(update)) => orders.write().on_status(&update, now),
                    Ok(AccountEvent::OpenOrders(items)) => {
                        let inferred = orders.write().on_full_list(&items, now);
                        for local_id in inferred {
                            info!("{} reconciled as cancelled", local_id);
                        }
                    }
                    Ok(AccountEvent::Trade(trade)) => orders.write().on_fill(&trade, now),
                    Ok(AccountEvent::CancelAccepted(ack)) => orders.write().on_cancel_ack(&ack, now),
                    Ok(AccountEvent::CancelFailed(ack)) => orders.write().on_cancel_failed(
                        ack.order_id.as_deref(),
                        ack.customer_order_id.as_deref(),
                        now,
                    ),
                    Ok(AccountEvent::Balances(entries)) => apply_balances(&balances, &entries),
                    Ok(AccountEvent::Authenticated) => debug!("account stream authenticated"),
                    Ok(AccountEvent::Unrecognized { event_type }) => {
                        warn!("unrecognized account frame type {} dropped", event_type);
                    }
                    Err(e) => warn!("account frame dropped: {}", e),
                }
            }
        }
    }
}

/// Serializes snapshot fetches so re-seeds apply in request order.
async fn run_snapshot_fetcher(
    requests: flume::Receiver<Symbol>,
    rest: Arc<RestClient>,
    instruments: Arc<InstrumentCache>,
    books: Arc<RwLock<BookEngine>>,
) {
    while let Ok(symbol) = requests.recv_async().await {
        let Some(rule) = instruments.rule(&symbol) else {
            continue;
        };
        match rest.fetch_order_book_snapshot(&rule.venue_pair).await {
            Ok(snapshot) => books.write().on_snapshot(&symbol, &snapshot),
            Err(e) => {
                // The next diff for this instrument re-requests while the
                // book stays in its resyncing state.
                warn!("{} snapshot fetch failed: {}", symbol, e);
            }
        }
    }
}

/// Periodic housekeeping: evict stale terminal orders, and poll open orders
/// over REST while the account channel is degraded.
async fn run_order_poller(
    every: Duration,
    rest: Arc<RestClient>,
    orders: Arc<RwLock<OrderTracker>>,
    account_handle: SessionHandle,
) {
    let mut timer = tokio::time::interval(every);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        timer.tick().await;
        orders.write().evict_expired(now_ms());

        if account_handle.state() == SessionState::Degraded {
            match rest.fetch_open_orders().await {
                Ok(items) => {
                    orders.write().on_full_list(&items, now_ms());
                }
                Err(e) => warn!("degraded-mode open-orders poll failed: {}", e),
            }
        }
    }
}

fn apply_balances(
    balances: &Arc<RwLock<HashMap<String, Balance>>>,
    entries: &[crate::valr_api::model::BalanceEntry],
) {
    let mut map = balances.write();
    for entry in entries {
        map.insert(
            entry.currency.currency_code.clone(),
            Balance {
                asset: entry.currency.currency_code.clone(),
                available: entry.available,
                total: entry.balance,
            },
        );
    }
}
