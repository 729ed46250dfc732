//! Transport session - one WebSocket connection with keepalive and reconnect
//!
//! Two instances run concurrently: the market data session (`/ws/trade`) and
//! the account session (`/ws/account`). The account session authenticates
//! during the handshake via signed headers; no auth payload is sent after
//! connecting. Each session task owns its socket and state exclusively.

use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, tungstenite};
use tracing::{debug, error, info, warn};

use crate::core::{Error, Result, now_ms};
use crate::router;
use crate::signer::RequestSigner;
use crate::valr_api::model::{RawFrame, ping_frame, pong_frame};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection state of one physical session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
    /// Reconnect ceiling exceeded (or auth rejected); REST fallback applies.
    Degraded,
}

/// What a session reports to its dispatcher, in arrival order.
#[derive(Debug)]
pub enum SessionEvent {
    /// Handshake (and auth, where applicable) completed; frames will flow.
    Up,
    /// Connection lost; a reconnect is scheduled.
    Down,
    /// Reconnect ceiling reached; the channel is degraded until recovery.
    Degraded,
    /// One inbound non-control frame.
    Frame(RawFrame),
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub label: &'static str,
    pub url: String,
    pub ping_interval: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// A connection alive at least this long resets the failure counter.
    pub healthy_after: Duration,
    /// Consecutive failures before the session reports Degraded.
    pub max_consecutive_failures: u32,
    /// Pause before retrying out of Degraded.
    pub recovery_delay: Duration,
}

/// Cloneable handle for observers and outbound sends.
#[derive(Clone)]
pub struct SessionHandle {
    state: Arc<RwLock<SessionState>>,
    last_activity: Arc<AtomicU64>,
    outbound: flume::Sender<String>,
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity.load(Ordering::Relaxed)
    }

    /// Queue an outbound frame. Fails unless the session is Ready.
    pub fn send(&self, frame: String) -> Result<()> {
        if self.state() != SessionState::Ready {
            return Err(Error::NotConnected);
        }
        self.outbound
            .send(frame)
            .map_err(|_| Error::NotConnected)
    }
}

pub struct TransportSession {
    config: SessionConfig,
    /// Present on the account session: header-signing for the handshake.
    signer: Option<Arc<RequestSigner>>,
    /// Frames sent right after every (re)connect: subscriptions, feature toggles.
    startup_frames: Vec<String>,
    events: flume::Sender<SessionEvent>,
    outbound_rx: flume::Receiver<String>,
    state: Arc<RwLock<SessionState>>,
    last_activity: Arc<AtomicU64>,
}

impl TransportSession {
    /// Build a session plus its handle and event stream. The receiver is the
    /// session's inbound sequence: unbounded, restartable across reconnects,
    /// ending only at teardown.
    pub fn new(
        config: SessionConfig,
        signer: Option<Arc<RequestSigner>>,
        startup_frames: Vec<String>,
    ) -> (Self, SessionHandle, flume::Receiver<SessionEvent>) {
        let (events_tx, events_rx) = flume::unbounded();
        let (outbound_tx, outbound_rx) = flume::unbounded();
        let state = Arc::new(RwLock::new(SessionState::Disconnected));
        let last_activity = Arc::new(AtomicU64::new(0));

        let handle = SessionHandle {
            state: state.clone(),
            last_activity: last_activity.clone(),
            outbound: outbound_tx,
        };
        let session = Self {
            config,
            signer,
            startup_frames,
            events: events_tx,
            outbound_rx,
            state,
            last_activity,
        };
        (session, handle, events_rx)
    }

    fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
    }

    /// Connection supervisor: connect, drain, reconnect with capped
    /// exponential backoff. Runs until the dispatcher goes away or auth is
    /// rejected.
    pub async fn run(self) {
        let mut failures: u32 = 0;

        loop {
            self.set_state(SessionState::Connecting);
            let started = Instant::now();

            let clean_close = match self.run_connection().await {
                Ok(()) => {
                    info!("{} session closed", self.config.label);
                    true
                }
                Err(Error::Auth(msg)) => {
                    // Credential rejection never silently retries.
                    error!("{} session authentication rejected: {}", self.config.label, msg);
                    self.set_state(SessionState::Degraded);
                    let _ = self.events.send(SessionEvent::Degraded);
                    return;
                }
                Err(e) => {
                    warn!("{} session error: {}", self.config.label, e);
                    false
                }
            };

            self.set_state(SessionState::Disconnected);
            if self.events.send(SessionEvent::Down).is_err() {
                return; // dispatcher gone - teardown
            }

            // The venue closes idle account sockets routinely; clean closes
            // are part of its normal pattern and never count toward the
            // ceiling. Only abnormal short-lived connections do.
            if clean_close || started.elapsed() >= self.config.healthy_after {
                failures = 0;
            } else {
                failures += 1;
            }

            if failures >= self.config.max_consecutive_failures {
                warn!(
                    "{} session hit the reconnect ceiling ({} failures) - degraded",
                    self.config.label, failures
                );
                self.set_state(SessionState::Degraded);
                if self.events.send(SessionEvent::Degraded).is_err() {
                    return;
                }
                tokio::time::sleep(self.config.recovery_delay).await;
                failures = 0;
                continue;
            }

            let delay = backoff_delay(failures, self.config.backoff_base, self.config.backoff_cap);
            debug!("{} reconnecting in {:?}", self.config.label, delay);
            tokio::time::sleep(delay).await;
        }
    }

    /// One connection lifetime: handshake, startup frames, frame loop.
    async fn run_connection(&self) -> Result<()> {
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::Transport(e.to_string()))?;

        if let Some(signer) = &self.signer {
            self.set_state(SessionState::Authenticating);
            let path = url::Url::parse(&self.config.url)
                .map_err(|e| Error::Config(e.to_string()))?
                .path()
                .to_string();
            let signed = signer.sign(now_ms(), "GET", &path, "");
            let headers = request.headers_mut();
            headers.insert("X-VALR-API-KEY", HeaderValue::from_str(&signed.api_key).unwrap());
            headers.insert("X-VALR-SIGNATURE", HeaderValue::from_str(&signed.signature).unwrap());
            headers.insert(
                "X-VALR-TIMESTAMP",
                HeaderValue::from_str(&signed.timestamp.to_string()).unwrap(),
            );
        }

        info!("{} session connecting to {}", self.config.label, self.config.url);
        let (ws, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(request))
            .await
            .map_err(|_| Error::Transport("connect timeout".to_string()))?
            .map_err(map_connect_err)?;

        self.set_state(SessionState::Ready);
        self.last_activity.store(now_ms(), Ordering::Relaxed);
        info!("{} session ready", self.config.label);

        let (mut write, mut read) = ws.split();

        for frame in &self.startup_frames {
            write
                .send(tungstenite::Message::Text(frame.clone()))
                .await
                .map_err(|e| Error::Transport(e.to_string()))?;
        }

        if self.events.send(SessionEvent::Up).is_err() {
            return Ok(());
        }

        let mut ping_timer = tokio::time::interval(self.config.ping_interval);
        ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ping_timer.tick().await; // consume the immediate first tick
        let mut awaiting_pong = false;

        loop {
            tokio::select! {
                _ = ping_timer.tick() => {
                    if awaiting_pong {
                        // One full interval elapsed without a pong.
                        return Err(Error::Transport("keepalive timeout".to_string()));
                    }
                    write
                        .send(tungstenite::Message::Text(ping_frame()))
                        .await
                        .map_err(|e| Error::Transport(e.to_string()))?;
                    awaiting_pong = true;
                }
                frame = self.outbound_rx.recv_async() => {
                    match frame {
                        Ok(text) => write
                            .send(tungstenite::Message::Text(text))
                            .await
                            .map_err(|e| Error::Transport(e.to_string()))?,
                        Err(_) => return Ok(()), // all handles dropped - teardown
                    }
                }
                msg = read.next() => {
                    self.last_activity.store(now_ms(), Ordering::Relaxed);
                    match msg {
                        Some(Ok(tungstenite::Message::Text(text))) => {
                            match router::parse_frame(&text) {
                                Ok(frame) if router::is_control(&frame) => {
                                    if frame.event_type == router::EV_PING {
                                        write
                                            .send(tungstenite::Message::Text(pong_frame()))
                                            .await
                                            .map_err(|e| Error::Transport(e.to_string()))?;
                                    } else {
                                        awaiting_pong = false;
                                    }
                                }
                                Ok(frame) => {
                                    if self.events.send(SessionEvent::Frame(frame)).is_err() {
                                        return Ok(());
                                    }
                                }
                                Err(e) => {
                                    // Malformed frame: drop it, keep the session.
                                    warn!("{} session: {}", self.config.label, e);
                                }
                            }
                        }
                        Some(Ok(tungstenite::Message::Ping(data))) => {
                            write
                                .send(tungstenite::Message::Pong(data))
                                .await
                                .map_err(|e| Error::Transport(e.to_string()))?;
                        }
                        Some(Ok(tungstenite::Message::Pong(_))) => {
                            awaiting_pong = false;
                        }
                        Some(Ok(tungstenite::Message::Close(_))) => {
                            info!("{} session: close frame received", self.config.label);
                            return Ok(());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(Error::Transport(e.to_string())),
                        None => return Ok(()),
                    }
                }
            }
        }
    }
}

fn map_connect_err(e: tungstenite::Error) -> Error {
    match e {
        tungstenite::Error::Http(resp) if resp.status() == 401 || resp.status() == 403 => {
            Error::Auth(format!("handshake rejected: {}", resp.status()))
        }
        other => Error::Transport(other.to_string()),
    }
}

/// Exponential backoff with jitter: `base * 2^failures` capped, plus up to a
/// quarter of the delay, so reconnect storms spread out.
pub fn backoff_delay(failures: u32, base: Duration, cap: Duration) -> Duration {
    let exp = base.saturating_mul(2u32.saturating_pow(failures.min(16)));
    let capped = exp.min(cap);
    let jitter_ms = match capped.as_millis() as u64 / 4 {
        0 => 0,
        span => rand::random::<u64>() % span,
    };
    capped + Duration::from_millis(jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SessionConfig {
        SessionConfig {
            label: "test",
            url: "wss://example.invalid/ws".to_string(),
            ping_interval: Duration::from_secs(30),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(60),
            healthy_after: Duration::from_secs(60),
            max_consecutive_failures: 5,
            recovery_delay: Duration::from_secs(300),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(60);
        assert!(backoff_delay(0, base, cap) >= Duration::from_secs(1));
        assert!(backoff_delay(3, base, cap) >= Duration::from_secs(8));
        // Past the cap the exponent no longer matters (jitter <= cap/4).
        assert!(backoff_delay(30, base, cap) <= Duration::from_secs(75));
    }

    #[test]
    fn test_send_fails_unless_ready() {
        let (_session, handle, _events) = TransportSession::new(config(), None, vec![]);
        assert!(matches!(handle.send("{}".to_string()), Err(Error::NotConnected)));
    }
}
