//! Session controller.
//!
//! [`SessionController`] is the state machine that owns one session's
//! resources: the media capture, the negotiated transport, the inbound pump
//! and the telemetry timer. Inbound frames are processed one at a time on the
//! pump task, which also drives telemetry ticks, so message handling and
//! sampling never interleave.
//!
//! # State machine
//!
//! ```text
//! idle -> connecting -> connected -> idle      (disconnect)
//!         connecting -> error -> idle          (negotiation failure)
//!                       connected -> error     (transport fault)
//! any --disconnect--> idle
//! ```
//!
//! Every transition and every change to the conversation, event log or
//! telemetry is published to subscribers as a [`SessionUpdate`].

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::base::{
    ConnectionState, EndpointConfig, RealtimeConfig, RealtimeError, RealtimeResult, Session,
};
use super::codec;
use super::conversation::{ConversationEntry, ConversationStore, Role};
use super::credential::{CredentialIssuer, HttpCredentialIssuer};
use super::event_log::EventLog;
use super::media::{LocalAudioSource, MediaCapture, MediaSource};
use super::signaling::{SignalingClient, superseded, until_cancelled};
use super::telemetry::{ConnectionStats, TelemetrySampler};
use super::transport::{InboundFrame, Transport, TransportLink};

/// Capacity of the update broadcast channel.
pub const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Shortest telemetry period accepted.
const MIN_TELEMETRY_INTERVAL: Duration = Duration::from_millis(10);

// =============================================================================
// Updates
// =============================================================================

/// Notice published to subscribers.
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    /// Connection state changed
    State(ConnectionState),
    /// Entry appended to the conversation
    Entry(ConversationEntry),
    /// Label appended to the event log
    Event(String),
    /// New telemetry sample
    Stats(ConnectionStats),
    /// Server reported an error event; the session continues
    ServerError(String),
    /// Fatal error ending the current session or connect attempt
    Failed(RealtimeError),
    /// Conversation, event log and telemetry were cleared
    Reset,
}

// =============================================================================
// Controller
// =============================================================================

#[derive(Default)]
struct SessionState {
    connection: ConnectionState,
    session: Option<Session>,
    conversation: ConversationStore,
    events: EventLog,
    sampler: TelemetrySampler,
    stats: Option<ConnectionStats>,
    last_error: Option<RealtimeError>,
    /// Bumped by every `connect` and `disconnect`; work tagged with an older
    /// value is stale.
    attempt: u64,
}

#[derive(Default)]
struct Resources {
    capture: Option<Arc<dyn MediaCapture>>,
    link: Option<Arc<dyn TransportLink>>,
    pump: Option<JoinHandle<()>>,
    cancel: Option<CancellationToken>,
}

impl Resources {
    fn is_empty(&self) -> bool {
        self.capture.is_none() && self.link.is_none() && self.pump.is_none() && self.cancel.is_none()
    }
}

struct Inner {
    endpoints: EndpointConfig,
    http: reqwest::Client,
    issuer: Arc<dyn CredentialIssuer>,
    media: Arc<dyn MediaSource>,
    /// Lock order: `state` before `resources`. Never held across an await.
    state: Mutex<SessionState>,
    resources: Mutex<Resources>,
    updates: broadcast::Sender<SessionUpdate>,
}

/// Realtime session state machine.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

/// Builder for [`SessionController`].
pub struct SessionControllerBuilder {
    endpoints: EndpointConfig,
    http: Option<reqwest::Client>,
    issuer: Option<Arc<dyn CredentialIssuer>>,
    media: Option<Arc<dyn MediaSource>>,
}

impl SessionControllerBuilder {
    pub fn new(endpoints: EndpointConfig) -> Self {
        Self {
            endpoints,
            http: None,
            issuer: None,
            media: None,
        }
    }

    /// HTTP client used for credential and offer requests.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    /// Replace the default HTTP credential issuer.
    pub fn credential_issuer(mut self, issuer: Arc<dyn CredentialIssuer>) -> Self {
        self.issuer = Some(issuer);
        self
    }

    /// Replace the default local audio source.
    pub fn media_source(mut self, media: Arc<dyn MediaSource>) -> Self {
        self.media = Some(media);
        self
    }

    pub fn build(self) -> RealtimeResult<SessionController> {
        let http = match self.http {
            Some(client) => client,
            None => reqwest::Client::builder()
                .timeout(self.endpoints.request_timeout)
                .build()
                .map_err(|e| RealtimeError::InvalidConfiguration(e.to_string()))?,
        };

        let issuer = self.issuer.unwrap_or_else(|| {
            Arc::new(HttpCredentialIssuer::with_client(
                http.clone(),
                &self.endpoints,
            ))
        });
        let media = self
            .media
            .unwrap_or_else(|| Arc::new(LocalAudioSource::default()));

        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);

        Ok(SessionController {
            inner: Arc::new(Inner {
                endpoints: self.endpoints,
                http,
                issuer,
                media,
                state: Mutex::new(SessionState::default()),
                resources: Mutex::new(Resources::default()),
                updates,
            }),
        })
    }
}

impl SessionController {
    /// Controller with the default issuer and media source.
    pub fn new(endpoints: EndpointConfig) -> RealtimeResult<Self> {
        SessionControllerBuilder::new(endpoints).build()
    }

    pub fn builder(endpoints: EndpointConfig) -> SessionControllerBuilder {
        SessionControllerBuilder::new(endpoints)
    }

    /// Establish a session.
    ///
    /// Fails with [`RealtimeError::InvalidState`] unless the controller is
    /// idle. On failure the controller passes through `error` and returns to
    /// `idle` with every acquired resource released; the error stays
    /// available from [`last_error`](Self::last_error).
    pub async fn connect(&self, config: &RealtimeConfig) -> RealtimeResult<()> {
        let (epoch, cancel) = self.inner.begin_attempt(config)?;

        let link = match self.inner.establish(config, epoch, &cancel).await {
            Ok(transport) => self.inner.attach(epoch, transport, cancel),
            Err(e) => Err(e),
        };

        match link {
            Ok(()) => Ok(()),
            Err(e) => {
                self.inner.fail_attempt(epoch, &e).await;
                Err(e)
            }
        }
    }

    /// Tear the session down from any state.
    ///
    /// Each release step runs even if an earlier one fails. Afterwards the
    /// controller is idle with an empty conversation, event log and
    /// telemetry snapshot. Calling it again is a no-op.
    pub async fn disconnect(&self) {
        let (epoch, resources) = {
            let mut state = self.inner.state.lock();
            state.attempt += 1;
            let resources = std::mem::take(&mut *self.inner.resources.lock());
            (state.attempt, resources)
        };

        if !resources.is_empty() {
            info!("Disconnecting realtime session");
        }
        self.inner.release(resources, true).await;

        let mut state = self.inner.state.lock();
        if state.attempt != epoch {
            // A newer connect started while resources were being released
            return;
        }
        state.session = None;
        state.conversation.clear();
        state.events.clear();
        state.sampler.reset();
        state.stats = None;
        state.last_error = None;
        self.inner.emit(SessionUpdate::Reset);
        self.inner.transition(&mut state, ConnectionState::Idle);
    }

    /// Send a typed user message.
    ///
    /// Returns `Ok(false)` without side effects unless the session is
    /// connected, the event channel is open and `text` is not blank.
    /// Otherwise the user entry is appended immediately and the item and
    /// response commands are sent. A send failure is fatal to the session.
    pub async fn send_user_message(&self, text: &str) -> RealtimeResult<bool> {
        if text.trim().is_empty() {
            return Ok(false);
        }

        let (epoch, link) = {
            let state = self.inner.state.lock();
            if state.connection != ConnectionState::Connected {
                return Ok(false);
            }
            (state.attempt, self.inner.resources.lock().link.clone())
        };
        let Some(link) = link.filter(|link| link.is_open()) else {
            return Ok(false);
        };

        let item_id = codec::new_item_id();
        let [create, respond] = codec::user_message(&item_id, text);
        let payloads = [codec::encode(&create)?, codec::encode(&respond)?];

        {
            let mut state = self.inner.state.lock();
            if state.attempt != epoch {
                return Ok(false);
            }
            let entry = ConversationEntry::new(item_id, Role::User, text);
            if let Some(entry) = state.conversation.append(entry) {
                let entry = entry.clone();
                self.inner.emit(SessionUpdate::Entry(entry));
            }
        }

        for payload in payloads {
            if let Err(e) = link.send_text(payload).await {
                if e.is_fatal() {
                    self.inner.fail_session(epoch, e.clone(), false).await;
                }
                return Err(e);
            }
        }
        debug!("User message sent");
        Ok(true)
    }

    /// Observe state, conversation, event log and telemetry changes.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.inner.updates.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().connection
    }

    /// The live session, if any.
    pub fn session(&self) -> Option<Session> {
        self.inner.state.lock().session.clone()
    }

    /// Conversation entries in append order.
    pub fn conversation(&self) -> Vec<ConversationEntry> {
        self.inner.state.lock().conversation.entries().to_vec()
    }

    /// Event log labels, oldest first.
    pub fn event_log(&self) -> Vec<String> {
        self.inner.state.lock().events.to_vec()
    }

    /// Latest telemetry sample.
    pub fn stats(&self) -> Option<ConnectionStats> {
        self.inner.state.lock().stats.clone()
    }

    /// The error that ended the last session or connect attempt.
    pub fn last_error(&self) -> Option<RealtimeError> {
        self.inner.state.lock().last_error.clone()
    }
}

// =============================================================================
// Internals
// =============================================================================

impl Inner {
    fn emit(&self, update: SessionUpdate) {
        // No subscribers is fine
        let _ = self.updates.send(update);
    }

    fn transition(&self, state: &mut SessionState, next: ConnectionState) {
        if state.connection == next {
            return;
        }
        debug!(from = %state.connection, to = %next, "Session state transition");
        state.connection = next;
        if let Some(session) = state.session.as_mut() {
            session.state = next;
        }
        self.emit(SessionUpdate::State(next));
    }

    fn begin_attempt(&self, config: &RealtimeConfig) -> RealtimeResult<(u64, CancellationToken)> {
        let mut state = self.state.lock();
        if state.connection != ConnectionState::Idle {
            return Err(RealtimeError::InvalidState(format!(
                "connect while {}",
                state.connection
            )));
        }

        let cancel = CancellationToken::new();
        state.attempt += 1;
        state.session = Some(Session::new(config));
        state.conversation.clear();
        state.events.clear();
        state.sampler.reset();
        state.stats = None;
        state.last_error = None;
        self.resources.lock().cancel = Some(cancel.clone());

        info!(transport = %config.transport, model = %config.model, "Connecting realtime session");
        self.transition(&mut state, ConnectionState::Connecting);
        Ok((state.attempt, cancel))
    }

    async fn establish(
        &self,
        config: &RealtimeConfig,
        epoch: u64,
        cancel: &CancellationToken,
    ) -> RealtimeResult<Transport> {
        let capture = if config.transport.needs_capture() {
            let capture = until_cancelled(cancel, async {
                self.media.acquire().await.map_err(|e| match e {
                    RealtimeError::MediaAcquisition(_) => e,
                    other => RealtimeError::MediaAcquisition(other.to_string()),
                })
            })
            .await?;

            if !self.adopt_capture(epoch, capture.clone()) {
                if let Err(e) = capture.stop().await {
                    warn!(error = %e, "Failed to stop orphaned capture");
                }
                return Err(superseded());
            }
            Some(capture)
        } else {
            None
        };

        let signaling = SignalingClient::for_kind(config.transport, &self.endpoints, self.http.clone());
        signaling
            .negotiate(config, self.issuer.as_ref(), capture, cancel)
            .await
    }

    fn adopt_capture(&self, epoch: u64, capture: Arc<dyn MediaCapture>) -> bool {
        let state = self.state.lock();
        if state.attempt != epoch {
            return false;
        }
        self.resources.lock().capture = Some(capture);
        true
    }

    /// Install the transport and start the pump, or hand the error back when
    /// the attempt was superseded.
    fn attach(
        self: &Arc<Self>,
        epoch: u64,
        transport: Transport,
        cancel: CancellationToken,
    ) -> RealtimeResult<()> {
        let Transport { link, inbound } = transport;

        let mut state = self.state.lock();
        if state.attempt != epoch || state.connection != ConnectionState::Connecting {
            drop(state);
            tokio::spawn(async move {
                if let Err(e) = link.close().await {
                    debug!(error = %e, "Failed to close superseded transport");
                }
            });
            return Err(superseded());
        }

        let period = self.endpoints.telemetry_interval.max(MIN_TELEMETRY_INTERVAL);
        let pump = tokio::spawn(run_pump(Arc::downgrade(self), epoch, inbound, cancel, period));

        {
            let mut resources = self.resources.lock();
            resources.link = Some(link);
            resources.pump = Some(pump);
        }

        info!("Realtime session connected");
        self.transition(&mut state, ConnectionState::Connected);
        Ok(())
    }

    /// Connect attempt failed: surface the error, release, return to idle.
    async fn fail_attempt(&self, epoch: u64, err: &RealtimeError) {
        let resources = {
            let mut state = self.state.lock();
            if state.attempt != epoch {
                debug!(error = %err, "Superseded connect attempt ended");
                return;
            }
            error!(error = %err, "Realtime connect failed");
            state.last_error = Some(err.clone());
            self.emit(SessionUpdate::Failed(err.clone()));
            self.transition(&mut state, ConnectionState::Error);
            std::mem::take(&mut *self.resources.lock())
        };

        self.release(resources, true).await;

        let mut state = self.state.lock();
        if state.attempt == epoch {
            state.session = None;
            self.transition(&mut state, ConnectionState::Idle);
        }
    }

    /// Fatal fault on an established session: release everything and stay in
    /// `error` until the caller disconnects.
    async fn fail_session(&self, epoch: u64, err: RealtimeError, from_pump: bool) {
        let resources = {
            let mut state = self.state.lock();
            if state.attempt != epoch || state.connection != ConnectionState::Connected {
                return;
            }
            error!(error = %err, "Realtime session failed");
            state.last_error = Some(err.clone());
            self.emit(SessionUpdate::Failed(err));
            self.transition(&mut state, ConnectionState::Error);
            state.session = None;
            // The transcript stays readable; responses still streaming never finish
            let partial = state.conversation.open_buffers();
            if partial > 0 {
                debug!(partial, "Dropping unfinished responses");
                state.conversation.clear_buffers();
            }
            std::mem::take(&mut *self.resources.lock())
        };

        self.release(resources, !from_pump).await;
    }

    /// Release every resource, logging and swallowing individual failures.
    async fn release(&self, resources: Resources, abort_pump: bool) {
        let Resources {
            capture,
            link,
            pump,
            cancel,
        } = resources;

        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(pump) = pump {
            if abort_pump {
                pump.abort();
            }
        }
        if let Some(capture) = capture {
            if let Err(e) = capture.stop().await {
                warn!(error = %e, "Failed to stop media capture");
            }
        }
        if let Some(link) = link {
            if let Err(e) = link.close().await {
                warn!(error = %e, "Failed to close transport");
            }
        }
    }

    fn handle_message(&self, epoch: u64, raw: &str) {
        let mut guard = self.state.lock();
        if guard.attempt != epoch {
            return;
        }
        let state = &mut *guard;
        let applied = codec::apply(raw, &mut state.conversation, &mut state.events);

        self.emit(SessionUpdate::Event(applied.label));
        for entry in applied.entries {
            debug!(role = %entry.role, id = %entry.id, "Conversation entry appended");
            self.emit(SessionUpdate::Entry(entry));
        }
        if let Some(message) = applied.server_error {
            warn!(%message, "Server reported an error");
            self.emit(SessionUpdate::ServerError(message));
        }
        if let Some(e) = applied.protocol_error {
            warn!(error = %e, "Skipping malformed event");
        }
    }

    fn record_event(&self, epoch: u64, label: String) {
        let mut state = self.state.lock();
        if state.attempt != epoch {
            return;
        }
        state.events.push(label.clone());
        self.emit(SessionUpdate::Event(label));
    }

    async fn sample_telemetry(&self, epoch: u64) {
        let link = {
            let state = self.state.lock();
            if state.attempt != epoch || state.connection != ConnectionState::Connected {
                return;
            }
            self.resources.lock().link.clone()
        };
        // Tick after teardown
        let Some(link) = link else {
            return;
        };
        let Some(raw) = link.stats().await else {
            return;
        };

        let mut state = self.state.lock();
        if state.attempt != epoch || state.connection != ConnectionState::Connected {
            return;
        }
        let stats = state.sampler.sample(raw, Instant::now().into_std());
        state.stats = Some(stats.clone());
        self.emit(SessionUpdate::Stats(stats));
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let resources = std::mem::take(self.resources.get_mut());
        if let Some(cancel) = &resources.cancel {
            cancel.cancel();
        }
        if let Some(pump) = &resources.pump {
            pump.abort();
        }
        if resources.link.is_none() && resources.capture.is_none() {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Some(capture) = resources.capture {
                    let _ = capture.stop().await;
                }
                if let Some(link) = resources.link {
                    let _ = link.close().await;
                }
            });
        }
    }
}

async fn run_pump(
    inner: Weak<Inner>,
    epoch: u64,
    mut inbound: mpsc::Receiver<InboundFrame>,
    cancel: CancellationToken,
    period: Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            frame = inbound.recv() => {
                let Some(inner) = inner.upgrade() else { break };
                match frame {
                    Some(InboundFrame::Message(text)) => inner.handle_message(epoch, &text),
                    Some(InboundFrame::Lifecycle(label)) => inner.record_event(epoch, label),
                    Some(InboundFrame::Fault(reason)) => {
                        inner.fail_session(epoch, RealtimeError::Transport(reason), true).await;
                        break;
                    }
                    None => {
                        inner
                            .fail_session(epoch, RealtimeError::Transport("transport closed".to_string()), true)
                            .await;
                        break;
                    }
                }
            }

            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                inner.sample_telemetry(epoch).await;
            }
        }
    }
    debug!(epoch, "Session pump stopped");
}
