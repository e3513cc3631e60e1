//! Voice Session Controller
//!
//! The controller exclusively owns one [`Session`] and is the only thing that
//! mutates it. `start` walks the connection steps in strict order and tears
//! everything down through `stop` on any failure. Once connected, inbound
//! frames run through normalization and dispatch, and results go back over
//! the event channel.

use crate::channel::{Delivery, EventChannel};
use crate::config::Config;
use crate::error::SessionError;
use crate::media::{MediaBridge, MediaHandle};
use crate::negotiator::{NegotiationEndpoints, TransportNegotiator};
use crate::transport::{EVENTS_CHANNEL_LABEL, InboundFrame, PeerTransport, TransportEvent, TransportFactory};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};
use voicebridge_core::tool_call;
use voicebridge_core::tools::{Relays, ToolDispatcher};
use voicebridge_core::webhook::HttpWebhook;

/// Lifecycle of a voice session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Stopping,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Stopping => write!(f, "stopping"),
            SessionState::Failed => write!(f, "failed"),
        }
    }
}

/// Everything a live session holds.
struct Session {
    state: SessionState,
    transport: Option<Box<dyn PeerTransport>>,
    channel: EventChannel,
    media: Option<MediaHandle>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    answered: HashSet<String>,
    last_error: Option<String>,
}

impl Session {
    fn new() -> Self {
        Self {
            state: SessionState::Idle,
            transport: None,
            channel: EventChannel::new(),
            media: None,
            events: None,
            answered: HashSet::new(),
            last_error: None,
        }
    }

    fn holds_resources(&self) -> bool {
        self.transport.is_some()
            || self.channel.is_adopted()
            || self.media.is_some()
            || self.events.is_some()
    }
}

/// Drives one voice session at a time.
pub struct SessionController {
    session: Session,
    media: Arc<dyn MediaBridge>,
    transports: Arc<dyn TransportFactory>,
    negotiator: TransportNegotiator,
    dispatcher: ToolDispatcher,
}

impl SessionController {
    pub fn new(
        media: Arc<dyn MediaBridge>,
        transports: Arc<dyn TransportFactory>,
        negotiator: TransportNegotiator,
        dispatcher: ToolDispatcher,
    ) -> Self {
        Self {
            session: Session::new(),
            media,
            transports,
            negotiator,
            dispatcher,
        }
    }

    /// Wires the negotiator and the product tools from configuration.
    pub fn from_config(
        config: &Config,
        media: Arc<dyn MediaBridge>,
        transports: Arc<dyn TransportFactory>,
    ) -> Self {
        let client = reqwest::Client::new();
        let negotiator = TransportNegotiator::new(
            client.clone(),
            NegotiationEndpoints {
                credential_url: config.credential_url.clone(),
                signaling_url: config.signaling_url.clone(),
                model: config.model.clone(),
            },
            config.negotiation_timeout,
        );
        let relays = Relays {
            subscribe: Arc::new(HttpWebhook::new(
                client.clone(),
                config.subscribe_webhook.clone(),
                config.webhook_timeout,
            )),
            contact: Arc::new(HttpWebhook::new(
                client,
                config.contact_webhook.clone(),
                config.webhook_timeout,
            )),
        };
        let dispatcher = ToolDispatcher::standard(&relays, config.source_tag.clone());
        Self::new(media, transports, negotiator, dispatcher)
    }

    pub fn state(&self) -> SessionState {
        self.session.state
    }

    /// The error that failed the most recent start, until the next stop.
    pub fn last_error(&self) -> Option<&str> {
        self.session.last_error.as_deref()
    }

    /// Connects a new session.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        self.start_with_cancel(&CancellationToken::new()).await
    }

    /// Connects a new session, abandoning the attempt when `cancel` fires.
    /// A cancelled start releases whatever was acquired and leaves the
    /// controller idle.
    #[instrument(name = "session_start", skip_all)]
    pub async fn start_with_cancel(&mut self, cancel: &CancellationToken) -> Result<(), SessionError> {
        if !matches!(self.session.state, SessionState::Idle | SessionState::Failed) {
            warn!(state = %self.session.state, "Rejecting start; session already active");
            return Err(SessionError::AlreadyActive);
        }
        if self.session.holds_resources() {
            self.stop().await;
        }

        self.session.state = SessionState::Connecting;
        self.session.last_error = None;
        self.session.answered.clear();
        info!("Starting voice session");

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SessionError::Cancelled),
            result = self.connect() => result,
        };

        match outcome {
            Ok(()) => {
                self.session.state = SessionState::Connected;
                info!("Voice session connected");
                Ok(())
            }
            Err(e) if !e.is_fatal() => {
                info!(reason = %e, "Session start abandoned; tearing down");
                self.stop().await;
                Err(e)
            }
            Err(e) => {
                error!(error = %e, "Session start failed; tearing down");
                self.stop().await;
                self.session.state = SessionState::Failed;
                self.session.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// The ordered connection steps. Each acquired resource is stored in the
    /// session as soon as it exists so `stop` can release it from any point.
    async fn connect(&mut self) -> Result<(), SessionError> {
        // 1. Microphone.
        let media = self
            .media
            .acquire()
            .await
            .map_err(|e| SessionError::Acquisition(format!("{e:#}")))?;
        let media = self.session.media.insert(media);
        debug!(tracks = media.tracks().len(), "Microphone acquired");

        // 2. Transport and local event channel.
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.session.events = Some(events_rx);
        let transport = self
            .negotiator
            .within("creating transport", self.transports.create(events_tx))
            .await?;
        let transport = self.session.transport.insert(transport);
        self.negotiator
            .within("attaching media", transport.attach_media(media))
            .await?;
        let channel = self
            .negotiator
            .within("creating data channel", transport.create_data_channel(EVENTS_CHANNEL_LABEL))
            .await?;
        self.session.channel.adopt(channel);

        // 3-6. Offer, credential, answer.
        self.negotiator.negotiate(&**transport).await
    }

    /// Releases every resource the session holds and returns to idle. Safe
    /// to call from any state and any number of times.
    pub async fn stop(&mut self) {
        if self.session.state == SessionState::Idle && !self.session.holds_resources() {
            trace!("Stop requested while idle; nothing to do");
            return;
        }

        let previous = self.session.state;
        self.session.state = SessionState::Stopping;

        if let Some(media) = self.session.media.take() {
            media.release();
        }
        self.session.channel.close().await;
        if let Some(transport) = self.session.transport.take() {
            transport.close().await;
        }
        self.session.events = None;
        self.session.answered.clear();
        self.session.last_error = None;
        self.session.state = SessionState::Idle;
        info!(%previous, "Voice session stopped");
    }

    /// Waits for the next transport event. Returns `None` when no session is
    /// running or the transport has gone away.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.session.events.as_mut()?.recv().await
    }

    /// Applies one transport event. Returns the delivery of the tool result
    /// the event produced, if any.
    pub async fn handle_event(&mut self, event: TransportEvent) -> Option<Delivery> {
        match event {
            TransportEvent::DataChannel(channel) => {
                self.session.channel.adopt(channel);
                None
            }
            TransportEvent::Message(frame) => self.handle_frame(frame).await,
            TransportEvent::Disconnected => {
                warn!("Transport disconnected; stopping session");
                self.stop().await;
                None
            }
        }
    }

    async fn handle_frame(&mut self, frame: InboundFrame) -> Option<Delivery> {
        if self.session.state != SessionState::Connected {
            debug!(state = %self.session.state, "Session not connected; ignoring inbound frame");
            return None;
        }
        let event = EventChannel::decode(frame)?;
        let call = tool_call::normalize(&event)?;

        if self.session.answered.contains(&call.call_id) {
            debug!(call_id = %call.call_id, "Tool call already answered; ignoring repeat");
            return None;
        }
        if !self.dispatcher.contains(&call.name) {
            debug!(tool = %call.name, "Ignoring call for unknown tool");
            return None;
        }
        self.session.answered.insert(call.call_id.clone());

        let result = self.dispatcher.dispatch(&call).await?;
        let delivery = self.session.channel.send(&result.into()).await;
        debug!(call_id = %call.call_id, ?delivery, "Tool result handled");
        Some(delivery)
    }

    /// Processes transport events until the session stops or the transport
    /// goes away.
    pub async fn run(&mut self) {
        while let Some(event) = self.next_event().await {
            self.handle_event(event).await;
        }
        debug!("Transport event stream ended");
    }
}
