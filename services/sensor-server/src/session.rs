//! MQTT subscriber session.
//!
//! The session connects with a clean session and a per-process client id, so
//! the broker keeps no subscription or backlog across a disconnect. Readings
//! published while we are offline are lost; delivery is at-most-once.
//!
//! rumqttc reconnects when its event loop is polled again after an error.
//! Because the session is clean, the subscription is re-issued on every
//! `ConnAck`, not just the first one.
//!
//! One tokio task owns the event loop. Each `Publish` is awaited through the
//! [`Ingestor`] before the next event is polled, so messages are ingested one
//! at a time in arrival order.
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rumqttc::{
    AsyncClient, ClientError, ConnectReturnCode, Event, EventLoop, Incoming, MqttOptions,
    Outgoing, Publish, QoS, SubscribeReasonCode, TlsConfiguration, Transport,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::{MqttConfig, TlsPaths};
use crate::error::ConnectionError;
use crate::ingest::Ingestor;

const REQUEST_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Subscribed,
    Reconnecting,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Subscribed => "subscribed",
            SessionState::Reconnecting => "reconnecting",
            SessionState::Closed => "closed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{base}-{unix millis}`; unique across restarts so the broker never sees two
/// live sessions with the same id.
pub fn session_client_id(base: &str, now: DateTime<Utc>) -> String {
    format!("{base}-{}", now.timestamp_millis())
}

pub fn mqtt_options(config: &MqttConfig, client_id: String) -> MqttOptions {
    let mut opts = MqttOptions::new(client_id, config.host.clone(), config.port);
    opts.set_keep_alive(config.keep_alive);
    opts.set_clean_session(true);
    if let Some((user, pass)) = &config.credentials {
        opts.set_credentials(user.clone(), pass.clone());
    }
    opts
}

async fn read_tls_file(path: &Path) -> Result<Vec<u8>, ConnectionError> {
    tokio::fs::read(path)
        .await
        .map_err(|source| ConnectionError::Tls {
            path: path.to_path_buf(),
            source,
        })
}

async fn tls_transport(tls: &TlsPaths) -> Result<Transport, ConnectionError> {
    let ca = read_tls_file(&tls.ca_path).await?;
    let client_auth = match &tls.client_auth {
        Some((cert, key)) => Some((read_tls_file(cert).await?, read_tls_file(key).await?)),
        None => None,
    };
    Ok(Transport::tls_with_config(TlsConfiguration::Simple {
        ca,
        alpn: None,
        client_auth,
    }))
}

/// What a single event loop event means for the session.
#[derive(Debug)]
enum Step {
    Connected,
    Subscribed,
    SubscribeRejected,
    Message(Publish),
    Disconnecting,
    Other,
}

fn classify(event: Event) -> Step {
    match event {
        // rumqttc surfaces a refused ConnAck as `ConnectionError::ConnectionRefused`
        Event::Incoming(Incoming::ConnAck(ack)) if ack.code == ConnectReturnCode::Success => {
            Step::Connected
        }
        Event::Incoming(Incoming::SubAck(ack)) => {
            let rejected = ack
                .return_codes
                .iter()
                .any(|c| matches!(c, SubscribeReasonCode::Failure));
            if rejected {
                Step::SubscribeRejected
            } else {
                Step::Subscribed
            }
        }
        Event::Incoming(Incoming::Publish(publish)) => Step::Message(publish),
        Event::Outgoing(Outgoing::Disconnect) => Step::Disconnecting,
        other => {
            tracing::trace!("mqtt event: {other:?}");
            Step::Other
        }
    }
}

fn startup_error(err: rumqttc::ConnectionError) -> ConnectionError {
    match err {
        rumqttc::ConnectionError::ConnectionRefused(code) => ConnectionError::Refused(code),
        other => ConnectionError::Transport(other),
    }
}

/// Queues a subscribe request with the MQTT client.
trait SubscribeRequest: Send + Sync {
    fn request_subscribe(&self, topic: &str) -> Result<(), ClientError>;
}

impl SubscribeRequest for AsyncClient {
    fn request_subscribe(&self, topic: &str) -> Result<(), ClientError> {
        self.try_subscribe(topic, QoS::AtLeastOnce)
    }
}

/// Per-event session logic, kept apart from the rumqttc `EventLoop` so the
/// task future stays `Send` and the handling can be driven directly.
struct SessionCore<C> {
    client: C,
    topic: String,
    ingestor: Arc<Ingestor>,
    state: watch::Sender<SessionState>,
    reconnect_delay: Duration,
    // set while a subscription is owed to the broker
    resubscribe_at: Option<Instant>,
}

impl<C: SubscribeRequest> SessionCore<C> {
    fn set_state(&self, next: SessionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            tracing::debug!(from = %prev, to = %next, "mqtt session state");
        }
    }

    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn subscribe(&mut self) -> Result<(), ClientError> {
        match self.client.request_subscribe(&self.topic) {
            Ok(()) => {
                self.resubscribe_at = None;
                Ok(())
            }
            Err(e) => {
                self.schedule_resubscribe();
                Err(e)
            }
        }
    }

    fn schedule_resubscribe(&mut self) {
        self.resubscribe_at = Some(Instant::now() + self.reconnect_delay);
    }

    /// Re-issue an owed subscription once its delay has passed.
    fn retry_due(&mut self, now: Instant) {
        if self.resubscribe_at.is_some_and(|at| at <= now) {
            tracing::info!(topic = %self.topic, "retrying subscription");
            if let Err(e) = self.subscribe() {
                tracing::error!(error = %e, "resubscribe request failed");
            }
        }
    }

    async fn on_step(&mut self, step: Step) -> ControlFlow<()> {
        match step {
            Step::Connected => {
                tracing::info!(topic = %self.topic, "mqtt connected; subscribing");
                if let Err(e) = self.subscribe() {
                    tracing::error!(error = %e, "subscribe request failed");
                }
            }
            Step::Subscribed => {
                self.resubscribe_at = None;
                self.set_state(SessionState::Subscribed);
                tracing::info!(topic = %self.topic, "subscribed");
            }
            Step::SubscribeRejected => {
                tracing::error!(
                    topic = %self.topic,
                    "broker rejected subscription; retrying in {:?}",
                    self.reconnect_delay
                );
                self.set_state(SessionState::Reconnecting);
                self.schedule_resubscribe();
            }
            Step::Message(publish) => {
                self.ingestor.ingest(&publish.topic, &publish.payload).await;
            }
            Step::Disconnecting => {
                self.set_state(SessionState::Closed);
                tracing::info!("mqtt session closed");
                return ControlFlow::Break(());
            }
            Step::Other => {}
        }
        ControlFlow::Continue(())
    }

    /// Drive the event loop until the first subscription is acknowledged.
    async fn establish(&mut self, eventloop: &mut EventLoop) -> Result<(), ConnectionError> {
        loop {
            let event = eventloop.poll().await.map_err(startup_error)?;
            match classify(event) {
                Step::Connected => {
                    tracing::info!("mqtt connected");
                    self.subscribe()?;
                }
                Step::SubscribeRejected => {
                    return Err(ConnectionError::SubscribeRejected(self.topic.clone()));
                }
                Step::Subscribed => {
                    self.resubscribe_at = None;
                    self.set_state(SessionState::Subscribed);
                    tracing::info!(topic = %self.topic, "subscribed");
                    return Ok(());
                }
                step => {
                    if self.on_step(step).await.is_break() {
                        return Err(ConnectionError::Transport(
                            rumqttc::ConnectionError::RequestsDone,
                        ));
                    }
                }
            }
        }
    }

    async fn run(mut self, mut eventloop: EventLoop) {
        loop {
            match eventloop.poll().await {
                Ok(event) => {
                    if self.on_step(classify(event)).await.is_break() {
                        return;
                    }
                    self.retry_due(Instant::now());
                }
                Err(e) => {
                    if self.state() == SessionState::Closed {
                        return;
                    }
                    self.set_state(SessionState::Reconnecting);
                    match e {
                        rumqttc::ConnectionError::ConnectionRefused(code) => tracing::error!(
                            "mqtt connection refused: {code:?}; retrying in {:?}",
                            self.reconnect_delay
                        ),
                        e => tracing::error!(
                            "mqtt eventloop error: {e}; retrying in {:?}",
                            self.reconnect_delay
                        ),
                    }
                    tokio::time::sleep(self.reconnect_delay).await;
                }
            }
        }
    }
}

/// Running session. Dropping it leaves the session running in the background.
pub struct SessionHandle {
    client: AsyncClient,
    state: watch::Receiver<SessionState>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub async fn close(self) {
        if let Err(e) = self.client.disconnect().await {
            tracing::warn!(error = %e, "mqtt disconnect request failed");
        }
        let mut task = self.task;
        if tokio::time::timeout(Duration::from_secs(5), &mut task)
            .await
            .is_err()
        {
            tracing::warn!("mqtt session did not stop in time; aborting");
            task.abort();
        }
    }
}

/// Connect, subscribe and hand the event loop to a background task.
///
/// Failing to connect or subscribe within `connect_timeout` is fatal; after
/// that the session reconnects on its own for as long as the process runs.
pub async fn start(
    config: &MqttConfig,
    ingestor: Arc<Ingestor>,
) -> Result<SessionHandle, ConnectionError> {
    let client_id = session_client_id(&config.client_id, Utc::now());
    let mut opts = mqtt_options(config, client_id.clone());
    if let Some(tls) = &config.tls {
        opts.set_transport(tls_transport(tls).await?);
    }
    tracing::info!(
        "mqtt -> {}:{} as {client_id}, topic {}",
        config.host,
        config.port,
        config.topic
    );

    let (client, mut eventloop) = AsyncClient::new(opts, REQUEST_CAPACITY);
    let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
    let mut core = SessionCore {
        client: client.clone(),
        topic: config.topic.clone(),
        ingestor,
        state: state_tx,
        reconnect_delay: config.reconnect_delay,
        resubscribe_at: None,
    };

    core.set_state(SessionState::Connecting);
    match tokio::time::timeout(config.connect_timeout, core.establish(&mut eventloop)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            core.set_state(SessionState::Disconnected);
            return Err(e);
        }
        Err(_) => {
            core.set_state(SessionState::Disconnected);
            return Err(ConnectionError::Timeout(config.connect_timeout));
        }
    }

    let task = tokio::spawn(core.run(eventloop));
    Ok(SessionHandle {
        client,
        state: state_rx,
        task,
    })
}
