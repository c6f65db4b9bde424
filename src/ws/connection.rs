#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::ops::ControlFlow;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt as _, StreamExt as _};
use secrecy::{ExposeSecret as _, SecretString};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep, sleep_until, timeout};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::config::Config;
use super::envelope::Envelope;
use super::error::WsError;
use super::heartbeat::HeartbeatMonitor;
use super::reconnect::ReconnectSchedule;
use super::router::{self, Inbound};
use super::sink::EventSink;
use super::state::{ChannelState, ReadyState, Transition};
use crate::Result;
use crate::error::Error;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Query parameter carrying the credential.
const TOKEN_PARAM: &str = "token";

/// Close code for a credential rejected after the upgrade was accepted. The review service
/// itself refuses the upgrade instead, which `open_error` handles.
const AUTH_REJECTED: u16 = 4001;

enum Command {
    Connect,
    Disconnect,
    Send(String),
}

/// Handle to the persistent event channel.
///
/// The channel itself lives in a background task that owns the socket, the retry
/// timer and the heartbeat ticker, and handles one event at a time. Handles are cheap
/// to clone; when the last one is dropped the task closes the connection and exits.
///
/// # Example
///
/// ```no_run
/// use review_channel::ws::{ChannelEvent, Config, ConnectionManager};
/// use secrecy::SecretString;
/// use tokio::sync::mpsc;
///
/// # async fn example() -> review_channel::Result<()> {
/// let (events_tx, mut events) = mpsc::unbounded_channel::<ChannelEvent>();
/// let channel = ConnectionManager::new(
///     "wss://review.example.com/ws",
///     SecretString::from("session-token"),
///     Config::default(),
///     events_tx,
/// )?;
///
/// channel.connect();
/// while let Some(event) = events.recv().await {
///     println!("{event:?}");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    /// Commands for the connection task
    commands: mpsc::UnboundedSender<Command>,
    /// Latest state published by the connection task
    state_rx: watch::Receiver<ChannelState>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect => f.write_str("Connect"),
            Self::Disconnect => f.write_str("Disconnect"),
            Self::Send(_) => f.write_str("Send(..)"),
        }
    }
}

impl ConnectionManager {
    /// Create the channel in the `Idle` state. Nothing is opened until [`Self::connect`].
    ///
    /// `token` is appended to `endpoint` as the `token` query parameter, so the server
    /// can authenticate before any frame is exchanged. Must be called within a tokio
    /// runtime.
    pub fn new<S: EventSink>(
        endpoint: &str,
        token: SecretString,
        config: Config,
        sink: S,
    ) -> Result<Self> {
        let url = authenticated_url(endpoint, &token)?;
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ChannelState::Idle);

        let driver = Driver {
            url,
            schedule: config.reconnect.clone().into(),
            heartbeat: HeartbeatMonitor::new(config.heartbeat_interval),
            config,
            sink,
            state: ChannelState::Idle,
            state_tx,
            commands: command_rx,
        };
        tokio::spawn(driver.run());

        Ok(Self {
            commands,
            state_rx,
        })
    }

    /// Open the channel. No-op while connecting or connected.
    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    /// Close the channel with a normal-closure code and cancel any pending retry or
    /// heartbeat. Calling it again is a no-op.
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Serialize and transmit `message` if the channel is connected.
    ///
    /// Messages sent while disconnected are dropped with a warning; only a
    /// serialization failure is reported.
    pub fn send<R: Serialize>(&self, message: &R) -> Result<()> {
        let json = serde_json::to_string(message)?;
        if self.is_connected() {
            self.command(Command::Send(json));
        } else {
            drop_outbound(&json);
        }
        Ok(())
    }

    /// Get the current channel state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        *self.state_rx.borrow()
    }

    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.state().ready_state()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Subscribe to channel state changes.
    ///
    /// The returned receiver treats the current state as already seen.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ChannelState> {
        let mut receiver = self.state_rx.clone();
        receiver.mark_unchanged();
        receiver
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            #[cfg(feature = "tracing")]
            tracing::warn!("Connection task has stopped, ignoring command");
        }
    }
}

/// Background task owning the connection.
struct Driver<S> {
    url: Url,
    config: Config,
    sink: S,
    state: ChannelState,
    schedule: ReconnectSchedule,
    heartbeat: HeartbeatMonitor,
    state_tx: watch::Sender<ChannelState>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl<S: EventSink> Driver<S> {
    async fn run(mut self) {
        loop {
            let flow = match self.state {
                ChannelState::Connecting { .. } => self.connecting().await,
                ChannelState::PendingRetry { delay, .. } => self.pending_retry(delay).await,
                _ => self.idle().await,
            };

            if flow.is_break() {
                break;
            }
        }

        self.heartbeat.stop();
        #[cfg(feature = "tracing")]
        tracing::debug!("All channel handles dropped, connection task exiting");
    }

    fn apply(&mut self, transition: Transition) {
        let next = self.state.apply(transition, &mut self.schedule);
        if next == self.state {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(from = ?self.state, to = ?next, ?transition, "Channel state changed");
        self.state = next;
        _ = self.state_tx.send(next);
    }

    /// Report the retry decision taken by the last failure transition.
    fn report_retry(&self) {
        match self.state {
            ChannelState::PendingRetry { attempt, delay } => {
                #[cfg(feature = "tracing")]
                tracing::info!(attempt, ?delay, "Scheduling reconnect");
                self.sink.on_retry_scheduled(attempt, delay);
            }
            ChannelState::GivenUp { attempts } => {
                #[cfg(feature = "tracing")]
                tracing::warn!(attempts, "Reconnect limit reached, giving up");
                #[cfg(not(feature = "tracing"))]
                let _: u32 = attempts;
            }
            _ => {}
        }
    }

    async fn idle(&mut self) -> ControlFlow<()> {
        let Some(command) = self.commands.recv().await else {
            return ControlFlow::Break(());
        };

        match command {
            Command::Connect => self.apply(Transition::Connect),
            Command::Disconnect => self.apply(Transition::Disconnect),
            Command::Send(text) => drop_outbound(&text),
        }
        ControlFlow::Continue(())
    }

    async fn connecting(&mut self) -> ControlFlow<()> {
        #[cfg(feature = "tracing")]
        tracing::debug!(endpoint = %redacted(&self.url), "Opening channel");

        let open = connect_async(self.url.as_str().to_owned());
        tokio::pin!(open);

        loop {
            tokio::select! {
                result = &mut open => {
                    return match result {
                        Ok((stream, _)) => {
                            self.apply(Transition::Opened);
                            self.session(stream).await
                        }
                        Err(e) => {
                            let error = Error::from(open_error(e));
                            #[cfg(feature = "tracing")]
                            tracing::warn!("Unable to connect: {error:?}");
                            self.sink.on_error(&error);
                            self.apply(Transition::OpenFailed);
                            self.report_retry();
                            ControlFlow::Continue(())
                        }
                    };
                }

                command = self.commands.recv() => match command {
                    None => return ControlFlow::Break(()),
                    Some(Command::Connect) => {}
                    Some(Command::Disconnect) => {
                        // Dropping `open` abandons the in-flight handshake.
                        self.apply(Transition::Disconnect);
                        self.sink.on_disconnect();
                        return ControlFlow::Continue(());
                    }
                    Some(Command::Send(text)) => drop_outbound(&text),
                }
            }
        }
    }

    async fn pending_retry(&mut self, delay: Duration) -> ControlFlow<()> {
        let retry = sleep(delay);
        tokio::pin!(retry);

        loop {
            tokio::select! {
                () = &mut retry => {
                    self.apply(Transition::RetryElapsed);
                    return ControlFlow::Continue(());
                }

                command = self.commands.recv() => match command {
                    None => return ControlFlow::Break(()),
                    Some(Command::Connect) => {
                        self.apply(Transition::Connect);
                        return ControlFlow::Continue(());
                    }
                    Some(Command::Disconnect) => {
                        self.apply(Transition::Disconnect);
                        self.sink.on_disconnect();
                        return ControlFlow::Continue(());
                    }
                    Some(Command::Send(text)) => drop_outbound(&text),
                }
            }
        }
    }

    /// Serve an open connection until it closes or is torn down.
    async fn session(&mut self, stream: WsStream) -> ControlFlow<()> {
        let (mut write, mut read) = stream.split();

        self.heartbeat.start();
        #[cfg(feature = "tracing")]
        tracing::info!(endpoint = %redacted(&self.url), "Channel connected");
        self.sink.on_connect();

        // Set while a heartbeat is unacknowledged and a timeout is configured
        let mut ack_deadline: Option<Instant> = None;

        loop {
            let ack_wait = async move {
                match ack_deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if self.handle_frame(text.as_str()) {
                            ack_deadline = None;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.map_or(CloseCode::Status, |frame| frame.code);
                        return self.closed(code);
                    }
                    Some(Ok(_)) => {
                        // Binary frames and transport-level PING/PONG carry no envelopes.
                    }
                    Some(Err(e)) => return self.failed(WsError::Connection(e)),
                    None => return self.closed(CloseCode::Abnormal),
                },

                command = self.commands.recv() => match command {
                    None => {
                        self.heartbeat.stop();
                        _ = write.send(Message::Close(Some(normal_close()))).await;
                        return ControlFlow::Break(());
                    }
                    Some(Command::Connect) => {}
                    Some(Command::Disconnect) => return self.teardown(write, read).await,
                    Some(Command::Send(text)) => {
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            return self.failed(WsError::Connection(e));
                        }
                    }
                },

                () = self.heartbeat.tick() => {
                    let probe = match serde_json::to_string(&Envelope::heartbeat()) {
                        Ok(probe) => probe,
                        Err(e) => return self.failed(WsError::MessageParse(e)),
                    };

                    #[cfg(feature = "tracing")]
                    tracing::trace!("Sending heartbeat");
                    if let Err(e) = write.send(Message::Text(probe.into())).await {
                        return self.failed(WsError::Connection(e));
                    }

                    if let Some(limit) = self.config.heartbeat_timeout {
                        ack_deadline.get_or_insert_with(|| Instant::now() + limit);
                    }
                }

                () = ack_wait => {
                    let limit = self.config.heartbeat_timeout.unwrap_or_default();
                    return self.failed(WsError::Timeout(limit));
                }
            }
        }
    }

    /// Decode and route one text frame. Returns `true` for a heartbeat acknowledgement.
    fn handle_frame(&self, text: &str) -> bool {
        #[cfg(feature = "tracing")]
        tracing::trace!(%text, "Received WebSocket text message");

        match Envelope::decode(text) {
            Ok(envelope) => {
                let inbound = Inbound::from(envelope);
                let acknowledged = matches!(inbound, Inbound::HeartbeatAck);
                router::dispatch(inbound, &self.sink);
                acknowledged
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(%text, error = %e, "Failed to parse WebSocket message");
                #[cfg(not(feature = "tracing"))]
                let _: (&str, WsError) = (text, e);
                false
            }
        }
    }

    /// Transport error on an open connection: report it, then treat it as an abnormal
    /// closure.
    fn failed(&mut self, error: WsError) -> ControlFlow<()> {
        let error = Error::from(error);
        #[cfg(feature = "tracing")]
        tracing::warn!("Channel error: {error:?}");
        self.sink.on_error(&error);
        self.closed(CloseCode::Abnormal)
    }

    fn closed(&mut self, code: CloseCode) -> ControlFlow<()> {
        self.heartbeat.stop();

        let raw = u16::from(code);
        #[cfg(feature = "tracing")]
        tracing::info!(code = raw, "Channel closed");
        if raw == AUTH_REJECTED {
            self.sink.on_error(&WsError::AuthenticationFailed.into());
        }

        self.apply(Transition::Closed { code });
        self.sink.on_disconnect();
        self.report_retry();
        ControlFlow::Continue(())
    }

    /// Caller-requested close: send a normal closure and wait briefly for the echo.
    async fn teardown(&mut self, mut write: WsSink, mut read: WsSource) -> ControlFlow<()> {
        self.heartbeat.stop();
        self.apply(Transition::Disconnect);

        _ = write.send(Message::Close(Some(normal_close()))).await;
        self.sink.on_disconnect();

        let handshake = async {
            while let Some(Ok(message)) = read.next().await {
                if message.is_close() {
                    break;
                }
            }
        };
        if timeout(self.config.close_timeout, handshake).await.is_err() {
            #[cfg(feature = "tracing")]
            tracing::debug!("Server did not answer the close handshake in time");
        }

        self.apply(Transition::TeardownComplete);
        #[cfg(feature = "tracing")]
        tracing::info!("Channel disconnected");
        ControlFlow::Continue(())
    }
}

/// Classify a failed open. A `401`/`403` answer to the upgrade request is a rejected
/// credential.
fn open_error(error: tungstenite::Error) -> WsError {
    let rejected = matches!(
        &error,
        tungstenite::Error::Http(response)
            if matches!(response.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
    );

    if rejected {
        WsError::AuthenticationFailed
    } else {
        WsError::Connection(error)
    }
}

fn normal_close() -> CloseFrame {
    CloseFrame {
        code: CloseCode::Normal,
        reason: "client disconnect".into(),
    }
}

fn drop_outbound(text: &str) {
    #[cfg(feature = "tracing")]
    tracing::warn!(%text, "Channel is not connected, dropping outbound message");
    #[cfg(not(feature = "tracing"))]
    let _: &str = text;
}

/// Attach the credential to the endpoint, replacing any credential already present.
fn authenticated_url(endpoint: &str, token: &SecretString) -> Result<Url> {
    let mut url = Url::parse(endpoint)?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(Error::validation(format!(
            "unsupported endpoint scheme `{}`, expected `ws` or `wss`",
            url.scheme()
        )));
    }
    if token.expose_secret().is_empty() {
        return Err(Error::validation("authentication token must not be empty"));
    }

    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != TOKEN_PARAM)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(retained)
        .append_pair(TOKEN_PARAM, token.expose_secret());

    Ok(url)
}

/// Endpoint without its query string, for logs.
#[cfg(feature = "tracing")]
fn redacted(url: &Url) -> Url {
    let mut url = url.clone();
    url.set_query(None);
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Kind;

    fn token() -> SecretString {
        SecretString::from("s3cr3t")
    }

    #[test]
    fn token_is_appended_as_query_parameter() {
        let url = authenticated_url("wss://review.example.com/ws", &token()).unwrap();

        assert_eq!(url.as_str(), "wss://review.example.com/ws?token=s3cr3t");
    }

    #[test]
    fn existing_token_is_replaced_and_other_params_kept() {
        let url = authenticated_url("ws://localhost:8003/ws?client=web&token=old", &token())
            .unwrap();

        assert_eq!(
            url.as_str(),
            "ws://localhost:8003/ws?client=web&token=s3cr3t"
        );
    }

    #[test]
    fn token_is_percent_encoded() {
        let url = authenticated_url(
            "ws://localhost/ws",
            &SecretString::from("a b&c=d"),
        )
        .unwrap();

        assert_eq!(url.query(), Some("token=a+b%26c%3Dd"));
    }

    #[test]
    fn http_endpoint_is_rejected() {
        let error = authenticated_url("https://review.example.com/ws", &token()).unwrap_err();

        assert_eq!(error.kind(), Kind::Validation);
    }

    #[test]
    fn empty_token_is_rejected() {
        let error =
            authenticated_url("ws://localhost/ws", &SecretString::from("")).unwrap_err();

        assert_eq!(error.kind(), Kind::Validation);
    }

    #[cfg(feature = "tracing")]
    #[test]
    fn redacted_url_hides_token() {
        let url = authenticated_url("ws://localhost/ws", &token()).unwrap();

        assert_eq!(redacted(&url).as_str(), "ws://localhost/ws");
    }

    #[test]
    fn refused_upgrade_is_authentication_failure() {
        let refused = |status: StatusCode| {
            tungstenite::Error::Http(Box::new(
                tungstenite::http::Response::builder()
                    .status(status)
                    .body(None)
                    .unwrap(),
            ))
        };

        assert!(matches!(
            open_error(refused(StatusCode::FORBIDDEN)),
            WsError::AuthenticationFailed
        ));
        assert!(matches!(
            open_error(refused(StatusCode::UNAUTHORIZED)),
            WsError::AuthenticationFailed
        ));
        assert!(matches!(
            open_error(refused(StatusCode::BAD_GATEWAY)),
            WsError::Connection(_)
        ));
        assert!(matches!(
            open_error(tungstenite::Error::ConnectionClosed),
            WsError::Connection(_)
        ));
    }

    #[tokio::test]
    async fn send_while_idle_is_dropped_without_error() {
        let channel = ConnectionManager::new(
            "ws://127.0.0.1:9/ws",
            token(),
            Config::default(),
            crate::ws::NoopSink,
        )
        .unwrap();

        channel
            .send(&serde_json::json!({"type": "ping"}))
            .unwrap();

        assert_eq!(channel.ready_state(), ReadyState::Closed);
        assert!(!channel.is_connected(), "idle channel is not connected");
    }
}
