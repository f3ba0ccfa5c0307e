//! The idea stream client.
//!
//! [`IdeaStream::mount`] spawns one driver task that owns the display buffer, the connection
//! state, and the single in-flight connection.  The driver moves through
//! `Idle → Connecting → Streaming → (Closed | Errored)` and back to `Connecting` when it
//! reconnects.  Views are published on a watch channel; once the stream is unmounted nothing
//! more is published.
//!
//! Reconnect policy:
//!
//! - A forbidden status, at open or mid-stream, clears the buffer, shows
//!   [`View::Refreshing`], and reconnects with a fresh token after the auth retry delay.
//! - Any other status at open is fatal and shows [`View::ConnectionFailed`].
//! - An unreachable endpoint reconnects with a fresh token after the network retry delay.
//! - Any other stream error re-opens with the same token after the transport retry interval,
//!   which the server may change with an SSE `retry:` field.  The buffer is kept.
//! - A missing token shows [`View::AuthenticationRequired`] and attempts nothing.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auth::TokenSource;
use crate::error::Error;
use crate::observability::{
    RECONNECT_EXHAUSTED, RECONNECT_FORBIDDEN, RECONNECT_NETWORK, RECONNECT_TRANSPORT,
    STREAM_BYTES, STREAM_CHUNKS, STREAM_CLOSES, STREAM_CONNECTS, STREAM_FATAL,
    STREAM_IGNORED_EVENTS, STREAM_MISSING_TOKEN, STREAM_OPENS, STREAM_TTFB,
};
use crate::sse::{Frame, StreamEvent};
use crate::transport::{OpenRequest, Transport};

/// Shown until the first chunk arrives.
pub const LOADING_TEXT: &str = "Generating your business idea...";
/// Shown while reconnecting with a fresh token.
pub const REFRESHING_TEXT: &str = "Refreshing connection...";
/// Shown when there is no session token.
pub const AUTHENTICATION_REQUIRED_TEXT: &str = "Authentication required";
/// Shown when the stream failed and will not be retried.
pub const CONNECTION_FAILED_TEXT: &str = "Connection failed. Please refresh the page.";

/// What the user currently sees.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum View {
    /// Waiting for the first chunk.
    Loading,
    /// Everything received on the current connection, as markdown source.
    Content(String),
    /// Reconnecting with a fresh token.
    Refreshing,
    /// No session token was available.
    AuthenticationRequired,
    /// The stream failed and will not be retried automatically.
    ConnectionFailed,
}

impl View {
    /// The fixed message for every view except [`View::Content`].
    pub fn placeholder(&self) -> Option<&'static str> {
        match self {
            View::Loading => Some(LOADING_TEXT),
            View::Content(_) => None,
            View::Refreshing => Some(REFRESHING_TEXT),
            View::AuthenticationRequired => Some(AUTHENTICATION_REQUIRED_TEXT),
            View::ConnectionFailed => Some(CONNECTION_FAILED_TEXT),
        }
    }

    /// Returns true for views that stay until the next explicit connect.
    pub fn is_terminal(&self) -> bool {
        matches!(self, View::AuthenticationRequired | View::ConnectionFailed)
    }
}

/// Lifecycle of the stream connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not mounted, or unmounted.
    Idle,
    /// Fetching a token or waiting for the server to answer.
    Connecting,
    /// The server accepted the connection and chunks are flowing.
    Streaming,
    /// The server ended the stream.
    Closed,
    /// The last attempt failed; a reconnect may be pending.
    Errored,
}

/// Why the driver stopped on its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The server ended the stream normally.
    Closed,
    /// There was no session token.
    AuthenticationRequired,
    /// The stream failed and will not be retried.
    ConnectionFailed,
    /// The stream was unmounted.
    Unmounted,
}

/// Delays between automatic reconnects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before reconnecting after a forbidden status.
    pub auth_retry_delay: Duration,
    /// Delay before reconnecting after the endpoint could not be reached.
    pub network_retry_delay: Duration,
    /// Initial delay before re-opening after a broken stream.
    pub transport_retry_delay: Duration,
    /// Consecutive automatic reconnects allowed before giving up; `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            auth_retry_delay: Duration::from_secs(1),
            network_retry_delay: Duration::from_secs(2),
            transport_retry_delay: Duration::from_secs(1),
            max_retries: None,
        }
    }
}

/// Handle to a mounted idea stream.
///
/// Dropping the handle unmounts the stream.
pub struct IdeaStream {
    requests: mpsc::UnboundedSender<()>,
    views: watch::Receiver<View>,
    states: watch::Receiver<ConnectionState>,
    outcome: watch::Receiver<Option<Outcome>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl IdeaStream {
    /// Mount the stream and start connecting immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn mount(
        transport: Arc<dyn Transport>,
        tokens: Arc<dyn TokenSource>,
        policy: ReconnectPolicy,
    ) -> Self {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (views_tx, views) = watch::channel(View::Loading);
        let (states_tx, states) = watch::channel(ConnectionState::Idle);
        let (outcome_tx, outcome) = watch::channel(None);
        let cancel = CancellationToken::new();
        let driver = Driver {
            transport,
            tokens,
            retry_interval: policy.transport_retry_delay,
            policy,
            views: views_tx,
            states: states_tx,
            outcome: outcome_tx,
            requests: requests_rx,
            cancel: cancel.clone(),
            buffer: String::new(),
            last_event_id: None,
            retries: 0,
            opened_at: None,
        };
        let task = tokio::spawn(driver.run());
        Self {
            requests: requests_tx,
            views,
            states,
            outcome,
            cancel,
            task: Some(task),
        }
    }

    /// Start a new connection with a fresh token.
    ///
    /// A no-op while connecting.  Otherwise the current connection, or a pending reconnect, is
    /// abandoned first.
    pub fn connect(&self) {
        if *self.states.borrow() == ConnectionState::Connecting {
            return;
        }
        let _ = self.requests.send(());
    }

    /// Subscribe to view updates.
    pub fn view(&self) -> watch::Receiver<View> {
        self.views.clone()
    }

    /// The most recently published view.
    pub fn current_view(&self) -> View {
        self.views.borrow().clone()
    }

    /// The current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.states.borrow()
    }

    /// A token that unmounts the stream when cancelled, for use from signal handlers.
    pub fn abort_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait until the driver stops on its own or the stream is unmounted.
    pub async fn wait_settled(&self) -> Outcome {
        let mut outcome = self.outcome.clone();
        match outcome.wait_for(|o| o.is_some()).await {
            Ok(settled) => {
                let settled = *settled;
                settled.unwrap_or(Outcome::Unmounted)
            }
            Err(_) => Outcome::Unmounted,
        }
    }

    /// Abort the connection and wait for the driver to exit.
    pub async fn unmount(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for IdeaStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum Step {
    Connect,
    Reconnect(Duration),
    Retry { token: String, delay: Duration },
    Settle(Outcome),
    Stop,
}

enum Wake {
    Elapsed,
    Requested,
    Stopped,
}

struct Driver {
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenSource>,
    policy: ReconnectPolicy,
    retry_interval: Duration,
    views: watch::Sender<View>,
    states: watch::Sender<ConnectionState>,
    outcome: watch::Sender<Option<Outcome>>,
    requests: mpsc::UnboundedReceiver<()>,
    cancel: CancellationToken,
    buffer: String,
    last_event_id: Option<String>,
    retries: u32,
    opened_at: Option<Instant>,
}

impl Driver {
    async fn run(mut self) {
        let mut step = Step::Connect;
        loop {
            step = match step {
                Step::Connect => self.connect().await,
                Step::Reconnect(delay) => match self.wait(delay).await {
                    Wake::Elapsed => self.connect().await,
                    Wake::Requested => self.requested(),
                    Wake::Stopped => Step::Stop,
                },
                Step::Retry { token, delay } => match self.wait(delay).await {
                    Wake::Elapsed => self.attempt(token).await,
                    Wake::Requested => self.requested(),
                    Wake::Stopped => Step::Stop,
                },
                Step::Settle(outcome) => self.settle(outcome).await,
                Step::Stop => break,
            };
        }
        self.states.send_replace(ConnectionState::Idle);
        self.outcome.send_replace(Some(Outcome::Unmounted));
        info!("idea stream unmounted");
    }

    /// One connection cycle with a freshly fetched token.
    async fn connect(&mut self) -> Step {
        self.outcome.send_replace(None);
        self.set_state(ConnectionState::Connecting);
        self.buffer.clear();
        self.last_event_id = None;
        self.retry_interval = self.policy.transport_retry_delay;
        STREAM_CONNECTS.click();

        let token = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Step::Stop,
            token = self.tokens.token() => token,
        };
        match token {
            Ok(Some(token)) => self.attempt(token).await,
            Ok(None) => {
                warn!("no session token; authentication required");
                STREAM_MISSING_TOKEN.click();
                self.drain_requests();
                self.publish(View::AuthenticationRequired);
                self.set_state(ConnectionState::Errored);
                Step::Settle(Outcome::AuthenticationRequired)
            }
            Err(err) => {
                self.drain_requests();
                self.outer_failure(err)
            }
        }
    }

    /// Open the stream with `token` and consume it until it ends, fails, or is replaced.
    async fn attempt(&mut self, token: String) -> Step {
        self.set_state(ConnectionState::Connecting);
        let connection = self.cancel.child_token();
        let _abort_on_exit = connection.clone().drop_guard();
        let mut request = OpenRequest::new(token.clone(), connection.clone());
        request.last_event_id = self.last_event_id.clone();

        info!(
            resume = request.last_event_id.is_some(),
            "opening idea stream"
        );
        let opened = tokio::select! {
            biased;
            _ = connection.cancelled() => return Step::Stop,
            opened = self.transport.open(&request) => opened,
        };
        self.drain_requests();
        let mut frames = match opened {
            Ok(frames) => frames,
            Err(err) if err.is_forbidden() => return self.refresh(&err),
            Err(err) if err.is_http_status() => {
                error!(%err, "idea stream rejected");
                return self.fail();
            }
            Err(err) => return self.outer_failure(err),
        };

        info!("idea stream open");
        STREAM_OPENS.click();
        self.retries = 0;
        self.opened_at = Some(Instant::now());
        self.set_state(ConnectionState::Streaming);

        loop {
            let next = tokio::select! {
                biased;
                _ = connection.cancelled() => return Step::Stop,
                request = self.requests.recv() => {
                    return match request {
                        Some(()) => {
                            info!("connect requested; replacing open stream");
                            self.requested()
                        }
                        None => Step::Stop,
                    };
                }
                frame = frames.next() => frame,
            };
            match next {
                Some(Ok(Frame::Event(event))) => self.on_event(event),
                Some(Ok(Frame::Retry(interval))) => {
                    debug!(interval_ms = interval.as_millis() as u64, "server set retry interval");
                    self.retry_interval = interval;
                }
                Some(Err(err)) if err.is_forbidden() => return self.refresh(&err),
                Some(Err(err)) => return self.transport_retry(token, err),
                None => {
                    info!(bytes = self.buffer.len(), "idea stream closed");
                    STREAM_CLOSES.click();
                    self.set_state(ConnectionState::Closed);
                    return Step::Settle(Outcome::Closed);
                }
            }
        }
    }

    fn on_event(&mut self, event: StreamEvent) {
        if event.id.is_some() {
            self.last_event_id = event.id.clone();
        }
        if !event.is_message() {
            debug!(event = %event.event, "ignoring event");
            STREAM_IGNORED_EVENTS.click();
            return;
        }
        if let Some(opened_at) = self.opened_at.take() {
            STREAM_TTFB.add(opened_at.elapsed().as_secs_f64());
        }
        debug!(bytes = event.data.len(), "chunk");
        STREAM_CHUNKS.click();
        STREAM_BYTES.count(event.data.len() as u64);
        self.buffer.push_str(&event.data);
        self.publish(View::Content(self.buffer.clone()));
    }

    fn refresh(&mut self, err: &Error) -> Step {
        warn!(%err, "session token refused; reconnecting with a fresh token");
        RECONNECT_FORBIDDEN.click();
        self.buffer.clear();
        self.publish(View::Refreshing);
        self.set_state(ConnectionState::Errored);
        self.schedule(Step::Reconnect(self.policy.auth_retry_delay))
    }

    fn outer_failure(&mut self, err: Error) -> Step {
        if self.cancel.is_cancelled() || err.is_abort() {
            return Step::Stop;
        }
        self.set_state(ConnectionState::Errored);
        if err.is_network() {
            warn!(%err, "endpoint unreachable; reconnecting");
            RECONNECT_NETWORK.click();
            self.schedule(Step::Reconnect(self.policy.network_retry_delay))
        } else {
            error!(%err, "could not connect");
            self.fail()
        }
    }

    fn transport_retry(&mut self, token: String, err: Error) -> Step {
        warn!(
            %err,
            delay_ms = self.retry_interval.as_millis() as u64,
            "idea stream interrupted; retrying"
        );
        RECONNECT_TRANSPORT.click();
        self.set_state(ConnectionState::Errored);
        let delay = self.retry_interval;
        self.schedule(Step::Retry { token, delay })
    }

    fn schedule(&mut self, step: Step) -> Step {
        self.retries += 1;
        if let Some(max_retries) = self.policy.max_retries {
            if self.retries > max_retries {
                error!(max_retries, "giving up after repeated reconnects");
                RECONNECT_EXHAUSTED.click();
                return self.fail();
            }
        }
        step
    }

    fn fail(&mut self) -> Step {
        STREAM_FATAL.click();
        self.publish(View::ConnectionFailed);
        self.set_state(ConnectionState::Errored);
        Step::Settle(Outcome::ConnectionFailed)
    }

    fn requested(&mut self) -> Step {
        self.retries = 0;
        Step::Connect
    }

    async fn settle(&mut self, outcome: Outcome) -> Step {
        self.outcome.send_replace(Some(outcome));
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Step::Stop,
            request = self.requests.recv() => match request {
                Some(()) => self.requested(),
                None => Step::Stop,
            },
        }
    }

    async fn wait(&mut self, delay: Duration) -> Wake {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Wake::Stopped,
            request = self.requests.recv() => match request {
                Some(()) => Wake::Requested,
                None => Wake::Stopped,
            },
            _ = tokio::time::sleep(delay) => Wake::Elapsed,
        }
    }

    /// Connect requests that arrive while connecting are no-ops.
    fn drain_requests(&mut self) {
        while self.requests.try_recv().is_ok() {}
    }

    fn publish(&self, view: View) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.views.send_replace(view);
    }

    fn set_state(&self, state: ConnectionState) {
        self.states.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::stream;

    use super::*;
    use crate::Result;
    use crate::auth::StaticToken;
    use crate::transport::FrameStream;

    enum Script {
        /// Accept, yield the frames, then end the stream.
        Close(Vec<Result<Frame>>),
        /// Accept, yield the frames, then stay open.
        Hang(Vec<Result<Frame>>),
        /// Fail to open.
        Reject(Error),
    }

    struct ActiveGuard(Arc<AtomicUsize>);

    impl Drop for ActiveGuard {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct ScriptedTransport {
        script: Mutex<VecDeque<Script>>,
        opens: Mutex<Vec<(Instant, OpenRequest)>>,
        active: Arc<AtomicUsize>,
        max_active: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                ..Self::default()
            })
        }

        fn opens(&self) -> Vec<(Instant, OpenRequest)> {
            self.opens.lock().unwrap().clone()
        }

        fn tokens(&self) -> Vec<String> {
            self.opens().into_iter().map(|(_, r)| r.token).collect()
        }

        fn active(&self) -> usize {
            self.active.load(Ordering::SeqCst)
        }

        fn frames(&self, frames: Vec<Result<Frame>>, hang: bool) -> FrameStream {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            let guard = ActiveGuard(self.active.clone());
            let tail = if hang {
                stream::pending().boxed()
            } else {
                stream::empty().boxed()
            };
            let frames = stream::iter(frames).chain(tail);
            Box::pin(stream::unfold((frames, guard), |(mut frames, guard)| async move {
                let frame = frames.next().await?;
                Some((frame, (frames, guard)))
            }))
        }
    }

    #[async_trait::async_trait]
    impl Transport for ScriptedTransport {
        async fn open(&self, request: &OpenRequest) -> Result<FrameStream> {
            self.opens
                .lock()
                .unwrap()
                .push((Instant::now(), request.clone()));
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Script::Close(frames)) => Ok(self.frames(frames, false)),
                Some(Script::Hang(frames)) => Ok(self.frames(frames, true)),
                Some(Script::Reject(err)) => Err(err),
                None => Ok(self.frames(Vec::new(), true)),
            }
        }
    }

    /// Hands out the queued tokens, then `token-N` for the Nth call.
    #[derive(Default)]
    struct SequenceTokens {
        queued: Mutex<VecDeque<Result<Option<String>>>>,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl SequenceTokens {
        fn new(queued: Vec<Result<Option<String>>>) -> Arc<Self> {
            Arc::new(Self {
                queued: Mutex::new(queued.into()),
                ..Self::default()
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                ..Self::default()
            })
        }
    }

    #[async_trait::async_trait]
    impl TokenSource for SequenceTokens {
        async fn token(&self) -> Result<Option<String>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let queued = self.queued.lock().unwrap().pop_front();
            queued.unwrap_or_else(|| Ok(Some(format!("token-{call}"))))
        }
    }

    fn chunk(data: &str) -> Result<Frame> {
        Ok(Frame::Event(StreamEvent::message(data)))
    }

    fn mount(transport: &Arc<ScriptedTransport>, tokens: Arc<dyn TokenSource>) -> IdeaStream {
        IdeaStream::mount(transport.clone(), tokens, ReconnectPolicy::default())
    }

    async fn settle_for(duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    #[tokio::test(start_paused = true)]
    async fn chunks_accumulate_in_delivery_order() {
        let transport = ScriptedTransport::new(vec![Script::Close(vec![
            chunk("Sell "),
            chunk("eco-friendly "),
            chunk("socks."),
        ])]);
        let stream = mount(&transport, Arc::new(StaticToken::new("abc123")));

        assert_eq!(stream.wait_settled().await, Outcome::Closed);
        assert_eq!(
            stream.current_view(),
            View::Content("Sell eco-friendly socks.".to_string())
        );
        assert_eq!(stream.state(), ConnectionState::Closed);
        assert_eq!(transport.tokens(), vec!["abc123"]);
    }

    #[tokio::test(start_paused = true)]
    async fn forbidden_at_open_refreshes_once_after_short_delay() {
        let transport = ScriptedTransport::new(vec![
            Script::Reject(Error::permission("token expired")),
            Script::Hang(vec![]),
        ]);
        let tokens = SequenceTokens::new(vec![Ok(Some("stale".to_string()))]);
        let stream = mount(&transport, tokens);

        settle_for(Duration::from_millis(500)).await;
        assert_eq!(stream.current_view(), View::Refreshing);
        assert_eq!(stream.state(), ConnectionState::Errored);
        assert_eq!(transport.opens().len(), 1);

        settle_for(Duration::from_millis(600)).await;
        let opens = transport.opens();
        assert_eq!(opens.len(), 2);
        assert_eq!(opens[0].1.token, "stale");
        assert_eq!(opens[1].1.token, "token-2");
        let gap = opens[1].0 - opens[0].0;
        assert!(gap >= Duration::from_secs(1), "reconnected after {gap:?}");
        assert!(gap < Duration::from_millis(1100), "reconnected after {gap:?}");
        assert_eq!(stream.state(), ConnectionState::Streaming);

        settle_for(Duration::from_secs(10)).await;
        assert_eq!(transport.opens().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn forbidden_mid_stream_resets_buffer() {
        let transport = ScriptedTransport::new(vec![
            Script::Hang(vec![chunk("stale idea"), Err(Error::permission("expired"))]),
            Script::Close(vec![chunk("fresh idea")]),
        ]);
        let stream = mount(&transport, SequenceTokens::new(vec![]));

        assert_eq!(stream.wait_settled().await, Outcome::Closed);
        assert_eq!(
            stream.current_view(),
            View::Content("fresh idea".to_string())
        );
        assert_eq!(transport.tokens(), vec!["token-1", "token-2"]);
        assert_eq!(transport.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_while_streaming_replaces_connection() {
        let transport = ScriptedTransport::new(vec![
            Script::Hang(vec![chunk("first")]),
            Script::Hang(vec![chunk("second")]),
        ]);
        let stream = mount(&transport, SequenceTokens::new(vec![]));

        settle_for(Duration::from_millis(10)).await;
        assert_eq!(stream.state(), ConnectionState::Streaming);
        assert_eq!(stream.current_view(), View::Content("first".to_string()));

        stream.connect();
        settle_for(Duration::from_millis(10)).await;
        assert_eq!(transport.opens().len(), 2);
        assert_eq!(stream.current_view(), View::Content("second".to_string()));
        assert_eq!(transport.active(), 1);
        assert_eq!(transport.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_while_connecting_is_a_no_op() {
        let transport = ScriptedTransport::new(vec![Script::Hang(vec![chunk("only")])]);
        let stream = mount(&transport, SequenceTokens::slow(Duration::from_millis(100)));

        settle_for(Duration::from_millis(10)).await;
        assert_eq!(stream.state(), ConnectionState::Connecting);
        stream.connect();
        stream.connect();

        settle_for(Duration::from_secs(5)).await;
        assert_eq!(transport.opens().len(), 1);
        assert_eq!(stream.state(), ConnectionState::Streaming);
        assert_eq!(stream.current_view(), View::Content("only".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn unmount_aborts_and_freezes_the_view() {
        let transport = ScriptedTransport::new(vec![Script::Hang(vec![chunk("partial")])]);
        let stream = mount(&transport, SequenceTokens::new(vec![]));

        settle_for(Duration::from_millis(10)).await;
        assert_eq!(transport.active(), 1);
        let views = stream.view();
        stream.unmount().await;

        assert_eq!(transport.active(), 0);
        assert_eq!(*views.borrow(), View::Content("partial".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn unmount_cancels_pending_reconnect() {
        let transport =
            ScriptedTransport::new(vec![Script::Reject(Error::permission("expired"))]);
        let stream = mount(&transport, SequenceTokens::new(vec![]));

        settle_for(Duration::from_millis(500)).await;
        let views = stream.view();
        stream.unmount().await;

        settle_for(Duration::from_secs(5)).await;
        assert_eq!(transport.opens().len(), 1);
        assert_eq!(*views.borrow(), View::Refreshing);
    }

    #[tokio::test(start_paused = true)]
    async fn unmount_while_connecting_attempts_nothing() {
        let transport = ScriptedTransport::new(vec![Script::Hang(vec![chunk("late")])]);
        let tokens = SequenceTokens::slow(Duration::from_millis(100));
        let stream = mount(&transport, tokens.clone());

        settle_for(Duration::from_millis(10)).await;
        assert_eq!(stream.state(), ConnectionState::Connecting);
        let views = stream.view();
        stream.unmount().await;

        settle_for(Duration::from_secs(5)).await;
        assert_eq!(tokens.calls.load(Ordering::SeqCst), 1);
        assert!(transport.opens().is_empty());
        assert_eq!(transport.active(), 0);
        assert_eq!(*views.borrow(), View::Loading);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_token_requires_authentication() {
        let transport = ScriptedTransport::new(vec![]);
        let stream = mount(&transport, Arc::new(StaticToken::signed_out()));

        assert_eq!(stream.wait_settled().await, Outcome::AuthenticationRequired);
        assert_eq!(stream.current_view(), View::AuthenticationRequired);
        assert!(transport.opens().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn network_failure_reconnects_after_long_delay() {
        let transport = ScriptedTransport::new(vec![
            Script::Reject(Error::connection("connection refused", None)),
            Script::Close(vec![chunk("back online")]),
        ]);
        let stream = mount(&transport, SequenceTokens::new(vec![]));

        settle_for(Duration::from_millis(1500)).await;
        assert_eq!(transport.opens().len(), 1);
        assert_eq!(stream.current_view(), View::Loading);

        assert_eq!(stream.wait_settled().await, Outcome::Closed);
        let opens = transport.opens();
        assert!(opens[1].0 - opens[0].0 >= Duration::from_secs(2));
        assert_eq!(transport.tokens(), vec!["token-1", "token-2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn other_status_at_open_is_fatal() {
        let transport = ScriptedTransport::new(vec![Script::Reject(Error::api(500, "boom"))]);
        let stream = mount(&transport, SequenceTokens::new(vec![]));

        assert_eq!(stream.wait_settled().await, Outcome::ConnectionFailed);
        assert_eq!(stream.current_view(), View::ConnectionFailed);
        settle_for(Duration::from_secs(10)).await;
        assert_eq!(transport.opens().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn token_fetch_failure_is_fatal() {
        let transport = ScriptedTransport::new(vec![]);
        let tokens = SequenceTokens::new(vec![Err(Error::unknown("identity provider down"))]);
        let stream = mount(&transport, tokens);

        assert_eq!(stream.wait_settled().await, Outcome::ConnectionFailed);
        assert!(transport.opens().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn max_retries_bounds_reconnects() {
        let transport = ScriptedTransport::new(
            (0..10)
                .map(|_| Script::Reject(Error::permission("expired")))
                .collect(),
        );
        let policy = ReconnectPolicy {
            max_retries: Some(2),
            ..ReconnectPolicy::default()
        };
        let stream = IdeaStream::mount(transport.clone(), SequenceTokens::new(vec![]), policy);

        assert_eq!(stream.wait_settled().await, Outcome::ConnectionFailed);
        assert_eq!(transport.opens().len(), 3);
        assert_eq!(stream.current_view(), View::ConnectionFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn broken_stream_retries_with_same_token_and_keeps_buffer() {
        let transport = ScriptedTransport::new(vec![
            Script::Hang(vec![
                Ok(Frame::Event(StreamEvent {
                    id: Some("1".to_string()),
                    ..StreamEvent::message("Sell ")
                })),
                Ok(Frame::Retry(Duration::from_millis(300))),
                Err(Error::streaming("connection reset", None)),
            ]),
            Script::Close(vec![chunk("socks.")]),
        ]);
        let stream = mount(&transport, SequenceTokens::new(vec![]));

        assert_eq!(stream.wait_settled().await, Outcome::Closed);
        assert_eq!(stream.current_view(), View::Content("Sell socks.".to_string()));
        let opens = transport.opens();
        assert_eq!(opens.len(), 2);
        assert_eq!(opens[1].1.token, "token-1");
        assert_eq!(opens[1].1.last_event_id.as_deref(), Some("1"));
        let gap = opens[1].0 - opens[0].0;
        assert!(gap >= Duration::from_millis(300) && gap < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_after_close_starts_a_fresh_buffer() {
        let transport = ScriptedTransport::new(vec![
            Script::Close(vec![chunk("first idea")]),
            Script::Close(vec![chunk("second idea")]),
        ]);
        let stream = mount(&transport, SequenceTokens::new(vec![]));
        assert_eq!(stream.wait_settled().await, Outcome::Closed);

        stream.connect();
        settle_for(Duration::from_millis(10)).await;
        assert_eq!(stream.wait_settled().await, Outcome::Closed);
        assert_eq!(
            stream.current_view(),
            View::Content("second idea".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn named_events_do_not_touch_the_buffer() {
        let transport = ScriptedTransport::new(vec![Script::Close(vec![
            chunk("idea"),
            Ok(Frame::Event(StreamEvent {
                event: "usage".to_string(),
                data: "{\"tokens\": 12}".to_string(),
                id: None,
            })),
        ])]);
        let stream = mount(&transport, SequenceTokens::new(vec![]));

        assert_eq!(stream.wait_settled().await, Outcome::Closed);
        assert_eq!(stream.current_view(), View::Content("idea".to_string()));
    }

    #[test]
    fn placeholders() {
        assert_eq!(View::Loading.placeholder(), Some(LOADING_TEXT));
        assert_eq!(View::Refreshing.placeholder(), Some("Refreshing connection..."));
        assert_eq!(View::Content("x".to_string()).placeholder(), None);
        assert!(View::ConnectionFailed.is_terminal());
        assert!(!View::Refreshing.is_terminal());
    }
}
