use hyper::body::Bytes;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::client::{HttpTransport, ResponseBody, Transport};
use super::rate_limit::{AdmissionClock, RateLimitPolicy};
use super::request::{ImageAttachment, build_chat_headers, build_payload, format_content};
use super::sse::StreamDecoder;
use super::token::{TOKEN_HEADER, TokenProvider};
use crate::config::{ClientProfile, Config, ToolCapabilities};
use crate::error::{ApiError, AuthError, Error, Result};
use crate::format::Message;
use crate::models::{resolve_model_alias, supports_advanced_tools, supports_images, supports_web_search};

/// Status endpoint for token probes and chat endpoint for exchanges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub status_url: String,
    pub chat_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        let client = crate::config::ClientConfig::default();
        Self {
            status_url: client.status_url,
            chat_url: client.chat_url,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Time allowed until response headers arrive
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub rate_limit: RateLimitPolicy,
    pub tools: ToolCapabilities,
    pub logging_enabled: bool,
    pub profile: ClientProfile,
    pub endpoints: Endpoints,
}

impl From<&Config> for SessionConfig {
    fn from(config: &Config) -> Self {
        Self {
            timeout: Duration::from_secs(config.client.timeout_secs),
            max_retries: config.client.max_retries,
            retry_delay: Duration::from_millis(config.client.retry_delay_ms),
            rate_limit: RateLimitPolicy::from(&config.rate_limit),
            tools: config.tools,
            logging_enabled: config.logging.enabled,
            profile: config.profile.clone(),
            endpoints: Endpoints {
                status_url: config.client.status_url.clone(),
                chat_url: config.client.chat_url.clone(),
            },
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl SessionConfig {
    pub fn web_search_mode() -> Self {
        let mut config = Self::default();
        config.tools.web_search = true;
        config
    }

    pub fn news_mode() -> Self {
        let mut config = Self::default();
        config.tools.news_search = true;
        config
    }

    pub fn local_mode() -> Self {
        let mut config = Self::default();
        config.tools.local_search = true;
        config.tools.weather_forecast = true;
        config
    }

    /// Looser limits for batch use: 20/min, 500/h, 5 retries 1s apart.
    pub fn high_volume_mode() -> Self {
        Self {
            max_retries: 5,
            retry_delay: Duration::from_millis(1000),
            rate_limit: RateLimitPolicy::new(true, 20, 500),
            ..Self::default()
        }
    }

    pub fn set_all_tools(&mut self, enabled: bool) {
        self.tools = ToolCapabilities::all(enabled);
    }
}

/// Per-flag tool changes; `None` leaves the current setting alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolOverrides {
    pub web_search: Option<bool>,
    pub news_search: Option<bool>,
    pub videos_search: Option<bool>,
    pub local_search: Option<bool>,
    pub weather_forecast: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Ready,
    Sending,
    Cleared,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Incremental text, in arrival order
    Fragment(String),
    /// Full assistant reply; always the last event
    Completed(String),
}

fn is_retryable(status: u16) -> bool {
    matches!(status, 418 | 429)
}

fn preview(text: &str) -> String {
    text.chars().take(50).collect()
}

/// A conversation with the chat service.
///
/// Calls on one session must not overlap; every send borrows the session
/// mutably until its reply is complete or the stream is dropped.
pub struct ChatSession<T: Transport = HttpTransport> {
    transport: T,
    tokens: TokenProvider,
    model: String,
    history: Vec<Message>,
    token: Option<String>,
    retry_count: u32,
    state: SessionState,
    config: SessionConfig,
    clock: AdmissionClock,
}

impl ChatSession<HttpTransport> {
    pub fn new(model: &str, config: SessionConfig) -> Self {
        Self::with_transport(HttpTransport::new(), model, config)
    }
}

impl<T: Transport> ChatSession<T> {
    pub fn with_transport(transport: T, model: &str, config: SessionConfig) -> Self {
        let tokens = TokenProvider::new(config.endpoints.status_url.clone(), config.profile.clone());
        Self {
            transport,
            tokens,
            model: resolve_model_alias(model).to_string(),
            history: Vec::new(),
            token: None,
            retry_count: 0,
            state: SessionState::Uninitialized,
            config,
            clock: AdmissionClock::new(),
        }
    }

    /// Restore a previously saved conversation.
    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    /// Acquire a fresh session token.
    pub async fn initialize(&mut self) -> Result<()> {
        let token = self.acquire_token().await?;
        self.token = Some(token);
        self.state = SessionState::Ready;
        if self.config.logging_enabled {
            info!(model = %self.model, "Chat session initialized");
        }
        Ok(())
    }

    async fn acquire_token(&self) -> Result<String> {
        let timeout = self.config.timeout;
        tokio::time::timeout(timeout, self.tokens.acquire(&self.transport))
            .await
            .map_err(|_| AuthError::ProbeFailed(format!("timed out after {:?}", timeout)))?
    }

    /// Send a message and wait for the full reply.
    pub async fn send_message(&mut self, text: &str, images: &[ImageAttachment]) -> Result<String> {
        self.send_message_stream(text, images, |_| {}).await
    }

    /// Send a message, handing each text fragment to `on_chunk` as it arrives.
    pub async fn send_message_stream<F>(
        &mut self,
        text: &str,
        images: &[ImageAttachment],
        mut on_chunk: F,
    ) -> Result<String>
    where
        F: FnMut(&str),
    {
        let mut stream = self.stream_message(text, images).await?;
        while let Some(event) = stream.next().await? {
            match event {
                StreamEvent::Fragment(fragment) => on_chunk(&fragment),
                StreamEvent::Completed(full) => return Ok(full),
            }
        }
        Err(Error::Stream("stream ended without completion".to_string()))
    }

    /// Send a message and return its reply as a pull-based stream.
    ///
    /// Dropping the stream before [`StreamEvent::Completed`] cancels the
    /// exchange: partial text is discarded and history keeps only the user turn.
    pub async fn stream_message(
        &mut self,
        text: &str,
        images: &[ImageAttachment],
    ) -> Result<MessageStream<'_, T>> {
        let body = self.begin_exchange(text, images).await?;
        Ok(MessageStream {
            session: self,
            body,
            decoder: StreamDecoder::new(),
            pending: VecDeque::new(),
            finished: false,
        })
    }

    async fn begin_exchange(&mut self, text: &str, images: &[ImageAttachment]) -> Result<T::Body> {
        // A session left in Sending had its previous exchange abandoned before
        // the reply arrived; its token is still good.
        if self.token.is_none()
            || matches!(self.state, SessionState::Uninitialized | SessionState::Cleared)
        {
            self.initialize().await?;
        }

        // Nothing is recorded until the request is admitted, so a caller that
        // gives up during the wait leaves the session untouched.
        self.admit().await;

        let content = format_content(text, images, &self.model);
        if self.config.logging_enabled {
            info!(
                model = %self.model,
                images = content.image_count(),
                "Sending message: {}...",
                preview(text)
            );
        }

        // The user turn is recorded before the call and kept even if it fails
        self.history.push(Message::user(content));
        self.state = SessionState::Sending;

        let result = self.post_with_retries().await;
        if result.is_err() {
            self.retry_count = 0;
            self.state = SessionState::Ready;
        }
        result
    }

    async fn admit(&mut self) {
        let logging = self.config.logging_enabled;
        let clock = self.clock;
        let policy = &mut self.config.rate_limit;
        loop {
            let now = clock.now_ms();
            if policy.can_admit(now) {
                break;
            }
            let wait_ms = policy.wait_ms(now);
            if wait_ms == 0 {
                // Only the hourly window is full; it has no wait to offer
                if logging {
                    warn!(hour_count = policy.hour_count(), "Hourly request limit reached, sending anyway");
                }
                break;
            }
            if logging {
                info!(wait_ms = wait_ms, "Rate limit reached, waiting");
            }
            tokio::time::sleep(Duration::from_millis(wait_ms)).await;
        }
        policy.record(clock.now_ms());
    }

    async fn post_with_retries(&mut self) -> Result<T::Body> {
        loop {
            let token = match self.token.clone() {
                Some(token) => token,
                None => {
                    let token = self.acquire_token().await?;
                    self.token = Some(token.clone());
                    token
                }
            };

            let payload = build_payload(&self.model, &self.config.tools, &self.history);
            let body = Bytes::from(serde_json::to_vec(&payload)?);
            let headers = build_chat_headers(&self.config.profile, &token);

            let timeout = self.config.timeout;
            let response = tokio::time::timeout(
                timeout,
                self.transport
                    .post(&self.config.endpoints.chat_url, &headers, body),
            )
            .await
            .map_err(|_| Error::Timeout(timeout))??;

            let status = response.status;
            if is_retryable(status) {
                if self.retry_count < self.config.max_retries {
                    self.retry_count += 1;
                    if self.config.logging_enabled {
                        info!(
                            status = status,
                            retry = self.retry_count,
                            max_retries = self.config.max_retries,
                            wait_ms = self.config.retry_delay.as_millis() as u64,
                            "Request rejected, refreshing token and retrying"
                        );
                    }
                    tokio::time::sleep(self.config.retry_delay).await;
                    self.token = Some(self.acquire_token().await?);
                    self.admit().await;
                    continue;
                }

                if self.config.logging_enabled {
                    warn!(status = status, retries = self.retry_count, "Retries exhausted");
                }
                return Err(ApiError::TransientService {
                    status,
                    retries: self.retry_count,
                }
                .into());
            }

            if !response.is_success() {
                let message = tokio::time::timeout(timeout, response.text_preview(500))
                    .await
                    .unwrap_or_default();
                if self.config.logging_enabled {
                    warn!(status = status, "Chat request failed");
                }
                return Err(ApiError::Status { status, message }.into());
            }

            if let Some(next) = response.header(TOKEN_HEADER)
                && !next.is_empty()
            {
                if self.token.as_deref() != Some(next) {
                    debug!("Session token rotated");
                }
                self.token = Some(next.to_string());
            }
            self.retry_count = 0;

            return Ok(response.body);
        }
    }

    /// Drop the conversation and force a new token on the next send.
    /// Rate-limit windows are kept.
    pub fn clear(&mut self) {
        self.history.clear();
        self.token = None;
        self.retry_count = 0;
        self.state = SessionState::Cleared;
        if self.config.logging_enabled {
            info!("Conversation cleared");
        }
    }

    /// Switch models. Capabilities are recomputed on each send.
    pub fn set_model(&mut self, model: &str) {
        self.model = resolve_model_alias(model).to_string();
        if self.config.logging_enabled {
            info!(model = %self.model, "Model changed");
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn supports_images(&self) -> bool {
        supports_images(&self.model)
    }

    pub fn supports_advanced_tools(&self) -> bool {
        supports_advanced_tools(&self.model)
    }

    pub fn tools(&self) -> ToolCapabilities {
        self.config.tools
    }

    pub fn configure_tools(&mut self, overrides: ToolOverrides) {
        let tools = &mut self.config.tools;
        if let Some(v) = overrides.web_search {
            tools.web_search = v;
        }
        if let Some(v) = overrides.news_search {
            tools.news_search = v;
        }
        if let Some(v) = overrides.videos_search {
            tools.videos_search = v;
        }
        if let Some(v) = overrides.local_search {
            tools.local_search = v;
        }
        if let Some(v) = overrides.weather_forecast {
            tools.weather_forecast = v;
        }
    }

    /// Returns false, leaving tools untouched, when the current model cannot search the web.
    pub fn enable_web_search(&mut self) -> bool {
        if !supports_web_search(&self.model) {
            if self.config.logging_enabled {
                warn!(model = %self.model, "Web search is not available for this model");
            }
            return false;
        }
        self.config.tools.web_search = true;
        true
    }

    pub fn enable_news_search(&mut self) {
        self.config.tools.news_search = true;
    }

    pub fn enable_local_features(&mut self) {
        self.config.tools.local_search = true;
        self.config.tools.weather_forecast = true;
    }
}

/// Reply to one message, read lazily from the response body.
///
/// Yields zero or more [`StreamEvent::Fragment`]s followed by exactly one
/// [`StreamEvent::Completed`], after which it returns `None`.
pub struct MessageStream<'a, T: Transport> {
    session: &'a mut ChatSession<T>,
    body: T::Body,
    decoder: StreamDecoder,
    pending: VecDeque<String>,
    finished: bool,
}

impl<T: Transport> MessageStream<'_, T> {
    pub async fn next(&mut self) -> Result<Option<StreamEvent>> {
        loop {
            if let Some(fragment) = self.pending.pop_front() {
                return Ok(Some(StreamEvent::Fragment(fragment)));
            }
            if self.finished {
                return Ok(None);
            }
            if self.decoder.is_done() {
                return Ok(Some(self.complete()));
            }

            match self.body.next_chunk().await {
                Ok(Some(chunk)) => {
                    let deltas = self
                        .decoder
                        .feed(&chunk)
                        .into_iter()
                        .filter_map(|frame| frame.text_delta);
                    self.pending.extend(deltas);
                }
                Ok(None) => {
                    if let Some(delta) = self.decoder.finish().and_then(|frame| frame.text_delta) {
                        self.pending.push_back(delta);
                    }
                }
                Err(e) => {
                    self.finished = true;
                    self.session.state = SessionState::Ready;
                    if self.session.config.logging_enabled {
                        warn!(error = %e, "Response stream failed");
                    }
                    return Err(e);
                }
            }
        }
    }

    fn complete(&mut self) -> StreamEvent {
        self.finished = true;
        let text = self.decoder.text().to_string();
        self.session.history.push(Message::assistant(text.clone()));
        self.session.state = SessionState::Ready;
        if self.session.config.logging_enabled {
            info!(chars = text.chars().count(), "Response received");
        }
        StreamEvent::Completed(text)
    }

    /// Text received so far.
    pub fn text(&self) -> &str {
        self.decoder.text()
    }
}

impl<T: Transport> Drop for MessageStream<'_, T> {
    fn drop(&mut self) {
        if !self.finished {
            debug!(
                discarded_chars = self.decoder.text().len(),
                "Stream dropped before completion"
            );
            self.session.state = SessionState::Ready;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duckchat::client::mock::{ChatReply, Chunk, MockTransport, ProbeReply};
    use crate::format::{MessageContent, Role};
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing::{Event, Subscriber};
    use tracing_subscriber::Layer;
    use tracing_subscriber::layer::{Context, SubscriberExt};

    fn test_config() -> SessionConfig {
        SessionConfig {
            retry_delay: Duration::ZERO,
            rate_limit: RateLimitPolicy::disabled(),
            endpoints: Endpoints {
                status_url: "http://test/status".to_string(),
                chat_url: "http://test/chat".to_string(),
            },
            ..SessionConfig::default()
        }
    }

    fn session(transport: MockTransport, model: &str) -> ChatSession<MockTransport> {
        ChatSession::with_transport(transport, model, test_config())
    }

    fn frame(text: &str) -> String {
        format!("data: {{\"message\":\"{text}\"}}\n\n")
    }

    fn reply(text: &str) -> ChatReply {
        ChatReply::stream(None, &[&frame(text), "data: [DONE]\n"])
    }

    fn texts(history: &[Message]) -> Vec<(Role, String)> {
        history.iter().map(|m| (m.role, m.content.text())).collect()
    }

    #[tokio::test]
    async fn test_initialize_acquires_token() {
        let mut chat = session(MockTransport::new(), "gpt-4o-mini");
        assert_eq!(chat.state(), SessionState::Uninitialized);

        chat.initialize().await.unwrap();
        assert_eq!(chat.state(), SessionState::Ready);
        assert_eq!(chat.token.as_deref(), Some("probe-1"));
    }

    #[tokio::test]
    async fn test_initialize_failure_stays_uninitialized() {
        let transport = MockTransport::new().with_probe(ProbeReply::NoToken);
        let mut chat = session(transport, "gpt-4o-mini");

        let err = chat.send_message("hi", &[]).await.unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::MissingToken)));
        assert_eq!(chat.state(), SessionState::Uninitialized);
        assert!(chat.history().is_empty());
        assert_eq!(chat.transport().post_count(), 0);
    }

    #[tokio::test]
    async fn test_send_message_appends_both_turns() {
        let transport = MockTransport::new().with_chat(reply("hello"));
        let mut chat = session(transport, "gpt-4o-mini");

        let text = chat.send_message("hi", &[]).await.unwrap();
        assert_eq!(text, "hello");
        assert_eq!(chat.state(), SessionState::Ready);
        assert_eq!(
            texts(chat.history()),
            vec![(Role::User, "hi".to_string()), (Role::Assistant, "hello".to_string())]
        );

        chat.transport().with_post(0, |post| {
            assert_eq!(post.url, "http://test/chat");
            assert_eq!(post.header("x-vqd-4"), Some("probe-1"));
            assert_eq!(post.body["model"], json!("gpt-4o-mini"));
            assert_eq!(post.body["messages"], json!([{"role": "user", "content": "hi"}]));
        });
    }

    #[tokio::test]
    async fn test_retry_below_limit_succeeds() {
        let transport = MockTransport::new()
            .with_chat(ChatReply::status(429))
            .with_chat(ChatReply::status(418))
            .with_chat(reply("ok"));
        let mut chat = session(transport, "gpt-4o-mini");

        let text = chat.send_message("hi", &[]).await.unwrap();
        assert_eq!(text, "ok");
        assert_eq!(chat.retry_count(), 0);

        let transport = chat.transport();
        assert_eq!(transport.post_count(), 3);
        // One initial probe plus a fresh token before each retry
        assert_eq!(transport.probe_count(), 3);
        transport.with_post(2, |post| assert_eq!(post.header("x-vqd-4"), Some("probe-3")));

        // The user turn is sent once per attempt, never duplicated
        for i in 0..3 {
            transport.with_post(i, |post| {
                assert_eq!(post.body["messages"].as_array().unwrap().len(), 1);
            });
        }
        assert_eq!(chat.history().len(), 2);
    }

    #[tokio::test]
    async fn test_retry_exhausted_surfaces_transient_error() {
        let mut transport = MockTransport::new();
        for _ in 0..4 {
            transport = transport.with_chat(ChatReply::status(429));
        }
        let mut chat = session(transport, "gpt-4o-mini");

        let err = chat.send_message("hi", &[]).await.unwrap_err();
        match err {
            Error::Api(ApiError::TransientService { status, retries }) => {
                assert_eq!(status, 429);
                assert_eq!(retries, 3);
            }
            other => panic!("Expected TransientService, got {other:?}"),
        }

        assert_eq!(chat.transport().post_count(), 4);
        assert_eq!(texts(chat.history()), vec![(Role::User, "hi".to_string())]);
        assert_eq!(chat.retry_count(), 0);
        assert_eq!(chat.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_other_status_fails_without_retry() {
        let transport = MockTransport::new().with_chat(ChatReply::status(500));
        let mut chat = session(transport, "gpt-4o-mini");

        let err = chat.send_message("hi", &[]).await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        match err {
            Error::Api(ApiError::Status { message, .. }) => assert_eq!(message, "rejected"),
            other => panic!("Expected Status, got {other:?}"),
        }
        assert_eq!(chat.transport().post_count(), 1);
        assert_eq!(chat.history().len(), 1);
    }

    #[tokio::test]
    async fn test_token_rotation() {
        let transport = MockTransport::new()
            .with_chat(ChatReply::stream(Some("rotated-1"), &[&frame("a"), "data: [DONE]\n"]))
            .with_chat(reply("b"));
        let mut chat = session(transport, "gpt-4o-mini");

        chat.send_message("one", &[]).await.unwrap();
        chat.send_message("two", &[]).await.unwrap();

        let transport = chat.transport();
        assert_eq!(transport.probe_count(), 1);
        transport.with_post(1, |post| assert_eq!(post.header("x-vqd-4"), Some("rotated-1")));
        // No new token on the second reply: the rotated one is kept
        assert_eq!(chat.token.as_deref(), Some("rotated-1"));
    }

    #[tokio::test]
    async fn test_clear_forces_new_token() {
        let transport = MockTransport::new().with_chat(reply("a")).with_chat(reply("b"));
        let mut chat = session(transport, "gpt-4o-mini");

        chat.send_message("one", &[]).await.unwrap();
        chat.clear();
        assert!(chat.history().is_empty());
        assert_eq!(chat.state(), SessionState::Cleared);

        chat.send_message("two", &[]).await.unwrap();
        let transport = chat.transport();
        assert_eq!(transport.probe_count(), 2);
        transport.with_post(1, |post| {
            assert_eq!(post.header("x-vqd-4"), Some("probe-2"));
            assert_eq!(post.body["messages"].as_array().unwrap().len(), 1);
        });
    }

    #[tokio::test]
    async fn test_history_keeps_call_order() {
        let transport = MockTransport::new()
            .with_chat(reply("r1"))
            .with_chat(reply("r2"))
            .with_chat(reply("r3"));
        let mut chat = session(transport, "gpt-4o-mini");

        for prompt in ["q1", "q2", "q3"] {
            chat.send_message(prompt, &[]).await.unwrap();
        }

        assert_eq!(
            texts(chat.history()),
            vec![
                (Role::User, "q1".to_string()),
                (Role::Assistant, "r1".to_string()),
                (Role::User, "q2".to_string()),
                (Role::Assistant, "r2".to_string()),
                (Role::User, "q3".to_string()),
                (Role::Assistant, "r3".to_string()),
            ]
        );
        chat.transport()
            .with_post(2, |post| assert_eq!(post.body["messages"].as_array().unwrap().len(), 5));
    }

    #[tokio::test]
    async fn test_stream_error_keeps_user_turn_only() {
        let transport = MockTransport::new().with_chat(ChatReply {
            status: 200,
            token: None,
            chunks: vec![
                Chunk::Data(Bytes::from(frame("partial"))),
                Chunk::Fail("connection reset".to_string()),
            ],
        });
        let mut chat = session(transport, "gpt-4o-mini");

        let err = chat.send_message("hi", &[]).await.unwrap_err();
        assert!(matches!(err, Error::Stream(_)));
        assert_eq!(texts(chat.history()), vec![(Role::User, "hi".to_string())]);
        assert_eq!(chat.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_stream_events_then_single_completion() {
        let transport = MockTransport::new().with_chat(ChatReply::stream(
            None,
            &["data: {\"message\":\"ab\"}\n\nda", "ta: {\"message\":\"cd\"}\n\ndata: [DONE]\n"],
        ));
        let mut chat = session(transport, "gpt-4o-mini");

        let mut stream = chat.stream_message("hi", &[]).await.unwrap();
        let mut events = Vec::new();
        while let Some(event) = stream.next().await.unwrap() {
            events.push(event);
        }
        assert!(stream.next().await.unwrap().is_none());
        drop(stream);

        assert_eq!(
            events,
            vec![
                StreamEvent::Fragment("ab".into()),
                StreamEvent::Fragment("cd".into()),
                StreamEvent::Completed("abcd".into()),
            ]
        );
        assert_eq!(chat.history().len(), 2);
    }

    #[tokio::test]
    async fn test_stream_without_sentinel_completes() {
        let transport = MockTransport::new().with_chat(ChatReply::stream(None, &[&frame("cut short")]));
        let mut chat = session(transport, "gpt-4o-mini");

        let text = chat.send_message("hi", &[]).await.unwrap();
        assert_eq!(text, "cut short");
        assert_eq!(chat.history().len(), 2);
    }

    #[tokio::test]
    async fn test_dropping_stream_discards_partial_reply() {
        let transport = MockTransport::new()
            .with_chat(ChatReply::stream(None, &[&frame("par"), &frame("tial"), "data: [DONE]\n"]))
            .with_chat(reply("next"));
        let mut chat = session(transport, "gpt-4o-mini");

        {
            let mut stream = chat.stream_message("first", &[]).await.unwrap();
            let event = stream.next().await.unwrap();
            assert_eq!(event, Some(StreamEvent::Fragment("par".into())));
            assert_eq!(stream.text(), "par");
        }

        assert_eq!(chat.state(), SessionState::Ready);
        assert_eq!(texts(chat.history()), vec![(Role::User, "first".to_string())]);

        chat.send_message("second", &[]).await.unwrap();
        assert_eq!(chat.history().len(), 3);
    }

    #[tokio::test]
    async fn test_stream_sink_receives_fragments() {
        let transport = MockTransport::new().with_chat(ChatReply::stream(
            None,
            &[&frame("a"), &frame("b"), "data: [DONE]\n"],
        ));
        let mut chat = session(transport, "gpt-4o-mini");

        let mut seen = Vec::new();
        let full = chat
            .send_message_stream("hi", &[], |chunk| seen.push(chunk.to_string()))
            .await
            .unwrap();
        assert_eq!(full, "ab");
        assert_eq!(seen, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_images_dropped_for_text_model() {
        let transport = MockTransport::new().with_chat(reply("no eyes"));
        let mut chat = session(transport, "claude");
        assert_eq!(chat.model(), "claude-3-haiku-20240307");
        assert!(!chat.supports_images());

        let images = [ImageAttachment::new("image/png", "AAAA")];
        chat.send_message("look", &images).await.unwrap();

        chat.transport()
            .with_post(0, |post| assert_eq!(post.body["messages"][0]["content"], json!("look")));
        assert_eq!(chat.history()[0].content, MessageContent::Text("look".into()));
    }

    #[tokio::test]
    async fn test_images_sent_for_capable_model() {
        let transport = MockTransport::new().with_chat(reply("a cat"));
        let mut chat = session(transport, "gpt-4o-mini");

        let images = [ImageAttachment::new("image/png", "AAAA")];
        chat.send_message("look", &images).await.unwrap();

        chat.transport().with_post(0, |post| {
            let content = &post.body["messages"][0]["content"];
            assert_eq!(content[0], json!({"type": "text", "text": "look"}));
            assert_eq!(content[1]["image"], json!("data:image/png;base64,AAAA"));
        });
    }

    #[tokio::test]
    async fn test_web_search_follows_current_model() {
        let transport = MockTransport::new().with_chat(reply("a")).with_chat(reply("b"));
        let mut config = test_config();
        config.tools.web_search = true;
        let mut chat = ChatSession::with_transport(transport, "o4-mini", config);

        chat.send_message("one", &[]).await.unwrap();
        chat.set_model("gpt-4o-mini");
        chat.send_message("two", &[]).await.unwrap();

        let transport = chat.transport();
        transport.with_post(0, |post| {
            assert!(post.body["metadata"]["toolChoice"].get("WebSearch").is_none());
        });
        transport.with_post(1, |post| {
            assert_eq!(post.body["metadata"]["toolChoice"]["WebSearch"], json!(true));
        });
    }

    #[tokio::test]
    async fn test_send_records_rate_limit_attempt() {
        let transport = MockTransport::new().with_chat(reply("a"));
        let mut config = test_config();
        config.rate_limit = RateLimitPolicy::new(true, 10, 100);
        let mut chat = ChatSession::with_transport(transport, "gpt-4o-mini", config);

        chat.send_message("one", &[]).await.unwrap();
        assert_eq!(chat.config().rate_limit.minute_count(), 1);

        // Clearing does not reset the windows
        chat.clear();
        assert_eq!(chat.config().rate_limit.minute_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_admission_wait_leaves_history_untouched() {
        let transport = MockTransport::new().with_chat(reply("a")).with_chat(reply("b"));
        let mut config = test_config();
        config.rate_limit = RateLimitPolicy::new(true, 1, 100);
        let mut chat = ChatSession::with_transport(transport, "gpt-4o-mini", config);

        chat.send_message("one", &[]).await.unwrap();
        let waited =
            tokio::time::timeout(Duration::from_millis(100), chat.send_message("two", &[])).await;
        assert!(waited.is_err());

        assert_eq!(chat.transport().post_count(), 1);
        assert_eq!(chat.history().len(), 2);
        assert_eq!(chat.state(), SessionState::Ready);
        assert_eq!(chat.config().rate_limit.minute_count(), 1);

        // Giving up did not leave a dangling user turn behind
        let text = chat.send_message("two", &[]).await.unwrap();
        assert_eq!(text, "b");
        assert_eq!(
            texts(chat.history()),
            vec![
                (Role::User, "one".to_string()),
                (Role::Assistant, "a".to_string()),
                (Role::User, "two".to_string()),
                (Role::Assistant, "b".to_string()),
            ]
        );
        assert_eq!(chat.transport().probe_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_over_minute_cap_waits_for_window() {
        let transport = MockTransport::new()
            .with_chat(reply("a"))
            .with_chat(reply("b"))
            .with_chat(reply("c"));
        let mut config = test_config();
        config.rate_limit = RateLimitPolicy::new(true, 2, 100);
        let mut chat = ChatSession::with_transport(transport, "gpt-4o-mini", config);

        let start = tokio::time::Instant::now();
        chat.send_message("one", &[]).await.unwrap();
        chat.send_message("two", &[]).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);

        chat.send_message("three", &[]).await.unwrap();
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(60), "waited {waited:?}");
        assert!(waited < Duration::from_secs(61), "waited {waited:?}");

        assert_eq!(chat.transport().post_count(), 3);
        // The first two attempts have aged out of the minute window
        assert_eq!(chat.config().rate_limit.minute_count(), 1);
        assert_eq!(chat.config().rate_limit.hour_count(), 3);
    }

    #[tokio::test]
    async fn test_interrupted_send_reuses_token() {
        let transport = MockTransport::new().with_chat(reply("a"));
        let mut chat = session(transport, "gpt-4o-mini");
        chat.initialize().await.unwrap();
        chat.state = SessionState::Sending;

        chat.send_message("hi", &[]).await.unwrap();
        assert_eq!(chat.transport().probe_count(), 1);
        assert_eq!(chat.state(), SessionState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_error_body_is_time_bounded() {
        let transport = MockTransport::new().with_chat(ChatReply {
            status: 500,
            token: None,
            chunks: vec![Chunk::Data(Bytes::from_static(b"partial ")), Chunk::Stall],
        });
        let mut chat = session(transport, "gpt-4o-mini");

        let start = tokio::time::Instant::now();
        let err = chat.send_message("hi", &[]).await.unwrap_err();
        match err {
            Error::Api(ApiError::Status { status, message }) => {
                assert_eq!(status, 500);
                assert!(message.is_empty());
            }
            other => panic!("Expected Status, got {other:?}"),
        }
        assert_eq!(start.elapsed(), chat.config().timeout);
        assert_eq!(chat.state(), SessionState::Ready);
    }

    struct CountEvents(Arc<AtomicUsize>);

    impl<S: Subscriber> Layer<S> for CountEvents {
        fn on_event(&self, _event: &Event<'_>, _ctx: Context<'_, S>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn count_events(f: impl FnOnce()) -> usize {
        let count = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(CountEvents(count.clone()));
        tracing::subscriber::with_default(subscriber, f);
        count.load(Ordering::SeqCst)
    }

    #[test]
    fn test_web_search_warning_follows_logging_flag() {
        let mut quiet = session(MockTransport::new(), "o4-mini");
        quiet.config.logging_enabled = false;
        assert_eq!(count_events(|| assert!(!quiet.enable_web_search())), 0);

        let mut loud = session(MockTransport::new(), "o4-mini");
        loud.config.logging_enabled = true;
        assert_eq!(count_events(|| assert!(!loud.enable_web_search())), 1);
    }

    #[tokio::test]
    async fn test_with_history_is_sent() {
        let transport = MockTransport::new().with_chat(reply("c"));
        let history = vec![
            Message::user(MessageContent::Text("a".into())),
            Message::assistant("b"),
        ];
        let mut chat = session(transport, "gpt-4o-mini").with_history(history);

        chat.send_message("next", &[]).await.unwrap();
        chat.transport()
            .with_post(0, |post| assert_eq!(post.body["messages"].as_array().unwrap().len(), 3));
        assert_eq!(chat.history().len(), 4);
    }

    #[test]
    fn test_tool_helpers() {
        let mut chat = session(MockTransport::new(), "o4-mini");
        assert!(!chat.enable_web_search());
        assert!(!chat.tools().web_search);

        chat.enable_news_search();
        chat.enable_local_features();
        let tools = chat.tools();
        assert!(tools.news_search && tools.local_search && tools.weather_forecast);

        chat.configure_tools(ToolOverrides {
            news_search: Some(false),
            videos_search: Some(true),
            ..ToolOverrides::default()
        });
        let tools = chat.tools();
        assert!(!tools.news_search);
        assert!(tools.videos_search);
        assert!(tools.local_search);

        chat.set_model("gpt-4o-mini");
        assert!(chat.enable_web_search());
        assert!(chat.supports_advanced_tools());
    }

    #[test]
    fn test_config_presets() {
        let config = SessionConfig::high_volume_mode();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_delay, Duration::from_millis(1000));
        assert_eq!(config.rate_limit.max_per_minute, 20);
        assert_eq!(config.rate_limit.max_per_hour, 500);

        assert!(SessionConfig::web_search_mode().tools.web_search);
        assert!(SessionConfig::news_mode().tools.news_search);
        let local = SessionConfig::local_mode();
        assert!(local.tools.local_search && local.tools.weather_forecast);

        let mut config = SessionConfig::default();
        config.set_all_tools(true);
        assert_eq!(config.tools, ToolCapabilities::all(true));
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.endpoints, Endpoints::default());
    }
}
