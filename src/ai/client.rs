//! Chat completions client.
//!
//! Encapsulates all chat API interactions: blocking sends, streamed sends and
//! cancellation of in-flight streams.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, Response};
use serde_json::Value;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use super::sse::{FrameDecoder, MalformedFrame, ParseResult, extract_error_message};
use crate::core::config::{API_KEY_NAME, DEFAULT_API_BASE};
use crate::core::credentials::CredentialStore;
use crate::core::models::{
    ChatCompletion, ChatParameters, ChatRequest, Conversation, Message, PartialChatParameters,
    Role, StreamEvent,
};
use crate::errors::ChatError;

const CHAT_COMPLETIONS_PATH: &str = "chat/completions";

/// Identifies one streaming send.
pub type RequestId = Uuid;

/// Settings a [`ChatClient`] is built from.
#[derive(Debug, Clone, Default)]
pub struct ChatClientConfig {
    /// Defaults to the public OpenAI API.
    pub api_base: Option<Url>,
    pub params: PartialChatParameters,
    /// Prepended to conversations that do not already open with a system message.
    pub system_prompt: Option<String>,
    pub org_id: Option<String>,
    pub connect_timeout: Option<Duration>,
}

/// Cancellation handle for one streaming send.
#[derive(Debug, Clone)]
pub struct RequestHandle {
    id: RequestId,
    token: CancellationToken,
}

impl RequestHandle {
    #[must_use]
    pub const fn id(&self) -> RequestId {
        self.id
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// What happened during a streaming send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOutcome {
    pub request_id: RequestId,
    /// Number of `on_batch` calls made.
    pub batches: usize,
    /// Number of events delivered across all batches.
    pub events: usize,
    /// Lines that were skipped because they could not be decoded.
    pub malformed: Vec<MalformedFrame>,
    /// Whether the `[DONE]` sentinel was seen.
    pub saw_done: bool,
    /// Whether the send was stopped by a cancel.
    pub cancelled: bool,
}

impl StreamOutcome {
    fn new(request_id: RequestId) -> Self {
        Self {
            request_id,
            batches: 0,
            events: 0,
            malformed: Vec::new(),
            saw_done: false,
            cancelled: false,
        }
    }
}

/// Chat completions client, built once and reused for every send.
pub struct ChatClient {
    http: Client,
    api_url: Url,
    params: RwLock<ChatParameters>,
    system_prompt: Option<String>,
    org_id: Option<String>,
    store: Arc<dyn CredentialStore>,
    credential: Arc<OnceCell<Option<String>>>,
    in_flight: Mutex<HashMap<RequestId, CancellationToken>>,
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("api_url", &self.api_url.as_str())
            .field("params", &*self.params.read())
            .field("system_prompt", &self.system_prompt.is_some())
            .field("credential_loaded", &self.credential.initialized())
            .field("in_flight", &self.in_flight.lock().len())
            .finish_non_exhaustive()
    }
}

impl ChatClient {
    /// Builds the client and starts loading the credential in the background.
    ///
    /// Construction never waits for the credential. When called outside a
    /// Tokio runtime the credential is loaded by the first request instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client or endpoint URL cannot be built.
    pub fn new(config: ChatClientConfig, store: Arc<dyn CredentialStore>) -> Result<Self, ChatError> {
        let http = build_http_client(config.connect_timeout)?;
        let api_url = endpoint(&api_base(config.api_base)?, CHAT_COMPLETIONS_PATH)?;
        let credential = Arc::new(OnceCell::new());

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let cell = Arc::clone(&credential);
            let store = Arc::clone(&store);
            runtime.spawn(async move {
                cell.get_or_init(|| load_credential(store)).await;
            });
        }

        Ok(Self {
            http,
            api_url,
            params: RwLock::new(ChatParameters::prepare(config.params)),
            system_prompt: config.system_prompt.filter(|s| !s.trim().is_empty()),
            org_id: config.org_id,
            store,
            credential,
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    /// Snapshot of the parameters the next request will use.
    #[must_use]
    pub fn params(&self) -> ChatParameters {
        self.params.read().clone()
    }

    /// Switches the model for subsequent requests. Requests already sent keep
    /// the model they were sent with.
    pub fn set_model(&self, model: impl Into<String>) {
        let model = model.into();
        info!(model = %model, "Switching chat model");
        self.params.write().model = model;
    }

    /// Wraps a single user turn into a conversation.
    #[must_use]
    pub fn pack_string_message(&self, message: &str) -> Conversation {
        vec![Message::user(message)]
    }

    /// Sends a conversation and waits for the whole reply.
    ///
    /// # Errors
    ///
    /// - `ChatError::Api` when the response body carries an `error` object
    /// - `ChatError::Unauthorized` / `ChatError::AccessDenied` for 401 / 403 / 404
    /// - `ChatError::MissingCredential` when no key is stored
    /// - `ChatError::HttpError` / `ChatError::JsonError` for transport and body failures
    pub async fn send_messages(&self, conversation: &[Message]) -> Result<ChatCompletion, ChatError> {
        let params = self.params();
        let messages = self.with_system_prompt(conversation);

        info!(
            model = %params.model,
            messages = messages.len(),
            "Sending chat request"
        );

        let response = self.post(&messages, &params, false).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(error_from_response(response).await);
        }

        let text = response.text().await.map_err(|e| {
            ChatError::HttpError(format!("Failed to read chat response body: {e}"))
        })?;
        let body: Value = serde_json::from_str(&text).map_err(|e| {
            ChatError::JsonError(format!("chat response is not JSON (status {status}): {e}"))
        })?;

        if let Some(err) = body.get("error") {
            error!(status = %status, error = %err, "Chat API returned an error");
            return Err(api_error(err));
        }

        let completion: ChatCompletion = serde_json::from_value(body)?;
        debug!(id = ?completion.id, choices = completion.choices.len(), "Chat response received");
        Ok(completion)
    }

    /// Sends one user message and returns the reply text.
    ///
    /// # Errors
    ///
    /// Same as [`ChatClient::send_messages`], plus `ChatError::InvalidInput`
    /// for a blank message and `ChatError::Api` for a reply without choices.
    pub async fn send_message(&self, message: &str) -> Result<String, ChatError> {
        if message.trim().is_empty() {
            return Err(ChatError::InvalidInput("message is empty".to_string()));
        }

        let conversation = self.pack_string_message(message);
        let completion = self.send_messages(&conversation).await?;
        completion
            .content()
            .map(str::to_string)
            .ok_or_else(|| ChatError::Api {
                message: "response contained no choices".to_string(),
                kind: None,
            })
    }

    /// Creates a cancellable handle for a streaming send. The request counts
    /// as in flight only while [`ChatClient::send_messages_stream_with`] runs
    /// with it.
    #[must_use]
    pub fn new_request(&self) -> RequestHandle {
        RequestHandle {
            id: Uuid::new_v4(),
            token: CancellationToken::new(),
        }
    }

    /// Cancels one in-flight streaming request. Returns `false` if no request
    /// with that id is running.
    pub fn cancel(&self, id: RequestId) -> bool {
        match self.in_flight.lock().get(&id) {
            Some(token) => {
                info!(request_id = %id, "Cancelling streaming request");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels every in-flight streaming request. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let in_flight = self.in_flight.lock();
        for token in in_flight.values() {
            token.cancel();
        }
        if !in_flight.is_empty() {
            info!(count = in_flight.len(), "Cancelling all streaming requests");
        }
        in_flight.len()
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Streams a reply, calling `on_batch` once per body chunk with the events
    /// decoded from it.
    ///
    /// # Errors
    ///
    /// See [`ChatClient::send_messages_stream_with`].
    pub async fn send_messages_stream<F>(
        &self,
        conversation: &[Message],
        on_batch: F,
    ) -> Result<StreamOutcome, ChatError>
    where
        F: FnMut(&[StreamEvent]),
    {
        let handle = self.new_request();
        self.send_messages_stream_with(&handle, conversation, on_batch)
            .await
    }

    /// Streams a reply under a handle obtained from [`ChatClient::new_request`],
    /// so the caller can cancel it while it runs.
    ///
    /// A cancelled stream is not an error: it returns `Ok` with
    /// `cancelled == true`, and `on_batch` is not called again.
    ///
    /// # Errors
    ///
    /// - `ChatError::Unauthorized` / `ChatError::AccessDenied` for 401 / 403 / 404
    /// - `ChatError::Api` for other error statuses with an `error` body, or an
    ///   error frame inside the stream
    /// - `ChatError::HttpError` for transport failures
    pub async fn send_messages_stream_with<F>(
        &self,
        handle: &RequestHandle,
        conversation: &[Message],
        on_batch: F,
    ) -> Result<StreamOutcome, ChatError>
    where
        F: FnMut(&[StreamEvent]),
    {
        let _registration = InFlight::register(&self.in_flight, handle);
        let params = self.params();
        let messages = self.with_system_prompt(conversation);

        info!(
            request_id = %handle.id,
            model = %params.model,
            messages = messages.len(),
            "Sending streaming chat request"
        );

        let response = tokio::select! {
            biased;
            () = handle.token.cancelled() => {
                info!(request_id = %handle.id, "Streaming request cancelled before response");
                let mut outcome = StreamOutcome::new(handle.id);
                outcome.cancelled = true;
                return Ok(outcome);
            }
            response = self.post(&messages, &params, true) => response?,
        };

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let outcome =
            decode_stream(response.bytes_stream(), &handle.token, handle.id, on_batch).await?;
        info!(
            request_id = %handle.id,
            batches = outcome.batches,
            events = outcome.events,
            malformed = outcome.malformed.len(),
            cancelled = outcome.cancelled,
            "Streaming chat request finished"
        );
        Ok(outcome)
    }

    fn with_system_prompt<'c>(&self, conversation: &'c [Message]) -> Cow<'c, [Message]> {
        match &self.system_prompt {
            Some(prompt)
                if conversation
                    .first()
                    .is_none_or(|m| m.role != Role::System) =>
            {
                let mut messages = Vec::with_capacity(conversation.len() + 1);
                messages.push(Message::system(prompt.clone()));
                messages.extend_from_slice(conversation);
                Cow::Owned(messages)
            }
            _ => Cow::Borrowed(conversation),
        }
    }

    async fn token(&self) -> Result<String, ChatError> {
        self.credential
            .get_or_init(|| load_credential(Arc::clone(&self.store)))
            .await
            .clone()
            .ok_or_else(|| ChatError::MissingCredential(API_KEY_NAME.to_string()))
    }

    async fn post(
        &self,
        messages: &[Message],
        params: &ChatParameters,
        stream: bool,
    ) -> Result<Response, ChatError> {
        let token = self.token().await?;
        let headers = request_headers(&token, self.org_id.as_deref(), stream)?;
        let body = ChatRequest {
            messages,
            stream: stream.then_some(true),
            params,
        };

        #[cfg(feature = "debug-logs")]
        debug!(body = %serde_json::to_string(&body).unwrap_or_default(), "Chat request body");

        self.http
            .post(self.api_url.clone())
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::HttpError(format!("Chat API request failed: {e}")))
    }
}

/// Drives the decode loop over a response body.
///
/// `on_batch` is called exactly once per chunk read, with the events decoded
/// from that chunk in order (possibly none). Malformed lines are skipped and
/// reported in the outcome. Once `token` is cancelled no further chunk is read
/// and `on_batch` is not called again.
///
/// # Errors
///
/// Returns an error on a transport failure or an error frame. Invalid UTF-8
/// is replaced, not fatal.
pub async fn decode_stream<S, E, F>(
    byte_stream: S,
    token: &CancellationToken,
    request_id: RequestId,
    mut on_batch: F,
) -> Result<StreamOutcome, ChatError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
    F: FnMut(&[StreamEvent]),
{
    let mut byte_stream = std::pin::pin!(byte_stream);
    let mut decoder = FrameDecoder::new();
    let mut outcome = StreamOutcome::new(request_id);

    loop {
        let next = tokio::select! {
            biased;
            () = token.cancelled() => {
                info!(request_id = %request_id, "Streaming request cancelled");
                outcome.cancelled = true;
                return Ok(outcome);
            }
            next = byte_stream.next() => next,
        };

        match next {
            Some(Ok(bytes)) => {
                let results = decoder.feed_bytes(&bytes);
                let batch = absorb(results, &mut outcome)?;
                outcome.batches += 1;
                outcome.events += batch.len();
                on_batch(&batch);
            }
            Some(Err(e)) => {
                return Err(ChatError::HttpError(format!(
                    "Error reading streaming response: {e}"
                )));
            }
            None => break,
        }
    }

    let batch = absorb(decoder.finish(), &mut outcome)?;
    if !batch.is_empty() {
        outcome.batches += 1;
        outcome.events += batch.len();
        on_batch(&batch);
    }

    if !outcome.saw_done {
        debug!(request_id = %request_id, "Stream ended without [DONE]");
    }
    Ok(outcome)
}

/// Sorts decoded lines into the batch for the caller and the outcome record.
fn absorb(results: Vec<ParseResult>, outcome: &mut StreamOutcome) -> Result<Vec<StreamEvent>, ChatError> {
    let mut batch = Vec::with_capacity(results.len());
    for result in results {
        match result {
            ParseResult::Event(event) => batch.push(event),
            ParseResult::Done => outcome.saw_done = true,
            ParseResult::Malformed(frame) => {
                warn!(
                    request_id = %outcome.request_id,
                    line = %frame.line,
                    reason = %frame.reason,
                    "Skipping malformed stream frame"
                );
                outcome.malformed.push(frame);
            }
            ParseResult::ApiError { message, kind } => {
                error!(request_id = %outcome.request_id, error = %message, "Chat API reported an error mid-stream");
                return Err(ChatError::Api { message, kind });
            }
        }
    }
    Ok(batch)
}

/// Removes a request from the in-flight registry when its send finishes.
struct InFlight<'a> {
    registry: &'a Mutex<HashMap<RequestId, CancellationToken>>,
    id: RequestId,
}

impl<'a> InFlight<'a> {
    fn register(
        registry: &'a Mutex<HashMap<RequestId, CancellationToken>>,
        handle: &RequestHandle,
    ) -> Self {
        registry.lock().insert(handle.id, handle.token.clone());
        Self {
            registry,
            id: handle.id,
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.id);
    }
}

async fn load_credential(store: Arc<dyn CredentialStore>) -> Option<String> {
    match store.get(API_KEY_NAME).await {
        Ok(token) => {
            debug!("{API_KEY_NAME} token loaded");
            Some(token)
        }
        Err(e) => {
            error!(error = %e, "{API_KEY_NAME} token not found; store one with `llmium set-key`");
            None
        }
    }
}

pub(crate) fn build_http_client(connect_timeout: Option<Duration>) -> Result<Client, ChatError> {
    let mut builder = Client::builder();
    if let Some(timeout) = connect_timeout {
        builder = builder.connect_timeout(timeout);
    }
    builder
        .build()
        .map_err(|e| ChatError::HttpError(format!("Failed to build HTTP client: {e}")))
}

pub(crate) fn api_base(configured: Option<Url>) -> Result<Url, ChatError> {
    match configured {
        Some(url) => Ok(url),
        None => Url::parse(DEFAULT_API_BASE)
            .map_err(|e| ChatError::ConfigError(format!("default API base: {e}"))),
    }
}

/// Joins `path` onto `base`, keeping every segment of `base`.
pub(crate) fn endpoint(base: &Url, path: &str) -> Result<Url, ChatError> {
    let joined = format!("{}/{}", base.as_str().trim_end_matches('/'), path);
    Url::parse(&joined).map_err(|e| ChatError::ConfigError(format!("invalid endpoint {joined}: {e}")))
}

pub(crate) fn request_headers(
    token: &str,
    org_id: Option<&str>,
    event_stream: bool,
) -> Result<HeaderMap, ChatError> {
    let mut headers = HeaderMap::new();

    let auth_value = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|e| ChatError::HttpError(format!("Invalid Authorization header: {e}")))?;
    headers.insert(AUTHORIZATION, auth_value);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    if event_stream {
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
    }

    if let Some(org) = org_id {
        let org_value = HeaderValue::from_str(org)
            .map_err(|e| ChatError::HttpError(format!("Invalid OpenAI-Organization header: {e}")))?;
        headers.insert("openai-organization", org_value);
    }

    Ok(headers)
}

/// Classifies a non-success response.
pub(crate) async fn error_from_response(response: Response) -> ChatError {
    let status = response.status();
    let text = response
        .text()
        .await
        .unwrap_or_else(|e| format!("Failed to read error response body (status {status}): {e}"));
    let error_value = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|body| body.get("error").cloned());
    let message = error_value
        .as_ref()
        .map_or_else(|| text.clone(), extract_error_message);

    match status.as_u16() {
        401 => {
            warn!(status = %status, "API rejected the credential");
            ChatError::Unauthorized(message)
        }
        403 | 404 => {
            warn!(status = %status, error = %message, "API denied access to the model");
            ChatError::AccessDenied {
                status: status.as_u16(),
                message,
            }
        }
        _ => match error_value {
            Some(err) => {
                error!(status = %status, error = %message, "Chat API returned an error");
                api_error(&err)
            }
            None => ChatError::HttpError(format!("API returned status {status}: {text}")),
        },
    }
}

fn api_error(error: &Value) -> ChatError {
    ChatError::Api {
        message: extract_error_message(error),
        kind: error
            .get("type")
            .or_else(|| error.get("code"))
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::credentials::MemoryCredentialStore;

    fn sse_chunk(s: &str) -> Result<Bytes, std::io::Error> {
        Ok(Bytes::copy_from_slice(s.as_bytes()))
    }

    fn client_with_prompt(prompt: Option<&str>) -> ChatClient {
        ChatClient::new(
            ChatClientConfig {
                system_prompt: prompt.map(str::to_string),
                ..ChatClientConfig::default()
            },
            Arc::new(MemoryCredentialStore::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_endpoint_keeps_version_segment() {
        let base = Url::parse("https://api.openai.com/v1").unwrap();
        assert_eq!(
            endpoint(&base, CHAT_COMPLETIONS_PATH).unwrap().as_str(),
            "https://api.openai.com/v1/chat/completions"
        );
        let base = Url::parse("http://localhost:8080/").unwrap();
        assert_eq!(
            endpoint(&base, "images/generations").unwrap().as_str(),
            "http://localhost:8080/images/generations"
        );
    }

    #[test]
    fn test_request_headers() {
        let headers = request_headers("sk-test", Some("org-1"), true).unwrap();
        assert_eq!(headers[AUTHORIZATION], "Bearer sk-test");
        assert_eq!(headers[CONTENT_TYPE], "application/json");
        assert_eq!(headers[ACCEPT], "text/event-stream");
        assert_eq!(headers["openai-organization"], "org-1");

        let headers = request_headers("sk-test", None, false).unwrap();
        assert!(headers.get(ACCEPT).is_none());
    }

    #[test]
    fn test_request_headers_reject_control_characters() {
        assert!(request_headers("bad\ntoken", None, false).is_err());
    }

    #[test]
    fn test_system_prompt_is_prepended_once() {
        let client = client_with_prompt(Some("Be brief."));
        let conversation = vec![Message::user("hi")];
        let messages = client.with_system_prompt(&conversation);
        assert_eq!(messages[0], Message::system("Be brief."));
        assert_eq!(messages.len(), 2);

        let already = vec![Message::system("Custom"), Message::user("hi")];
        assert!(matches!(client.with_system_prompt(&already), Cow::Borrowed(_)));
    }

    #[test]
    fn test_without_system_prompt_conversation_is_untouched() {
        let client = client_with_prompt(None);
        let conversation = vec![Message::user("hi")];
        assert!(matches!(client.with_system_prompt(&conversation), Cow::Borrowed(_)));
    }

    #[test]
    fn test_set_model_affects_params() {
        let client = client_with_prompt(None);
        assert_eq!(client.params().model, "gpt-3.5-turbo-16k");
        client.set_model("gpt-4o");
        assert_eq!(client.params().model, "gpt-4o");
    }

    #[test]
    fn test_cancel_unknown_request() {
        let client = client_with_prompt(None);
        assert!(!client.cancel(Uuid::new_v4()));
        assert_eq!(client.cancel_all(), 0);
    }

    #[tokio::test]
    async fn test_decode_stream_single_chunk_with_done() {
        let stream = futures::stream::iter(vec![sse_chunk(
            "data: {\"id\":\"1\",\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\ndata: [DONE]\n",
        )]);
        let mut batches: Vec<Vec<StreamEvent>> = Vec::new();

        let outcome = decode_stream(stream, &CancellationToken::new(), Uuid::new_v4(), |b| {
            batches.push(b.to_vec());
        })
        .await
        .unwrap();

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].delta_content(), "Hi");
        assert!(outcome.saw_done);
        assert!(!outcome.cancelled);
        assert_eq!(outcome.events, 1);
    }

    #[tokio::test]
    async fn test_decode_stream_empty_batch_is_still_delivered() {
        let stream = futures::stream::iter(vec![
            sse_chunk(": keep-alive\n"),
            sse_chunk("data: [DONE]\n"),
        ]);
        let mut sizes = Vec::new();

        let outcome = decode_stream(stream, &CancellationToken::new(), Uuid::new_v4(), |b| {
            sizes.push(b.len());
        })
        .await
        .unwrap();

        assert_eq!(sizes, vec![0, 0]);
        assert_eq!(outcome.batches, 2);
    }

    #[tokio::test]
    async fn test_decode_stream_flushes_unterminated_last_line() {
        let stream = futures::stream::iter(vec![sse_chunk(
            "data: {\"id\":\"1\",\"choices\":[{\"delta\":{\"content\":\"end\"}}]}",
        )]);
        let mut batches: Vec<Vec<StreamEvent>> = Vec::new();

        let outcome = decode_stream(stream, &CancellationToken::new(), Uuid::new_v4(), |b| {
            batches.push(b.to_vec());
        })
        .await
        .unwrap();

        assert_eq!(batches.len(), 2);
        assert!(batches[0].is_empty());
        assert_eq!(batches[1][0].delta_content(), "end");
        assert_eq!(outcome.batches, 2);
    }

    #[tokio::test]
    async fn test_decode_stream_error_frame_aborts() {
        let stream = futures::stream::iter(vec![sse_chunk(
            "data: {\"error\":{\"message\":\"boom\",\"type\":\"server_error\"}}\n",
        )]);

        let err = decode_stream(stream, &CancellationToken::new(), Uuid::new_v4(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Api { ref message, .. } if message == "boom"));
    }

    #[tokio::test]
    async fn test_decode_stream_transport_error() {
        let stream = futures::stream::iter(vec![
            sse_chunk("data: {\"id\":\"1\",\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n"),
            Err(std::io::Error::other("connection reset")),
        ]);
        let mut calls = 0;

        let err = decode_stream(stream, &CancellationToken::new(), Uuid::new_v4(), |_| {
            calls += 1;
        })
        .await
        .unwrap_err();

        assert_eq!(calls, 1);
        assert!(err.to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_decode_stream_pre_cancelled_token_reads_nothing() {
        let token = CancellationToken::new();
        token.cancel();
        let stream = futures::stream::iter(vec![sse_chunk("data: [DONE]\n")]);
        let mut calls = 0;

        let outcome = decode_stream(stream, &token, Uuid::new_v4(), |_| calls += 1)
            .await
            .unwrap();

        assert!(outcome.cancelled);
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_unsent_handles_are_not_in_flight() {
        let client = client_with_prompt(None);
        for _ in 0..3 {
            let handle = client.new_request();
            assert!(!client.cancel(handle.id()));
        }
        assert_eq!(client.in_flight(), 0);
        assert_eq!(client.cancel_all(), 0);
    }

    #[tokio::test]
    async fn test_registration_is_removed_after_send() {
        let client = client_with_prompt(None);
        let handle = client.new_request();
        assert_eq!(client.in_flight(), 0);
        {
            let _registration = InFlight::register(&client.in_flight, &handle);
            assert_eq!(client.in_flight(), 1);
            assert!(client.cancel(handle.id()));
        }
        assert_eq!(client.in_flight(), 0);
        assert!(handle.is_cancelled());
    }
}
