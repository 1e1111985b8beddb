use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::{atomic::AtomicBool, atomic::Ordering, Arc};
use std::time::Duration;

use agent_protocol::Usage;
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::ApiConfig;
use crate::error::{parse_error_message, ApiError};
use crate::frames::{decode_line, Frame, FrameDecoder};
use crate::headers::{build_headers, Auth};
use crate::payload::{
    ChatRequest, CommitRequest, CommitResponse, CreateAppRequest, CreateAppResponse,
    DeploymentRequest, DeploymentResponse, DeviceCode, DevicePoll, DevicePollRequest,
    DevicePollResponse, ToolManifest,
};
use crate::retry::{is_retryable_http_error, is_transient_message, retry_delay_ms, MAX_RETRIES};
use crate::url::{endpoint_url, Endpoint};

/// Optional cancellation signal shared across request and stream loops.
pub type CancellationSignal = Arc<AtomicBool>;

/// Frames decoded from a live chat response.
pub type ResponseFrames = FrameStream<BoxStream<'static, Result<Vec<u8>, ApiError>>>;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);
const ACCEPT_STREAM: &str = "text/plain";
const ACCEPT_JSON: &str = "application/json";

type CancelPredicate = Box<dyn Fn() -> bool + Send + Sync>;
type UsageHook = Box<dyn FnMut(&Usage) + Send>;
type StopHook = Box<dyn FnOnce() + Send>;

/// Pull-based frame reader over a chunked response body.
///
/// A fresh stream is built for every request. The cancel predicate is polled
/// before each decoded line and while waiting on the network; once it reports
/// true the body is dropped, the stop hook fires and [`FrameStream::next`]
/// yields `None` from then on.
pub struct FrameStream<S> {
    body: Option<S>,
    decoder: FrameDecoder,
    pending: VecDeque<Frame>,
    cancel: Option<CancelPredicate>,
    on_usage: Option<UsageHook>,
    on_stop: Option<StopHook>,
    cancelled: bool,
    /// Set after a terminal error; nothing is yielded past it.
    failed: bool,
}

impl<S, B, E> FrameStream<S>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Into<ApiError>,
{
    pub fn new(body: S) -> Self {
        Self {
            body: Some(body),
            decoder: FrameDecoder::default(),
            pending: VecDeque::new(),
            cancel: None,
            on_usage: None,
            on_stop: None,
            cancelled: false,
            failed: false,
        }
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.cancel = Some(Box::new(cancel));
        self
    }

    #[must_use]
    pub fn on_usage(mut self, hook: impl FnMut(&Usage) + Send + 'static) -> Self {
        self.on_usage = Some(Box::new(hook));
        self
    }

    #[must_use]
    pub fn on_stop(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_stop = Some(Box::new(hook));
        self
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Returns the next frame, `Ok(None)` at end of body or after cancellation.
    pub async fn next(&mut self) -> Result<Option<Frame>, ApiError> {
        loop {
            if self.failed || self.cancelled || self.check_cancel() {
                return Ok(None);
            }

            if let Some(frame) = self.pending.pop_front() {
                if let (Frame::Data { usage: Some(usage), .. }, Some(hook)) =
                    (&frame, self.on_usage.as_mut())
                {
                    hook(usage);
                }
                return Ok(Some(frame));
            }

            if let Some(line) = self.decoder.next_line() {
                self.decode(&line)?;
                continue;
            }

            let Some(body) = self.body.as_mut() else {
                return Ok(None);
            };

            let chunk = {
                let cancel = self.cancel.as_deref();
                poll_with_predicate(body.next(), cancel).await
            };

            match chunk {
                None => {
                    self.stop();
                    return Ok(None);
                }
                Some(None) => {
                    self.body = None;
                    if let Some(rest) = self.decoder.finish() {
                        self.decode(&rest)?;
                    }
                }
                Some(Some(Ok(bytes))) => self.decoder.push(bytes.as_ref()),
                Some(Some(Err(error))) => {
                    self.fail();
                    return Err(error.into());
                }
            }
        }
    }

    /// Drains the stream. Mostly useful for tests and one-shot callers.
    pub async fn collect_frames(mut self) -> Result<Vec<Frame>, ApiError> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next().await? {
            frames.push(frame);
        }
        Ok(frames)
    }

    fn decode(&mut self, line: &str) -> Result<(), ApiError> {
        match decode_line(line) {
            Ok(frames) => {
                self.pending.extend(frames);
                Ok(())
            }
            Err(error) => {
                self.fail();
                Err(error)
            }
        }
    }

    fn fail(&mut self) {
        self.failed = true;
        self.body = None;
        self.pending.clear();
        self.decoder = FrameDecoder::default();
    }

    fn check_cancel(&mut self) -> bool {
        let cancelled = self.cancel.as_ref().is_some_and(|cancel| cancel());
        if cancelled {
            self.stop();
        }
        cancelled
    }

    fn stop(&mut self) {
        self.cancelled = true;
        self.body = None;
        self.pending.clear();
        if let Some(hook) = self.on_stop.take() {
            hook();
        }
    }
}

/// Awaits `future`, polling `cancel` every [`CANCEL_POLL_INTERVAL`].
///
/// Returns `None` when cancellation won the race.
async fn poll_with_predicate<F>(future: F, cancel: Option<&(dyn Fn() -> bool + Send + Sync)>) -> Option<F::Output>
where
    F: Future,
{
    let Some(cancel) = cancel else {
        return Some(future.await);
    };

    let mut future = Box::pin(future);
    loop {
        if cancel() {
            return None;
        }
        if let Ok(output) = tokio::time::timeout(CANCEL_POLL_INTERVAL, &mut future).await {
            return Some(output);
        }
    }
}

#[derive(Debug)]
pub struct ApiClient {
    http: Client,
    config: ApiConfig,
}

impl ApiClient {
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        if reqwest::Url::parse(&endpoint_url(&config.base_url, Endpoint::Chat)).is_err() {
            return Err(ApiError::InvalidBaseUrl(config.base_url.clone()));
        }
        let http = Client::builder().build().map_err(ApiError::from)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn set_access_token(&mut self, access_token: Option<String>) {
        self.config.access_token = access_token;
    }

    pub fn has_access_token(&self) -> bool {
        self.config
            .access_token
            .as_deref()
            .is_some_and(|token| !token.trim().is_empty())
    }

    fn header_map(&self, auth: Auth, accept: &str) -> Result<HeaderMap, ApiError> {
        let headers = build_headers(&self.config, auth, accept)?;
        let mut out = HeaderMap::new();
        for (key, value) in headers {
            out.insert(
                HeaderName::from_bytes(key.as_bytes()).map_err(|_| {
                    ApiError::UnexpectedResponse(format!("invalid header key: {key}"))
                })?,
                HeaderValue::from_str(&value).map_err(|_| {
                    ApiError::UnexpectedResponse(format!("invalid header value for {key}"))
                })?,
            );
        }
        Ok(out)
    }

    fn post<T: Serialize + ?Sized>(
        &self,
        endpoint: Endpoint<'_>,
        auth: Auth,
        accept: &str,
        body: &T,
    ) -> Result<RequestBuilder, ApiError> {
        let mut builder = self
            .http
            .post(endpoint_url(&self.config.base_url, endpoint))
            .headers(self.header_map(auth, accept)?)
            .json(body);
        if accept == ACCEPT_JSON {
            if let Some(timeout) = self.config.timeout {
                builder = builder.timeout(timeout);
            }
        }
        Ok(builder)
    }

    pub async fn send_with_retry<F>(
        &self,
        build: F,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<Response, ApiError>
    where
        F: Fn() -> Result<RequestBuilder, ApiError>,
    {
        let mut last_status: Option<StatusCode> = None;
        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES {
            if is_cancelled(cancellation) {
                return Err(ApiError::Cancelled);
            }

            let response = await_or_cancel(build()?.send(), cancellation).await?;

            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    last_status = Some(status);
                    let body = await_or_cancel(response.text(), cancellation)
                        .await?
                        .unwrap_or_default();
                    let message = parse_error_message(status, &body);
                    last_error = Some(message.clone());

                    if attempt < MAX_RETRIES && is_retryable_http_error(status.as_u16(), &body) {
                        tracing::debug!(status = status.as_u16(), attempt, "retrying request");
                        await_or_cancel(tokio::time::sleep(retry_delay_ms(attempt)), cancellation)
                            .await?;
                        continue;
                    }

                    return Err(ApiError::Status(status, message));
                }
                Err(error) => {
                    let message = error.to_string();
                    let transient =
                        error.is_connect() || error.is_timeout() || is_transient_message(&message);
                    if !transient {
                        return Err(ApiError::Request(error));
                    }
                    last_error = Some(message);
                    if attempt < MAX_RETRIES {
                        tracing::debug!(attempt, "retrying request after transport error");
                        await_or_cancel(tokio::time::sleep(retry_delay_ms(attempt)), cancellation)
                            .await?;
                        continue;
                    }
                }
            }
        }

        Err(ApiError::RetryExhausted {
            status: last_status,
            last_error,
        })
    }

    /// Submits one chat turn and returns its frame stream.
    pub async fn stream_chat(
        &self,
        request: &ChatRequest,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<ResponseFrames, ApiError> {
        let response = self
            .send_with_retry(
                || self.post(Endpoint::Chat, Auth::Required, ACCEPT_STREAM, request),
                cancellation,
            )
            .await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Err(ApiError::MissingBody);
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(ApiError::from))
            .boxed();
        Ok(FrameStream::new(body))
    }

    pub async fn fetch_tool_manifest(&self) -> Result<ToolManifest, ApiError> {
        let response = self
            .send_with_retry(
                || {
                    let mut builder = self
                        .http
                        .get(endpoint_url(&self.config.base_url, Endpoint::ToolManifest))
                        .headers(self.header_map(Auth::Anonymous, ACCEPT_JSON)?);
                    if let Some(timeout) = self.config.timeout {
                        builder = builder.timeout(timeout);
                    }
                    Ok(builder)
                },
                None,
            )
            .await?;
        read_json(response).await
    }

    /// Uploads a snapshot of changed files and returns the commit sha.
    pub async fn commit_files(
        &self,
        app_id: &str,
        files: &BTreeMap<String, String>,
        message: &str,
    ) -> Result<String, ApiError> {
        let body = CommitRequest { files, message };
        let response = self
            .send_with_retry(
                || self.post(Endpoint::Commits { app_id }, Auth::Required, ACCEPT_JSON, &body),
                None,
            )
            .await?;
        let commit: CommitResponse = read_json(response).await?;
        Ok(commit.sha)
    }

    pub async fn create_deployment(&self, app_id: &str, commit_sha: &str) -> Result<String, ApiError> {
        let body = DeploymentRequest { commit_sha };
        let response = self
            .send_with_retry(
                || {
                    self.post(
                        Endpoint::Deployments { app_id },
                        Auth::Required,
                        ACCEPT_JSON,
                        &body,
                    )
                },
                None,
            )
            .await?;
        let deployment: DeploymentResponse = read_json(response).await?;
        Ok(deployment.deployment_id)
    }

    pub async fn create_app(&self, name: &str) -> Result<String, ApiError> {
        let body = CreateAppRequest { name };
        let response = self
            .send_with_retry(
                || self.post(Endpoint::Apps, Auth::Required, ACCEPT_JSON, &body),
                None,
            )
            .await?;
        let app: CreateAppResponse = read_json(response).await?;
        Ok(app.app_id)
    }

    pub async fn start_device_login(&self) -> Result<DeviceCode, ApiError> {
        let body = serde_json::json!({});
        let response = self
            .send_with_retry(
                || self.post(Endpoint::DeviceLoginStart, Auth::Anonymous, ACCEPT_JSON, &body),
                None,
            )
            .await?;
        read_json(response).await
    }

    /// Polls once. HTTP 202, or a body without a token, means still pending.
    pub async fn poll_device_login(&self, device_code: &str) -> Result<DevicePoll, ApiError> {
        let body = DevicePollRequest { device_code };
        let response = self
            .send_with_retry(
                || self.post(Endpoint::DeviceLoginPoll, Auth::Anonymous, ACCEPT_JSON, &body),
                None,
            )
            .await?;

        if response.status() == StatusCode::ACCEPTED {
            return Ok(DevicePoll::Pending);
        }

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(DevicePoll::Pending);
        }
        let poll: DevicePollResponse = serde_json::from_str(&text)?;
        Ok(match poll.access_token.filter(|token| !token.is_empty()) {
            Some(token) => DevicePoll::Token(token),
            None => DevicePoll::Pending,
        })
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|error| {
        ApiError::UnexpectedResponse(format!("{error}: {}", text.chars().take(200).collect::<String>()))
    })
}

fn is_cancelled(cancel: Option<&CancellationSignal>) -> bool {
    cancel.is_some_and(|token| token.load(Ordering::Acquire))
}

async fn await_or_cancel<F>(
    future: F,
    cancellation: Option<&CancellationSignal>,
) -> Result<F::Output, ApiError>
where
    F: Future,
{
    let Some(signal) = cancellation else {
        return Ok(future.await);
    };

    let predicate = || signal.load(Ordering::Acquire);
    match poll_with_predicate(future, Some(&predicate)).await {
        Some(output) => Ok(output),
        None => Err(ApiError::Cancelled),
    }
}
