use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::ready;
use parking_lot::RwLock;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::auth::{AuthToken, AuthTokenPermission, TOKEN_SEPARATOR};
use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};

const ANONYMOUS_PREFIX: &str = "AnonymousUser_";
const ANONYMOUS_SUFFIX_LEN: usize = 8;
const TOKEN_SEPARATOR_ESCAPED: &str = "%7C";

/// Local identity attached to reports and feedback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reporter {
    pub name: Option<String>,
    pub player_id: Option<i64>,
}

impl Reporter {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            player_id: None,
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_player_id(mut self, player_id: i64) -> Self {
        self.player_id = Some(player_id);
        self
    }
}

/// Sink for user-visible notifications raised by failed requests.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}

#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str) {
        info!(target: "notifications", "{message}");
    }
}

/// Handle to a request running on the background runtime.
///
/// Resolves to the request's result, or to the failure value when the task
/// panicked or was cancelled. Dropping it abandons the result; the request
/// itself keeps running.
#[must_use = "dropping a Pending abandons the result"]
pub struct Pending<T> {
    handle: JoinHandle<T>,
    fallback: fn() -> T,
}

impl<T: Send + 'static> Pending<T> {
    pub(crate) fn spawn<F>(runtime: &Handle, fallback: fn() -> T, task: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self {
            handle: runtime.spawn(task),
            fallback,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl<T> Future for Pending<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let joined = ready!(Pin::new(&mut self.handle).poll(cx));
        Poll::Ready(match joined {
            Ok(value) => value,
            Err(err) => {
                warn!(?err, "background request did not complete");
                (self.fallback)()
            }
        })
    }
}

#[derive(Clone)]
pub struct BotDetectorClient {
    http: Client,
    pub(crate) runtime: Handle,
    notifier: Arc<dyn Notifier>,
    base_url: Url,
    token: Arc<RwLock<AuthToken>>,
    anonymous_reporting: bool,
    anonymous_name: Arc<str>,
}

impl BotDetectorClient {
    pub fn new(config: &AppConfig, runtime: Handle) -> AppResult<Self> {
        Self::with_notifier(config, runtime, Arc::new(LogNotifier))
    }

    pub fn with_notifier(
        config: &AppConfig,
        runtime: Handle,
        notifier: Arc<dyn Notifier>,
    ) -> AppResult<Self> {
        let http = Client::builder()
            .user_agent(concat!("bot-detector-client/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.http_timeout_secs.max(1)))
            .build()?;

        let base_url = Url::parse(config.api_base_url.trim()).map_err(|err| {
            AppError::Config(format!("invalid Bot Detector API base URL: {err}"))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(AppError::Config(format!(
                "Bot Detector API base URL cannot carry a path: {base_url}"
            )));
        }

        Ok(Self {
            http,
            runtime,
            notifier,
            base_url,
            token: Arc::new(RwLock::new(config.auth_token())),
            anonymous_reporting: config.anonymous_reporting,
            anonymous_name: anonymous_identity().into(),
        })
    }

    pub fn auth_token(&self) -> AuthToken {
        self.token.read().clone()
    }

    /// Swaps the active token, e.g. after the configured token changed.
    pub fn replace_auth_token(&self, token: AuthToken) {
        *self.token.write() = token;
    }

    /// Returns the active token when it carries `permission`, without touching the network.
    pub(crate) fn token_with(&self, permission: AuthTokenPermission) -> AppResult<AuthToken> {
        let token = self.token.read();
        token.require(permission)?;
        Ok(token.clone())
    }

    pub fn anonymous_name(&self) -> &str {
        &self.anonymous_name
    }

    /// Name sent to the backend for `reporter`.
    pub fn reporter_name(&self, reporter: &Reporter) -> String {
        match reporter.name.as_deref().map(str::trim) {
            Some(name) if !self.anonymous_reporting && !name.is_empty() => name.to_string(),
            _ => self.anonymous_name.to_string(),
        }
    }

    pub(crate) fn endpoint(&self, segments: &[&str]) -> AppResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| AppError::Config("invalid Bot Detector API base".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Endpoint whose last segment is the full auth token, with the separator escaped.
    pub(crate) fn token_endpoint(&self, segments: &[&str], token: &AuthToken) -> AppResult<Url> {
        let mut url = self.endpoint(segments)?;
        let escaped = token
            .to_full_token()
            .replace(TOKEN_SEPARATOR, TOKEN_SEPARATOR_ESCAPED);
        let path = format!("{}/{}", url.path().trim_end_matches('/'), escaped);
        url.set_path(&path);
        Ok(url)
    }

    pub(crate) fn report_failure(&self, message: &str) {
        self.notifier.notify(message);
    }

    /// POSTs `body` as JSON; any 2xx counts as success. `endpoint` only labels log lines.
    pub(crate) async fn post_json<B>(&self, endpoint: &str, url: Url, body: &B) -> bool
    where
        B: Serialize + ?Sized,
    {
        self.send(endpoint, self.http.post(url).json(body))
            .await
            .is_some()
    }

    pub(crate) async fn post_for_json<B, T>(&self, endpoint: &str, url: Url, body: &B) -> Option<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.send(endpoint, self.http.post(url).json(body)).await?;
        decode(endpoint, response).await
    }

    pub(crate) async fn get_json<T>(&self, endpoint: &str, url: Url) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let response = self.send(endpoint, self.http.get(url)).await?;
        decode(endpoint, response).await
    }

    async fn send(&self, endpoint: &str, request: RequestBuilder) -> Option<Response> {
        match request.send().await {
            Ok(response) if response.status().is_success() => Some(response),
            Ok(response) => {
                warn!(endpoint = %endpoint, status = %response.status(), "backend rejected request");
                None
            }
            Err(err) => {
                // request URLs may carry the auth token
                let err = err.without_url();
                warn!(?err, endpoint = %endpoint, "request to backend failed");
                None
            }
        }
    }
}

async fn decode<T: DeserializeOwned>(endpoint: &str, response: Response) -> Option<T> {
    match response.json::<T>().await {
        Ok(decoded) => Some(decoded),
        Err(err) => {
            let err = err.without_url();
            warn!(?err, endpoint = %endpoint, "failed to decode backend response");
            None
        }
    }
}

fn anonymous_identity() -> String {
    let suffix: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ANONYMOUS_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("{ANONYMOUS_PREFIX}{suffix}")
}
