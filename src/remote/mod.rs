use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use serde::Serialize;
use std::fmt;
use tracing::{debug, instrument, warn};

use crate::auth::Session;
use crate::model::{RemoteEntry, StatusEvent};

pub mod model;

pub use model::{EventOutcome, IndexQuery, PlaybackTarget, UploadTarget, UploadTargetRequest};
use model::{IndexResponse, StatusEventsRequest, StatusEventsResponse, WireEvent};

const DEFAULT_USER_AGENT: &str = "recsync/0.1";

/// The remote API boundary. Every call except the raw byte transfer carries
/// the session's bearer credential.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn issue_upload_target(
        &self,
        session: &Session,
        request: &UploadTargetRequest,
    ) -> Result<UploadTarget>;

    /// PUT the artifact bytes to a previously issued target.
    async fn transfer(&self, target: &UploadTarget, content_type: &str, bytes: &[u8])
        -> Result<()>;

    async fn issue_playback_target(&self, session: &Session, key: &str) -> Result<PlaybackTarget>;

    async fn list_index(&self, session: &Session, query: &IndexQuery) -> Result<Vec<RemoteEntry>>;

    /// Deliver a batch in one request. `Err` means no usable response was
    /// received; per-event failures come back inside `Ok`.
    async fn send_status_events(
        &self,
        session: &Session,
        events: &[StatusEvent],
    ) -> Result<Vec<EventOutcome>>;
}

#[derive(Clone)]
pub struct HttpRemoteApi {
    http: Client,
    base_url: Url,
}

impl fmt::Debug for HttpRemoteApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRemoteApi")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpRemoteApi {
    pub fn new(base_url: Url) -> Result<Self> {
        Self::with_user_agent(base_url, DEFAULT_USER_AGENT)
    }

    pub fn with_user_agent(base_url: Url, user_agent: &str) -> Result<Self> {
        let http = Client::builder()
            .user_agent(user_agent)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http,
            base_url: ensure_trailing_slash(base_url),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("invalid endpoint {}", path))
    }

    fn authorized(&self, method: Method, url: Url, session: &Session) -> RequestBuilder {
        self.http
            .request(method, url)
            .header("Authorization", format!("Bearer {}", session.bearer))
    }

    pub fn build_json_request<T: Serialize + ?Sized>(
        &self,
        path: &str,
        session: &Session,
        body: &T,
    ) -> Result<reqwest::Request> {
        let url = self.endpoint(path)?;
        self.authorized(Method::POST, url, session)
            .header("Content-Type", "application/json")
            .json(body)
            .build()
            .context("failed to build request")
    }
}

fn ensure_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// Turn a non-2xx response into an error carrying status and body.
async fn check_status(res: Response, what: &str) -> Result<Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    warn!(%status, what, "remote call rejected");
    Err(anyhow!("{} failed {}: {}", what, status, body))
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    #[instrument(skip_all, fields(appointment_id = %request.appointment_id))]
    async fn issue_upload_target(
        &self,
        session: &Session,
        request: &UploadTargetRequest,
    ) -> Result<UploadTarget> {
        let req = self.build_json_request("v1/recordings/upload-url", session, request)?;
        let res = self
            .http
            .execute(req)
            .await
            .context("failed to reach upload-url endpoint")?;
        let res = check_status(res, "issue upload target").await?;
        let target: UploadTarget = res.json().await.context("invalid upload target response")?;
        debug!(key = %target.key, "upload target issued");
        Ok(target)
    }

    #[instrument(skip_all, fields(key = %target.key, len = bytes.len()))]
    async fn transfer(&self, target: &UploadTarget, content_type: &str, bytes: &[u8]) -> Result<()> {
        let url = Url::parse(&target.url).context("invalid upload target url")?;
        let res = self
            .http
            .put(url)
            .header("Content-Type", content_type)
            .body(bytes.to_vec())
            .send()
            .await
            .context("failed to transfer artifact")?;
        check_status(res, "artifact transfer").await?;
        Ok(())
    }

    #[instrument(skip_all, fields(key = %key))]
    async fn issue_playback_target(&self, session: &Session, key: &str) -> Result<PlaybackTarget> {
        let mut url = self.endpoint("v1/recordings/playback-url")?;
        url.query_pairs_mut().append_pair("key", key);
        let res = self
            .authorized(Method::GET, url, session)
            .send()
            .await
            .context("failed to reach playback-url endpoint")?;
        let res = check_status(res, "issue playback target").await?;
        res.json().await.context("invalid playback target response")
    }

    #[instrument(skip_all)]
    async fn list_index(&self, session: &Session, query: &IndexQuery) -> Result<Vec<RemoteEntry>> {
        let mut url = self.endpoint("v1/recordings")?;
        let params = query.to_query_pairs();
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }
        let res = self
            .authorized(Method::GET, url, session)
            .send()
            .await
            .context("failed to reach recordings index")?;
        let res = check_status(res, "list index").await?;
        let payload: IndexResponse = res.json().await.context("invalid index response")?;
        Ok(payload.items.into_iter().map(RemoteEntry::from).collect())
    }

    #[instrument(skip_all, fields(count = events.len()))]
    async fn send_status_events(
        &self,
        session: &Session,
        events: &[StatusEvent],
    ) -> Result<Vec<EventOutcome>> {
        let body = StatusEventsRequest {
            events: events.iter().map(WireEvent::from).collect(),
        };
        let req = self.build_json_request("v1/status-events", session, &body)?;
        let res = self
            .http
            .execute(req)
            .await
            .context("failed to reach status-events endpoint")?;
        let res = check_status(res, "send status events").await?;
        let payload: StatusEventsResponse =
            res.json().await.context("invalid status-events response")?;
        Ok(payload.results)
    }
}
