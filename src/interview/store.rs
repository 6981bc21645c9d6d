//! Session persistence collaborator.
//!
//! The store is the system of record. The interview engine keeps only a
//! read cache and reconciles it from [`SessionStore::fetch_session`] on
//! hydration.

use std::time::Duration;

use reqwest::{StatusCode, Url};
use serde_json::json;
use tracing::{debug, info};

use crate::models::session::SessionSnapshot;
use crate::{AppError, BoxFuture, Result};

/// Request timeout for the HTTP store.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Read/write access to interview sessions.
pub trait SessionStore: Send + Sync {
    /// Fetch the authoritative session record.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] for an unknown session and
    /// [`AppError::Persistence`] for any other failure.
    fn fetch_session<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<SessionSnapshot>>;

    /// Persist one answer.
    ///
    /// Implementations must accept a repeat of an answer the store already
    /// holds, so a submission whose acknowledgement was lost can be retried.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Persistence`] if the answer was not stored.
    fn submit_answer<'a>(
        &'a self,
        session_id: &'a str,
        question_id: &'a str,
        text: &'a str,
    ) -> BoxFuture<'a, Result<()>>;
}

/// [`SessionStore`] backed by the interview REST API.
///
/// - `GET  {base}/interview/{session_id}`
/// - `POST {base}/interview/{session_id}/answer?question_id={id}` with
///   `{"text": "..."}`
#[derive(Debug, Clone)]
pub struct HttpSessionStore {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpSessionStore {
    /// Build a store rooted at `base_url`, optionally sending `token` as a
    /// bearer credential.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] if the URL is invalid or the HTTP client
    /// cannot be built.
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|err| AppError::Config(format!("invalid api base url {base_url}: {err}")))?;
        if base_url.cannot_be_a_base() {
            return Err(AppError::Config(format!(
                "api base url {base_url} cannot carry a path"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| AppError::Config(format!("failed to build http client: {err}")))?;
        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

impl SessionStore for HttpSessionStore {
    fn fetch_session<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<SessionSnapshot>> {
        Box::pin(async move {
            let url = self.endpoint(&["interview", session_id]);
            debug!(%url, "fetching session");
            let response = self.authorize(self.client.get(url)).send().await?;

            match response.status() {
                status if status.is_success() => Ok(response.json::<SessionSnapshot>().await?),
                StatusCode::NOT_FOUND => {
                    Err(AppError::NotFound(format!("session {session_id} not found")))
                }
                status => {
                    let body = response.text().await.unwrap_or_default();
                    Err(AppError::Persistence(format!(
                        "fetch session {session_id} failed with {status}: {body}"
                    )))
                }
            }
        })
    }

    fn submit_answer<'a>(
        &'a self,
        session_id: &'a str,
        question_id: &'a str,
        text: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let url = self.endpoint(&["interview", session_id, "answer"]);
            let request = self
                .client
                .post(url)
                .query(&[("question_id", question_id)])
                .json(&json!({ "text": text }));
            let response = self.authorize(request).send().await?;

            let status = response.status();
            if status.is_success() {
                debug!(session_id, question_id, "answer stored");
                return Ok(());
            }

            // Duplicates surface as 400 or, re-raised by the backend, as 500.
            let body = response.text().await.unwrap_or_default();
            if body.contains("already answered") {
                info!(session_id, question_id, %status, "store already holds this answer");
                return Ok(());
            }

            Err(AppError::Persistence(format!(
                "submit answer {question_id} failed with {status}: {body}"
            )))
        })
    }
}
