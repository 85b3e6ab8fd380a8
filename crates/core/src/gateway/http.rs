//! `reqwest` implementation of the streaming endpoints.

use super::SessionGateway;
use crate::{
    error::GatewayError,
    segment::{AnswerReply, AnswerRequest, InitializeReply, LectureId, NextReply, SessionSnapshot},
};
use async_trait::async_trait;
use reqwest::{
    Method, Response, StatusCode,
    header::{AUTHORIZATION, HeaderMap, HeaderValue, LOCATION},
    redirect,
};
use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Gateway that talks to the tutoring backend over HTTP.
///
/// Redirects are never followed: the backend answers unauthenticated
/// requests with a redirect to its login flow, which is reported as
/// [`GatewayError::AuthenticationRequired`].
#[derive(Clone, Debug)]
pub struct HttpSessionGateway {
    base_url: String,
    http: reqwest::Client,
    bearer_token: Option<String>,
}

impl HttpSessionGateway {
    /// Creates a gateway rooted at `base_url` with a per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, GatewayError> {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        let http = reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(timeout)
            .build()?;
        Ok(Self {
            base_url,
            http,
            bearer_token: None,
        })
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, lecture_id: LectureId, operation: &str) -> String {
        format!(
            "{}/api/lectures/{}/stream/{}",
            self.base_url, lecture_id, operation
        )
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(token) = &self.bearer_token {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> Result<Response, GatewayError> {
        debug!(%method, url, "sending request");
        let mut request = self.http.request(method, url).headers(self.headers());
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        check_status(response).await
    }

    async fn call<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> Result<T, GatewayError> {
        let response = self.send(method, url, body).await?;
        let text = response.text().await?;
        // 204 and empty bodies decode as an empty object.
        let text = if text.trim().is_empty() { "{}" } else { text.as_str() };
        serde_json::from_str(text).map_err(|source| GatewayError::Decode {
            url: url.to_string(),
            source,
        })
    }
}

/// Maps redirects and non-success statuses to gateway errors.
async fn check_status(response: Response) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_redirection() {
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();
        return Err(GatewayError::AuthenticationRequired { location });
    }
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = backend_message(&body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string()
    });
    if status == StatusCode::UNAUTHORIZED {
        Err(GatewayError::Unauthorized(message))
    } else {
        Err(GatewayError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

/// Extracts the backend's error message: JSON `message`, then `title`, then raw text.
fn backend_message(body: &str) -> Option<String> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["message", "title"] {
            if let Some(message) = value.get(key).and_then(|v| v.as_str()) {
                if !message.trim().is_empty() {
                    return Some(message.trim().to_string());
                }
            }
        }
    }
    let body = body.trim();
    (!body.is_empty()).then(|| body.to_string())
}

#[async_trait]
impl SessionGateway for HttpSessionGateway {
    async fn initialize(&self, lecture_id: LectureId) -> Result<InitializeReply, GatewayError> {
        let url = self.url(lecture_id, "initialize");
        self.call(Method::POST, &url, None::<&()>).await
    }

    async fn next(&self, lecture_id: LectureId) -> Result<NextReply, GatewayError> {
        let url = self.url(lecture_id, "next");
        self.call(Method::POST, &url, None::<&()>).await
    }

    async fn answer(
        &self,
        lecture_id: LectureId,
        request: AnswerRequest,
    ) -> Result<AnswerReply, GatewayError> {
        let url = self.url(lecture_id, "answer");
        self.call(Method::POST, &url, Some(&request)).await
    }

    async fn cancel(&self, lecture_id: LectureId) -> Result<(), GatewayError> {
        let url = self.url(lecture_id, "cancel");
        self.send(Method::POST, &url, None::<&()>).await?;
        Ok(())
    }

    async fn session(&self, lecture_id: LectureId) -> Result<SessionSnapshot, GatewayError> {
        let url = self.url(lecture_id, "session");
        self.call(Method::GET, &url, None::<&()>).await
    }
}
