use crate::error::SourceError;
use crate::throttle::RequestPolicy;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER, USER_AGENT};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use vulngraph_core::config::SourceConfig;

const CLIENT_USER_AGENT: &str = concat!("vulngraph/", env!("CARGO_PKG_VERSION"));

/// HTTP access to one advisory source, always routed through its
/// [`RequestPolicy`].
#[derive(Clone)]
pub struct SourceClient {
    client: reqwest::Client,
    policy: Arc<RequestPolicy>,
}

impl SourceClient {
    pub fn new(source: &str, config: &SourceConfig) -> Result<Self, SourceError> {
        Self::with_policy(Arc::new(RequestPolicy::from_config(source, config)))
    }

    pub fn with_policy(policy: Arc<RequestPolicy>) -> Result<Self, SourceError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| SourceError::SourceUnavailable(format!("http client: {e}")))?;
        Ok(Self { client, policy })
    }

    pub fn policy(&self) -> &RequestPolicy {
        &self.policy
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        headers: &[(&'static str, String)],
        cancel: &CancellationToken,
    ) -> Result<T, SourceError> {
        let headers = header_map(headers)?;
        self.policy
            .execute(cancel, || {
                let request = self
                    .client
                    .get(url)
                    .query(query)
                    .headers(headers.clone());
                async move {
                    debug!(url = %url, "GET");
                    let response = request.send().await.map_err(transport_error)?;
                    decode(response).await
                }
            })
            .await
    }

    /// POST and pass the decoded body through `check` inside the retry loop,
    /// so errors reported in a 200 body (GraphQL) back off like HTTP ones.
    pub async fn post_json<B, R, T, C>(
        &self,
        url: &str,
        body: &B,
        headers: &[(&'static str, String)],
        cancel: &CancellationToken,
        check: C,
    ) -> Result<T, SourceError>
    where
        B: Serialize,
        R: DeserializeOwned,
        C: Fn(R) -> Result<T, SourceError>,
    {
        let headers = header_map(headers)?;
        let check = &check;
        self.policy
            .execute(cancel, || {
                let request = self.client.post(url).json(body).headers(headers.clone());
                async move {
                    debug!(url = %url, "POST");
                    let response = request.send().await.map_err(transport_error)?;
                    check(decode::<R>(response).await?)
                }
            })
            .await
    }
}

fn header_map(headers: &[(&'static str, String)]) -> Result<HeaderMap, SourceError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let value = HeaderValue::from_str(value)
            .map_err(|_| SourceError::MalformedResponse(format!("invalid header value for {name}")))?;
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| SourceError::MalformedResponse(format!("invalid header name {name}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

fn transport_error(err: reqwest::Error) -> SourceError {
    SourceError::SourceUnavailable(err.to_string())
}

/// Map the status line onto the source error taxonomy, then parse the body.
async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, SourceError> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return Err(SourceError::RateLimited { retry_after });
    }
    if status.is_server_error() {
        return Err(SourceError::SourceUnavailable(format!("HTTP {status}")));
    }
    if !status.is_success() {
        return Err(SourceError::MalformedResponse(format!("HTTP {status}")));
    }

    let body = response.bytes().await.map_err(transport_error)?;
    serde_json::from_slice(&body).map_err(|e| SourceError::MalformedResponse(e.to_string()))
}
