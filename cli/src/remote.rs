use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use fitledger_core::models::FieldMap;
use fitledger_core::sync::{ErrorCode, RemoteError, RemoteStore};

/// Remote document store reached over HTTP.
///
/// Documents live at `{base}/v1/users/{user_id}`: `GET` returns the JSON
/// object (404 when absent), `PATCH` merges the given fields into it.
pub struct HttpRemoteStore {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl HttpRemoteStore {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("fitledger/{}", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(10))
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn user_url(&self, user_id: &str) -> String {
        format!("{}/v1/users/{user_id}", self.base_url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.api_key {
            Some(ref key) => request.bearer_auth(key),
            None => request,
        }
    }
}

/// Map a non-success HTTP status onto the store's error codes.
pub(crate) fn status_code(status: StatusCode) -> ErrorCode {
    match status {
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => ErrorCode::Unavailable,
        StatusCode::GATEWAY_TIMEOUT | StatusCode::REQUEST_TIMEOUT => ErrorCode::DeadlineExceeded,
        StatusCode::TOO_MANY_REQUESTS => ErrorCode::ResourceExhausted,
        StatusCode::INTERNAL_SERVER_ERROR => ErrorCode::Internal,
        StatusCode::CONFLICT => ErrorCode::Aborted,
        StatusCode::UNAUTHORIZED => ErrorCode::Unauthenticated,
        StatusCode::FORBIDDEN => ErrorCode::PermissionDenied,
        StatusCode::NOT_FOUND => ErrorCode::NotFound,
        StatusCode::BAD_REQUEST | StatusCode::PAYLOAD_TOO_LARGE => ErrorCode::InvalidArgument,
        other => ErrorCode::Unknown(format!("http-{}", other.as_u16())),
    }
}

async fn error_from_response(response: reqwest::Response) -> RemoteError {
    let status = response.status();
    let message = match response.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status.to_string(),
    };
    RemoteError::new(status_code(status), message)
}

fn transport_error(err: &reqwest::Error) -> RemoteError {
    RemoteError::new(ErrorCode::Unavailable, format!("request failed: {err}"))
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn get(&self, user_id: &str) -> Result<Option<FieldMap>, RemoteError> {
        let response = self
            .authorize(self.client.get(self.user_url(user_id)))
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        match response.json::<Value>().await {
            Ok(Value::Object(doc)) => Ok(Some(doc)),
            Ok(_) => Err(RemoteError::new(
                ErrorCode::Internal,
                "remote document is not a JSON object",
            )),
            Err(e) => Err(transport_error(&e)),
        }
    }

    async fn update(&self, user_id: &str, fields: &FieldMap) -> Result<(), RemoteError> {
        let response = self
            .authorize(self.client.patch(self.user_url(user_id)))
            .json(fields)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from_response(response).await)
        }
    }
}
