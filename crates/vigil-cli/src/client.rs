//! HTTP client for the Vigil API.

use crate::config::CliConfig;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{0}")]
    NotFound(String),
    #[error("Forbidden: {0} (set `role` to admin with `vigil config set role admin`)")]
    Forbidden(String),
    #[error("Manual refresh cooling down: {minutes} minutes remaining")]
    Cooldown { minutes: i64 },
    #[error("Server error ({status}): {message}")]
    Server { status: StatusCode, message: String },
}

pub struct ApiClient {
    client: Client,
    base_url: String,
    role: Option<String>,
    user: Option<String>,
}

impl ApiClient {
    pub fn new(config: &CliConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.api_url.trim_end_matches('/').to_string(),
            role: config.role.clone(),
            user: config.user.clone(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/api/v1{}", self.base_url, path);
        let mut req = self.client.request(method, &url);
        if let Some(role) = &self.role {
            req = req.header("x-vigil-role", role);
        }
        if let Some(user) = &self.user {
            req = req.header("x-vigil-user", user);
        }
        req
    }

    async fn send(&self, req: RequestBuilder) -> Result<Value, ApiError> {
        decode(req.send().await?).await
    }

    pub async fn list(&self) -> Result<Value, ApiError> {
        self.send(self.request(Method::GET, "/caches")).await
    }

    pub async fn get(&self, name: &str) -> Result<Value, ApiError> {
        self.send(self.request(Method::GET, &format!("/caches/{}", name)))
            .await
    }

    pub async fn status(&self, name: &str) -> Result<Value, ApiError> {
        self.send(self.request(Method::GET, &format!("/caches/{}/status", name)))
            .await
    }

    pub async fn processing(&self, name: &str) -> Result<Value, ApiError> {
        self.send(self.request(Method::GET, &format!("/caches/{}/processing", name)))
            .await
    }

    pub async fn ensure_fresh(&self, name: &str) -> Result<Value, ApiError> {
        self.send(self.request(Method::POST, &format!("/caches/{}/ensure-fresh", name)))
            .await
    }

    pub async fn refresh(&self, name: &str, wait: bool) -> Result<Value, ApiError> {
        let req = self
            .request(Method::POST, &format!("/caches/{}/refresh", name))
            .query(&[("wait", wait)]);
        self.send(req).await
    }

    pub async fn cancel(&self, name: &str) -> Result<Value, ApiError> {
        self.send(self.request(Method::POST, &format!("/caches/{}/cancel", name)))
            .await
    }

    pub async fn invalidate(&self, name: &str, reason: Option<&str>) -> Result<Value, ApiError> {
        let mut req = self.request(Method::POST, &format!("/caches/{}/invalidate", name));
        if let Some(reason) = reason {
            req = req.query(&[("reason", reason)]);
        }
        self.send(req).await
    }

    pub async fn report_usage<T: Serialize>(&self, name: &str, usage: &T) -> Result<Value, ApiError> {
        let req = self
            .request(Method::POST, &format!("/caches/{}/usage", name))
            .json(usage);
        self.send(req).await
    }

    pub async fn set_policy<T: Serialize>(
        &self,
        name: Option<&str>,
        update: &T,
    ) -> Result<Value, ApiError> {
        let path = match name {
            Some(name) => format!("/caches/{}/policy", name),
            None => "/caches/policy".to_string(),
        };
        self.send(self.request(Method::PUT, &path).json(update)).await
    }

    pub async fn initialize(&self) -> Result<Value, ApiError> {
        self.send(self.request(Method::POST, "/caches/initialize"))
            .await
    }

    pub async fn reset(&self, name: &str) -> Result<Value, ApiError> {
        self.send(self.request(Method::POST, &format!("/caches/{}/reset", name)))
            .await
    }

    pub async fn errors(&self, name: &str, limit: u32) -> Result<Value, ApiError> {
        let req = self
            .request(Method::GET, &format!("/caches/{}/errors", name))
            .query(&[("limit", limit)]);
        self.send(req).await
    }
}

/// Turn a response into its JSON body or a typed error.
async fn decode(res: Response) -> Result<Value, ApiError> {
    let status = res.status();
    let text = res.text().await?;
    let body: Value = if text.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    };
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    match status {
        s if s.is_success() => Ok(body),
        StatusCode::NOT_FOUND => Err(ApiError::NotFound(message)),
        StatusCode::FORBIDDEN => Err(ApiError::Forbidden(message)),
        StatusCode::TOO_MANY_REQUESTS => Err(ApiError::Cooldown {
            minutes: body
                .get("minutesRemaining")
                .and_then(Value::as_i64)
                .unwrap_or(0),
        }),
        _ => Err(ApiError::Server { status, message }),
    }
}
