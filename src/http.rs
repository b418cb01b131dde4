//! Authenticated JSON client for the WordPress REST API
//!
//! Every response body is inspected for an in-band `code` field: WordPress
//! reports some failures that way, so the status code alone is not enough.

use reqwest::{Method, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

use crate::error::ApiError;
use crate::models::Credentials;

/// HTTP settings applied to the underlying client
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub user_agent: String,
    pub timeout: Option<Duration>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            user_agent: format!("wp-todo/{}", env!("CARGO_PKG_VERSION")),
            timeout: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WpClient {
    http: reqwest::Client,
    credentials: Credentials,
    /// Origin credentials may be sent to (`scheme://host:port`).
    trusted_origin: Option<String>,
}

impl WpClient {
    pub fn new(options: &ClientOptions) -> Result<Self, ApiError> {
        let mut builder = reqwest::Client::builder().user_agent(options.user_agent.clone());
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(|source| ApiError::Transport {
            url: String::new(),
            source,
        })?;

        Ok(Self {
            http,
            credentials: Credentials::None,
            trusted_origin: None,
        })
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.credentials = credentials;
    }

    /// Restrict credentials to the origin of `root`.
    pub fn trust_origin_of(&mut self, root: &str) -> Result<(), ApiError> {
        self.trusted_origin = Some(origin_of(root)?);
        Ok(())
    }

    pub fn clear_trust(&mut self) {
        self.trusted_origin = None;
    }

    pub async fn get(&self, url: &str) -> Result<Value, ApiError> {
        self.fetch(Method::GET, url, None::<&()>).await
    }

    pub async fn get_as<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        let body = self.get(url).await?;
        serde_json::from_value(body).map_err(|source| ApiError::Shape {
            url: url.to_string(),
            source,
        })
    }

    pub async fn post<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<Value, ApiError> {
        self.fetch(Method::POST, url, Some(body)).await
    }

    pub async fn delete(&self, url: &str) -> Result<Value, ApiError> {
        self.fetch(Method::DELETE, url, None::<&()>).await
    }

    /// Unauthenticated GET. Returns the final URL after redirects with the body.
    pub async fn get_anonymous(&self, url: &str) -> Result<(Url, Value), ApiError> {
        let request = self.http.get(parse_url(url)?).header("Accept", "application/json");
        let response = request.send().await.map_err(|source| ApiError::Transport {
            url: url.to_string(),
            source,
        })?;
        let final_url = response.url().clone();
        let body = classify(url, response).await?;
        Ok((final_url, body))
    }

    /// Issue one request with the configured credentials.
    pub async fn fetch<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> Result<Value, ApiError> {
        let target = parse_url(url)?;
        let mut request = self
            .http
            .request(method.clone(), target.clone())
            .header("Accept", "application/json");

        if self.credentials.is_present() {
            self.check_origin(&target)?;
        }
        request = match &self.credentials {
            Credentials::Bearer { token } => request.bearer_auth(token),
            Credentials::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
            Credentials::None => request,
        };
        if let Some(body) = body {
            request = request.json(body);
        }

        tracing::debug!(method = %method, url = %url, "REST request");

        let response = request.send().await.map_err(|source| ApiError::Transport {
            url: url.to_string(),
            source,
        })?;

        classify(url, response).await
    }

    fn check_origin(&self, target: &Url) -> Result<(), ApiError> {
        let origin = target.origin().ascii_serialization();
        match &self.trusted_origin {
            Some(trusted) if *trusted == origin => Ok(()),
            Some(trusted) => Err(ApiError::UntrustedOrigin {
                url: target.to_string(),
                trusted: trusted.clone(),
            }),
            None => Err(ApiError::UntrustedOrigin {
                url: target.to_string(),
                trusted: "<none>".to_string(),
            }),
        }
    }
}

/// Decode a response, turning `{"code": ...}` bodies into errors.
async fn classify(url: &str, response: reqwest::Response) -> Result<Value, ApiError> {
    let status = response.status();
    let text = response.text().await.map_err(|source| ApiError::Transport {
        url: url.to_string(),
        source,
    })?;

    let body: Value = serde_json::from_str(&text).map_err(|source| ApiError::Decode {
        url: url.to_string(),
        status: status.as_u16(),
        source,
    })?;

    if let Some(code) = body.get("code").and_then(Value::as_str) {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        tracing::warn!(url = %url, code = %code, status = status.as_u16(), "API error");
        return Err(ApiError::Remote {
            code: code.to_string(),
            message,
            status: status.as_u16(),
            payload: body,
        });
    }

    if !status.is_success() {
        return Err(ApiError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    Ok(body)
}

fn parse_url(url: &str) -> Result<Url, ApiError> {
    Url::parse(url).map_err(|e| ApiError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

/// `scheme://host[:port]` of a URL
pub fn origin_of(url: &str) -> Result<String, ApiError> {
    Ok(parse_url(url)?.origin().ascii_serialization())
}
