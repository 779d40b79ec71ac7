//! HTTP requester decorated with API key and bearer token injection.

use std::sync::RwLock;

use aerogate_core::Error;
use reqwest::header::AUTHORIZATION;
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

const API_KEY_HEADER: &str = "X-API-Key";

/// Service response envelope (jsend style).
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: serde::Deserialize<'de>"))]
struct Envelope<T> {
    status: String,
    #[serde(default)]
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

/// Requester that attaches a fixed API key header and, when a token is
/// available, a bearer header to every outgoing call. Without a token the
/// request is still sent unauthenticated; rejecting it is the service's
/// job, not ours.
pub struct AuthorizedRequester {
    base: Url,
    api_key: String,
    token: RwLock<Option<String>>,
    http: reqwest::Client,
}

impl AuthorizedRequester {
    pub fn new(base: Url, api_key: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            base,
            api_key: api_key.into(),
            token: RwLock::new(None),
            http,
        }
    }

    /// Update the bearer token used by subsequent requests.
    /// Already-dispatched requests are unaffected.
    pub fn set_auth_token(&self, token: Option<String>) {
        let mut guard = self.token.write().unwrap_or_else(|e| e.into_inner());
        *guard = token;
    }

    pub fn auth_token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn url(&self, path: &str) -> Result<Url, Error> {
        self.base
            .join(path)
            .map_err(|e| Error::validation("path", e.to_string()))
    }

    fn decorate(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.header(API_KEY_HEADER, self.api_key.as_str());
        match self.auth_token() {
            Some(token) => builder.header(AUTHORIZATION, format!("Bearer {token}")),
            None => builder,
        }
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, Error> {
        let builder = self.http.get(self.url(path)?).query(query);
        unwrap_envelope(self.send(builder).await?).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, Error> {
        let builder = self.http.post(self.url(path)?).json(body);
        unwrap_envelope(self.send(builder).await?).await
    }

    pub async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let builder = self.http.post(self.url(path)?);
        unwrap_envelope(self.send(builder).await?).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let builder = self.http.delete(self.url(path)?);
        unwrap_envelope(self.send(builder).await?).await
    }

    /// POST where only the envelope status matters; some lifecycle
    /// endpoints return no payload on success.
    pub async fn post_expect_empty(&self, path: &str) -> Result<(), Error> {
        let builder = self.http.post(self.url(path)?);
        let response = self.send(builder).await?;
        let envelope: Envelope<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| Error::transport_caused_by("response decoding failed", e))?;
        if envelope.status != "success" {
            let message = envelope
                .message
                .unwrap_or_else(|| "no diagnostic message".to_string());
            return Err(Error::transport(format!(
                "service reported {}: {message}",
                envelope.status
            )));
        }
        Ok(())
    }

    /// Form-encoded POST returning the raw (non-enveloped) payload; the
    /// SSO token endpoints do not use the service envelope.
    pub async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &[(&str, String)],
    ) -> Result<T, Error> {
        let builder = self.http.post(self.url(path)?).form(form);
        let response = self.send(builder).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| Error::transport_caused_by("response decoding failed", e))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, Error> {
        let response = self
            .decorate(builder)
            .send()
            .await
            .map_err(|e| Error::transport_caused_by("request dispatch failed", e))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::Authentication(
                format!("service rejected request: {}", response.status()),
            )),
            status if !status.is_success() => {
                Err(Error::transport(format!("service returned {status}")))
            }
            _ => Ok(response),
        }
    }
}

async fn unwrap_envelope<T: DeserializeOwned>(response: Response) -> Result<T, Error> {
    let envelope: Envelope<T> = response
        .json()
        .await
        .map_err(|e| Error::transport_caused_by("response decoding failed", e))?;

    if envelope.status != "success" {
        let message = envelope
            .message
            .unwrap_or_else(|| "no diagnostic message".to_string());
        return Err(Error::transport(format!(
            "service reported {}: {message}",
            envelope.status
        )));
    }

    envelope
        .data
        .ok_or_else(|| Error::transport("service reported success without data"))
}
