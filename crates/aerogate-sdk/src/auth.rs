//! Token acquisition, refresh and distribution.

use std::sync::{Arc, Mutex, RwLock};

use aerogate_core::models::Token;
use aerogate_core::{Error, Outcome};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use crate::request::AuthorizedRequester;

/// Parameters for the anonymous token exchange.
#[derive(Debug, Clone)]
pub struct AnonymousAuth {
    /// Operator-chosen identifier the token is minted for.
    pub id: String,
}

/// Parameters for the OAuth password grant.
#[derive(Debug, Clone)]
pub struct PasswordAuth {
    pub client_id: String,
    pub username: String,
    pub password: String,
}

/// Parameters for silently refreshing a previous OAuth authentication.
#[derive(Debug, Clone)]
pub struct RenewAuth {
    pub client_id: String,
    pub refresh_token: String,
}

/// Pull interface over the canonical token plus the authentication flows
/// that replace it. Every flow stores the resulting token and notifies
/// all attached listeners, in registration order, before its outcome is
/// reported to the caller. On failure listeners see nothing.
#[async_trait]
pub trait Authenticator: Send + Sync {
    fn current(&self) -> Option<Token>;

    async fn authenticate_anonymously(&self, params: AnonymousAuth) -> Outcome<Token, Error>;

    async fn authenticate_with_password(&self, params: PasswordAuth) -> Outcome<Token, Error>;

    async fn renew_authentication(&self, params: RenewAuth) -> Outcome<Token, Error>;
}

#[derive(Debug, Deserialize)]
struct AnonymousTokenResponse {
    id_token: String,
}

#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    id_token: String,
    access_token: String,
    refresh_token: String,
}

#[derive(Debug, Deserialize)]
struct RenewTokenResponse {
    id_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

const ANONYMOUS_TOKEN_PATH: &str = "/auth/v1/anonymous/token";
const OAUTH_TOKEN_PATH: &str = "/oauth/token";

/// Authenticator backed by the service's SSO endpoints.
///
/// Holds the canonical token behind a lock so concurrent readers on the
/// worker-pool backend observe a consistent snapshot.
pub struct SsoAuthenticator {
    api: Arc<AuthorizedRequester>,
    sso: Arc<AuthorizedRequester>,
    token: RwLock<Option<Token>>,
    listeners: Mutex<Vec<Arc<AuthorizedRequester>>>,
}

impl SsoAuthenticator {
    pub fn new(api: Arc<AuthorizedRequester>, sso: Arc<AuthorizedRequester>) -> Self {
        Self {
            api,
            sso,
            token: RwLock::new(None),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Register a requester for token updates. It is seeded with the
    /// current token immediately.
    pub fn attach(&self, requester: Arc<AuthorizedRequester>) {
        requester.set_auth_token(self.current().map(|t| t.id().to_string()));
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(requester);
    }

    /// Store an externally acquired token and broadcast it. A token that
    /// does not supersede the stored one (older issued-at) is ignored.
    pub fn update_token(&self, token: Token) {
        self.store_and_publish(token);
    }

    fn store_and_publish(&self, token: Token) {
        {
            let mut guard = self.token.write().unwrap_or_else(|e| e.into_inner());
            match guard.as_ref() {
                Some(current) if !token.supersedes(current) => {
                    tracing::debug!("ignoring stale token update");
                    return;
                }
                _ => *guard = Some(token.clone()),
            }
        }

        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let bearer = token.id().to_string();
        for listener in listeners {
            listener.set_auth_token(Some(bearer.clone()));
        }
    }
}

#[async_trait]
impl Authenticator for SsoAuthenticator {
    fn current(&self) -> Option<Token> {
        self.token.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn authenticate_anonymously(&self, params: AnonymousAuth) -> Outcome<Token, Error> {
        let result: Result<AnonymousTokenResponse, Error> = self
            .api
            .post(ANONYMOUS_TOKEN_PATH, &serde_json::json!({ "user_id": params.id }))
            .await;

        match result {
            Ok(response) => {
                let token = Token::Anonymous {
                    id: response.id_token,
                    issued_at: Utc::now(),
                };
                self.store_and_publish(token.clone());
                Outcome::value(token)
            }
            Err(e) => Outcome::error(Error::Authentication(format!(
                "anonymous token exchange failed: {e}"
            ))),
        }
    }

    async fn authenticate_with_password(&self, params: PasswordAuth) -> Outcome<Token, Error> {
        let form = [
            ("grant_type", "password".to_string()),
            ("client_id", params.client_id),
            ("username", params.username),
            ("password", params.password),
        ];
        let result: Result<OAuthTokenResponse, Error> =
            self.sso.post_form(OAUTH_TOKEN_PATH, &form).await;

        match result {
            Ok(response) => {
                let token = Token::OAuth {
                    id: response.id_token,
                    access: response.access_token,
                    refresh: response.refresh_token,
                    issued_at: Utc::now(),
                };
                self.store_and_publish(token.clone());
                Outcome::value(token)
            }
            Err(e) => Outcome::error(Error::Authentication(format!(
                "password authentication failed: {e}"
            ))),
        }
    }

    async fn renew_authentication(&self, params: RenewAuth) -> Outcome<Token, Error> {
        let form = [
            ("grant_type", "refresh_token".to_string()),
            ("client_id", params.client_id),
            ("refresh_token", params.refresh_token),
        ];
        let result: Result<RenewTokenResponse, Error> =
            self.sso.post_form(OAUTH_TOKEN_PATH, &form).await;

        match result {
            Ok(response) => {
                let token = Token::Refreshed {
                    id: response.id_token,
                    expires_in_secs: response.expires_in.unwrap_or(3600),
                    issued_at: Utc::now(),
                };
                self.store_and_publish(token.clone());
                Outcome::value(token)
            }
            Err(e) => Outcome::error(Error::Authentication(format!(
                "token renewal failed: {e}"
            ))),
        }
    }
}
