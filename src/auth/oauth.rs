//! OAuth2 authorization code client for Azure AD.

use crate::config::ProviderConfig;
use crate::error::{AppError, AuthError, UsageError};
use anyhow::{Context, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};
use url::Url;

/// HTTP request timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// HTTP connection timeout.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Tokens are considered expired this long before their actual expiry.
const EXPIRY_DELTA_SECONDS: i64 = 10;

/// Generate a random, URL-safe `state` value for one authorization attempt.
pub fn generate_state() -> String {
    let mut rng = rand::thread_rng();
    let state_bytes: Vec<u8> = (0..16).map(|_| rng.gen()).collect();
    URL_SAFE_NO_PAD.encode(&state_bytes)
}

/// OAuth2 client for the authorization code grant.
pub struct OAuth2Client {
    provider: ProviderConfig,
    http_client: reqwest::Client,
}

impl OAuth2Client {
    /// Create a new OAuth2 client for `provider`.
    pub fn new(provider: ProviderConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            provider,
            http_client,
        })
    }

    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    /// Build the URL the user must visit to grant consent.
    pub fn authorization_url(&self, state: &str) -> Result<Url, AuthError> {
        let mut url = Url::parse(&self.provider.auth_url)
            .map_err(|e| AuthError::InvalidEndpoint(format!("{}: {}", self.provider.auth_url, e)))?;

        url.query_pairs_mut()
            .append_pair("access_type", "online")
            .append_pair("client_id", &self.provider.client_id)
            .append_pair("redirect_uri", &self.provider.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.provider.scopes.join(" "))
            .append_pair("state", state);

        Ok(url)
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(&self, code: &str) -> Result<Token, AuthError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.provider.redirect_uri.as_str()),
            ("client_id", self.provider.client_id.as_str()),
            ("client_secret", self.provider.client_secret.as_str()),
        ];

        let response = self
            .request_token(&params, AuthError::TokenExchangeFailed)
            .await?;

        info!("Authorization code exchanged for {} token", response.token_type);
        debug!("Granted scopes: {}", response.scope);
        Ok(response.into_token(Utc::now()))
    }

    /// Obtain a fresh access token with `refresh_token`.
    ///
    /// The returned token keeps `refresh_token` when the provider does not rotate it.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<Token, AuthError> {
        let scope = self.provider.scopes.join(" ");
        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.provider.client_id.as_str()),
            ("client_secret", self.provider.client_secret.as_str()),
        ];
        if !scope.is_empty() {
            params.push(("scope", scope.as_str()));
        }

        let response = self
            .request_token(&params, AuthError::TokenRefreshFailed)
            .await?;

        let mut token = response.into_token(Utc::now());
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token.to_string());
        }

        info!("Access token refreshed");
        Ok(token)
    }

    /// POST a form to the token endpoint and parse the token response.
    async fn request_token(
        &self,
        params: &[(&str, &str)],
        fail: fn(String) -> AuthError,
    ) -> Result<TokenResponse, AuthError> {
        debug!("Requesting token from {}", self.provider.token_url);

        let response = self
            .http_client
            .post(&self.provider.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(params)
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| fail(e.to_string()))?;

        if !status.is_success() {
            error!(
                "Token endpoint returned HTTP {} - {}",
                status,
                String::from_utf8_lossy(&body)
            );
            let detail = match serde_json::from_slice::<ProviderError>(&body) {
                Ok(err) => format!("HTTP {}: {}", status.as_u16(), err),
                Err(_) => format!("HTTP {}", status.as_u16()),
            };
            return Err(fail(detail));
        }

        let token_response: TokenResponse =
            serde_json::from_slice(&body).map_err(|e| fail(e.to_string()))?;

        if token_response.access_token.is_empty() {
            return Err(fail("server response missing access_token".to_string()));
        }

        Ok(token_response)
    }
}

/// Error body returned by the token endpoint.
#[derive(Debug, Deserialize)]
struct ProviderError {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error_description {
            Some(description) => write!(f, "{}: {}", self.error, description),
            None => f.write_str(&self.error),
        }
    }
}

/// Token response from Azure AD.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default, deserialize_with = "deserialize_expires_in")]
    pub expires_in: Option<u64>,
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: String,
}

impl TokenResponse {
    /// Convert into a token record, anchoring the lifetime at `now`.
    pub fn into_token(self, now: DateTime<Utc>) -> Token {
        let expiry = self
            .expires_in
            .filter(|seconds| *seconds > 0)
            .map(|seconds| now + ChronoDuration::seconds(seconds as i64));

        Token {
            access_token: self.access_token,
            token_type: self.token_type,
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            expiry,
        }
    }
}

/// `expires_in` arrives as a number from v2.0 endpoints and as a string from some others.
fn deserialize_expires_in<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ExpiresIn {
        Seconds(u64),
        Text(String),
    }

    match Option::<ExpiresIn>::deserialize(deserializer)? {
        None => Ok(None),
        Some(ExpiresIn::Seconds(seconds)) => Ok(Some(seconds)),
        Some(ExpiresIn::Text(text)) if text.is_empty() => Ok(None),
        Some(ExpiresIn::Text(text)) => text
            .parse()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// Access/refresh token bundle obtained from a successful exchange.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

impl Token {
    /// Whether the token should no longer be presented at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => expiry - ChronoDuration::seconds(EXPIRY_DELTA_SECONDS) < now,
            None => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// Query parameters the provider appends to the redirect URI.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// An authorization code together with the state it was issued for, if known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationCode {
    pub code: String,
    pub state: Option<String>,
}

impl AuthorizationCode {
    /// Reject the code if it carries a state other than `expected`.
    ///
    /// Codes pasted without their redirect URL carry no state and are accepted.
    pub fn verify_state(&self, expected: &str) -> Result<(), AuthError> {
        match &self.state {
            Some(state) if state != expected => Err(AuthError::StateValidationFailed),
            _ => Ok(()),
        }
    }
}

impl CallbackParams {
    /// Extract the authorization code, surfacing provider errors first.
    pub fn into_authorization_code(self) -> Result<AuthorizationCode, AppError> {
        if let Some(error) = self.error {
            let description = self.error_description.unwrap_or(error);
            return Err(AuthError::OAuthFailed(description).into());
        }

        match self.code {
            Some(code) if !code.is_empty() => Ok(AuthorizationCode {
                code,
                state: self.state,
            }),
            _ => Err(UsageError::MissingParameter("code").into()),
        }
    }

    fn from_url(url: &Url) -> Self {
        let mut params = Self::default();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => params.code = Some(value.into_owned()),
                "state" => params.state = Some(value.into_owned()),
                "error" => params.error = Some(value.into_owned()),
                "error_description" => params.error_description = Some(value.into_owned()),
                _ => {}
            }
        }
        params
    }
}

/// Parse what the operator pasted: either a bare code or the full redirect URL.
pub fn parse_callback_input(input: &str) -> Result<AuthorizationCode, AppError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(UsageError::EmptyInput.into());
    }

    match Url::parse(input) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {
            CallbackParams::from_url(&url).into_authorization_code()
        }
        _ => Ok(AuthorizationCode {
            code: input.to_string(),
            state: None,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::secure::SecureString;
    use mockito::{Matcher, Server};
    use std::collections::HashMap;

    fn test_provider(base_url: &str) -> ProviderConfig {
        ProviderConfig {
            client_id: "client-123".into(),
            client_secret: SecureString::from("secret-456"),
            auth_url: format!("{}/authorize", base_url),
            token_url: format!("{}/token", base_url),
            scopes: vec!["User.Read".into(), "offline_access".into()],
            redirect_uri: "http://localhost:8080/auth".into(),
        }
    }

    #[test]
    fn test_state_generation() {
        let a = generate_state();
        let b = generate_state();

        // 16 bytes encode to 22 base64url characters
        assert_eq!(a.len(), 22);
        assert_ne!(a, b);
    }

    #[test]
    fn test_authorization_url() {
        let client = OAuth2Client::new(ProviderConfig::azure_ad(
            "client-123",
            SecureString::from("secret"),
            "contoso",
            "User.Read offline_access",
            "http://localhost:8080/auth",
        ))
        .unwrap();

        let url = client.authorization_url("xyz").unwrap();
        assert_eq!(url.host_str(), Some("login.microsoftonline.com"));
        assert_eq!(url.path(), "/contoso/oauth2/v2.0/authorize");

        let pairs: HashMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["client_id"], "client-123");
        assert_eq!(pairs["redirect_uri"], "http://localhost:8080/auth");
        assert_eq!(pairs["scope"], "User.Read offline_access");
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["state"], "xyz");
    }

    #[test]
    fn test_authorization_url_invalid_endpoint() {
        let mut provider = test_provider("http://localhost");
        provider.auth_url = "not a url".into();
        let client = OAuth2Client::new(provider).unwrap();

        let result = client.authorization_url("state");
        assert!(matches!(result, Err(AuthError::InvalidEndpoint(_))));
    }

    #[tokio::test]
    async fn test_exchange_code_success() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("code".into(), "good-code".into()),
                Matcher::UrlEncoded("client_id".into(), "client-123".into()),
                Matcher::UrlEncoded("client_secret".into(), "secret-456".into()),
                Matcher::UrlEncoded("redirect_uri".into(), "http://localhost:8080/auth".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"access_token":"abc","token_type":"Bearer","refresh_token":"r1","expires_in":3600}"#,
            )
            .create_async()
            .await;

        let client = OAuth2Client::new(test_provider(&server.url())).unwrap();
        let before = Utc::now();
        let token = client.exchange_code("good-code").await.unwrap();

        mock.assert_async().await;
        assert_eq!(token.access_token, "abc");
        assert_eq!(token.token_type, "Bearer");
        assert_eq!(token.refresh_token.as_deref(), Some("r1"));

        let expiry = token.expiry.unwrap();
        assert!(expiry >= before + ChronoDuration::seconds(3600));
        assert!(!token.is_expired());
    }

    #[tokio::test]
    async fn test_exchange_code_without_expiry() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(r#"{"access_token":"abc","token_type":"Bearer"}"#)
            .create_async()
            .await;

        let client = OAuth2Client::new(test_provider(&server.url())).unwrap();
        let token = client.exchange_code("code").await.unwrap();

        assert_eq!(
            serde_json::to_value(&token).unwrap(),
            serde_json::json!({"access_token": "abc", "token_type": "Bearer"})
        );
    }

    #[tokio::test]
    async fn test_exchange_code_provider_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant","error_description":"AADSTS70008: code expired"}"#)
            .create_async()
            .await;

        let client = OAuth2Client::new(test_provider(&server.url())).unwrap();
        let err = client.exchange_code("stale").await.unwrap_err();

        match err {
            AuthError::TokenExchangeFailed(msg) => {
                assert!(msg.contains("HTTP 400"));
                assert!(msg.contains("invalid_grant"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exchange_code_missing_access_token() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(r#"{"token_type":"Bearer"}"#)
            .create_async()
            .await;

        let client = OAuth2Client::new(test_provider(&server.url())).unwrap();
        let err = client.exchange_code("code").await.unwrap_err();
        assert!(err.to_string().contains("missing access_token"));
    }

    #[tokio::test]
    async fn test_exchange_code_network_failure() {
        // Nothing listens on port 9 on the loopback interface
        let client = OAuth2Client::new(test_provider("http://127.0.0.1:9")).unwrap();
        let result = client.exchange_code("code").await;
        assert!(matches!(result, Err(AuthError::TokenExchangeFailed(_))));
    }

    #[tokio::test]
    async fn test_refresh_keeps_old_refresh_token() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "r1".into()),
                Matcher::UrlEncoded("scope".into(), "User.Read offline_access".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"fresh","token_type":"Bearer","expires_in":"3599"}"#)
            .create_async()
            .await;

        let client = OAuth2Client::new(test_provider(&server.url())).unwrap();
        let token = client.refresh_token("r1").await.unwrap();

        mock.assert_async().await;
        assert_eq!(token.access_token, "fresh");
        assert_eq!(token.refresh_token.as_deref(), Some("r1"));
        assert!(token.expiry.is_some());
    }

    #[test]
    fn test_expires_in_variants() {
        let numeric: TokenResponse =
            serde_json::from_str(r#"{"access_token":"a","expires_in":60}"#).unwrap();
        assert_eq!(numeric.expires_in, Some(60));

        let text: TokenResponse =
            serde_json::from_str(r#"{"access_token":"a","expires_in":"60"}"#).unwrap();
        assert_eq!(text.expires_in, Some(60));

        let absent: TokenResponse = serde_json::from_str(r#"{"access_token":"a"}"#).unwrap();
        assert_eq!(absent.expires_in, None);

        let bogus = serde_json::from_str::<TokenResponse>(r#"{"access_token":"a","expires_in":"soon"}"#);
        assert!(bogus.is_err());
    }

    #[test]
    fn test_token_expiry_window() {
        let now = Utc::now();
        let token = Token {
            access_token: "a".into(),
            token_type: "Bearer".into(),
            refresh_token: None,
            expiry: Some(now + ChronoDuration::seconds(5)),
        };
        // Inside the early-expiry window
        assert!(token.is_expired_at(now));

        let later = Token {
            expiry: Some(now + ChronoDuration::seconds(60)),
            ..token.clone()
        };
        assert!(!later.is_expired_at(now));

        let forever = Token {
            expiry: None,
            ..token
        };
        assert!(!forever.is_expired_at(now));
    }

    #[test]
    fn test_token_debug_is_redacted() {
        let token = Token {
            access_token: "very-secret".into(),
            token_type: "Bearer".into(),
            refresh_token: Some("also-secret".into()),
            expiry: None,
        };
        let output = format!("{:?}", token);
        assert!(!output.contains("very-secret"));
        assert!(!output.contains("also-secret"));
    }

    #[test]
    fn test_parse_callback_bare_code() {
        let code = parse_callback_input("XYZ123\n").unwrap();
        assert_eq!(code.code, "XYZ123");
        assert_eq!(code.state, None);
    }

    #[test]
    fn test_parse_callback_url() {
        let code =
            parse_callback_input("http://localhost:8080/auth?code=XYZ123&state=state").unwrap();
        assert_eq!(code.code, "XYZ123");
        assert_eq!(code.state.as_deref(), Some("state"));
    }

    #[test]
    fn test_parse_callback_error() {
        let url = "http://localhost:8080/auth?error=access_denied&error_description=User%20cancelled";
        let result = parse_callback_input(url);
        match result {
            Err(AppError::Auth(AuthError::OAuthFailed(msg))) => assert_eq!(msg, "User cancelled"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_parse_callback_missing_code() {
        let result = parse_callback_input("http://localhost:8080/auth?state=xyz789");
        assert!(matches!(
            result,
            Err(AppError::Usage(UsageError::MissingParameter("code")))
        ));
    }

    #[test]
    fn test_parse_callback_empty() {
        let result = parse_callback_input("   ");
        assert!(matches!(result, Err(AppError::Usage(UsageError::EmptyInput))));
    }

    #[test]
    fn test_verify_state() {
        let with_state = AuthorizationCode {
            code: "c".into(),
            state: Some("expected".into()),
        };
        assert!(with_state.verify_state("expected").is_ok());
        assert!(matches!(
            with_state.verify_state("other"),
            Err(AuthError::StateValidationFailed)
        ));

        let bare = AuthorizationCode {
            code: "c".into(),
            state: None,
        };
        assert!(bare.verify_state("anything").is_ok());
    }
}
