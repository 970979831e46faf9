//! Interactive login and token endpoints
//!
//! The login protocol is a multi-step exchange: an init call yields a
//! status plus `_links` to the next step, credentials are posted to the
//! linked URL, and depending on the account a one-time passcode round
//! follows before the authorization code can be traded for tokens.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::auth::headers::{HeaderCache, decode_layers};
use crate::error::{VlinkError, VlinkResult};
use crate::models::{Authorization, TokenPair};

const AUTH_URL: &str = "https://volvoid.eu.volvocars.com/as/authorization.oauth2";
const TOKEN_URL: &str = "https://volvoid.eu.volvocars.com/as/token.oauth2";

const SCOPES: &[&str] = &[
    "openid",
    "conve:brake_status",
    "conve:climatization_start_stop",
    "conve:command_accessibility",
    "conve:commands",
    "conve:diagnostics_engine_status",
    "conve:diagnostics_workshop",
    "conve:doors_status",
    "conve:engine_status",
    "conve:environment",
    "conve:fuel_status",
    "conve:honk_flash",
    "conve:lock",
    "conve:lock_status",
    "conve:navigation",
    "conve:odometer_status",
    "conve:trip_statistics",
    "conve:tyre_status",
    "conve:unlock",
    "conve:vehicle_relation",
    "conve:warnings",
    "conve:windows_status",
    "energy:battery_charge_level",
    "energy:charging_connection_status",
    "energy:charging_system_status",
    "energy:electric_range",
    "energy:estimated_charging_time",
    "energy:recharge_status",
];

/// Response keys never written to the logs.
const REDACT_KEYS: &[&str] = &[
    "access_token",
    "code",
    "id",
    "id_token",
    "href",
    "refresh_token",
    "target",
    "username",
];

/// Endpoints used by the login flow. Overridable for tests.
#[derive(Debug, Clone)]
pub struct AuthEndpoints {
    pub authorization_url: String,
    pub token_url: String,
}

impl Default for AuthEndpoints {
    fn default() -> Self {
        Self {
            authorization_url: AUTH_URL.to_string(),
            token_url: TOKEN_URL.to_string(),
        }
    }
}

/// Drives the interactive login state machine and the token refresh call.
pub struct AuthClient {
    http: reqwest::Client,
    headers: Arc<HeaderCache>,
    endpoints: AuthEndpoints,
}

impl AuthClient {
    pub fn new(http: reqwest::Client, headers: Arc<HeaderCache>) -> Self {
        Self::with_endpoints(http, headers, AuthEndpoints::default())
    }

    pub fn with_endpoints(
        http: reqwest::Client,
        headers: Arc<HeaderCache>,
        endpoints: AuthEndpoints,
    ) -> Self {
        Self {
            http,
            headers,
            endpoints,
        }
    }

    /// Start the login flow with account credentials.
    ///
    /// Resolves to [`Authorization::OtpRequired`] when the account needs a
    /// second factor, or [`Authorization::Completed`] when the flow finished
    /// in one pass. Any other protocol status is an authentication failure.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> VlinkResult<Authorization> {
        let mut body = self.auth_init().await?;

        if body.status() == "USERNAME_PASSWORD_REQUIRED" {
            let url = body.link("checkUsernamePassword")?;
            body = self.check_credentials(&url, username, password).await?;
        }

        match body.status() {
            "OTP_REQUIRED" => Ok(Authorization::OtpRequired {
                next_url: format!("{}?action=checkOtp", body.link("checkOtp")?),
            }),
            "COMPLETED" => self.exchange_code(&body).await,
            other => Err(VlinkError::auth(format!(
                "unhandled authentication status '{other}'"
            ))),
        }
    }

    /// Submit the one-time passcode collected from the user.
    pub async fn submit_otp(&self, next_url: &str, otp: &str) -> VlinkResult<Authorization> {
        let body = self.send_otp(next_url, otp).await?;

        match body.status() {
            "OTP_VERIFIED" => {
                let url = format!(
                    "{}?action=continueAuthentication",
                    body.link("continueAuthentication")?
                );
                let body = self.continue_auth(&url).await?;
                match body.status() {
                    "COMPLETED" => self.exchange_code(&body).await,
                    other => Err(VlinkError::auth(format!(
                        "unhandled authentication status '{other}'"
                    ))),
                }
            }
            "COMPLETED" => self.exchange_code(&body).await,
            other => Err(VlinkError::auth(format!(
                "unhandled authentication status '{other}'"
            ))),
        }
    }

    /// Trade a refresh token for a fresh token pair.
    ///
    /// A connection-level failure maps to [`VlinkError::NotReady`] so the
    /// caller retries on its normal schedule; a rejected token is an
    /// authentication failure.
    pub async fn refresh_token(&self, refresh_token: &str) -> VlinkResult<Authorization> {
        let token = self
            .post_token(
                "token refresh",
                &[
                    ("refresh_token", refresh_token),
                    ("grant_type", "refresh_token"),
                ],
            )
            .await?;
        Ok(Authorization::Completed { token })
    }

    async fn auth_init(&self) -> VlinkResult<AuthResponse> {
        let (name, value) = self.default_header().await?;
        let client_id = self.client_id().await?;
        let scope = SCOPES.join(" ");
        let form = [
            ("client_id", client_id.as_str()),
            ("response_type", "code"),
            ("response_mode", "pi.flow"),
            ("acr_values", "urn:volvoid:aal:bronze:2sv"),
            ("scope", scope.as_str()),
        ];

        debug!("request [auth init]");
        let response = self
            .http
            .post(&self.endpoints.authorization_url)
            .header(name.as_str(), value.as_str())
            .form(&form)
            .send()
            .await
            .map_err(|e| VlinkError::auth(format!("auth init request failed: {e}")))?;

        self.read_auth_body("auth init", response).await
    }

    async fn check_credentials(
        &self,
        url: &str,
        username: &str,
        password: &str,
    ) -> VlinkResult<AuthResponse> {
        let (name, value) = self.default_header().await?;

        debug!("request [credentials]");
        let response = self
            .http
            .post(url)
            .header(name.as_str(), value.as_str())
            .query(&[("action", "checkUsernamePassword")])
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await
            .map_err(|e| VlinkError::auth(format!("credentials request failed: {e}")))?;

        self.read_auth_body("credentials", response).await
    }

    async fn send_otp(&self, url: &str, otp: &str) -> VlinkResult<AuthResponse> {
        let (name, value) = self.default_header().await?;

        debug!("request [OTP]");
        let response = self
            .http
            .post(url)
            .header(name.as_str(), value.as_str())
            .json(&json!({ "otp": otp }))
            .send()
            .await
            .map_err(|e| VlinkError::auth(format!("OTP request failed: {e}")))?;

        self.read_auth_body("OTP", response).await
    }

    async fn continue_auth(&self, url: &str) -> VlinkResult<AuthResponse> {
        let (name, value) = self.default_header().await?;

        debug!("request [auth cont]");
        let response = self
            .http
            .get(url)
            .header(name.as_str(), value.as_str())
            .send()
            .await
            .map_err(|e| VlinkError::auth(format!("auth continuation request failed: {e}")))?;

        self.read_auth_body("auth cont", response).await
    }

    async fn exchange_code(&self, body: &AuthResponse) -> VlinkResult<Authorization> {
        let code = body
            .authorize
            .as_ref()
            .map(|a| a.code.clone())
            .ok_or_else(|| {
                VlinkError::auth("completed response carries no authorization code")
            })?;

        let token = self
            .post_token(
                "tokens",
                &[("code", code.as_str()), ("grant_type", "authorization_code")],
            )
            .await?;
        Ok(Authorization::Completed { token })
    }

    async fn post_token(&self, label: &str, form: &[(&str, &str)]) -> VlinkResult<TokenPair> {
        let headers = self.all_headers().await?;

        debug!("request [{label}]");
        let mut request = self.http.post(&self.endpoints.token_url).form(form);
        for (name, value) in &headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request.send().await.map_err(|e| {
            VlinkError::not_ready(format!("{label} request failed: {e}"))
        })?;

        let body = self.read_body(label, response).await?;
        serde_json::from_value(body)
            .map_err(|e| VlinkError::auth(format!("{label} response malformed: {e}")))
    }

    async fn read_auth_body(
        &self,
        label: &str,
        response: reqwest::Response,
    ) -> VlinkResult<AuthResponse> {
        let body = self.read_body(label, response).await?;
        serde_json::from_value(body)
            .map_err(|e| VlinkError::auth(format!("{label} response malformed: {e}")))
    }

    async fn read_body(&self, label: &str, response: reqwest::Response) -> VlinkResult<Value> {
        let status = response.status();
        debug!("request [{label}] status: {status}");

        let body: Value = response
            .json()
            .await
            .map_err(|e| VlinkError::auth(format!("{label} returned an invalid body: {e}")))?;
        debug!("request [{label}] response: {}", redacted(&body));

        if !status.is_success() {
            return Err(VlinkError::auth(format!("{label} returned status {status}")));
        }
        Ok(body)
    }

    /// Header sent on every interactive auth call.
    async fn default_header(&self) -> VlinkResult<(String, String)> {
        let document = self
            .headers
            .get()
            .await
            .map_err(|e| VlinkError::auth(e.to_string()))?;
        header_pair(document, "p")
    }

    /// Headers sent on token endpoint calls: the default pair plus the
    /// authorization entry.
    async fn all_headers(&self) -> VlinkResult<Vec<(String, String)>> {
        let document = self
            .headers
            .get()
            .await
            .map_err(|e| VlinkError::auth(e.to_string()))?;
        Ok(vec![header_pair(document, "p")?, header_pair(document, "a")?])
    }

    /// The OAuth client id, recovered from the decoded authorization header
    /// (`Basic <base64(client_id:secret)>`).
    async fn client_id(&self) -> VlinkResult<String> {
        let document = self
            .headers
            .get()
            .await
            .map_err(|e| VlinkError::auth(e.to_string()))?;
        let (_, value) = header_pair(document, "a")?;

        let basic = value
            .split(' ')
            .nth(1)
            .ok_or_else(|| VlinkError::auth("authorization header has no credential part"))?;
        let credential =
            decode_layers(basic, 1).map_err(|e| VlinkError::auth(e.to_string()))?;
        Ok(credential
            .split(':')
            .next()
            .unwrap_or_default()
            .to_string())
    }
}

fn header_pair(document: &Value, name: &str) -> VlinkResult<(String, String)> {
    let entry = &document["h"][name];
    match (entry["key"].as_str(), entry["value"].as_str()) {
        (Some(key), Some(value)) => Ok((key.to_string(), value.to_string())),
        _ => Err(VlinkError::auth(format!(
            "header document is missing entry '{name}'"
        ))),
    }
}

fn redacted(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, entry)| {
                    if REDACT_KEYS.contains(&key.as_str()) {
                        (key.clone(), Value::String("**redacted**".to_string()))
                    } else {
                        (key.clone(), redacted(entry))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redacted).collect()),
        other => other.clone(),
    }
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(rename = "_links", default)]
    links: HashMap<String, Link>,
    #[serde(rename = "authorizeResponse", default)]
    authorize: Option<AuthorizeResponse>,
}

impl AuthResponse {
    fn status(&self) -> &str {
        self.status.as_deref().unwrap_or("")
    }

    fn link(&self, name: &str) -> VlinkResult<String> {
        self.links
            .get(name)
            .map(|link| link.href.clone())
            .ok_or_else(|| VlinkError::auth(format!("response is missing link '{name}'")))
    }
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
}

#[derive(Debug, Deserialize)]
struct AuthorizeResponse {
    code: String,
}
