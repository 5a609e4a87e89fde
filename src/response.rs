// Flat result shapes handed back to the host, and the conversions that build
// them from library responses

use chrono::{DateTime, NaiveDateTime, Utc};
use oauth2::{AccessToken, RefreshToken, Scope, TokenResponse, TokenType};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::time::Duration;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// `token_type` exactly as the server spelled it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawTokenType(String);

impl RawTokenType {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TokenType for RawTokenType {}

/// Token endpoint response. `id_token` is pulled out; members beyond the
/// RFC 6749 set are kept verbatim in `additional`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTokenResponse {
    access_token: AccessToken,
    token_type: RawTokenType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<RefreshToken>,
    #[serde(
        default,
        rename = "scope",
        deserialize_with = "deserialize_scopes",
        serialize_with = "serialize_scopes",
        skip_serializing_if = "Option::is_none"
    )]
    scopes: Option<Vec<Scope>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id_token: Option<String>,
    #[serde(flatten)]
    additional: Map<String, Value>,
}

impl RawTokenResponse {
    pub fn id_token(&self) -> Option<&str> {
        self.id_token.as_deref()
    }

    pub fn additional(&self) -> &Map<String, Value> {
        &self.additional
    }
}

impl TokenResponse for RawTokenResponse {
    type TokenType = RawTokenType;

    fn access_token(&self) -> &AccessToken {
        &self.access_token
    }

    fn token_type(&self) -> &RawTokenType {
        &self.token_type
    }

    fn expires_in(&self) -> Option<Duration> {
        self.expires_in.map(Duration::from_secs)
    }

    fn refresh_token(&self) -> Option<&RefreshToken> {
        self.refresh_token.as_ref()
    }

    fn scopes(&self) -> Option<&Vec<Scope>> {
        self.scopes.as_ref()
    }
}

fn deserialize_scopes<'de, D>(deserializer: D) -> Result<Option<Vec<Scope>>, D::Error>
where
    D: Deserializer<'de>,
{
    let scope = Option::<String>::deserialize(deserializer)?;
    Ok(scope.map(|scope| split_scopes(&scope).into_iter().map(Scope::new).collect()))
}

fn serialize_scopes<S>(scopes: &Option<Vec<Scope>>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match scopes {
        Some(scopes) => {
            let joined = scopes.iter().map(|scope| scope.as_str()).collect::<Vec<_>>().join(" ");
            serializer.serialize_some(&joined)
        }
        None => serializer.serialize_none(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResult {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token_expiration_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub token_type: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub additional_parameters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorize_additional_parameters: Option<Map<String, Value>>,
}

/// Returned by authorize when the code exchange is left to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationCodeResult {
    pub authorization_code: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_verifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub additional_parameters: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuthorizeOutcome {
    Tokens(TokenResult),
    Code(AuthorizationCodeResult),
}

impl AuthorizeOutcome {
    pub fn into_tokens(self) -> Option<TokenResult> {
        match self {
            AuthorizeOutcome::Tokens(tokens) => Some(tokens),
            AuthorizeOutcome::Code(_) => None,
        }
    }

    pub fn into_code(self) -> Option<AuthorizationCodeResult> {
        match self {
            AuthorizeOutcome::Code(code) => Some(code),
            AuthorizeOutcome::Tokens(_) => None,
        }
    }
}

/// RFC 7591 client information response.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRegistrationResponse {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub client_id_issued_at: Option<i64>,
    #[serde(default)]
    pub client_secret_expires_at: Option<i64>,
    #[serde(default)]
    pub registration_access_token: Option<String>,
    #[serde(default)]
    pub registration_client_uri: Option<String>,
    #[serde(default)]
    pub token_endpoint_auth_method: Option<String>,
    #[serde(flatten)]
    pub additional: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResult {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id_issued_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret_expires_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_client_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint_auth_method: Option<String>,
    #[serde(default)]
    pub additional_parameters: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndSessionResult {
    pub state: String,
    pub id_token_hint: String,
    pub post_logout_redirect_uri: String,
}

pub fn format_timestamp(instant: DateTime<Utc>) -> String {
    instant.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Seconds since the epoch, as used by registration responses.
pub fn format_epoch_seconds(seconds: i64) -> Option<String> {
    DateTime::from_timestamp(seconds, 0).map(format_timestamp)
}

pub fn expiration_date(now: DateTime<Utc>, expires_in: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(expires_in)
        .ok()
        .and_then(|lifetime| now.checked_add_signed(lifetime))
}

pub fn split_scopes(scope: &str) -> Vec<String> {
    scope.split_whitespace().map(str::to_string).collect()
}

/// String values holding a JSON object are replaced by the object.
pub fn expand_json_value(value: Value) -> Value {
    match value {
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(object @ Value::Object(_)) => object,
            _ => Value::String(text),
        },
        other => other,
    }
}

pub fn additional_parameters<I, V>(parameters: I) -> Map<String, Value>
where
    I: IntoIterator<Item = (String, V)>,
    V: Into<Value>,
{
    parameters
        .into_iter()
        .map(|(key, value)| (key, expand_json_value(value.into())))
        .collect()
}

/// `fallback_scopes` is used when the token response carries no `scope`.
pub fn token_result(
    response: &RawTokenResponse,
    fallback_scopes: &[String],
    authorize_parameters: Option<Map<String, Value>>,
) -> TokenResult {
    let scopes = match response.scopes() {
        Some(scopes) => scopes.iter().map(|scope| scope.to_string()).collect(),
        None => fallback_scopes.to_vec(),
    };

    TokenResult {
        access_token: response.access_token().secret().to_string(),
        access_token_expiration_date: response
            .expires_in()
            .and_then(|expires_in| expiration_date(Utc::now(), expires_in))
            .map(format_timestamp),
        id_token: response.id_token().map(str::to_string),
        refresh_token: response.refresh_token().map(|token| token.secret().to_string()),
        token_type: response.token_type().as_str().to_string(),
        scopes,
        additional_parameters: additional_parameters(response.additional().clone()),
        authorize_additional_parameters: authorize_parameters,
    }
}

pub fn registration_result(response: RawRegistrationResponse) -> RegistrationResult {
    RegistrationResult {
        client_id: response.client_id,
        client_secret: response.client_secret,
        client_id_issued_at: response.client_id_issued_at.and_then(format_epoch_seconds),
        // Zero means the secret never expires
        client_secret_expires_at: response
            .client_secret_expires_at
            .filter(|seconds| *seconds != 0)
            .and_then(format_epoch_seconds),
        registration_access_token: response.registration_access_token,
        registration_client_uri: response.registration_client_uri,
        token_endpoint_auth_method: response.token_endpoint_auth_method,
        additional_parameters: additional_parameters(response.additional),
    }
}
