use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub register_id: String,
    pub user_id: String,
    pub auth_token: String,
    pub mqtt_token: String,
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum SessionError {
    #[error("malformed auth token: {0}")]
    MalformedToken(String),

    #[error("login response is missing {0}")]
    MissingField(&'static str),
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        !self.user_id.is_empty() && !self.auth_token.is_empty()
    }

    pub fn has_broker_credentials(&self) -> bool {
        !self.user_id.is_empty() && !self.mqtt_token.is_empty()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Builds a session from a login result.
    ///
    /// The user id sits at the top level as `id`; the tokens are either beside it or inside a nested
    /// `data` record, under `auth` and `emq_token`. Everything else is dropped.
    pub fn from_login_result(result: &Value, register_id: &str) -> Result<Self, SessionError> {
        let top = result
            .as_object()
            .ok_or(SessionError::MissingField("result object"))?;
        let record = top
            .get("data")
            .and_then(Value::as_object)
            .unwrap_or(top);

        let user_id = top
            .get("id")
            .or_else(|| lookup_ci(record, "id"))
            .or_else(|| lookup_ci(record, "user_id"))
            .and_then(value_text)
            .ok_or(SessionError::MissingField("id"))?;
        let auth_token = lookup_ci(record, "auth")
            .or_else(|| lookup_ci(record, "auth_token"))
            .and_then(value_text)
            .ok_or(SessionError::MissingField("auth"))?;
        let mqtt_token = lookup_ci(record, "emq_token")
            .or_else(|| lookup_ci(record, "mqtt_token"))
            .and_then(value_text)
            .ok_or(SessionError::MissingField("emq_token"))?;

        Ok(Self {
            register_id: register_id.to_string(),
            user_id,
            auth_token,
            mqtt_token,
        })
    }

    /// Builds a session from previously issued tokens without a network round-trip.
    pub fn from_token(
        auth_token: &str,
        mqtt_token: &str,
        register_id: &str,
    ) -> Result<Self, SessionError> {
        let user_id = user_id_from_auth_token(auth_token)?;
        Ok(Self {
            register_id: register_id.to_string(),
            user_id,
            auth_token: auth_token.to_string(),
            mqtt_token: mqtt_token.to_string(),
        })
    }
}

/// Reads the user id out of a `<header>.<payload>.<signature>` auth token.
///
/// The payload is base64 JSON whose `value` field is itself JSON text carrying `id`.
pub fn user_id_from_auth_token(auth_token: &str) -> Result<String, SessionError> {
    let mut parts = auth_token.split('.');
    let (Some(_), Some(payload)) = (parts.next(), parts.next()) else {
        return Err(SessionError::MalformedToken(
            "expected three dot-separated segments".to_string(),
        ));
    };

    let mut padded = payload.trim().to_string();
    while padded.len() % 4 != 0 {
        padded.push('=');
    }
    let raw = base64::engine::general_purpose::STANDARD
        .decode(&padded)
        .or_else(|_| base64::engine::general_purpose::URL_SAFE.decode(&padded))
        .map_err(|error| SessionError::MalformedToken(error.to_string()))?;

    let outer: Value = serde_json::from_slice(&raw)
        .map_err(|error| SessionError::MalformedToken(error.to_string()))?;
    let value_text = outer
        .get("value")
        .and_then(Value::as_str)
        .ok_or_else(|| SessionError::MalformedToken("payload has no value".to_string()))?;
    let inner: Value = serde_json::from_str(value_text)
        .map_err(|error| SessionError::MalformedToken(error.to_string()))?;

    inner
        .get("id")
        .and_then(value_text_owned)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| SessionError::MalformedToken("value has no id".to_string()))
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Domains {
    pub app_api: String,
    pub mqtt: String,
}

impl Domains {
    pub fn from_value(value: &Value) -> Self {
        let mut out = Self::default();
        let Some(map) = value.as_object() else {
            return out;
        };
        if let Some(api) = lookup_ci(map, "app_api").and_then(Value::as_str) {
            if !api.is_empty() {
                out.app_api = format!("https://{api}");
            }
        }
        if let Some(mqtt) = lookup_ci(map, "mqtt").and_then(Value::as_str) {
            out.mqtt = mqtt.to_string();
        }
        out
    }
}

/// Accepts `user@host.tld` shaped addresses made of word characters with `-+.` separators.
pub fn is_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    if domain.contains('@') {
        return false;
    }
    let is_word = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_');
    let local_ok = local.split(['-', '+', '.']).all(is_word);
    let labels: Vec<&str> = domain.split(['-', '.']).collect();
    local_ok && domain.contains('.') && labels.iter().all(|label| is_word(label))
}

/// Phone-number logins need the country calling code in front (`86-138...`).
pub fn normalize_username(username: &str, phone_prefix: &str) -> String {
    let trimmed = username.trim();
    let numeric = !trimmed.is_empty()
        && trimmed
            .trim_start_matches('+')
            .chars()
            .all(|c| c.is_ascii_digit() || c == ' ' || c == '-');
    if is_email(trimmed) || !numeric {
        return trimmed.to_string();
    }
    format!("{phone_prefix}-{}", trimmed.trim_start_matches('+'))
}

fn lookup_ci<'a>(map: &'a serde_json::Map<String, Value>, key: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(key))
        .map(|(_, value)| value)
}

fn value_text(value: &Value) -> Option<String> {
    value_text_owned(value).filter(|text| !text.is_empty())
}

fn value_text_owned(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) fn make_auth_token(user_id: &str) -> String {
    let value = serde_json::json!({ "id": user_id }).to_string();
    let payload = serde_json::json!({ "value": value, "exp": 1 }).to_string();
    let encoded = base64::engine::general_purpose::STANDARD_NO_PAD.encode(payload);
    format!("eyJhbGciOiJIUzI1NiJ9.{encoded}.c2ln")
}
