use crate::domain::crypto::{Key, decrypt, derive_request_key, md5_hex};
use crate::domain::{Session, TENANT_ID, user_agent};
use crate::error::{KarcherError, Result};
use crate::infra::http::{HttpRequest, HttpResponse, Method};
use rand::Rng as _;
use rand::distributions::Alphanumeric;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

const NONCE_LEN: usize = 32;

/// One outbound call before signing. Body field order is part of the signature input.
#[derive(Clone, Debug, PartialEq)]
pub struct SignedRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Map<String, Value>,
}

impl SignedRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            query: Vec::new(),
            body: Map::new(),
        }
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            ..Self::get(path)
        }
    }

    pub fn query(mut self, name: &str, value: impl Into<String>) -> Self {
        self.query.push((name.to_string(), value.into()));
        self
    }

    pub fn field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.body.insert(name.to_string(), value.into());
        self
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    result: Option<Value>,
}

/// Signs outbound calls and unwraps the `{code, msg, result}` envelope of replies.
#[derive(Clone, Debug)]
pub struct RequestSigner {
    key: Key,
}

impl Default for RequestSigner {
    fn default() -> Self {
        Self::new(derive_request_key(TENANT_ID))
    }
}

impl RequestSigner {
    pub fn new(key: Key) -> Self {
        Self { key }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn prepare(&self, request: &SignedRequest, session: &Session, base_url: &str) -> HttpRequest {
        let nonce = random_alphanumeric(NONCE_LEN);
        let ts = now_unix_secs().to_string();
        self.prepare_with(request, session, base_url, &nonce, &ts)
    }

    pub fn prepare_with(
        &self,
        request: &SignedRequest,
        session: &Session,
        base_url: &str,
        nonce: &str,
        ts: &str,
    ) -> HttpRequest {
        let payload = canonical_payload(request);
        let auth = session.auth_token.as_str();

        let mut headers = vec![("User-Agent".to_string(), user_agent())];
        if !auth.is_empty() {
            headers.push(("authorization".to_string(), auth.to_string()));
        }
        if !session.user_id.is_empty() {
            headers.push(("id".to_string(), session.user_id.clone()));
        }
        headers.push(("tenantId".to_string(), TENANT_ID.to_string()));
        headers.push(("sign".to_string(), sign(auth, ts, nonce, &payload)));
        headers.push(("ts".to_string(), ts.to_string()));
        headers.push(("nonce".to_string(), nonce.to_string()));

        let mut url = format!("{base_url}{}", request.path);
        let body = if request.method.has_body() {
            Some(Value::Object(request.body.clone()).to_string().into_bytes())
        } else {
            if !payload.is_empty() {
                url.push('?');
                url.push_str(&payload);
            }
            None
        };

        tracing::debug!(method = request.method.as_str(), %url, "signed request");
        HttpRequest {
            method: request.method,
            url,
            headers,
            body,
        }
    }

    /// Unwraps a reply; `decrypt_field` names a `result` member holding encrypted JSON text.
    pub fn decode_response(
        &self,
        response: HttpResponse,
        decrypt_field: Option<&str>,
    ) -> Result<Option<Value>> {
        if response.status != 200 {
            return Err(KarcherError::HttpStatus(response.status));
        }
        let envelope: Envelope = serde_json::from_slice(&response.body)
            .map_err(|error| KarcherError::Decode(error.to_string()))?;
        if envelope.code != 0 {
            return Err(KarcherError::from_code(envelope.code, &envelope.msg));
        }

        let result = match envelope.result {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::String(text)) => return Err(KarcherError::UnexpectedResponse(text)),
            Some(result) => result,
        };

        let Some(field) = decrypt_field else {
            return Ok(Some(result));
        };
        let sealed = result.get(field).and_then(Value::as_str).ok_or_else(|| {
            KarcherError::Decode(format!("result has no encrypted {field} field"))
        })?;
        let plain = decrypt(sealed, &self.key)?;
        Ok(Some(serde_json::from_str(&plain)?))
    }
}

/// Query string for reads; `name` + rendered value per body field, in order, for writes.
pub fn canonical_payload(request: &SignedRequest) -> String {
    if !request.method.has_body() {
        return url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(request.query.iter())
            .finish();
    }

    let mut out = String::new();
    for (name, value) in &request.body {
        out.push_str(name);
        match value {
            Value::Null => out.push_str("null"),
            Value::String(text) => out.push_str(text),
            Value::Object(_) => out.push_str(&ascii_json(value)),
            other => out.push_str(&literal_text(other)),
        }
    }
    out
}

/// Compact JSON with every non-ASCII character written as `\uXXXX`.
fn ascii_json(value: &Value) -> String {
    let mut out = String::new();
    for ch in value.to_string().chars() {
        if ch.is_ascii() {
            out.push(ch);
            continue;
        }
        let mut units = [0u16; 2];
        for unit in ch.encode_utf16(&mut units) {
            out.push_str(&format!("\\u{unit:04x}"));
        }
    }
    out
}

/// Scalar and list rendering the server signs against: `True`/`False`, `None`, quoted list items.
fn literal_text(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => format!("'{}'", text.replace('\\', "\\\\").replace('\'', "\\'")),
        Value::Array(items) => {
            let items = items.iter().map(literal_text).collect::<Vec<_>>();
            format!("[{}]", items.join(", "))
        }
        Value::Object(fields) => {
            let fields = fields
                .iter()
                .map(|(name, value)| {
                    let name = literal_text(&Value::String(name.clone()));
                    format!("{name}: {}", literal_text(value))
                })
                .collect::<Vec<_>>();
            format!("{{{}}}", fields.join(", "))
        }
    }
}

pub fn sign(auth_token: &str, ts: &str, nonce: &str, payload: &str) -> String {
    md5_hex(format!("{auth_token}{ts}{nonce}{payload}").as_bytes())
}

pub fn random_alphanumeric(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

pub fn random_lower_hex(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .filter_map(|_| char::from_digit(rng.gen_range(0..16), 16))
        .collect()
}

pub fn now_unix_secs() -> i64 {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    i64::try_from(secs).unwrap_or(i64::MAX)
}

pub fn now_unix_millis() -> i64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    i64::try_from(millis).unwrap_or(i64::MAX)
}
