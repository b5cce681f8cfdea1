use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON newline-delimited request.
///
/// `params` carries the single method argument, either bare or wrapped in a
/// one-element array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Value,
}

impl Request {
    pub fn new(method: impl Into<String>, params: Value, id: u64) -> Self {
        Self {
            method: method.into(),
            params: Value::Array(vec![params]),
            id: Value::from(id),
        }
    }

    /// The single argument value, unwrapped from a one-element array.
    pub fn argument(&self) -> Value {
        match &self.params {
            Value::Array(items) if items.len() <= 1 => {
                items.first().cloned().unwrap_or(Value::Null)
            }
            other => other.clone(),
        }
    }
}

/// JSON newline-delimited response. Exactly one of `result`/`error` is
/// meaningful; `result` is null on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: Value,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            id,
            result,
            error: None,
        }
    }

    pub fn error(id: Value, message: impl Into<String>) -> Self {
        Self {
            id,
            result: Value::Null,
            error: Some(message.into()),
        }
    }
}

/// Serialises `message` as one newline-terminated JSON line.
pub fn encode_line<T: Serialize>(message: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut payload = serde_json::to_vec(message)?;
    payload.push(b'\n');
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_argument_unwraps_single_element_array() {
        let request: Request =
            serde_json::from_str(r#"{"method":"Control.Ping","params":[{}],"id":7}"#)
                .expect("decode request");
        assert_eq!(request.argument(), json!({}));
        assert_eq!(request.id, json!(7));
    }

    #[test]
    fn request_argument_accepts_bare_and_missing_params() {
        let bare: Request =
            serde_json::from_str(r#"{"method":"A.B","params":{"x":1},"id":"abc"}"#)
                .expect("decode bare");
        assert_eq!(bare.argument(), json!({"x": 1}));

        let missing: Request = serde_json::from_str(r#"{"method":"A.B"}"#).expect("decode");
        assert_eq!(missing.argument(), Value::Null);
        assert_eq!(missing.id, Value::Null);
    }

    #[test]
    fn response_always_carries_result_and_error_fields() {
        let line = encode_line(&Response::ok(json!(1), json!({"ok": true}))).expect("encode");
        assert_eq!(line.last(), Some(&b'\n'));
        let value: Value = serde_json::from_slice(&line).expect("decode");
        assert_eq!(value, json!({"id": 1, "result": {"ok": true}, "error": null}));

        let failed = Response::error(json!(2), "nope");
        assert_eq!(failed.error.as_deref(), Some("nope"));
        assert_eq!(failed.result, Value::Null);
    }
}
