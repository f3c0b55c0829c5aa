//! XML-RPC value model and the thin wrapper around `serde_xmlrpc` used by
//! both the Master client and the Slave server.
//!
//! Isolating the third-party crate's exact call shape behind this module's
//! `encode_call`/`decode_response`/`decode_call`/`encode_response` functions
//! means the rest of the crate only ever talks in terms of [`Value`] and
//! [`RpcResult`], the `{code, status-msg, value}` response triple XML-RPC
//! over ROS uses.

use std::collections::BTreeMap;

use crate::error::{Ros1Error, Result};

/// The XML-RPC tagged value universe used for parameters and RPC arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Bool(bool),
    Double(f64),
    String(String),
    Base64(Vec<u8>),
    Struct(BTreeMap<String, Value>),
    Array(Vec<Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}
impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}
impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value)
    }
}
impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}
impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::Array(value)
    }
}

/// The `(code, status-msg, value)` triple every Slave/Master XML-RPC call
/// returns. `code`: -1 error, 0 failure, 1 success.
#[derive(Debug, Clone)]
pub struct RpcResult {
    pub code: i32,
    pub status: String,
    pub value: Value,
}

impl RpcResult {
    pub fn ok(status: impl Into<String>, value: Value) -> Self {
        Self {
            code: 1,
            status: status.into(),
            value,
        }
    }

    pub fn failure(status: impl Into<String>) -> Self {
        Self {
            code: 0,
            status: status.into(),
            value: Value::Int(0),
        }
    }

    pub fn error(status: impl Into<String>) -> Self {
        Self {
            code: -1,
            status: status.into(),
            value: Value::Int(0),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == 1
    }

    /// Converts a success result into our protocol error type if it wasn't
    /// actually successful, otherwise hands back the inner value.
    pub fn into_value(self) -> Result<Value> {
        if self.is_success() {
            Ok(self.value)
        } else {
            Err(Ros1Error::PeerError(format!(
                "rpc call failed (code {}): {}",
                self.code, self.status
            )))
        }
    }
}

fn to_serde(value: &Value) -> serde_xmlrpc::Value {
    match value {
        Value::Int(i) => serde_xmlrpc::Value::Int(*i),
        Value::Bool(b) => serde_xmlrpc::Value::Bool(*b),
        Value::Double(d) => serde_xmlrpc::Value::Double(*d),
        Value::String(s) => serde_xmlrpc::Value::String(s.clone()),
        Value::Base64(b) => serde_xmlrpc::Value::Base64(b.clone()),
        Value::Struct(map) => serde_xmlrpc::Value::Struct(
            map.iter()
                .map(|(k, v)| (k.clone(), to_serde(v)))
                .collect(),
        ),
        Value::Array(items) => {
            serde_xmlrpc::Value::Array(items.iter().map(to_serde).collect())
        }
    }
}

fn from_serde(value: &serde_xmlrpc::Value) -> Value {
    match value {
        serde_xmlrpc::Value::Int(i) => Value::Int(*i),
        serde_xmlrpc::Value::Bool(b) => Value::Bool(*b),
        serde_xmlrpc::Value::Double(d) => Value::Double(*d),
        serde_xmlrpc::Value::String(s) => Value::String(s.clone()),
        serde_xmlrpc::Value::Base64(b) => Value::Base64(b.clone()),
        serde_xmlrpc::Value::Struct(map) => {
            Value::Struct(map.iter().map(|(k, v)| (k.clone(), from_serde(v))).collect())
        }
        serde_xmlrpc::Value::Array(items) => {
            Value::Array(items.iter().map(from_serde).collect())
        }
        // DateTime / Nil are not part of the ROS Slave/Master dialect; fold
        // into String rather than failing an otherwise-valid response.
        other => Value::String(format!("{other:?}")),
    }
}

/// Encodes a `methodCall` body for `method_name(params...)`.
pub fn encode_call(method_name: &str, params: &[Value]) -> Result<String> {
    let params: Vec<serde_xmlrpc::Value> = params.iter().map(to_serde).collect();
    serde_xmlrpc::request_to_xml(method_name, params)
        .map_err(|e| Ros1Error::XmlRpc(format!("failed to encode {method_name} call: {e}")))
}

/// Decodes a `methodResponse` body into our `(code, status, value)` triple.
/// The response is always `params/param/value/array` containing exactly
/// that triple.
pub fn decode_response(body: &str) -> Result<RpcResult> {
    let values = serde_xmlrpc::response_from_str(body)
        .map_err(|e| Ros1Error::XmlRpc(format!("failed to parse xmlrpc response: {e}")))?;
    let triple = values
        .first()
        .and_then(|v| v.as_array())
        .ok_or_else(|| Ros1Error::XmlRpc("response did not contain the (code,status,value) array".into()))?;
    decode_triple(triple)
}

fn decode_triple(triple: &[serde_xmlrpc::Value]) -> Result<RpcResult> {
    if triple.len() != 3 {
        return Err(Ros1Error::XmlRpc(format!(
            "expected a 3-element (code,status,value) array, got {}",
            triple.len()
        )));
    }
    let code = match &triple[0] {
        serde_xmlrpc::Value::Int(i) => *i,
        other => {
            return Err(Ros1Error::XmlRpc(format!(
                "expected integer response code, got {other:?}"
            )))
        }
    };
    let status = match &triple[1] {
        serde_xmlrpc::Value::String(s) => s.clone(),
        other => format!("{other:?}"),
    };
    let value = from_serde(&triple[2]);
    Ok(RpcResult { code, status, value })
}

/// Decodes an inbound `methodCall` body into its method name and params,
/// for the Slave server's dispatcher.
pub fn decode_call(body: &str) -> Result<(String, Vec<Value>)> {
    let (name, params) = serde_xmlrpc::request_from_str(body)
        .map_err(|e| Ros1Error::XmlRpc(format!("failed to parse xmlrpc call: {e}")))?;
    Ok((name, params.iter().map(from_serde).collect()))
}

/// Encodes a `methodResponse` body carrying the `(code, status, value)`
/// triple, for the Slave server's replies.
pub fn encode_response(result: &RpcResult) -> Result<String> {
    let triple = serde_xmlrpc::Value::Array(vec![
        serde_xmlrpc::Value::Int(result.code),
        serde_xmlrpc::Value::String(result.status.clone()),
        to_serde(&result.value),
    ]);
    serde_xmlrpc::response_to_xml(vec![triple])
        .map_err(|e| Ros1Error::XmlRpc(format!("failed to encode xmlrpc response: {e}")))
}

/// Performs one Master/Slave XML-RPC call: POST the encoded call to `uri`
/// and decode the `(code, status, value)` response. No retry; a failed call
/// is the caller's problem to re-attempt.
pub async fn call(client: &reqwest::Client, uri: &str, method: &str, params: &[Value]) -> Result<RpcResult> {
    let body = encode_call(method, params)?;
    let response = client
        .post(uri)
        .header("Content-Type", "text/xml")
        .body(body)
        .send()
        .await
        .map_err(|e| Ros1Error::Other(e.into()))?;
    let text = response
        .text()
        .await
        .map_err(|e| Ros1Error::Other(e.into()))?;
    decode_response(&text)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rpc_result_success_unwraps() {
        let result = RpcResult::ok("", Value::String("hi".into()));
        assert_eq!(result.into_value().unwrap().as_str(), Some("hi"));
    }

    #[test]
    fn rpc_result_failure_is_error() {
        let result = RpcResult::failure("nope");
        assert!(result.into_value().is_err());
    }
}
