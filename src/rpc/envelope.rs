//! JSON-RPC envelopes exchanged with the child.
//!
//! | Direction                  | Shape                                              |
//! |----------------------------|----------------------------------------------------|
//! | caller → child             | `{"jsonrpc":"2.0","id":N,"method":M,"params":P}`   |
//! | caller → child (one-way)   | `{"jsonrpc":"2.0","method":M,"params":P}`          |
//! | child → caller             | `{"jsonrpc":"2.0","id":N,"result":R}` or `…"error":E}` |
//!
//! Outbound envelopes are typed and borrow their parameters, so field order
//! on the wire follows declaration order. Inbound messages stay as
//! [`serde_json::Value`] until the correlation loop has matched their `id`.

use serde::Serialize;
use serde_json::Value;

use crate::{AppError, Result};

/// Value of the envelope version tag.
pub const PROTOCOL_VERSION_TAG: &str = "2.0";

/// Outbound request expecting exactly one response with the same `id`.
#[derive(Debug, Serialize)]
pub struct Request<'a, P: Serialize + ?Sized> {
    /// Envelope version tag.
    #[serde(rename = "jsonrpc")]
    pub protocol: &'static str,
    /// Correlation id, unique within one process generation.
    pub id: u64,
    /// Remote method name.
    pub method: &'a str,
    /// Method parameters.
    pub params: &'a P,
}

impl<'a, P: Serialize + ?Sized> Request<'a, P> {
    /// Build a request envelope.
    #[must_use]
    pub fn new(id: u64, method: &'a str, params: &'a P) -> Self {
        Self {
            protocol: PROTOCOL_VERSION_TAG,
            id,
            method,
            params,
        }
    }
}

/// Outbound one-way message; the child sends no reply.
#[derive(Debug, Serialize)]
pub struct Notification<'a, P: Serialize + ?Sized> {
    /// Envelope version tag.
    #[serde(rename = "jsonrpc")]
    pub protocol: &'static str,
    /// Remote method name.
    pub method: &'a str,
    /// Method parameters.
    pub params: &'a P,
}

impl<'a, P: Serialize + ?Sized> Notification<'a, P> {
    /// Build a notification envelope.
    #[must_use]
    pub fn new(method: &'a str, params: &'a P) -> Self {
        Self {
            protocol: PROTOCOL_VERSION_TAG,
            method,
            params,
        }
    }
}

/// Parameters of an operation call.
#[derive(Debug, Serialize)]
pub struct OperationParams<'a> {
    /// Operation name.
    pub name: &'a str,
    /// Operation arguments.
    pub arguments: &'a Value,
}

/// Payload of a response envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The child's `result` member (may be JSON `null`).
    Result(Value),
    /// The child's `error` member.
    Error(Value),
}

/// Inbound response matched to a request.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Correlation id copied from the request.
    pub id: u64,
    /// Result or error payload.
    pub outcome: Outcome,
}

impl Response {
    /// Decode a response from a raw inbound message.
    ///
    /// `result` wins if a misbehaving child sends both members.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if the message is not an object, has no
    /// unsigned integer `id`, or carries neither `result` nor `error`.
    pub fn from_value(value: Value) -> Result<Self> {
        let id = message_id(&value)
            .ok_or_else(|| AppError::Protocol("response has no numeric id".into()))?;

        let Value::Object(mut map) = value else {
            return Err(AppError::Protocol("response is not a json object".into()));
        };

        let outcome = if let Some(result) = map.remove("result") {
            Outcome::Result(result)
        } else if let Some(error) = map.remove("error") {
            Outcome::Error(error)
        } else {
            return Err(AppError::Protocol(format!(
                "response {id} carries neither result nor error"
            )));
        };

        Ok(Self { id, outcome })
    }

    /// Convert into the `result` payload.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Remote` carrying the child's error object.
    pub fn into_result(self) -> Result<Value> {
        match self.outcome {
            Outcome::Result(value) => Ok(value),
            Outcome::Error(err) => Err(AppError::Remote(err)),
        }
    }
}

/// Correlation id of an inbound message, if it has an unsigned integer `id`.
#[must_use]
pub fn message_id(value: &Value) -> Option<u64> {
    value.get("id").and_then(Value::as_u64)
}
