//! Messages written to the peer.

use serde_json::json;

use super::codec::{encode, encode_all, encode_object, Value};
use crate::objects::{ObjectRef, SerializeMethod};

/// One outbound message.
///
/// Everything except `pong` is a command line followed by a JSON array
/// line.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    /// Liveness reply.
    Pong,
    /// Ask the peer to run a named command; answered by `doret` with `id`.
    Do {
        /// Correlation id.
        id: u64,
        /// Command name.
        name: String,
        /// Command arguments; objects travel as bare serials.
        args: Vec<Value>,
    },
    /// Ask the peer for a member of an object; answered by `doret` with `id`.
    Qry {
        /// Correlation id.
        id: u64,
        /// Object to query.
        obj: ObjectRef,
        /// Member name.
        member: String,
    },
    /// Result of an `exec`.
    Ret {
        /// Process id from the `exec`.
        pid: i64,
        /// `false` when the script declined to handle the request.
        handled: bool,
        /// Script result; ignored by the peer when `handled` is false.
        result: Value,
    },
    /// Failure report.
    Err {
        /// Human-readable message.
        message: String,
    },
}

impl OutboundMessage {
    /// Command word written on the first line.
    pub fn command(&self) -> &'static str {
        match self {
            Self::Pong => "pong",
            Self::Do { .. } => "do",
            Self::Qry { .. } => "qry",
            Self::Ret { .. } => "ret",
            Self::Err { .. } => "err",
        }
    }

    /// JSON argument line, if the message has one.
    pub fn arguments(&self) -> Option<serde_json::Value> {
        match self {
            Self::Pong => None,
            Self::Do { id, name, args } => Some(json!([
                id,
                name,
                encode_all(args, SerializeMethod::WithoutSignature),
            ])),
            Self::Qry { id, obj, member } => Some(json!([
                id,
                encode_object(obj, SerializeMethod::IncludeSignature),
                member,
            ])),
            Self::Ret {
                pid,
                handled,
                result,
            } => Some(json!([
                pid,
                u8::from(*handled),
                encode(result, SerializeMethod::IncludeSignature),
            ])),
            Self::Err { message } => Some(json!([message])),
        }
    }

    /// Full wire text, newline-terminated.
    pub fn encode(&self) -> String {
        match self.arguments() {
            Some(args) => format!("{}\n{}\n", self.command(), args),
            None => format!("{}\n", self.command()),
        }
    }
}
