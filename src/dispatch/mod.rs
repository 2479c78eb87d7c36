//! Inbound message routing.
//!
//! [`Dispatcher::handle`] runs inline in the read loop for every framed
//! message: pings and replies are dealt with on the spot, execution
//! requests are validated and handed back for the connection's exec loop.
//! [`Dispatcher::execute`] then resolves, loads, and runs the script and
//! builds the `ret` or `err` reply.

mod sandbox;

use std::sync::Arc;

use thiserror::Error;

use crate::env::Environment;
use crate::protocol::{decode_all, CommandKind, DecodeError, Message, OutboundMessage, Value};
use crate::script::{ScriptContext, ScriptError, ScriptLoader, ScriptOutcome};
use crate::session::SessionHandle;

pub use sandbox::{Sandbox, SandboxError};

/// A validated `exec` waiting to run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecRequest {
    /// Process id assigned by the peer; echoed in the reply.
    pub pid: i64,
    /// Script path exactly as the peer sent it.
    pub path: String,
    /// Still-encoded arguments.
    pub args: Vec<serde_json::Value>,
}

impl ExecRequest {
    /// Validate `[pid, path, args]`.
    pub fn from_arguments(arguments: Vec<serde_json::Value>) -> Result<Self, ExecError> {
        let invalid = || ExecError::InvalidArguments {
            command: CommandKind::Exec,
            expected: "[pid, path, args]",
        };
        let [pid, path, args]: [serde_json::Value; 3] =
            arguments.try_into().map_err(|_wrong_len| invalid())?;
        match (pid.as_i64(), path, args) {
            (Some(pid), serde_json::Value::String(path), serde_json::Value::Array(args)) => {
                Ok(Self { pid, path, args })
            }
            _ => Err(invalid()),
        }
    }
}

/// Failure of an `exec`, reported to the peer as `err`.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The argument line does not have the expected shape.
    #[error("Invalid {command} arguments, expected {expected}")]
    InvalidArguments {
        /// Command whose arguments were malformed.
        command: CommandKind,
        /// Expected shape.
        expected: &'static str,
    },
    /// The script path was rejected.
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    /// The script arguments could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// The script failed to load or run.
    #[error(transparent)]
    Script(#[from] ScriptError),
}

/// Routes messages for every connection. Holds no per-connection state.
pub struct Dispatcher {
    sandbox: Sandbox,
    loader: Arc<dyn ScriptLoader>,
    environment: Environment,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("sandbox", &self.sandbox)
            .field("environment", &self.environment)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Dispatcher resolving through `sandbox` and loading with `loader`.
    pub fn new(sandbox: Sandbox, loader: Arc<dyn ScriptLoader>, environment: Environment) -> Self {
        Self {
            sandbox,
            loader,
            environment,
        }
    }

    /// Sandbox used for path resolution.
    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    /// Route one framed message.
    ///
    /// Returns the request to run for a valid `exec`; everything else is
    /// handled here.
    pub fn handle(&self, session: &SessionHandle, message: Message) -> Option<ExecRequest> {
        match message.command {
            CommandKind::Ping => {
                session.send(&OutboundMessage::Pong);
                None
            }
            CommandKind::DoRet => {
                Self::handle_doret(session, message.arguments);
                None
            }
            CommandKind::Exec => match ExecRequest::from_arguments(message.arguments) {
                Ok(request) => Some(request),
                Err(e) => {
                    log::warn!("[Conn {}] Rejected exec: {e}", session.id());
                    session.send(&OutboundMessage::Err {
                        message: e.to_string(),
                    });
                    None
                }
            },
            CommandKind::Unset => {
                log::warn!("[Conn {}] Ignoring message without command", session.id());
                None
            }
        }
    }

    fn handle_doret(session: &SessionHandle, arguments: Vec<serde_json::Value>) {
        let mut arguments = arguments.into_iter();
        let Some(id) = arguments.next().as_ref().and_then(serde_json::Value::as_u64) else {
            log::warn!("[Conn {}] Dropping doret without request id", session.id());
            return;
        };
        let reply = arguments.next().unwrap_or(serde_json::Value::Null);
        if session.complete_request(id, reply) {
            log::debug!("[Conn {}] Completed request {id}", session.id());
        } else {
            log::debug!("[Conn {}] Dropping doret for unknown request {id}", session.id());
        }
    }

    /// Run an `exec` to completion and build the reply.
    pub async fn execute(&self, session: &SessionHandle, request: ExecRequest) -> OutboundMessage {
        log::info!(
            "[Conn {}] Exec pid={} script={:?}",
            session.id(),
            request.pid,
            request.path
        );
        match self.run(session, &request).await {
            Ok(ScriptOutcome::Handled(result)) => OutboundMessage::Ret {
                pid: request.pid,
                handled: true,
                result,
            },
            Ok(ScriptOutcome::Unhandled) => OutboundMessage::Ret {
                pid: request.pid,
                handled: false,
                result: Value::Nil,
            },
            Err(e) => {
                log::error!(
                    "[Conn {}] Script {:?} (pid {}) failed: {e}",
                    session.id(),
                    request.path,
                    request.pid
                );
                OutboundMessage::Err {
                    message: self.error_message(&request.path, &e),
                }
            }
        }
    }

    async fn run(&self, session: &SessionHandle, request: &ExecRequest) -> Result<ScriptOutcome, ExecError> {
        let path = self.sandbox.resolve(&request.path)?;
        let entry = self.loader.load(&path)?;
        let args = decode_all(&request.args, session.registry())?;
        let ctx = ScriptContext::new(request.pid, path, session.clone());
        Ok(entry.run(ctx, args).await?)
    }

    fn error_message(&self, path: &str, error: &ExecError) -> String {
        if self.environment.verbose_script_errors() {
            format!("Error while executing script \"{path}\": {error}")
        } else {
            format!("Error while executing script \"{path}\".")
        }
    }
}
