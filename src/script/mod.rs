//! Script loading interface.
//!
//! The dispatcher only knows these traits. [`crate::lua`] provides the
//! production implementation; tests plug in their own.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::objects::ObjectRef;
use crate::protocol::Value;
use crate::session::{RequestError, SessionHandle};

/// How a script run ended, short of failing.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptOutcome {
    /// The script produced a result.
    Handled(Value),
    /// The script declined the request.
    Unhandled,
}

/// Failure while loading or running a script.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// The file could not be read.
    #[error("Failed to read script {}: {source}", .path.display())]
    Read {
        /// Script path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The file was read but did not produce an entry point.
    #[error("Failed to load script {}: {message}", .path.display())]
    Load {
        /// Script path.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },
    /// The entry point raised an error.
    #[error("{0}")]
    Runtime(String),
    /// A value crossing the script boundary has no wire form.
    #[error("Unsupported script value: {0}")]
    InvalidValue(String),
    /// An outbound request issued by the script failed.
    #[error(transparent)]
    Request(#[from] RequestError),
}

/// What a running script can reach: its pid and the session that invoked
/// it.
#[derive(Debug, Clone)]
pub struct ScriptContext {
    pid: i64,
    path: PathBuf,
    session: SessionHandle,
}

impl ScriptContext {
    /// Context for one `exec`.
    pub fn new(pid: i64, path: impl Into<PathBuf>, session: SessionHandle) -> Self {
        Self {
            pid,
            path: path.into(),
            session,
        }
    }

    /// Process id the peer assigned to this execution.
    pub fn pid(&self) -> i64 {
        self.pid
    }

    /// Resolved script path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Session the script was invoked on.
    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Run a peer command and wait for its result.
    pub async fn send_command(&self, name: &str, args: Vec<Value>) -> Result<Value, ScriptError> {
        Ok(self.session.send_request(name, args).await?)
    }

    /// Query a member of an object on the peer.
    pub async fn query(&self, obj: ObjectRef, member: &str) -> Result<Value, ScriptError> {
        Ok(self.session.query_object_info(obj, member).await?)
    }
}

/// Produces entry points from script files.
///
/// Shared by every connection, so it must not hold per-run state.
pub trait ScriptLoader: Send + Sync {
    /// Load the script at `path` (already sandboxed and canonical).
    fn load(&self, path: &Path) -> Result<Box<dyn ScriptEntry>, ScriptError>;
}

/// A loaded, runnable script.
#[async_trait(?Send)]
pub trait ScriptEntry {
    /// Run with decoded arguments.
    async fn run(&self, ctx: ScriptContext, args: Vec<Value>) -> Result<ScriptOutcome, ScriptError>;
}
