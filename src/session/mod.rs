//! Per-connection state: correlation table, session handle, and the
//! connection loops that tie them to a transport.

mod connection;
mod handle;
mod pending;

pub use connection::Connection;
pub use handle::SessionHandle;
pub use pending::{PendingRequest, PendingRequests, ReplyReceiver, RequestError};
