//! polbridge - host-side bridge between a game server and Lua scripts.
//!
//! The game server connects over TCP and speaks a line protocol: a command
//! line, optionally followed by a JSON array line. It asks the bridge to
//! run scripts (`exec`), and scripts ask it back for commands and object
//! properties (`do` / `qry`, answered by `doret`).
//!
//! # Modules
//!
//! - [`protocol`]: framing, tagged-value codec, outbound messages
//! - [`session`]: per-connection correlation table and connection loops
//! - [`dispatch`]: message routing and sandboxed script path resolution
//! - [`script`]: script loader traits
//! - [`lua`]: Lua implementation of the script loader
//! - [`objects`]: game object types and the signature registry
//! - [`packages`]: script package discovery
//! - [`server`]: TCP accept loop and startup

pub mod config;
pub mod constants;
pub mod dispatch;
pub mod env;
pub mod lua;
pub mod objects;
pub mod packages;
pub mod protocol;
pub mod script;
pub mod server;
pub mod session;

pub use config::Config;
pub use env::Environment;
pub use server::{Bridge, BridgeServer};
