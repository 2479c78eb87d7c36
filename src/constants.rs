//! Protocol and runtime constants for polbridge.
//!
//! Centralizes the magic numbers shared by the framer, the connection
//! loops, and the bootstrap code.

use std::time::Duration;

// ============================================================================
// Network
// ============================================================================

/// Default listen address. The peer connects over loopback only.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:6060";

/// Read buffer size for a single socket read.
pub const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Delay before retrying after a failed `accept()`.
pub const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

// ============================================================================
// Protocol
// ============================================================================

/// Maximum length of a single protocol line (command or argument line).
///
/// The protocol has no resynchronization, so an overlong line is treated
/// like any other framing failure and ends the connection.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Length of a domain-object type signature, in characters.
pub const SIGNATURE_LENGTH: usize = 2;

// ============================================================================
// Scripts
// ============================================================================

/// Extension appended to resolved script paths.
pub const DEFAULT_SCRIPT_EXTENSION: &str = "lua";

/// Extension the peer uses for its own compiled scripts; stripped from
/// incoming paths before the host extension is appended.
pub const DEFAULT_FOREIGN_EXTENSION: &str = "ecl";

/// Script loaded once at startup to verify the loader works.
pub const ALIVE_SCRIPT: &str = "alive";

/// Manifest file expected in every package directory.
pub const PACKAGE_MANIFEST: &str = "pkg.json";
