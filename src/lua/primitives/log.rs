//! Logging primitive for Lua scripts.
//!
//! Exposes Rust's `log` crate to Lua scripts via a `log` table with
//! methods for each log level.
//!
//! # Usage in Lua
//!
//! ```lua
//! log.info("Script started for " .. tostring(who))
//! log.warn("Skill window requested twice")
//! log.error("Peer refused command")
//! log.debug("Args: " .. #args)
//! ```
//!
//! Messages are emitted with target `lua`, so `RUST_LOG=lua=debug`
//! controls script output independently of the bridge's own logging.

use anyhow::{anyhow, Result};
use mlua::Lua;

/// Register the global `log` table.
///
/// # Errors
///
/// Returns an error if Lua table or function creation fails.
pub fn register(lua: &Lua) -> Result<()> {
    let log_table = lua
        .create_table()
        .map_err(|e| anyhow!("Failed to create log table: {e}"))?;

    let levels = [
        ("info", log::Level::Info),
        ("warn", log::Level::Warn),
        ("error", log::Level::Error),
        ("debug", log::Level::Debug),
    ];
    for (name, level) in levels {
        let func = lua
            .create_function(move |_, msg: String| {
                log::log!(target: "lua", level, "{}", msg);
                Ok(())
            })
            .map_err(|e| anyhow!("Failed to create log.{name} function: {e}"))?;
        log_table
            .set(name, func)
            .map_err(|e| anyhow!("Failed to set log.{name}: {e}"))?;
    }

    lua.globals()
        .set("log", log_table)
        .map_err(|e| anyhow!("Failed to register log table globally: {e}"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlua::{Function, Table};

    #[test]
    fn test_log_table_created() {
        let lua = Lua::new();
        register(&lua).expect("Should register log primitives");

        let log_table: Table = lua.globals().get("log").expect("log table should exist");
        for name in ["info", "warn", "error", "debug"] {
            let _: Function = log_table
                .get(name)
                .unwrap_or_else(|_| panic!("log.{name} should exist"));
        }
    }

    #[test]
    fn test_log_functions_callable() {
        let lua = Lua::new();
        register(&lua).expect("Should register log primitives");

        lua.load(
            r#"
            log.info("test info")
            log.warn("test warn")
            log.error("test error")
            log.debug("test debug")
            "#,
        )
        .exec()
        .expect("log functions should be callable");
    }
}
