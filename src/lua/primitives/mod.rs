//! Globals available to every script.
//!
//! - `log`: logging (info, warn, error, debug)
//!
//! The per-invocation `ctx` argument lives in [`super::context`].

pub mod log;

use anyhow::Result;
use mlua::Lua;

/// Register every primitive on a fresh Lua state.
pub fn register_all(lua: &Lua) -> Result<()> {
    log::register(lua)?;
    Ok(())
}
