//! Lua script host.
//!
//! - `runtime`: [`LuaScriptLoader`], the production [`crate::script::ScriptLoader`]
//! - `context`: the `ctx` argument and object userdata
//! - `convert`: bridge value ↔ Lua value conversion
//! - `primitives`: globals registered on every state (`log`)

pub mod context;
pub mod convert;
pub mod primitives;
pub mod runtime;

pub use runtime::LuaScriptLoader;
