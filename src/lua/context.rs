//! Script-facing handles: the `ctx` argument and game-object userdata.
//!
//! # Usage in Lua
//!
//! ```lua
//! return function(ctx, who, target)
//!     log.info("pid " .. ctx.pid .. " for " .. who:name())
//!     who:sys_message("Hello")
//!     local hp = ctx:query(target, "hp")
//!     if hp == nil then
//!         ctx:unhandled()
//!     end
//!     return "OK"
//! end
//! ```
//!
//! Object methods go through the session stored in the Lua state's app
//! data, which is the session of the `exec` being served.

use std::sync::Arc;

use mlua::{Lua, MetaMethod, UserData, UserDataFields, UserDataMethods, UserDataRef, Variadic};
use thiserror::Error;

use super::convert::{from_lua, into_lua_error, to_lua};
use crate::objects::{ObjectRef, SerializeMethod};
use crate::protocol::codec::encode_object;
use crate::script::{ScriptContext, ScriptError};
use crate::session::SessionHandle;

/// Raised by `ctx:unhandled()`; reported to the peer as `handled = 0`.
#[derive(Debug, Clone, Copy, Error)]
#[error("script declined to handle the request")]
pub struct UnhandledOutcome;

/// Whether `error` is, or wraps, [`UnhandledOutcome`].
pub fn is_unhandled(error: &mlua::Error) -> bool {
    match error {
        mlua::Error::CallbackError { cause, .. } | mlua::Error::WithContext { cause, .. } => {
            is_unhandled(cause)
        }
        mlua::Error::ExternalError(inner) => inner.downcast_ref::<UnhandledOutcome>().is_some(),
        _ => false,
    }
}

/// The `ctx` passed to a script entry point.
#[derive(Debug, Clone)]
pub struct LuaContext(ScriptContext);

impl LuaContext {
    /// Wrap a script context.
    pub fn new(ctx: ScriptContext) -> Self {
        Self(ctx)
    }
}

fn collect_args(args: Variadic<mlua::Value>) -> mlua::Result<Vec<crate::protocol::Value>> {
    args.into_iter()
        .map(|arg| from_lua(arg).map_err(into_lua_error))
        .collect()
}

impl UserData for LuaContext {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("pid", |_, this| Ok(this.0.pid()));
        fields.add_field_method_get("path", |_, this| {
            Ok(this.0.path().to_string_lossy().into_owned())
        });
    }

    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        // ctx:send_command(name, ...) -> result
        methods.add_async_method(
            "send_command",
            |lua, this, (name, args): (String, Variadic<mlua::Value>)| async move {
                let ctx = this.0.clone();
                drop(this);
                let args = collect_args(args)?;
                let result = ctx.send_command(&name, args).await.map_err(into_lua_error)?;
                to_lua(&lua, &result)
            },
        );

        // ctx:query(obj, member) -> result
        methods.add_async_method(
            "query",
            |lua, this, (obj, member): (UserDataRef<LuaObject>, String)| async move {
                let ctx = this.0.clone();
                let target = Arc::clone(obj.object());
                drop(this);
                drop(obj);
                let result = ctx.query(target, &member).await.map_err(into_lua_error)?;
                to_lua(&lua, &result)
            },
        );

        // ctx:unhandled() never returns.
        methods.add_method("unhandled", |_, _, ()| -> mlua::Result<()> {
            Err(mlua::Error::external(UnhandledOutcome))
        });
    }
}

/// A game object as seen from Lua.
#[derive(Debug, Clone)]
pub struct LuaObject(ObjectRef);

impl LuaObject {
    /// Wrap an object reference.
    pub fn new(obj: ObjectRef) -> Self {
        Self(obj)
    }

    /// Wrapped reference.
    pub fn object(&self) -> &ObjectRef {
        &self.0
    }
}

fn current_session(lua: &Lua) -> mlua::Result<SessionHandle> {
    lua.app_data_ref::<SessionHandle>()
        .map(|session| session.clone())
        .ok_or_else(|| mlua::Error::runtime("object methods are only available while a script runs"))
}

/// Peer command behind `obj:sys_message(text)`.
const SYS_MESSAGE_COMMAND: &str = "SendSysMessageUC";
/// Language, font and color the peer expects for system messages.
const SYS_MESSAGE_LANGUAGE: &str = "ENU";
const SYS_MESSAGE_FONT: i64 = 3;
const SYS_MESSAGE_COLOR: i64 = 0x3B2;

async fn sys_message(lua: Lua, target: ObjectRef, text: String) -> mlua::Result<mlua::Value> {
    let session = current_session(&lua)?;
    let args = vec![
        crate::protocol::Value::Object(target),
        text.into(),
        SYS_MESSAGE_LANGUAGE.into(),
        SYS_MESSAGE_FONT.into(),
        SYS_MESSAGE_COLOR.into(),
    ];
    let result = session
        .send_request(SYS_MESSAGE_COMMAND, args)
        .await
        .map_err(|e| into_lua_error(ScriptError::from(e)))?;
    to_lua(&lua, &result)
}

async fn query_member(lua: Lua, target: ObjectRef, member: String) -> mlua::Result<mlua::Value> {
    let session = current_session(&lua)?;
    let result = session
        .query_object_info(target, &member)
        .await
        .map_err(|e| into_lua_error(ScriptError::from(e)))?;
    to_lua(&lua, &result)
}

impl UserData for LuaObject {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("signature", |_, this| Ok(this.0.signature().to_string()));
        fields.add_field_method_get("serial", |_, this| Ok(this.0.serial()));
    }

    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        // obj:query(member) -> result
        methods.add_async_method("query", |lua, this, member: String| {
            let target = Arc::clone(&this.0);
            drop(this);
            query_member(lua, target, member)
        });

        // obj:name() -> string
        methods.add_async_method("name", |lua, this, ()| {
            let target = Arc::clone(&this.0);
            drop(this);
            query_member(lua, target, "name".to_string())
        });

        // obj:sys_message(text) -> result
        methods.add_async_method("sys_message", |lua, this, text: String| {
            let target = Arc::clone(&this.0);
            drop(this);
            sys_message(lua, target, text)
        });

        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            Ok(encode_object(&this.0, SerializeMethod::IncludeSignature))
        });

        methods.add_meta_method(MetaMethod::Eq, |_, this, other: UserDataRef<LuaObject>| {
            Ok(this.0.signature() == other.0.signature() && this.0.serial() == other.0.serial())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::Character;

    #[test]
    fn test_object_fields_and_tostring() {
        let lua = Lua::new();
        let obj = LuaObject::new(Arc::new(Character::new(1001)));
        lua.globals().set("obj", obj).unwrap();

        let (sig, serial, text): (String, i64, String) = lua
            .load("return obj.signature, obj.serial, tostring(obj)")
            .eval()
            .unwrap();
        assert_eq!(sig, "mr");
        assert_eq!(serial, 1001);
        assert_eq!(text, "@mr1001");
    }

    #[test]
    fn test_object_equality() {
        let lua = Lua::new();
        lua.globals()
            .set("a", LuaObject::new(Arc::new(Character::new(1))))
            .unwrap();
        lua.globals()
            .set("b", LuaObject::new(Arc::new(Character::new(1))))
            .unwrap();
        lua.globals()
            .set("c", LuaObject::new(Arc::new(Character::new(2))))
            .unwrap();

        let (ab, ac): (bool, bool) = lua.load("return a == b, a == c").eval().unwrap();
        assert!(ab);
        assert!(!ac);
    }

    #[test]
    fn test_unhandled_detected_through_callback() {
        let lua = Lua::new();
        let raise = lua
            .create_function(|_, ()| -> mlua::Result<()> { Err(mlua::Error::external(UnhandledOutcome)) })
            .unwrap();
        lua.globals().set("raise", raise).unwrap();

        let err = lua.load("raise()").exec().unwrap_err();
        assert!(is_unhandled(&err));

        let other = lua.load("error('boom')").exec().unwrap_err();
        assert!(!is_unhandled(&other));
    }
}
