//! Lua script loader.
//!
//! Every load gets a fresh Lua state with the primitives registered, so
//! scripts never share globals across executions or connections. A script
//! file evaluates to its entry point: either a function or a table with a
//! `program` function.
//!
//! ```lua
//! return function(ctx, ...)
//!     return "OK"
//! end
//! ```

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use mlua::{Function, Lua, MultiValue};

use super::context::{is_unhandled, LuaContext};
use super::convert::{from_lua, to_lua};
use super::primitives;
use crate::protocol::Value;
use crate::script::{ScriptContext, ScriptEntry, ScriptError, ScriptLoader, ScriptOutcome};

/// Loads `.lua` scripts into isolated Lua states.
///
/// Holds configuration only, so one loader is shared by every connection.
#[derive(Debug, Clone, Default)]
pub struct LuaScriptLoader {
    /// Directory added to `package.path` so scripts can `require` helpers.
    search_root: Option<PathBuf>,
}

impl LuaScriptLoader {
    /// Loader without extra module search paths.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loader whose scripts can `require` modules under `root`.
    #[must_use]
    pub fn with_search_root(root: impl Into<PathBuf>) -> Self {
        Self {
            search_root: Some(root.into()),
        }
    }

    /// Create a Lua state with primitives and search paths set up.
    fn create_state(&self) -> Result<Lua> {
        let lua = Lua::new();
        primitives::register_all(&lua)?;
        if let Some(root) = &self.search_root {
            Self::setup_package_path(&lua, root)?;
        }
        Ok(lua)
    }

    /// Prepend `{base}/?.lua`, `{base}/?/init.lua` and `{base}/lib/?.lua`
    /// to `package.path`.
    fn setup_package_path(lua: &Lua, base_path: &Path) -> Result<()> {
        let package: mlua::Table = lua
            .globals()
            .get("package")
            .map_err(|e| anyhow!("Failed to get package table: {e}"))?;

        let current_path: String = package
            .get("path")
            .map_err(|e| anyhow!("Failed to get package.path: {e}"))?;

        let new_path = format!(
            "{path}/?.lua;{path}/?/init.lua;{path}/lib/?.lua;{current}",
            path = base_path.display(),
            current = current_path
        );

        package
            .set("path", new_path)
            .map_err(|e| anyhow!("Failed to set package.path: {e}"))?;

        Ok(())
    }
}

impl ScriptLoader for LuaScriptLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn ScriptEntry>, ScriptError> {
        let load_error = |message: String| ScriptError::Load {
            path: path.to_path_buf(),
            message,
        };

        let source = std::fs::read_to_string(path).map_err(|source| ScriptError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let lua = self.create_state().map_err(|e| load_error(format!("{e:#}")))?;

        let exported: mlua::Value = lua
            .load(&source)
            .set_name(path.to_string_lossy())
            .eval()
            .map_err(|e| load_error(e.to_string()))?;

        let program = match exported {
            mlua::Value::Function(program) => program,
            mlua::Value::Table(table) => table
                .get::<Option<Function>>("program")
                .map_err(|e| load_error(format!("invalid `program` field: {e}")))?
                .ok_or_else(|| load_error("returned table has no `program` function".to_string()))?,
            other => {
                return Err(load_error(format!(
                    "script must return a function or a table with `program`, got {}",
                    other.type_name()
                )))
            }
        };

        log::debug!("[Lua] Loaded script {}", path.display());
        Ok(Box::new(LuaScript {
            lua,
            program,
            path: path.to_path_buf(),
        }))
    }
}

/// A loaded script and the Lua state it lives in.
struct LuaScript {
    lua: Lua,
    program: Function,
    path: PathBuf,
}

impl LuaScript {
    fn build_args(&self, ctx: ScriptContext, args: &[Value]) -> mlua::Result<MultiValue> {
        let mut call_args = Vec::with_capacity(args.len() + 1);
        call_args.push(mlua::Value::UserData(
            self.lua.create_userdata(LuaContext::new(ctx))?,
        ));
        for arg in args {
            call_args.push(to_lua(&self.lua, arg)?);
        }
        Ok(MultiValue::from_vec(call_args))
    }
}

#[async_trait(?Send)]
impl ScriptEntry for LuaScript {
    async fn run(&self, ctx: ScriptContext, args: Vec<Value>) -> Result<ScriptOutcome, ScriptError> {
        self.lua.set_app_data(ctx.session().clone());
        let call_args = self
            .build_args(ctx, &args)
            .map_err(|e| ScriptError::Runtime(e.to_string()))?;

        match self.program.call_async::<mlua::Value>(call_args).await {
            Ok(result) => from_lua(result).map(ScriptOutcome::Handled),
            Err(e) if is_unhandled(&e) => {
                log::debug!("[Lua] {} declined the request", self.path.display());
                Ok(ScriptOutcome::Unhandled)
            }
            Err(e) => Err(ScriptError::Runtime(e.to_string())),
        }
    }
}
