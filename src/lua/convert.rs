//! Conversion between bridge [`Value`]s and Lua values.

use std::sync::Arc;

use mlua::{Lua, Table};

use super::context::LuaObject;
use crate::protocol::Value;
use crate::script::ScriptError;

/// Bridge value → Lua value. Arrays become sequence tables, objects become
/// [`LuaObject`] userdata.
pub fn to_lua(lua: &Lua, value: &Value) -> mlua::Result<mlua::Value> {
    Ok(match value {
        Value::Nil => mlua::Value::Nil,
        Value::Bool(b) => mlua::Value::Boolean(*b),
        Value::Int(i) => mlua::Value::Integer(*i),
        Value::Float(f) => mlua::Value::Number(*f),
        Value::String(s) => mlua::Value::String(lua.create_string(s)?),
        Value::Object(obj) => mlua::Value::UserData(lua.create_userdata(LuaObject::new(Arc::clone(obj)))?),
        Value::Array(items) => {
            let table = lua.create_table_with_capacity(items.len(), 0)?;
            for (i, item) in items.iter().enumerate() {
                table.raw_set(i + 1, to_lua(lua, item)?)?;
            }
            mlua::Value::Table(table)
        }
    })
}

/// Lua value → bridge value.
///
/// Tables must be sequences (keys `1..=n` and nothing else). Functions,
/// threads, and foreign userdata have no wire form.
pub fn from_lua(value: mlua::Value) -> Result<Value, ScriptError> {
    match value {
        mlua::Value::Nil => Ok(Value::Nil),
        mlua::Value::Boolean(b) => Ok(Value::Bool(b)),
        mlua::Value::Integer(i) => Ok(Value::Int(i)),
        mlua::Value::Number(n) => Ok(Value::Float(n)),
        mlua::Value::String(s) => s
            .to_str()
            .map(|s| Value::String(s.to_string()))
            .map_err(|e| ScriptError::InvalidValue(format!("string is not valid UTF-8: {e}"))),
        mlua::Value::Table(table) => sequence_from_lua(&table),
        mlua::Value::UserData(ud) => ud
            .borrow::<LuaObject>()
            .map(|obj| Value::Object(Arc::clone(obj.object())))
            .map_err(|_not_object| ScriptError::InvalidValue("userdata is not a game object".to_string())),
        other => Err(ScriptError::InvalidValue(other.type_name().to_string())),
    }
}

fn sequence_from_lua(table: &Table) -> Result<Value, ScriptError> {
    let len = table.raw_len();
    let entries = table.clone().pairs::<mlua::Value, mlua::Value>().count();
    if entries != len {
        return Err(ScriptError::InvalidValue("table is not a sequence".to_string()));
    }
    let mut items = Vec::with_capacity(len);
    for i in 1..=len {
        let item: mlua::Value = table
            .raw_get(i)
            .map_err(|e| ScriptError::InvalidValue(e.to_string()))?;
        items.push(from_lua(item)?);
    }
    Ok(Value::Array(items))
}

/// Wrap a script error for returning from a Lua callback.
pub fn into_lua_error(error: ScriptError) -> mlua::Error {
    mlua::Error::external(error)
}
