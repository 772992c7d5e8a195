//! Embedded Lua scripts.
//!
//! Every evaluation runs in a fresh `Lua` state, so scripts never observe each
//! other. Globals available to a script:
//!
//! - `p`: converted criteria
//! - `ctx`: caller context
//! - `rows`, `fetched`: parent and fetched rows, where applicable
//! - `sp(v)`: records `v` as a bound value and returns `"?"`

use mlua::{Lua, Table, Value as LuaValue};
use serde_json::Value;

use super::conversion::{json_to_lua, lua_to_json_value, rows_to_lua};
use super::ScriptBindings;

const SP_ARGS: &str = "__sp_args";
const SP_COUNT: &str = "n";

/// A Lua chunk whose syntax was checked once at construction.
#[derive(Debug, Clone)]
pub struct LuaScript {
    name: String,
    code: String,
}

impl LuaScript {
    pub fn compile(name: &str, code: &str) -> Result<Self, String> {
        let lua = Lua::new();
        lua.load(code)
            .set_name(name)
            .into_function()
            .map_err(|e| format!("Lua syntax error: {}", e))?;
        Ok(Self {
            name: name.to_string(),
            code: code.to_string(),
        })
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    /// Run a statement script. The chunk returns `sql[, params]`; when `params`
    /// is omitted the values recorded through `sp()` are bound instead.
    pub fn statement(&self, criteria: &Value, context: &Value) -> Result<(String, Vec<Value>), String> {
        let lua = Lua::new();
        self.install(&lua, criteria, context, None, None)
            .map_err(|e| format!("Failed to set up Lua globals: {}", e))?;

        let (sql, params): (LuaValue, LuaValue) = lua
            .load(&self.code)
            .set_name(self.name.as_str())
            .eval()
            .map_err(|e| format!("Lua error: {}", e))?;

        let sql = match sql {
            LuaValue::String(s) => s
                .to_str()
                .map_err(|e| format!("Invalid statement text: {}", e))?
                .to_string(),
            LuaValue::Nil => String::new(),
            other => {
                return Err(format!(
                    "Lua statement script must return a string, got {}",
                    other.type_name()
                ));
            }
        };

        let params = match params {
            LuaValue::Nil => {
                let recorded: Table = lua
                    .globals()
                    .get(SP_ARGS)
                    .map_err(|e| format!("Lua error: {}", e))?;
                collect_recorded(&recorded)?
            }
            other => match lua_to_json_value(other).map_err(|e| format!("Lua error: {}", e))? {
                Value::Array(items) => items,
                Value::Object(map) if map.is_empty() => Vec::new(),
                scalar => vec![scalar],
            },
        };

        Ok((sql, params))
    }

    /// Evaluate the chunk and convert its first return value.
    pub fn evaluate(&self, bindings: &ScriptBindings<'_>) -> Result<Value, String> {
        let lua = Lua::new();
        self.install(
            &lua,
            bindings.criteria,
            bindings.context,
            bindings.rows,
            bindings.fetched,
        )
        .map_err(|e| format!("Failed to set up Lua globals: {}", e))?;

        let result: LuaValue = lua
            .load(&self.code)
            .set_name(self.name.as_str())
            .eval()
            .map_err(|e| format!("Lua error: {}", e))?;
        lua_to_json_value(result).map_err(|e| format!("Failed to convert Lua to JSON: {}", e))
    }

    fn install(
        &self,
        lua: &Lua,
        criteria: &Value,
        context: &Value,
        rows: Option<&[crate::value::Row]>,
        fetched: Option<&[crate::value::Row]>,
    ) -> mlua::Result<()> {
        let globals = lua.globals();
        globals.set("p", json_to_lua(lua, criteria)?)?;
        globals.set("ctx", json_to_lua(lua, context)?)?;
        if let Some(rows) = rows {
            globals.set("rows", rows_to_lua(lua, rows)?)?;
        }
        if let Some(fetched) = fetched {
            globals.set("fetched", rows_to_lua(lua, fetched)?)?;
        }

        let recorded = lua.create_table()?;
        recorded.raw_set(SP_COUNT, 0)?;
        globals.set(SP_ARGS, recorded)?;
        let sp = lua.create_function(|lua, value: LuaValue| {
            let recorded: Table = lua.globals().get(SP_ARGS)?;
            let next = recorded.raw_get::<Option<i64>>(SP_COUNT)?.unwrap_or(0) + 1;
            recorded.raw_set(next, value)?;
            recorded.raw_set(SP_COUNT, next)?;
            Ok("?")
        })?;
        globals.set("sp", sp)?;
        Ok(())
    }
}

// A nil bind leaves a hole in the sequence, so walk up to the recorded count.
fn collect_recorded(table: &Table) -> Result<Vec<Value>, String> {
    let len = table
        .raw_get::<Option<i64>>(SP_COUNT)
        .map_err(|e| format!("Lua error: {}", e))?
        .unwrap_or(0);
    let mut values = Vec::with_capacity(usize::try_from(len).unwrap_or(0));
    for i in 1..=len {
        let v: LuaValue = table.raw_get(i).map_err(|e| format!("Lua error: {}", e))?;
        values.push(lua_to_json_value(v).map_err(|e| format!("Lua error: {}", e))?);
    }
    Ok(values)
}
