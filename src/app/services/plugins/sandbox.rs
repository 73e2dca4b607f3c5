use std::cell::Cell;
use std::cmp::Ordering;
use std::rc::Rc;

use mlua::{Function, HookTriggers, IntoLuaMulti, Lua, MultiValue, Table, Value, Variadic, VmState};

use crate::app::domain::RenderSettings;

/// Base functions a plugin may call. Anything that can reach the file system,
/// the clock, the process or other chunks (`load`, `require`, `io`, `os`,
/// `print`, `getmetatable`) is left out, as are `pcall`/`xpcall` so the
/// instruction budget cannot be swallowed. `pairs`, `next` and `tostring` are
/// the ordered replacements installed by [`install_stable_builtins`].
const SAFE_GLOBALS: &[&str] = &[
    "assert",
    "error",
    "ipairs",
    "next",
    "pairs",
    "rawequal",
    "rawget",
    "rawlen",
    "rawset",
    "select",
    "setmetatable",
    "tonumber",
    "tostring",
    "type",
];

/// Libraries copied into every plugin environment.
const SAFE_LIBRARIES: &[&str] = &["string", "table", "math", "utf8"];

/// Library members removed from the copies to keep plugins deterministic.
const IMPURE_MEMBERS: &[(&str, &str)] = &[("math", "random"), ("math", "randomseed")];

/// How often the instruction hook fires.
const HOOK_STRIDE: u32 = 1000;

struct InstructionBudget {
    limit: u64,
    remaining: Rc<Cell<u64>>,
}

/// The Lua state backing one plugin runtime handle.
pub(crate) struct Sandbox {
    lua: Lua,
    string_find: Function,
    budget: Option<InstructionBudget>,
}

impl Sandbox {
    pub(crate) fn new(settings: &RenderSettings) -> mlua::Result<Self> {
        let lua = Lua::new();

        if let Some(bytes) = settings.plugin_memory_limit {
            lua.set_memory_limit(bytes)?;
        }

        let budget = settings.plugin_instruction_limit.map(|limit| {
            let remaining = Rc::new(Cell::new(limit));
            let counter = Rc::clone(&remaining);
            lua.set_hook(
                HookTriggers::new().every_nth_instruction(HOOK_STRIDE),
                move |_lua, _debug| {
                    let left = counter.get().saturating_sub(u64::from(HOOK_STRIDE));
                    counter.set(left);
                    if left == 0 {
                        Err(mlua::Error::runtime("instruction limit exceeded"))
                    } else {
                        Ok(VmState::Continue)
                    }
                },
            );
            InstructionBudget { limit, remaining }
        });

        // Captured before any plugin runs, so later mutation of the shared
        // string metatable cannot redirect rule matching.
        let string_find = lua.globals().get::<Table>("string")?.get::<Function>("find")?;
        install_stable_builtins(&lua)?;

        Ok(Self {
            lua,
            string_find,
            budget,
        })
    }

    pub(crate) fn lua(&self) -> &Lua {
        &self.lua
    }

    pub(crate) fn string_find(&self) -> &Function {
        &self.string_find
    }

    /// A fresh global table for one plugin. Library tables are shallow copies
    /// so one plugin cannot patch `string` or `table` for another.
    pub(crate) fn environment(&self) -> mlua::Result<Table> {
        let globals = self.lua.globals();
        let env = self.lua.create_table()?;

        for name in SAFE_GLOBALS {
            env.set(*name, globals.get::<Value>(*name)?)?;
        }

        for name in SAFE_LIBRARIES {
            let library: Table = globals.get(*name)?;
            let copy = self.lua.create_table()?;
            for pair in library.pairs::<Value, Value>() {
                let (key, value) = pair?;
                copy.set(key, value)?;
            }
            for (lib, member) in IMPURE_MEMBERS {
                if lib == name {
                    copy.set(*member, Value::Nil)?;
                }
            }
            env.set(*name, copy)?;
        }

        env.set("_G", env.clone())?;
        Ok(env)
    }

    /// Run one call into plugin code with a freshly reset instruction budget.
    pub(crate) fn guarded<R>(&self, call: impl FnOnce() -> mlua::Result<R>) -> mlua::Result<R> {
        if let Some(budget) = &self.budget {
            budget.remaining.set(budget.limit);
        }
        call()
    }
}

/// Replace the builtins whose output depends on hash layout or heap addresses,
/// so the same plugin source always yields the same stylesheet and markup.
fn install_stable_builtins(lua: &Lua) -> mlua::Result<()> {
    let globals = lua.globals();
    let raw_tostring: Function = globals.get("tostring")?;
    let string_lib: Table = globals.get("string")?;
    let raw_format: Function = string_lib.get("format")?;

    globals.set("pairs", lua.create_function(ordered_pairs)?)?;
    globals.set("next", lua.create_function(ordered_next)?)?;
    globals.set(
        "tostring",
        lua.create_function(move |lua, value: Value| match opaque_name(&value) {
            Some(name) => Ok(Value::String(lua.create_string(name)?)),
            None => raw_tostring.call::<Value>(value),
        })?,
    )?;

    // The library table is also the string metatable's `__index`, so method
    // calls like `("%s"):format(t)` go through the wrapper too.
    string_lib.set(
        "format",
        lua.create_function(move |lua, (fmt, args): (mlua::String, Variadic<Value>)| {
            if has_pointer_conversion(&fmt.as_bytes()) {
                return Err(mlua::Error::runtime("bad argument #1 to 'format' (%p is not allowed)"));
            }
            let mut stable = Variadic::new();
            for arg in args {
                stable.push(match opaque_name(&arg) {
                    Some(name) => Value::String(lua.create_string(name)?),
                    None => arg,
                });
            }
            raw_format.call::<Value>((fmt, stable))
        })?,
    )?;
    Ok(())
}

/// The address-free name for values whose default string form is a pointer.
fn opaque_name(value: &Value) -> Option<&'static str> {
    match value {
        Value::Table(t) => {
            let custom = t
                .metatable()
                .is_some_and(|mt| mt.raw_get::<Value>("__tostring").is_ok_and(|v| !v.is_nil()));
            (!custom).then_some("table")
        }
        Value::Function(_) => Some("function"),
        Value::Thread(_) => Some("thread"),
        Value::UserData(_) | Value::LightUserData(_) => Some("userdata"),
        _ => None,
    }
}

fn has_pointer_conversion(fmt: &[u8]) -> bool {
    let mut i = 0;
    while i < fmt.len() {
        if fmt[i] == b'%' {
            i += 1;
            while i < fmt.len() && b"-+ #0123456789.".contains(&fmt[i]) {
                i += 1;
            }
            if fmt.get(i) == Some(&b'p') {
                return true;
            }
        }
        i += 1;
    }
    false
}

/// Keys of `t` in traversal order: the array part `1..n`, then numbers,
/// strings and booleans sorted. Other key types keep the raw order.
fn ordered_keys(t: &Table) -> mlua::Result<Vec<Value>> {
    let mut keys = Vec::new();
    let mut n: i64 = 0;
    while !t.raw_get::<Value>(n + 1)?.is_nil() {
        n += 1;
        keys.push(Value::Integer(n));
    }

    let mut rest = Vec::new();
    for pair in t.pairs::<Value, Value>() {
        let (key, _) = pair?;
        if !matches!(key, Value::Integer(i) if (1..=n).contains(&i)) {
            rest.push(key);
        }
    }
    rest.sort_by(compare_keys);
    keys.extend(rest);
    Ok(keys)
}

fn key_rank(key: &Value) -> u8 {
    match key {
        Value::Integer(_) | Value::Number(_) => 0,
        Value::String(_) => 1,
        Value::Boolean(_) => 2,
        _ => 3,
    }
}

fn compare_keys(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => x.cmp(y),
        (Value::Integer(x), Value::Number(y)) => (*x as f64).total_cmp(y),
        (Value::Number(x), Value::Integer(y)) => x.total_cmp(&(*y as f64)),
        (Value::Number(x), Value::Number(y)) => x.total_cmp(y),
        (Value::String(x), Value::String(y)) => x.as_bytes().to_vec().cmp(&y.as_bytes().to_vec()),
        (Value::Boolean(x), Value::Boolean(y)) => x.cmp(y),
        _ => key_rank(a).cmp(&key_rank(b)),
    }
}

fn ordered_pairs(lua: &Lua, t: Table) -> mlua::Result<MultiValue> {
    if let Some(mt) = t.metatable() {
        if let Value::Function(custom) = mt.raw_get::<Value>("__pairs")? {
            return custom.call::<MultiValue>(t);
        }
    }

    let keys = ordered_keys(&t)?;
    let cursor = Cell::new(0usize);
    let iter = lua.create_function(move |_, (tbl, _control): (Table, Value)| {
        while let Some(key) = keys.get(cursor.get()) {
            cursor.set(cursor.get() + 1);
            let value: Value = tbl.raw_get(key.clone())?;
            if !value.is_nil() {
                return Ok((key.clone(), value));
            }
        }
        Ok((Value::Nil, Value::Nil))
    })?;
    (iter, t, Value::Nil).into_lua_multi(lua)
}

fn ordered_next(_lua: &Lua, (t, key): (Table, Value)) -> mlua::Result<(Value, Value)> {
    let keys = ordered_keys(&t)?;
    let start = match key {
        Value::Nil => 0,
        key => match keys.iter().position(|k| *k == key) {
            Some(pos) => pos + 1,
            None => return Err(mlua::Error::runtime("invalid key to 'next'")),
        },
    };
    match keys.get(start) {
        Some(next) => Ok((next.clone(), t.raw_get(next.clone())?)),
        None => Ok((Value::Nil, Value::Nil)),
    }
}
