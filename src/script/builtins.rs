// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! The `floe` table of host functions available to library scripts.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use mlua::{AnyUserData, Error, Lua, Table, UserData, Value};

use super::sandbox::Watchdog;
use super::schema::{bind, BindContext, BindError};
use crate::library::{ImpulseResponse, Instrument, Library, LibraryInfo, Region};

/// Nested tables deeper than this are refused by `extend_table`.
const MAX_TABLE_DEPTH: usize = 32;

/// Everything the builtins have constructed so far. Handles given to the script
/// are indices into `libraries`.
pub(super) struct BuildState {
    pub(super) script_path: PathBuf,
    pub(super) ctx: BindContext,
    pub(super) libraries: Vec<Library>,
}

impl BuildState {
    pub(super) fn new(script_path: PathBuf, ctx: BindContext) -> BuildState {
        BuildState {
            script_path,
            ctx,
            libraries: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct LibraryHandle(pub(super) usize);

impl UserData for LibraryHandle {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct InstrumentHandle {
    library: usize,
    instrument: usize,
}

impl UserData for InstrumentHandle {}

fn bind_error(function: &str, error: BindError) -> Error {
    Error::runtime(format!("floe.{}: {}", function, error))
}

fn expect_table(function: &str, position: usize, value: Value) -> mlua::Result<Table> {
    match value {
        Value::Table(table) => Ok(table),
        other => Err(Error::runtime(format!(
            "floe.{}: argument {} must be a table, got {}",
            function,
            position,
            other.type_name()
        ))),
    }
}

fn expect_handle<T: UserData + Copy + 'static>(
    function: &str,
    position: usize,
    expected: &str,
    value: &Value,
) -> mlua::Result<T> {
    let mismatch = |got: &str| {
        Error::runtime(format!(
            "floe.{}: argument {} must be {}, got {}",
            function, position, expected, got
        ))
    };
    match value {
        Value::UserData(data) => data
            .borrow::<T>()
            .map(|handle| *handle)
            .map_err(|_| mismatch("a different handle")),
        other => Err(mismatch(other.type_name())),
    }
}

/// Runs a builtin body and then the watchdog, so time spent in host code counts
/// against the script's budget.
fn guarded<T>(watchdog: &Watchdog, body: impl FnOnce() -> mlua::Result<T>) -> mlua::Result<T> {
    let result = body();
    watchdog.check()?;
    result
}

/// Installs the global `floe` table.
pub(super) fn register(
    lua: &Lua,
    state: &Rc<RefCell<BuildState>>,
    watchdog: &Rc<Watchdog>,
) -> mlua::Result<()> {
    let floe = lua.create_table()?;

    let (s, w) = (state.clone(), watchdog.clone());
    floe.set(
        "new_library",
        lua.create_function(move |lua, table: Value| {
            guarded(&w, || {
                let table = expect_table("new_library", 1, table)?;
                let ctx = s.borrow().ctx;
                let info: LibraryInfo =
                    bind(&table, &ctx).map_err(|e| bind_error("new_library", e))?;
                let handle = {
                    let mut state = s.borrow_mut();
                    let library = Library::new(info, &state.script_path);
                    state.libraries.push(library);
                    LibraryHandle(state.libraries.len() - 1)
                };
                lua.create_userdata(handle)
            })
        })?,
    )?;

    let (s, w) = (state.clone(), watchdog.clone());
    floe.set(
        "new_instrument",
        lua.create_function(move |lua, (library, table): (Value, Value)| {
            guarded(&w, || {
                let handle: LibraryHandle =
                    expect_handle("new_instrument", 1, "a library", &library)?;
                let table = expect_table("new_instrument", 2, table)?;
                let ctx = s.borrow().ctx;
                let instrument: Instrument =
                    bind(&table, &ctx).map_err(|e| bind_error("new_instrument", e))?;
                let index = {
                    let mut state = s.borrow_mut();
                    let library = state
                        .libraries
                        .get_mut(handle.0)
                        .ok_or_else(|| Error::runtime("floe.new_instrument: stale library handle"))?;
                    library
                        .add_instrument(instrument)
                        .map_err(|e| Error::runtime(format!("floe.new_instrument: {}", e)))?
                };
                lua.create_userdata(InstrumentHandle {
                    library: handle.0,
                    instrument: index,
                })
            })
        })?,
    )?;

    let (s, w) = (state.clone(), watchdog.clone());
    floe.set(
        "add_region",
        lua.create_function(move |_, (instrument, table): (Value, Value)| {
            guarded(&w, || {
                let handle: InstrumentHandle =
                    expect_handle("add_region", 1, "an instrument", &instrument)?;
                let table = expect_table("add_region", 2, table)?;
                let ctx = s.borrow().ctx;
                let region: Region = bind(&table, &ctx).map_err(|e| bind_error("add_region", e))?;
                let mut state = s.borrow_mut();
                let instrument = state
                    .libraries
                    .get_mut(handle.library)
                    .and_then(|l| l.instrument_mut(handle.instrument))
                    .ok_or_else(|| Error::runtime("floe.add_region: stale instrument handle"))?;
                instrument.regions.push(region);
                Ok(())
            })
        })?,
    )?;

    let (s, w) = (state.clone(), watchdog.clone());
    floe.set(
        "add_ir",
        lua.create_function(move |_, (library, table): (Value, Value)| {
            guarded(&w, || {
                let handle: LibraryHandle = expect_handle("add_ir", 1, "a library", &library)?;
                let table = expect_table("add_ir", 2, table)?;
                let ctx = s.borrow().ctx;
                let ir: ImpulseResponse = bind(&table, &ctx).map_err(|e| bind_error("add_ir", e))?;
                let mut state = s.borrow_mut();
                let library = state
                    .libraries
                    .get_mut(handle.0)
                    .ok_or_else(|| Error::runtime("floe.add_ir: stale library handle"))?;
                library
                    .add_ir(ir)
                    .map_err(|e| Error::runtime(format!("floe.add_ir: {}", e)))?;
                Ok(())
            })
        })?,
    )?;

    let w = watchdog.clone();
    floe.set(
        "extend_table",
        lua.create_function(move |lua, (base, overrides): (Value, Value)| {
            guarded(&w, || {
                let base = expect_table("extend_table", 1, base)?;
                let overrides = expect_table("extend_table", 2, overrides)?;
                merge_tables(lua, &base, &overrides, 0)
            })
        })?,
    )?;

    lua.globals().set("floe", floe)?;
    Ok(())
}

/// Deep-copies `base` with `overrides` applied on top. Tables present on both
/// sides merge recursively; any other override value replaces the base value.
/// Neither input is modified.
fn merge_tables(lua: &Lua, base: &Table, overrides: &Table, depth: usize) -> mlua::Result<Table> {
    if depth > MAX_TABLE_DEPTH {
        return Err(Error::runtime(format!(
            "floe.extend_table: tables are nested more than {} levels deep",
            MAX_TABLE_DEPTH
        )));
    }
    let result = lua.create_table()?;
    for pair in base.pairs::<Value, Value>() {
        let (key, value) = pair?;
        let value = match value {
            Value::Table(nested) => Value::Table(copy_table(lua, &nested, depth + 1)?),
            other => other,
        };
        result.raw_set(key, value)?;
    }
    for pair in overrides.pairs::<Value, Value>() {
        let (key, value) = pair?;
        let existing: Value = result.raw_get(key.clone())?;
        let merged = match (existing, value) {
            (Value::Table(existing), Value::Table(nested)) => {
                Value::Table(merge_tables(lua, &existing, &nested, depth + 1)?)
            }
            (_, Value::Table(nested)) => Value::Table(copy_table(lua, &nested, depth + 1)?),
            (_, other) => other,
        };
        result.raw_set(key, merged)?;
    }
    Ok(result)
}

fn copy_table(lua: &Lua, table: &Table, depth: usize) -> mlua::Result<Table> {
    merge_tables(lua, table, &lua.create_table()?, depth)
}

/// Reads a library handle out of a returned value.
pub(super) fn library_handle(data: &AnyUserData) -> Option<LibraryHandle> {
    data.borrow::<LibraryHandle>().ok().map(|handle| *handle)
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;
    use crate::playsync::CancelHandle;

    fn lua_with_builtins() -> (Lua, Rc<RefCell<BuildState>>) {
        let lua = Lua::new();
        let state = Rc::new(RefCell::new(BuildState::new(
            PathBuf::from("/lib/floe.lua"),
            BindContext::default(),
        )));
        let watchdog = Rc::new(Watchdog::new(Duration::from_secs(10), None::<CancelHandle>));
        register(&lua, &state, &watchdog).expect("register");
        (lua, state)
    }

    #[test]
    fn test_extend_table_merges_without_mutating() {
        let (lua, _) = lua_with_builtins();
        let result: (i64, i64, String, i64, i64) = lua
            .load(
                r#"
                local base = { a = 1, nested = { x = 1, y = 2 }, keep = "k" }
                local over = { a = 5, nested = { y = 20 } }
                local merged = floe.extend_table(base, over)
                merged.nested.x = 100
                return merged.a, merged.nested.y, merged.keep, base.nested.x, base.a
                "#,
            )
            .eval()
            .expect("eval");
        assert_eq!(result, (5, 20, "k".to_string(), 1, 1));
    }

    #[test]
    fn test_builtins_build_library() {
        let (lua, state) = lua_with_builtins();
        lua.load(
            r#"
            local lib = floe.new_library({ name = "L", tagline = "t", author = "me" })
            local inst = floe.new_instrument(lib, { name = "Piano", tags = { "keys" } })
            floe.add_region(inst, { file = { path = "c4.wav", root_key = 60 } })
            floe.add_region(inst, { file = { path = "c5.wav", root_key = 72 } })
            floe.add_ir(lib, { name = "Hall", path = "irs/hall.wav" })
            "#,
        )
        .exec()
        .expect("exec");

        let state = state.borrow();
        assert_eq!(state.libraries.len(), 1);
        let library = &state.libraries[0];
        assert_eq!(library.info.name, "L");
        assert_eq!(library.instruments()[0].regions.len(), 2);
        assert!(library.instruments()[0].tags.contains("keys"));
        assert_eq!(library.irs()[0].name, "Hall");
        assert_eq!(library.root(), std::path::Path::new("/lib"));
    }

    #[test]
    fn test_argument_types_checked() {
        let (lua, _) = lua_with_builtins();
        let err = lua
            .load(r#"floe.new_instrument({}, { name = "x" })"#)
            .exec()
            .unwrap_err();
        assert!(err.to_string().contains("argument 1 must be a library, got table"));

        let err = lua
            .load(
                r#"
                local lib = floe.new_library({ name = "L", tagline = "t", author = "me" })
                floe.add_region(lib, {})
                "#,
            )
            .exec()
            .unwrap_err();
        assert!(err.to_string().contains("must be an instrument"));
    }
}
