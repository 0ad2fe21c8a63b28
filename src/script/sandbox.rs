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

use std::cell::{Cell, RefCell};
use std::path::Path;
use std::rc::Rc;
use std::time::{Duration, Instant};

use mlua::{ChunkMode, Function, HookTriggers, Lua, LuaOptions, MultiValue, StdLib, Value, VmState};
use tracing::debug;

use super::builtins::{self, BuildState, LibraryHandle};
use super::schema::BindContext;
use super::{SandboxSettings, ScriptError, ScriptErrorKind};
use crate::library::Library;
use crate::playsync::CancelHandle;
use crate::util::filename_display;

/// The watchdog runs after this many VM instructions.
const WATCHDOG_INSTRUCTION_INTERVAL: u32 = 50;

/// Globals removed from the base library: they read files or load bytecode.
const REMOVED_GLOBALS: [&str; 4] = ["dofile", "loadfile", "load", "require"];

/// Protected-call globals that are wrapped so a refused allocation cannot be caught.
const PROTECTED_CALLS: [&str; 2] = ["pcall", "xpcall"];

/// The message Lua reports when an allocation is refused.
const MEMORY_ERROR_MESSAGE: &str = "not enough memory";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Timeout,
    Cancelled,
    OutOfMemory,
}

/// Enforces the wall-clock budget, the memory quota and cancellation. Once
/// tripped it stays tripped, so a script that catches the error is
/// interrupted again at the next tick.
pub(super) struct Watchdog {
    started: Instant,
    limit: Duration,
    cancel: Option<CancelHandle>,
    tripped: Cell<Option<Interrupt>>,
}

impl Watchdog {
    pub(super) fn new(limit: Duration, cancel: Option<CancelHandle>) -> Watchdog {
        Watchdog {
            started: Instant::now(),
            limit,
            cancel,
            tripped: Cell::new(None),
        }
    }

    pub(super) fn check(&self) -> mlua::Result<()> {
        if self.tripped.get().is_none() {
            if self.cancel.as_ref().is_some_and(CancelHandle::is_cancelled) {
                self.tripped.set(Some(Interrupt::Cancelled));
            } else if self.started.elapsed() > self.limit {
                self.tripped.set(Some(Interrupt::Timeout));
            }
        }
        match self.tripped.get() {
            Some(Interrupt::Timeout) => Err(mlua::Error::runtime("script time limit exceeded")),
            Some(Interrupt::Cancelled) => Err(mlua::Error::runtime("script evaluation cancelled")),
            Some(Interrupt::OutOfMemory) => Err(mlua::Error::MemoryError(MEMORY_ERROR_MESSAGE.to_string())),
            None => Ok(()),
        }
    }

    /// Records a refused allocation. Timeouts and cancellation take precedence.
    fn trip_memory(&self) {
        if self.tripped.get().is_none() {
            self.tripped.set(Some(Interrupt::OutOfMemory));
        }
    }

    fn tripped(&self) -> Option<Interrupt> {
        self.tripped.get()
    }
}

pub(super) fn evaluate(
    script: &[u8],
    script_path: &Path,
    settings: &SandboxSettings,
    cancel: Option<&CancelHandle>,
) -> Result<Library, ScriptError> {
    let filename = filename_display(script_path).to_string();
    let unexpected = |e: mlua::Error| ScriptError::new(ScriptErrorKind::Unexpected, &filename, e.to_string());

    let lua = Lua::new_with(
        StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8,
        LuaOptions::default(),
    )
    .map_err(unexpected)?;
    let globals = lua.globals();
    for name in REMOVED_GLOBALS {
        globals.raw_set(name, Value::Nil).map_err(unexpected)?;
    }

    let watchdog = Rc::new(Watchdog::new(settings.quotas.max_wall, cancel.cloned()));
    {
        let watchdog = watchdog.clone();
        lua.set_hook(
            HookTriggers::new().every_nth_instruction(WATCHDOG_INSTRUCTION_INTERVAL),
            move |_lua, _debug| {
                watchdog.check()?;
                Ok(VmState::Continue)
            },
        );
    }

    let state = Rc::new(RefCell::new(BuildState::new(
        script_path.to_path_buf(),
        BindContext {
            max_name_bytes: settings.max_name_bytes,
        },
    )));
    builtins::register(&lua, &state, &watchdog).map_err(unexpected)?;
    wrap_protected_calls(&lua, &watchdog).map_err(unexpected)?;

    // The limit applies from here on, so the quota covers the script alone.
    lua.set_memory_limit(settings.quotas.max_bytes)
        .map_err(unexpected)?;

    let started = Instant::now();
    let result = lua
        .load(script)
        .set_name(format!("={}", filename))
        .set_mode(ChunkMode::Text)
        .eval::<MultiValue>();
    let values = result.map_err(|e| classify(&e, &watchdog, &settings.quotas.max_wall, &filename))?;

    let handle = returned_library(&values)
        .map_err(|message| ScriptError::new(ScriptErrorKind::Runtime, &filename, message))?;
    drop(values);

    let mut libraries = std::mem::take(&mut state.borrow_mut().libraries);
    if handle.0 >= libraries.len() {
        return Err(ScriptError::new(
            ScriptErrorKind::Unexpected,
            &filename,
            "returned library handle is not known to the host",
        ));
    }
    let library = libraries.swap_remove(handle.0);
    debug!(
        script = ?script_path,
        elapsed_ms = started.elapsed().as_millis() as u64,
        memory_bytes = lua.used_memory(),
        instruments = library.instruments().len(),
        "Script evaluated"
    );
    Ok(library)
}

/// Replaces `pcall` and `xpcall` with versions that rethrow once the watchdog
/// has tripped. A refused allocation trips it, so the memory quota holds even
/// when the script catches the error.
fn wrap_protected_calls(lua: &Lua, watchdog: &Rc<Watchdog>) -> mlua::Result<()> {
    let globals = lua.globals();
    for name in PROTECTED_CALLS {
        let raw: Function = globals.get(name)?;
        let watchdog = watchdog.clone();
        let wrapped = lua.create_function(move |_, args: MultiValue| {
            let results = raw.call::<MultiValue>(args)?;
            let mut iter = results.iter();
            if let (Some(Value::Boolean(false)), Some(Value::String(message))) = (iter.next(), iter.next()) {
                if *message.as_bytes() == *MEMORY_ERROR_MESSAGE.as_bytes() {
                    watchdog.trip_memory();
                }
            }
            watchdog.check()?;
            Ok(results)
        })?;
        globals.raw_set(name, wrapped)?;
    }
    Ok(())
}

fn returned_library(values: &MultiValue) -> Result<LibraryHandle, String> {
    if values.len() != 1 {
        return Err(format!(
            "the script must return exactly one library, but it returned {} values",
            values.len()
        ));
    }
    match values.iter().next() {
        Some(Value::UserData(data)) => builtins::library_handle(data).ok_or_else(|| {
            "the script must return a library created by floe.new_library".to_string()
        }),
        Some(other) => Err(format!(
            "the script must return a library created by floe.new_library, got {}",
            other.type_name()
        )),
        None => Err("the script did not return a library".to_string()),
    }
}

fn root_cause(error: &mlua::Error) -> &mlua::Error {
    match error {
        mlua::Error::CallbackError { cause, .. } => root_cause(cause),
        mlua::Error::WithContext { cause, .. } => root_cause(cause),
        other => other,
    }
}

fn callback_traceback(error: &mlua::Error) -> Option<&str> {
    match error {
        mlua::Error::CallbackError { traceback, .. } => Some(traceback),
        mlua::Error::WithContext { cause, .. } => callback_traceback(cause),
        _ => None,
    }
}

/// Splits an interpreter message of the form "message\nstack traceback:\n...".
fn split_traceback(message: &str) -> (&str, Option<&str>) {
    match message.find("\nstack traceback:") {
        Some(index) => (&message[..index], Some(message[index + 1..].trim_end())),
        None => (message, None),
    }
}

/// Replaces any `[string "..."]` chunk names with the script's filename.
fn patch_chunk_name(text: &str, filename: &str) -> String {
    let mut patched = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("[string \"") {
        let Some(length) = rest[start..].find("\"]") else {
            break;
        };
        patched.push_str(&rest[..start]);
        patched.push_str(filename);
        rest = &rest[start + length + 2..];
    }
    patched.push_str(rest);
    patched
}

fn classify(error: &mlua::Error, watchdog: &Watchdog, limit: &Duration, filename: &str) -> ScriptError {
    match watchdog.tripped() {
        Some(Interrupt::Timeout) => {
            return ScriptError::new(
                ScriptErrorKind::Timeout,
                filename,
                format!("the script ran longer than {} ms", limit.as_millis()),
            )
        }
        Some(Interrupt::Cancelled) => {
            return ScriptError::new(ScriptErrorKind::Cancelled, filename, "evaluation was cancelled")
        }
        Some(Interrupt::OutOfMemory) => {
            return ScriptError::new(ScriptErrorKind::OutOfMemory, filename, MEMORY_ERROR_MESSAGE)
        }
        None => {}
    }

    let from_callback = callback_traceback(error);
    let (kind, message, traceback) = match root_cause(error) {
        mlua::Error::SyntaxError { message, .. } => (ScriptErrorKind::Syntax, message.clone(), None),
        mlua::Error::MemoryError(message) => (ScriptErrorKind::OutOfMemory, message.clone(), None),
        mlua::Error::RuntimeError(message) => {
            let (message, traceback) = split_traceback(message);
            (
                ScriptErrorKind::Runtime,
                message.to_string(),
                traceback.or(from_callback).map(str::to_string),
            )
        }
        other if from_callback.is_some() => (
            ScriptErrorKind::Runtime,
            other.to_string(),
            from_callback.map(str::to_string),
        ),
        other => (ScriptErrorKind::Unexpected, other.to_string(), None),
    };

    ScriptError {
        kind,
        filename: filename.to_string(),
        message: patch_chunk_name(&message, filename),
        traceback: match (kind, traceback) {
            (_, Some(traceback)) => Some(patch_chunk_name(&traceback, filename)),
            (ScriptErrorKind::Runtime, None) => Some(String::new()),
            (_, None) => None,
        },
    }
}
