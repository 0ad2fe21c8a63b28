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

//! Typed record descriptors and the binder that checks script tables against them.
//!
//! Each record lists its fields in declaration order. The same descriptors drive
//! validation (`bind`) and the documented example script.

use mlua::{Table, Value};

/// Inclusive numeric bounds for integer fields.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumericRange {
    pub min: i64,
    pub max: i64,
}

impl NumericRange {
    pub const fn new(min: i64, max: i64) -> NumericRange {
        NumericRange { min, max }
    }

    fn check(&self, value: i64) -> Result<(), BindError> {
        if value < self.min || value > self.max {
            return Err(BindError::invalid(format!(
                "value {} is out of range [{}, {}]",
                value, self.min, self.max
            )));
        }
        Ok(())
    }
}

/// The dynamic type a field expects.
#[derive(Clone, Copy)]
pub enum FieldKind {
    String,
    Integer,
    Boolean,
    /// An array of strings.
    StringList,
    /// A two-element `{start, end}` array with an exclusive end.
    Range {
        start: NumericRange,
        end: NumericRange,
    },
    /// A nested record.
    Record(fn() -> RecordDoc),
}

impl FieldKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Integer => "integer",
            FieldKind::Boolean => "boolean",
            FieldKind::StringList => "array of strings",
            FieldKind::Range { .. } => "array of 2 integers",
            FieldKind::Record(_) => "table",
        }
    }
}

impl std::fmt::Debug for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Documentation and checks for one field.
#[derive(Debug, Clone, Copy)]
pub struct FieldInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    /// Human description of the default; empty for required fields.
    pub default: &'static str,
    /// Bounds for integer fields.
    pub range: Option<NumericRange>,
    /// Accepted values for enumerated string fields.
    pub enum_values: &'static [&'static str],
    /// A Lua literal used by the example script. Unused for nested records.
    pub example: &'static str,
}

impl FieldInfo {
    /// A field with everything but the name, kind and description left empty.
    pub const fn new(name: &'static str, kind: FieldKind, description: &'static str) -> FieldInfo {
        FieldInfo {
            name,
            description,
            kind,
            required: false,
            default: "",
            range: None,
            enum_values: &[],
            example: "",
        }
    }

    pub const fn required(mut self) -> FieldInfo {
        self.required = true;
        self
    }

    pub const fn default_value(mut self, default: &'static str) -> FieldInfo {
        self.default = default;
        self
    }

    pub const fn range(mut self, min: i64, max: i64) -> FieldInfo {
        self.range = Some(NumericRange::new(min, max));
        self
    }

    pub const fn one_of(mut self, values: &'static [&'static str]) -> FieldInfo {
        self.enum_values = values;
        self
    }

    pub const fn example(mut self, example: &'static str) -> FieldInfo {
        self.example = example;
        self
    }
}

/// A checked field value handed to a setter.
#[derive(Debug)]
pub enum FieldValue {
    String(String),
    Integer(i64),
    Boolean(bool),
    StringList(Vec<String>),
    Range(i64, i64),
    Table(Table),
}

/// Assigns a checked value to a record.
pub type Setter<T> = fn(&mut T, FieldValue, &BindContext) -> Result<(), BindError>;

pub struct Field<T: 'static> {
    pub info: FieldInfo,
    pub set: Setter<T>,
}

/// A record type scripts can describe with a table.
pub trait Record: Default + Sized + 'static {
    const NAME: &'static str;

    fn fields() -> &'static [Field<Self>];

    /// Cross-field checks run after every field has been assigned.
    fn validate(&mut self, _ctx: &BindContext) -> Result<(), BindError> {
        Ok(())
    }
}

/// The documentation view of a record.
#[derive(Debug, Clone)]
pub struct RecordDoc {
    pub name: &'static str,
    pub fields: Vec<FieldInfo>,
}

pub fn record_doc<T: Record>() -> RecordDoc {
    RecordDoc {
        name: T::NAME,
        fields: T::fields().iter().map(|f| f.info).collect(),
    }
}

/// Limits that apply while binding.
#[derive(Debug, Clone, Copy)]
pub struct BindContext {
    pub max_name_bytes: usize,
}

impl Default for BindContext {
    fn default() -> Self {
        BindContext {
            max_name_bytes: crate::config::engine::DEFAULT_MAX_NAME_BYTES,
        }
    }
}

impl BindContext {
    /// Checks a declared name against the configured length limit.
    pub fn check_name(&self, name: &str) -> Result<(), BindError> {
        if name.is_empty() {
            return Err(BindError::field("name", "must not be empty"));
        }
        if name.len() > self.max_name_bytes {
            return Err(BindError::field(
                "name",
                format!(
                    "\"{}\" is {} bytes long; the maximum is {}",
                    name,
                    name.len(),
                    self.max_name_bytes
                ),
            ));
        }
        Ok(())
    }
}

/// A table that does not match its record. `field` is a dotted path into nested
/// records, e.g. `file.loop.end_frame`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{record}.{field}: {message}")]
pub struct BindError {
    pub record: &'static str,
    pub field: String,
    pub message: String,
}

impl BindError {
    /// An error for whichever field is being bound; the binder fills in the names.
    pub fn invalid(message: impl Into<String>) -> BindError {
        BindError {
            record: "",
            field: String::new(),
            message: message.into(),
        }
    }

    /// An error about a specific field, raised from record validation.
    pub fn field(field: &str, message: impl Into<String>) -> BindError {
        BindError {
            record: "",
            field: field.to_string(),
            message: message.into(),
        }
    }

    fn nested_in(mut self, field: &str) -> BindError {
        self.field = if self.field.is_empty() {
            field.to_string()
        } else {
            format!("{}.{}", field, self.field)
        };
        self
    }
}

/// Builds a record from a script table. Fields are checked in declaration
/// order; unknown keys are ignored.
pub fn bind<T: Record>(table: &Table, ctx: &BindContext) -> Result<T, BindError> {
    bind_record::<T>(table, ctx).map_err(|mut e| {
        e.record = T::NAME;
        e
    })
}

/// Binds a nested record without stamping the record name, so errors keep the
/// outermost record.
pub fn bind_nested<T: Record>(table: &Table, ctx: &BindContext) -> Result<T, BindError> {
    bind_record::<T>(table, ctx)
}

fn bind_record<T: Record>(table: &Table, ctx: &BindContext) -> Result<T, BindError> {
    let mut record = T::default();
    for field in T::fields() {
        let info = &field.info;
        let value: Value = table
            .get(info.name)
            .map_err(|e| BindError::invalid(e.to_string()).nested_in(info.name))?;
        if value.is_nil() {
            if info.required {
                return Err(BindError::invalid("missing field").nested_in(info.name));
            }
            continue;
        }
        let value = convert(info, value).map_err(|e| e.nested_in(info.name))?;
        (field.set)(&mut record, value, ctx).map_err(|e| e.nested_in(info.name))?;
    }
    record.validate(ctx)?;
    Ok(record)
}

fn type_mismatch(expected: &str, value: &Value) -> BindError {
    BindError::invalid(format!("expected {}, got {}", expected, value.type_name()))
}

fn to_integer(value: &Value, expected: &str) -> Result<i64, BindError> {
    match value {
        Value::Integer(i) => Ok(*i),
        Value::Number(n) if n.is_finite() && n.fract() == 0.0 => Ok(*n as i64),
        Value::Number(n) => Err(BindError::invalid(format!(
            "expected {}, got non-integral number {}",
            expected, n
        ))),
        other => Err(type_mismatch(expected, other)),
    }
}

fn to_string(value: &Value) -> Result<String, BindError> {
    match value {
        Value::String(s) => s
            .to_str()
            .map(|s| s.to_string())
            .map_err(|_| BindError::invalid("string is not valid UTF-8")),
        other => Err(type_mismatch("string", other)),
    }
}

fn convert(info: &FieldInfo, value: Value) -> Result<FieldValue, BindError> {
    match info.kind {
        FieldKind::String => {
            let s = to_string(&value)?;
            if !info.enum_values.is_empty() && !info.enum_values.contains(&s.as_str()) {
                let options: Vec<String> =
                    info.enum_values.iter().map(|v| format!("\"{}\"", v)).collect();
                return Err(BindError::invalid(format!(
                    "invalid value \"{}\"; valid options are {}",
                    s,
                    options.join(", ")
                )));
            }
            Ok(FieldValue::String(s))
        }
        FieldKind::Integer => {
            let i = to_integer(&value, "integer")?;
            if let Some(range) = info.range {
                range.check(i)?;
            }
            Ok(FieldValue::Integer(i))
        }
        FieldKind::Boolean => match value {
            Value::Boolean(b) => Ok(FieldValue::Boolean(b)),
            other => Err(type_mismatch("boolean", &other)),
        },
        FieldKind::StringList => {
            let Value::Table(table) = value else {
                return Err(type_mismatch("array of strings", &value));
            };
            let mut strings = Vec::new();
            for item in table.sequence_values::<Value>() {
                let item = item.map_err(|e| BindError::invalid(e.to_string()))?;
                strings.push(to_string(&item)?);
            }
            Ok(FieldValue::StringList(strings))
        }
        FieldKind::Range { start, end } => {
            let Value::Table(table) = value else {
                return Err(type_mismatch("array of 2 integers", &value));
            };
            if table.raw_len() != 2 {
                return Err(BindError::invalid(format!(
                    "expected array of 2 integers, got {} elements",
                    table.raw_len()
                )));
            }
            let first: Value = table
                .raw_get(1)
                .map_err(|e| BindError::invalid(e.to_string()))?;
            let second: Value = table
                .raw_get(2)
                .map_err(|e| BindError::invalid(e.to_string()))?;
            let first = to_integer(&first, "integer")?;
            let second = to_integer(&second, "integer")?;
            start.check(first)?;
            end.check(second)?;
            if second <= first {
                return Err(BindError::invalid(format!(
                    "end {} must be greater than start {}",
                    second, first
                )));
            }
            Ok(FieldValue::Range(first, second))
        }
        FieldKind::Record(_) => match value {
            Value::Table(table) => Ok(FieldValue::Table(table)),
            other => Err(type_mismatch("table", &other)),
        },
    }
}

impl FieldValue {
    /// Unwraps a value the binder already checked as a string.
    pub fn into_string(self) -> Result<String, BindError> {
        match self {
            FieldValue::String(s) => Ok(s),
            other => Err(BindError::invalid(format!("expected string, got {:?}", other))),
        }
    }

    pub fn into_integer(self) -> Result<i64, BindError> {
        match self {
            FieldValue::Integer(i) => Ok(i),
            other => Err(BindError::invalid(format!("expected integer, got {:?}", other))),
        }
    }

    pub fn into_bool(self) -> Result<bool, BindError> {
        match self {
            FieldValue::Boolean(b) => Ok(b),
            other => Err(BindError::invalid(format!("expected boolean, got {:?}", other))),
        }
    }

    pub fn into_strings(self) -> Result<Vec<String>, BindError> {
        match self {
            FieldValue::StringList(s) => Ok(s),
            other => Err(BindError::invalid(format!(
                "expected array of strings, got {:?}",
                other
            ))),
        }
    }

    pub fn into_range(self) -> Result<(i64, i64), BindError> {
        match self {
            FieldValue::Range(start, end) => Ok((start, end)),
            other => Err(BindError::invalid(format!("expected range, got {:?}", other))),
        }
    }

    pub fn into_table(self) -> Result<Table, BindError> {
        match self {
            FieldValue::Table(t) => Ok(t),
            other => Err(BindError::invalid(format!("expected table, got {:?}", other))),
        }
    }
}
