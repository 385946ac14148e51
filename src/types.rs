//! AMQP 0-9-1 Field Types
//!
//! This module provides the typed values that travel inside method arguments
//! and field tables. AMQP 0-9-1 tables are ordered name/value pairs with a
//! one-byte type tag per value; method arguments reuse the same value domain
//! plus the frame-level primitives (octets, shorts, bits, short strings).
//!
//! # Examples
//!
//! ```rust
//! use dumq_amqp091::types::{FieldTable, FieldValue};
//!
//! let mut capabilities = FieldTable::new();
//! capabilities.insert("authentication_failure_close", FieldValue::Bool(true));
//!
//! let mut properties = FieldTable::new();
//! properties.insert("product", FieldValue::LongStr("my-app".to_string()));
//! properties.insert("capabilities", FieldValue::Table(capabilities));
//!
//! assert_eq!(properties.get("product").and_then(|v| v.as_str()), Some("my-app"));
//! ```

use serde::{Deserialize, Serialize};

/// A single typed AMQP value.
///
/// Covers the field-table grammar subset used by the client (`t b s I l f d
/// S T F V` tags) plus the method-argument primitives that never appear
/// inside tables (`U8`/`U16`/`U32`/`U64`, short strings).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// No value ('V').
    Void,
    /// Boolean ('t').
    Bool(bool),
    /// Signed 8-bit integer ('b').
    I8(i8),
    /// Signed 16-bit integer ('s').
    I16(i16),
    /// Signed 32-bit integer ('I').
    I32(i32),
    /// Signed 64-bit integer ('l').
    I64(i64),
    /// Single-precision float ('f').
    F32(f32),
    /// Double-precision float ('d').
    F64(f64),
    /// POSIX timestamp in seconds ('T').
    Timestamp(u64),
    /// Long string ('S').
    LongStr(String),
    /// Nested field table ('F').
    Table(FieldTable),
    /// Unsigned octet; method arguments only.
    U8(u8),
    /// Unsigned short; method arguments only.
    U16(u16),
    /// Unsigned long; method arguments only.
    U32(u32),
    /// Unsigned long-long; method arguments only.
    U64(u64),
    /// Short string (max 255 bytes); method arguments only.
    ShortStr(String),
}

impl FieldValue {
    /// View a `ShortStr` or `LongStr` as `&str`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::ShortStr(s) | FieldValue::LongStr(s) => Some(s),
            _ => None,
        }
    }

    /// View a `Bool` as `bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// View a `U8` as `u8`.
    pub fn as_u8(&self) -> Option<u8> {
        match self {
            FieldValue::U8(n) => Some(*n),
            _ => None,
        }
    }

    /// View a `U16` as `u16`.
    pub fn as_u16(&self) -> Option<u16> {
        match self {
            FieldValue::U16(n) => Some(*n),
            _ => None,
        }
    }

    /// View a `U32` as `u32`.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            FieldValue::U32(n) => Some(*n),
            _ => None,
        }
    }

    /// View a `U64` or `Timestamp` as `u64`.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            FieldValue::U64(n) | FieldValue::Timestamp(n) => Some(*n),
            _ => None,
        }
    }

    /// View a `Table` as `&FieldTable`.
    pub fn as_table(&self) -> Option<&FieldTable> {
        match self {
            FieldValue::Table(t) => Some(t),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::LongStr(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::LongStr(s)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

/// An ordered AMQP field table.
///
/// Insertion order is preserved so encoded tables are deterministic.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FieldTable(Vec<(String, FieldValue)>);

impl FieldTable {
    /// Create an empty table.
    pub fn new() -> Self {
        FieldTable(Vec::new())
    }

    /// Insert a value, replacing any existing entry with the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = value,
            None => self.0.push((name, value)),
        }
    }

    /// Look up a value by name.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.0.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &(String, FieldValue)> {
        self.0.iter()
    }
}

impl From<Vec<(String, FieldValue)>> for FieldTable {
    fn from(entries: Vec<(String, FieldValue)>) -> Self {
        FieldTable(entries)
    }
}
