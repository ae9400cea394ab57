//! Record capability traits and the field descriptor tree.
//!
//! Record types describe their persisted shape explicitly through
//! [`Record::fields`] instead of being reflected over at runtime. Embedded
//! sub-records appear as [`FieldKind::Embedded`] nodes whose children are
//! flattened into the parent's column set by the metadata resolver.
//!
//! # Example
//! ```rust
//! use tablewright_core::record::{Entity, FieldDef, FieldKind, Record, Value, unknown_field};
//! use tablewright_core::Result;
//!
//! #[derive(Default)]
//! struct User {
//!     id: i64,
//!     name: String,
//! }
//!
//! impl Record for User {
//!     fn fields() -> Vec<FieldDef> {
//!         vec![
//!             FieldDef::new("id", FieldKind::integer(64)).tag("id,primary_key,auto_increment"),
//!             FieldDef::new("name", FieldKind::Text).size(120),
//!         ]
//!     }
//!
//!     fn get(&self, path: &[&str]) -> Result<Value> {
//!         match path {
//!             ["id"] => Ok(self.id.into()),
//!             ["name"] => Ok(self.name.clone().into()),
//!             _ => Err(unknown_field(path)),
//!         }
//!     }
//!
//!     fn set(&mut self, path: &[&str], value: Value) -> Result<()> {
//!         match path {
//!             ["id"] => self.id = value.to_typed()?,
//!             ["name"] => self.name = value.to_typed()?,
//!             _ => return Err(unknown_field(path)),
//!         }
//!         Ok(())
//!     }
//! }
//!
//! impl Entity for User {
//!     fn table_name(&self) -> String {
//!         "users".to_string()
//!     }
//! }
//! ```

use crate::{Result, error::TablewrightError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Structural classification of a field's value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// Boolean flag
    Bool,
    /// Integer of the given width
    Int {
        /// Width in bits
        bits: u8,
        /// Whether negative values are allowed
        signed: bool,
    },
    /// Floating point number
    Float {
        /// Width in bits
        bits: u8,
    },
    /// Unbounded or size-hinted string
    Text,
    /// Recognized temporal type; stored natively, never flattened
    Timestamp,
    /// Raw binary data
    Bytes,
    /// Sequence value, stored as JSON text
    Sequence,
    /// Associative map value, stored as JSON text
    Map,
    /// Named nested record, stored as JSON text
    Record,
    /// Anonymous embedded record whose fields are promoted into the parent
    Embedded(Vec<FieldDef>),
}

impl FieldKind {
    /// Signed integer of the given bit width.
    pub fn integer(bits: u8) -> Self {
        Self::Int { bits, signed: true }
    }

    /// Unsigned integer of the given bit width.
    pub fn unsigned(bits: u8) -> Self {
        Self::Int {
            bits,
            signed: false,
        }
    }

    /// Floating point value of the given bit width.
    pub fn float(bits: u8) -> Self {
        Self::Float { bits }
    }

    /// Whether values of this kind are serialized to JSON text for storage.
    ///
    /// Nested structures lose their native type fidelity: the database sees
    /// an opaque large-text column.
    pub fn is_complex(&self) -> bool {
        matches!(self, Self::Sequence | Self::Map | Self::Record)
    }

    /// Whether values of this kind are numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int { .. } | Self::Float { .. })
    }

    /// Substitute stored when a non-key field carries no value.
    pub fn default_value(&self) -> Value {
        match self {
            Self::Bool => Value::Bool(false),
            Self::Int { .. } => Value::Int(0),
            Self::Float { .. } => Value::Float(0.0),
            Self::Text => Value::Text(String::new()),
            Self::Timestamp => Value::Timestamp(DateTime::<Utc>::UNIX_EPOCH),
            Self::Bytes => Value::Bytes(Vec::new()),
            Self::Sequence => Value::Text("[]".to_string()),
            Self::Map | Self::Record => Value::Text("{}".to_string()),
            Self::Embedded(_) => Value::Null,
        }
    }
}

/// One node of a record's descriptor tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Field name as declared on the record
    pub name: &'static str,
    /// Value kind, or the children of an embedded record
    pub kind: FieldKind,
    /// Raw tag string; `None` derives the column from the name
    pub tag: Option<&'static str>,
    /// Private fields are never persisted
    pub public: bool,
    /// Standalone primary key marker, weaker than a tag marker
    pub primary_key: bool,
    /// Size hint for bounded text types
    pub size: Option<u32>,
    /// Explicit native type override
    pub sql_type: Option<&'static str>,
    /// Whether a managed index is kept on the column
    pub indexed: bool,
}

impl FieldDef {
    /// Creates a public, untagged field.
    pub fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            tag: None,
            public: true,
            primary_key: false,
            size: None,
            sql_type: None,
            indexed: false,
        }
    }

    /// Creates an anonymous embedded sub-record.
    pub fn embedded(name: &'static str, children: Vec<FieldDef>) -> Self {
        Self::new(name, FieldKind::Embedded(children))
    }

    /// Attaches the comma-separated column tag.
    pub fn tag(mut self, tag: &'static str) -> Self {
        self.tag = Some(tag);
        self
    }

    /// Marks the field as not publicly exposed; it will not be persisted.
    pub fn private(mut self) -> Self {
        self.public = false;
        self
    }

    /// Standalone primary-key marker, independent of the column tag.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Size hint for bounded string columns.
    pub fn size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    /// Explicit native column type, overriding every mapping rule.
    pub fn sql_type(mut self, sql_type: &'static str) -> Self {
        self.sql_type = Some(sql_type);
        self
    }

    /// Requests a managed single-column index.
    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }
}

/// Locator of a field inside a (possibly embedded) record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath(Vec<&'static str>);

impl FieldPath {
    /// Creates a path from its segments, outermost first.
    pub fn new(segments: Vec<&'static str>) -> Self {
        Self(segments)
    }

    /// Path segments, outermost first.
    pub fn segments(&self) -> &[&'static str] {
        &self.0
    }

    /// Extends the path with a child segment.
    pub fn child(&self, segment: &'static str) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment);
        Self(segments)
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

/// Interchange value between records, statements and result rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL
    Null,
    /// Boolean
    Bool(bool),
    /// Any integer, widened
    Int(i64),
    /// Any float, widened
    Float(f64),
    /// String
    Text(String),
    /// UTC timestamp
    Timestamp(DateTime<Utc>),
    /// Binary data
    Bytes(Vec<u8>),
    /// Structured value of a complex field
    Json(serde_json::Value),
}

impl Value {
    /// Serializes any value into [`Value::Json`].
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(Self::Json)
            .map_err(|e| TablewrightError::serialization("Failed to serialize field value", e))
    }

    /// Whether this is the zero/empty value of its type.
    pub fn is_zero(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Bool(b) => !b,
            Self::Int(i) => *i == 0,
            Self::Float(f) => *f == 0.0,
            Self::Text(s) => s.is_empty(),
            Self::Timestamp(ts) => *ts == DateTime::<Utc>::UNIX_EPOCH,
            Self::Bytes(b) => b.is_empty(),
            Self::Json(json) => match json {
                serde_json::Value::Null => true,
                serde_json::Value::Array(items) => items.is_empty(),
                serde_json::Value::Object(map) => map.is_empty(),
                serde_json::Value::String(s) => s.is_empty(),
                _ => false,
            },
        }
    }

    /// Short type label for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Timestamp(_) => "timestamp",
            Self::Bytes(_) => "bytes",
            Self::Json(_) => "json",
        }
    }

    /// Converts into a concrete Rust type.
    pub fn to_typed<T: FromValue>(self) -> Result<T> {
        T::from_value(self)
    }

    /// Deserializes a JSON value, or JSON held as text, into `T`.
    pub fn deserialize<T: DeserializeOwned>(self) -> Result<T> {
        let json = match self {
            Self::Json(json) => json,
            Self::Text(text) => serde_json::from_str(&text)
                .map_err(|e| TablewrightError::serialization("Failed to parse JSON column", e))?,
            Self::Null => serde_json::Value::Null,
            other => {
                return Err(TablewrightError::validation(format!(
                    "expected JSON, found {}",
                    other.type_name()
                )));
            }
        };
        serde_json::from_value(json)
            .map_err(|e| TablewrightError::serialization("Failed to decode JSON column", e))
    }

    fn mismatch(expected: &str, found: &Self) -> TablewrightError {
        TablewrightError::validation(format!(
            "expected {expected}, found {}",
            found.type_name()
        ))
    }
}

/// Builds an error for a path that does not name a field of the record.
pub fn unknown_field(path: &[&str]) -> TablewrightError {
    TablewrightError::validation(format!("unknown field path '{}'", path.join(".")))
}

/// Conversion from a [`Value`] read from storage.
pub trait FromValue: Sized {
    /// Converts the value, failing on incompatible types.
    fn from_value(value: Value) -> Result<Self>;
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Int(i) => Ok(i),
            Value::Bool(b) => Ok(i64::from(b)),
            Value::Null => Ok(0),
            Value::Text(ref s) => s.parse().map_err(|_| Value::mismatch("integer", &value)),
            other => Err(Value::mismatch("integer", &other)),
        }
    }
}

macro_rules! narrow_int_from_value {
    ($($ty:ty),*) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: Value) -> Result<Self> {
                    let wide = i64::from_value(value)?;
                    <$ty>::try_from(wide).map_err(|_| {
                        TablewrightError::validation(format!(
                            "integer {wide} out of range for {}",
                            stringify!($ty)
                        ))
                    })
                }
            }
        )*
    };
}

narrow_int_from_value!(i8, i16, i32, u8, u16, u32, u64);

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Float(f) => Ok(f),
            #[allow(clippy::cast_precision_loss)]
            Value::Int(i) => Ok(i as f64),
            Value::Null => Ok(0.0),
            other => Err(Value::mismatch("float", &other)),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: Value) -> Result<Self> {
        #[allow(clippy::cast_possible_truncation)]
        f64::from_value(value).map(|f| f as f32)
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(b),
            Value::Int(i) => Ok(i != 0),
            Value::Null => Ok(false),
            other => Err(Value::mismatch("bool", &other)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Text(s) => Ok(s),
            Value::Null => Ok(String::new()),
            Value::Json(serde_json::Value::String(s)) => Ok(s),
            Value::Json(json) => Ok(json.to_string()),
            other => Err(Value::mismatch("text", &other)),
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Timestamp(ts) => Ok(ts),
            Value::Null => Ok(DateTime::<Utc>::UNIX_EPOCH),
            Value::Text(ref s) => DateTime::parse_from_rfc3339(s)
                .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%:z"))
                .map(|ts| ts.with_timezone(&Utc))
                .or_else(|_| {
                    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                        .map(|naive| naive.and_utc())
                })
                .map_err(|_| Value::mismatch("timestamp", &value)),
            other => Err(Value::mismatch("timestamp", &other)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Bytes(b) => Ok(b),
            Value::Text(s) => Ok(s.into_bytes()),
            Value::Null => Ok(Vec::new()),
            other => Err(Value::mismatch("bytes", &other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

macro_rules! int_into_value {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Self::Int(i64::from(value))
                }
            }
        )*
    };
}

int_into_value!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Self::Float(f64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// A structured value whose fields can be read and written by path.
///
/// Implemented by entities and by the sub-records they embed.
pub trait Record {
    /// Descriptor tree in field declaration order.
    fn fields() -> Vec<FieldDef>
    where
        Self: Sized;

    /// Reads the field at `path`.
    ///
    /// Complex fields return [`Value::Json`], typically via [`Value::json`].
    fn get(&self, path: &[&str]) -> Result<Value>;

    /// Writes the field at `path`.
    fn set(&mut self, path: &[&str], value: Value) -> Result<()>;
}

/// A record persisted as one row of one table.
pub trait Entity: Record + Send + Sync + 'static {
    /// Table this entity maps to.
    ///
    /// An empty name makes the resolver derive one from the type name.
    fn table_name(&self) -> String;

    /// Invoked exactly once before the record is written.
    fn before_save(&mut self) -> Result<()> {
        Ok(())
    }

    /// Invoked exactly once after the record is loaded.
    fn after_load(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_zero_values() {
        assert!(Value::Null.is_zero());
        assert!(Value::Int(0).is_zero());
        assert!(!Value::Int(7).is_zero());
        assert!(Value::Text(String::new()).is_zero());
        assert!(Value::Json(serde_json::json!([])).is_zero());
        assert!(!Value::Json(serde_json::json!({"a": 1})).is_zero());
        assert!(Value::Timestamp(DateTime::<Utc>::UNIX_EPOCH).is_zero());
    }

    #[test]
    fn test_kind_defaults() {
        assert_eq!(FieldKind::Text.default_value(), Value::Text(String::new()));
        assert_eq!(FieldKind::integer(32).default_value(), Value::Int(0));
        assert_eq!(FieldKind::Sequence.default_value(), Value::Text("[]".into()));
        assert_eq!(FieldKind::Map.default_value(), Value::Text("{}".into()));
        assert!(FieldKind::Record.is_complex());
        assert!(!FieldKind::Timestamp.is_complex());
    }

    #[test]
    fn test_typed_conversion() {
        assert_eq!(Value::Int(5).to_typed::<i32>().unwrap(), 5);
        assert!(Value::Int(300).to_typed::<u8>().is_err());
        assert!(Value::Int(1).to_typed::<bool>().unwrap());
        assert_eq!(Value::Null.to_typed::<Option<String>>().unwrap(), None);
        assert_eq!(
            Value::Text("x".into()).to_typed::<Option<String>>().unwrap(),
            Some("x".to_string())
        );
        assert!(Value::Bool(true).to_typed::<DateTime<Utc>>().is_err());
    }

    #[test]
    fn test_json_round_trip_through_text() {
        let mut map = BTreeMap::new();
        map.insert("k".to_string(), 1);
        let Value::Json(json) = Value::json(&map).unwrap() else {
            panic!("expected json");
        };
        let restored: BTreeMap<String, i32> = Value::Text(json.to_string()).deserialize().unwrap();
        assert_eq!(restored, map);
    }

    #[test]
    fn test_field_path_display() {
        let path = FieldPath::new(vec!["audit"]).child("created_by");
        assert_eq!(path.to_string(), "audit.created_by");
        assert_eq!(path.segments(), &["audit", "created_by"]);
    }
}
