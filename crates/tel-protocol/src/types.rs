use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Serialize, Serializer};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::NodeId;

/// Scalar carried by a value-change notification.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    DateTime(SystemTime),
    ByteString(Bytes),
    Empty,
}

impl Value {
    pub fn datatype(&self) -> Datatype {
        Datatype::classify(self)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Bool(v) => serializer.serialize_bool(*v),
            Self::I8(v) => serializer.serialize_i8(*v),
            Self::I16(v) => serializer.serialize_i16(*v),
            Self::I32(v) => serializer.serialize_i32(*v),
            Self::I64(v) => serializer.serialize_i64(*v),
            Self::U8(v) => serializer.serialize_u8(*v),
            Self::U16(v) => serializer.serialize_u16(*v),
            Self::U32(v) => serializer.serialize_u32(*v),
            Self::U64(v) => serializer.serialize_u64(*v),
            Self::F32(v) => serializer.serialize_f32(*v),
            Self::F64(v) => serializer.serialize_f64(*v),
            Self::String(v) => serializer.serialize_str(v),
            Self::DateTime(v) => serializer.serialize_str(&format_timestamp(*v)),
            Self::ByteString(v) => serializer.serialize_str(&hex::encode(v)),
            Self::Empty => serializer.serialize_none(),
        }
    }
}

/// Closed set of datatype tags attached to every event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Datatype {
    #[serde(rename = "i8")]
    Int8,
    #[serde(rename = "i16")]
    Int16,
    #[serde(rename = "i32")]
    Int32,
    #[serde(rename = "i64")]
    Int64,
    #[serde(rename = "u8")]
    UInt8,
    #[serde(rename = "u16")]
    UInt16,
    #[serde(rename = "u32")]
    UInt32,
    #[serde(rename = "u64")]
    UInt64,
    #[serde(rename = "f32")]
    Float32,
    #[serde(rename = "f64")]
    Float64,
    #[serde(rename = "bool")]
    Bool,
    #[serde(rename = "str")]
    Str,
}

impl Datatype {
    /// Total over `Value`; anything that is not a fixed-width number or a
    /// boolean is reported as `Str`.
    pub fn classify(value: &Value) -> Self {
        match value {
            Value::Bool(_) => Self::Bool,
            Value::I8(_) => Self::Int8,
            Value::I16(_) => Self::Int16,
            Value::I32(_) => Self::Int32,
            Value::I64(_) => Self::Int64,
            Value::U8(_) => Self::UInt8,
            Value::U16(_) => Self::UInt16,
            Value::U32(_) => Self::UInt32,
            Value::U64(_) => Self::UInt64,
            Value::F32(_) => Self::Float32,
            Value::F64(_) => Self::Float64,
            Value::String(_) | Value::DateTime(_) | Value::ByteString(_) | Value::Empty => {
                Self::Str
            }
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Int8 => "i8",
            Self::Int16 => "i16",
            Self::Int32 => "i32",
            Self::Int64 => "i64",
            Self::UInt8 => "u8",
            Self::UInt16 => "u16",
            Self::UInt32 => "u32",
            Self::UInt64 => "u64",
            Self::Float32 => "f32",
            Self::Float64 => "f64",
            Self::Bool => "bool",
            Self::Str => "str",
        }
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StatusCode(pub u32);

impl StatusCode {
    pub const GOOD: Self = Self(0);
    pub const UNCERTAIN: Self = Self(0x4000_0000);
    pub const BAD_COMMUNICATION_ERROR: Self = Self(0x8005_0000);
    pub const BAD_NODE_ID_UNKNOWN: Self = Self(0x8034_0000);
    pub const BAD_NODE_ID_INVALID: Self = Self(0x8033_0000);

    pub const fn is_good(self) -> bool {
        self.0 & 0xC000_0000 == 0
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// One notification delivered by a monitored item.
#[derive(Clone, Debug, PartialEq)]
pub struct DataChange {
    pub node_id: NodeId,
    pub value: Value,
    pub source_timestamp: SystemTime,
    pub status: StatusCode,
    pub error: Option<String>,
}

impl DataChange {
    pub fn good(node_id: NodeId, value: Value, source_timestamp: SystemTime) -> Self {
        Self {
            node_id,
            value,
            source_timestamp,
            status: StatusCode::GOOD,
            error: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Event {
    pub value: Value,
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: SystemTime,
    pub name: String,
    pub id: String,
    pub datatype: Datatype,
    pub source: String,
}

impl Event {
    /// Builds an event from a good notification. `source` is left empty for
    /// the distributor to stamp.
    pub fn from_change(change: DataChange) -> Self {
        let datatype = Datatype::classify(&change.value);
        Self {
            name: change.node_id.identifier_text(),
            id: change.node_id.to_string(),
            value: change.value,
            timestamp: change.source_timestamp,
            datatype,
            source: String::new(),
        }
    }
}

fn serialize_timestamp<S: Serializer>(ts: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_timestamp(*ts))
}

pub fn format_timestamp(ts: SystemTime) -> String {
    let duration = ts
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0));
    let nanos = duration.as_nanos() as i128;
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .ok()
        .and_then(|odt| odt.format(&Rfc3339).ok())
        .unwrap_or_else(|| "1970-01-01T00:00:00Z".to_string())
}
