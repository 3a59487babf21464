// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Node identifiers and values.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier part of a node id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeIdentifier {
    /// Numeric identifier (`i=`).
    Numeric(u32),
    /// String identifier (`s=`).
    String(String),
}

impl From<u32> for NodeIdentifier {
    fn from(value: u32) -> Self {
        Self::Numeric(value)
    }
}

impl From<&str> for NodeIdentifier {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for NodeIdentifier {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// A node id: namespace index plus identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId {
    /// Namespace index.
    pub namespace: u16,
    /// Identifier within the namespace.
    pub identifier: NodeIdentifier,
}

impl NodeId {
    /// Creates a node id.
    pub fn new(namespace: u16, identifier: impl Into<NodeIdentifier>) -> Self {
        Self {
            namespace,
            identifier: identifier.into(),
        }
    }

    /// Creates a numeric node id.
    pub const fn numeric(namespace: u16, value: u32) -> Self {
        Self {
            namespace,
            identifier: NodeIdentifier::Numeric(value),
        }
    }

    /// Creates a string node id.
    pub fn string(namespace: u16, value: impl Into<String>) -> Self {
        Self {
            namespace,
            identifier: NodeIdentifier::String(value.into()),
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.identifier {
            NodeIdentifier::Numeric(v) => write!(f, "ns={};i={}", self.namespace, v),
            NodeIdentifier::String(v) => write!(f, "ns={};s={}", self.namespace, v),
        }
    }
}

/// `Server_ServerStatus_State`, read by the liveness probe.
pub const SERVER_STATE_NODE: NodeId = NodeId::numeric(0, 2259);

/// A value read from or written to a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum OpcUaValue {
    /// No value.
    Null,
    /// Boolean value.
    Boolean(bool),
    /// Signed byte.
    SByte(i8),
    /// Unsigned byte.
    Byte(u8),
    /// 16-bit signed integer.
    Int16(i16),
    /// 16-bit unsigned integer.
    UInt16(u16),
    /// 32-bit signed integer.
    Int32(i32),
    /// 32-bit unsigned integer.
    UInt32(u32),
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit unsigned integer.
    UInt64(u64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit double.
    Double(f64),
    /// String value.
    String(String),
    /// Date/time value.
    DateTime(chrono::DateTime<chrono::Utc>),
    /// Raw bytes.
    ByteString(Vec<u8>),
    /// Array of values.
    Array(Vec<OpcUaValue>),
}

impl OpcUaValue {
    /// Returns the boolean, if this is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as `f64` for any numeric variant.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::SByte(v) => Some(f64::from(*v)),
            Self::Byte(v) => Some(f64::from(*v)),
            Self::Int16(v) => Some(f64::from(*v)),
            Self::UInt16(v) => Some(f64::from(*v)),
            Self::Int32(v) => Some(f64::from(*v)),
            Self::UInt32(v) => Some(f64::from(*v)),
            Self::Int64(v) => Some(*v as f64),
            Self::UInt64(v) => Some(*v as f64),
            Self::Float(v) => Some(f64::from(*v)),
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as `i64` for any integer variant.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::SByte(v) => Some(i64::from(*v)),
            Self::Byte(v) => Some(i64::from(*v)),
            Self::Int16(v) => Some(i64::from(*v)),
            Self::UInt16(v) => Some(i64::from(*v)),
            Self::Int32(v) => Some(i64::from(*v)),
            Self::UInt32(v) => Some(i64::from(*v)),
            Self::Int64(v) => Some(*v),
            Self::UInt64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Returns the string, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for OpcUaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::SByte(v) => write!(f, "{v}"),
            Self::Byte(v) => write!(f, "{v}"),
            Self::Int16(v) => write!(f, "{v}"),
            Self::UInt16(v) => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::UInt32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::UInt64(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::String(v) => f.write_str(v),
            Self::DateTime(v) => write!(f, "{}", v.to_rfc3339()),
            Self::ByteString(v) => write!(f, "<{} bytes>", v.len()),
            Self::Array(values) => {
                f.write_str("[")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<bool> for OpcUaValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i32> for OpcUaValue {
    fn from(value: i32) -> Self {
        Self::Int32(value)
    }
}

impl From<f64> for OpcUaValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<&str> for OpcUaValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_display() {
        assert_eq!(SERVER_STATE_NODE.to_string(), "ns=0;i=2259");
        assert_eq!(
            NodeId::new(3, "\"Ix_Allg_Remote\"").to_string(),
            "ns=3;s=\"Ix_Allg_Remote\""
        );
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(OpcUaValue::UInt16(7).as_f64(), Some(7.0));
        assert_eq!(OpcUaValue::UInt64(u64::MAX).as_i64(), None);
        assert_eq!(OpcUaValue::from(true).as_bool(), Some(true));
        assert_eq!(OpcUaValue::from("on").as_str(), Some("on"));
        assert_eq!(
            OpcUaValue::Array(vec![1.into(), 2.into()]).to_string(),
            "[1, 2]"
        );
    }
}
