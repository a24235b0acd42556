use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Server status current-time variable; its changes are used as a liveness
/// signal and never turned into events.
pub const KEEPALIVE_NODE_ID: NodeId = NodeId::numeric(0, 2258);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NodeIdParseError {
    #[error("node id is empty")]
    Empty,
    #[error("invalid namespace index: {0}")]
    Namespace(String),
    #[error("invalid numeric identifier: {0}")]
    Numeric(String),
    #[error("unknown identifier kind in {0}")]
    Kind(String),
    #[error("empty identifier in {0}")]
    EmptyIdentifier(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Identifier {
    Numeric(u32),
    String(String),
    Guid(String),
    Opaque(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodeId {
    namespace: u16,
    identifier: Identifier,
}

impl NodeId {
    pub const fn numeric(namespace: u16, value: u32) -> Self {
        Self {
            namespace,
            identifier: Identifier::Numeric(value),
        }
    }

    pub fn string(namespace: u16, value: impl Into<String>) -> Self {
        Self {
            namespace,
            identifier: Identifier::String(value.into()),
        }
    }

    pub fn namespace(&self) -> u16 {
        self.namespace
    }

    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    /// Identifier part without namespace or kind prefix, used as the event name.
    pub fn identifier_text(&self) -> String {
        match &self.identifier {
            Identifier::Numeric(value) => value.to_string(),
            Identifier::String(value) | Identifier::Guid(value) | Identifier::Opaque(value) => {
                value.clone()
            }
        }
    }

    pub fn is_keepalive(&self) -> bool {
        *self == KEEPALIVE_NODE_ID
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace != 0 {
            write!(f, "ns={};", self.namespace)?;
        }
        match &self.identifier {
            Identifier::Numeric(value) => write!(f, "i={value}"),
            Identifier::String(value) => write!(f, "s={value}"),
            Identifier::Guid(value) => write!(f, "g={value}"),
            Identifier::Opaque(value) => write!(f, "b={value}"),
        }
    }
}

impl FromStr for NodeId {
    type Err = NodeIdParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(NodeIdParseError::Empty);
        }

        let (namespace, rest) = match trimmed.strip_prefix("ns=") {
            Some(tail) => {
                let (ns, rest) = tail
                    .split_once(';')
                    .ok_or_else(|| NodeIdParseError::Namespace(tail.to_string()))?;
                let ns = ns
                    .parse::<u16>()
                    .map_err(|_| NodeIdParseError::Namespace(ns.to_string()))?;
                (ns, rest)
            }
            None => (0, trimmed),
        };

        let (kind, value) = rest
            .split_once('=')
            .ok_or_else(|| NodeIdParseError::Kind(trimmed.to_string()))?;
        if value.is_empty() {
            return Err(NodeIdParseError::EmptyIdentifier(trimmed.to_string()));
        }

        let identifier = match kind {
            "i" => Identifier::Numeric(
                value
                    .parse::<u32>()
                    .map_err(|_| NodeIdParseError::Numeric(value.to_string()))?,
            ),
            "s" => Identifier::String(value.to_string()),
            "g" => Identifier::Guid(value.to_string()),
            "b" => Identifier::Opaque(value.to_string()),
            _ => return Err(NodeIdParseError::Kind(trimmed.to_string())),
        };

        Ok(Self {
            namespace,
            identifier,
        })
    }
}
