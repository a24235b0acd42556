mod endpoint;
mod node_id;
mod source;
mod types;

pub use endpoint::{
    select_endpoint, ApplicationCertificate, EndpointDescription, SecurityMode, SecurityPolicy,
    SessionOptions, UserIdentity, UserTokenType,
};
pub use node_id::{Identifier, NodeId, NodeIdParseError, KEEPALIVE_NODE_ID};
pub use source::{
    ChangeHandler, MonitorRequest, MonitorSubscription, MonitoringMode, NodeMonitor, Session,
    SourceDriver, SourceError, SubscriptionParameters,
};
pub use types::{format_timestamp, DataChange, Datatype, Event, StatusCode, Value};

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::*;

    #[test]
    fn datatype_classification_covers_every_variant() {
        let cases = [
            (Value::Bool(true), Datatype::Bool),
            (Value::I8(-1), Datatype::Int8),
            (Value::I16(-1), Datatype::Int16),
            (Value::I32(-1), Datatype::Int32),
            (Value::I64(-1), Datatype::Int64),
            (Value::U8(1), Datatype::UInt8),
            (Value::U16(1), Datatype::UInt16),
            (Value::U32(1), Datatype::UInt32),
            (Value::U64(1), Datatype::UInt64),
            (Value::F32(1.5), Datatype::Float32),
            (Value::F64(1.5), Datatype::Float64),
            (Value::String("on".to_string()), Datatype::Str),
            (Value::DateTime(UNIX_EPOCH), Datatype::Str),
            (Value::ByteString(vec![1, 2].into()), Datatype::Str),
            (Value::Empty, Datatype::Str),
        ];
        for (value, expected) in cases {
            assert_eq!(Datatype::classify(&value), expected, "value {value:?}");
            assert_eq!(value.datatype(), expected);
        }
    }

    #[test]
    fn datatype_tags_are_stable() {
        assert_eq!(Datatype::Int32.as_str(), "i32");
        assert_eq!(Datatype::UInt64.as_str(), "u64");
        assert_eq!(Datatype::Float64.to_string(), "f64");
        assert_eq!(Datatype::Bool.as_str(), "bool");
        assert_eq!(Datatype::Str.as_str(), "str");
    }

    #[test]
    fn status_code_severity() {
        assert!(StatusCode::GOOD.is_good());
        assert!(!StatusCode::BAD_NODE_ID_UNKNOWN.is_good());
        assert!(!StatusCode::UNCERTAIN.is_good());
        assert_eq!(StatusCode::BAD_NODE_ID_UNKNOWN.to_string(), "0x80340000");
    }

    #[test]
    fn event_serializes_with_rfc3339_timestamp() {
        let event = Event {
            value: Value::F64(21.5),
            timestamp: UNIX_EPOCH + Duration::from_secs(1_700_000_000),
            name: "Temperature".to_string(),
            id: "ns=2;s=Temperature".to_string(),
            datatype: Datatype::Float64,
            source: "opc.tcp://plc:4840".to_string(),
        };
        let json = serde_json::to_value(&event).expect("serialize event");
        assert_eq!(json["value"], serde_json::json!(21.5));
        assert_eq!(json["timestamp"], "2023-11-14T22:13:20Z");
        assert_eq!(json["name"], "Temperature");
        assert_eq!(json["id"], "ns=2;s=Temperature");
        assert_eq!(json["datatype"], "f64");
        assert_eq!(json["source"], "opc.tcp://plc:4840");
    }

    #[test]
    fn non_numeric_values_serialize_as_strings_or_null() {
        let bytes = serde_json::to_value(Value::ByteString(vec![0xde, 0xad].into()))
            .expect("serialize bytes");
        assert_eq!(bytes, "dead");
        let empty = serde_json::to_value(Value::Empty).expect("serialize empty");
        assert!(empty.is_null());
        let when = serde_json::to_value(Value::DateTime(UNIX_EPOCH)).expect("serialize time");
        assert_eq!(when, "1970-01-01T00:00:00Z");
    }

    #[test]
    fn node_id_parse_and_display() {
        let node: NodeId = "ns=2;s=Line1.Temperature".parse().expect("parse string id");
        assert_eq!(node.namespace(), 2);
        assert_eq!(node.identifier_text(), "Line1.Temperature");
        assert_eq!(node.to_string(), "ns=2;s=Line1.Temperature");

        let keepalive: NodeId = " i=2258 ".parse().expect("parse numeric id");
        assert_eq!(keepalive, KEEPALIVE_NODE_ID);
        assert_eq!(keepalive.to_string(), "i=2258");
        assert!(keepalive.is_keepalive());

        let explicit_zero: NodeId = "ns=0;i=2258".parse().expect("parse ns0");
        assert!(explicit_zero.is_keepalive());
    }

    #[test]
    fn node_id_rejects_malformed_input() {
        assert!(matches!(
            "".parse::<NodeId>(),
            Err(NodeIdParseError::Empty)
        ));
        assert!(matches!(
            "ns=x;i=1".parse::<NodeId>(),
            Err(NodeIdParseError::Namespace(_))
        ));
        assert!(matches!(
            "i=abc".parse::<NodeId>(),
            Err(NodeIdParseError::Numeric(_))
        ));
        assert!(matches!(
            "q=1".parse::<NodeId>(),
            Err(NodeIdParseError::Kind(_))
        ));
        assert!(matches!(
            "s=".parse::<NodeId>(),
            Err(NodeIdParseError::EmptyIdentifier(_))
        ));
    }

    #[test]
    fn select_endpoint_prefers_highest_security_level() {
        let endpoints = vec![
            EndpointDescription::new(
                "opc.tcp://plc:4840",
                SecurityPolicy::Basic256Sha256,
                SecurityMode::Sign,
                2,
            ),
            EndpointDescription::new(
                "opc.tcp://plc:4840",
                SecurityPolicy::Basic256Sha256,
                SecurityMode::Sign,
                7,
            ),
            EndpointDescription::new(
                "opc.tcp://plc:4840",
                SecurityPolicy::None,
                SecurityMode::None,
                0,
            ),
        ];

        let picked = select_endpoint(&endpoints, SecurityPolicy::Basic256Sha256, SecurityMode::Sign)
            .expect("matching endpoint");
        assert_eq!(picked.security_level, 7);

        assert!(select_endpoint(
            &endpoints,
            SecurityPolicy::Basic256Sha256,
            SecurityMode::SignAndEncrypt
        )
        .is_none());
    }

    #[test]
    fn security_names_parse_case_insensitively() {
        assert_eq!(
            SecurityPolicy::parse("basic256sha256"),
            Some(SecurityPolicy::Basic256Sha256)
        );
        assert_eq!(SecurityPolicy::parse(" None "), Some(SecurityPolicy::None));
        assert_eq!(SecurityPolicy::parse("rot13"), None);
        assert_eq!(
            SecurityMode::parse("SignAndEncrypt"),
            Some(SecurityMode::SignAndEncrypt)
        );
        assert_eq!(SecurityMode::parse("encrypt"), None);
        assert_eq!(
            SecurityPolicy::Basic256Sha256.uri(),
            "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256"
        );
    }

    #[test]
    fn policy_uri_maps_back_to_policy() {
        for policy in SecurityPolicy::ALL {
            assert_eq!(SecurityPolicy::from_uri(&policy.uri()), Some(policy));
        }
        assert_eq!(
            SecurityPolicy::from_uri("http://opcfoundation.org/UA/SecurityPolicy#Rot13"),
            None
        );
        assert_eq!(SecurityPolicy::from_uri("Basic256Sha256"), None);
    }
}
