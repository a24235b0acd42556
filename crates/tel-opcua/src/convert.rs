//! Mapping between `tel-protocol` types and the OPC UA stack's types.

use std::time::{Duration, SystemTime};

use bytes::Bytes;
use opcua::types as ua;
use tel_protocol::{
    DataChange, EndpointDescription, MonitorRequest, MonitoringMode, NodeId, SecurityMode,
    SecurityPolicy, SourceError, StatusCode, UserTokenType, Value,
};

/// 100ns ticks between 1601-01-01 and 1970-01-01.
const UNIX_EPOCH_TICKS: i64 = 116_444_736_000_000_000;

pub(crate) fn to_ua_node_id(node_id: &NodeId) -> Result<ua::NodeId, SourceError> {
    node_id
        .to_string()
        .parse::<ua::NodeId>()
        .map_err(|_| SourceError::ItemRejected {
            node_id: node_id.clone(),
            status: StatusCode::BAD_NODE_ID_INVALID,
        })
}

pub(crate) fn from_ua_node_id(node_id: &ua::NodeId) -> Option<NodeId> {
    node_id.to_string().parse().ok()
}

pub(crate) fn to_ua_mode(mode: SecurityMode) -> ua::MessageSecurityMode {
    match mode {
        SecurityMode::None => ua::MessageSecurityMode::None,
        SecurityMode::Sign => ua::MessageSecurityMode::Sign,
        SecurityMode::SignAndEncrypt => ua::MessageSecurityMode::SignAndEncrypt,
    }
}

fn from_ua_mode(mode: ua::MessageSecurityMode) -> Option<SecurityMode> {
    match mode {
        ua::MessageSecurityMode::None => Some(SecurityMode::None),
        ua::MessageSecurityMode::Sign => Some(SecurityMode::Sign),
        ua::MessageSecurityMode::SignAndEncrypt => Some(SecurityMode::SignAndEncrypt),
        _ => None,
    }
}

fn from_ua_token_type(token: ua::UserTokenType) -> Option<UserTokenType> {
    match token {
        ua::UserTokenType::Anonymous => Some(UserTokenType::Anonymous),
        ua::UserTokenType::UserName => Some(UserTokenType::UserName),
        ua::UserTokenType::Certificate => Some(UserTokenType::Certificate),
        _ => None,
    }
}

/// Endpoints using a policy or mode the gateway cannot select are skipped.
pub(crate) fn endpoint_from_ua(endpoint: &ua::EndpointDescription) -> Option<EndpointDescription> {
    let policy = SecurityPolicy::from_uri(endpoint.security_policy_uri.as_ref())?;
    let mode = from_ua_mode(endpoint.security_mode)?;
    let mut description = EndpointDescription::new(
        endpoint.endpoint_url.as_ref(),
        policy,
        mode,
        endpoint.security_level,
    );
    description.user_token_types = endpoint
        .user_identity_tokens
        .iter()
        .flatten()
        .filter_map(|token| from_ua_token_type(token.token_type))
        .collect();
    Some(description)
}

pub(crate) fn monitored_item_request(
    request: &MonitorRequest,
    sampling_interval: Duration,
) -> Result<ua::MonitoredItemCreateRequest, SourceError> {
    let mut item: ua::MonitoredItemCreateRequest = to_ua_node_id(&request.node_id)?.into();
    item.monitoring_mode = match request.mode {
        MonitoringMode::Disabled => ua::MonitoringMode::Disabled,
        MonitoringMode::Sampling => ua::MonitoringMode::Sampling,
        MonitoringMode::Reporting => ua::MonitoringMode::Reporting,
    };
    item.requested_parameters.sampling_interval = sampling_interval.as_secs_f64() * 1000.0;
    item.requested_parameters.queue_size = request.queue_size;
    item.requested_parameters.discard_oldest = request.discard_oldest;
    Ok(item)
}

pub(crate) fn system_time_from_ticks(ticks: i64) -> SystemTime {
    let offset = ticks.saturating_sub(UNIX_EPOCH_TICKS);
    let magnitude = Duration::from_nanos(offset.unsigned_abs().saturating_mul(100));
    if offset >= 0 {
        SystemTime::UNIX_EPOCH + magnitude
    } else {
        SystemTime::UNIX_EPOCH
            .checked_sub(magnitude)
            .unwrap_or(SystemTime::UNIX_EPOCH)
    }
}

pub(crate) fn value_from_variant(variant: &ua::Variant) -> Value {
    match variant {
        ua::Variant::Empty => Value::Empty,
        ua::Variant::Boolean(v) => Value::Bool(*v),
        ua::Variant::SByte(v) => Value::I8(*v),
        ua::Variant::Byte(v) => Value::U8(*v),
        ua::Variant::Int16(v) => Value::I16(*v),
        ua::Variant::UInt16(v) => Value::U16(*v),
        ua::Variant::Int32(v) => Value::I32(*v),
        ua::Variant::UInt32(v) => Value::U32(*v),
        ua::Variant::Int64(v) => Value::I64(*v),
        ua::Variant::UInt64(v) => Value::U64(*v),
        ua::Variant::Float(v) => Value::F32(*v),
        ua::Variant::Double(v) => Value::F64(*v),
        ua::Variant::String(v) => Value::String(v.as_ref().to_string()),
        ua::Variant::DateTime(v) => Value::DateTime(system_time_from_ticks(v.ticks())),
        ua::Variant::ByteString(v) => {
            Value::ByteString(v.value.clone().map(Bytes::from).unwrap_or_default())
        }
        other => Value::String(format!("{other:?}")),
    }
}

/// Converts one data-change notification. Notifications for node ids the
/// gateway cannot represent yield `None`.
pub(crate) fn data_change_from_ua(
    node_id: &ua::NodeId,
    value: &ua::DataValue,
) -> Option<DataChange> {
    let node_id = from_ua_node_id(node_id)?;
    let source_timestamp = value
        .source_timestamp
        .as_ref()
        .map(|ts| system_time_from_ticks(ts.ticks()))
        .unwrap_or_else(SystemTime::now);
    let status = value
        .status
        .map(|status| StatusCode(status.bits()))
        .unwrap_or(StatusCode::GOOD);
    let mut change = DataChange::good(
        node_id,
        value
            .value
            .as_ref()
            .map(value_from_variant)
            .unwrap_or(Value::Empty),
        source_timestamp,
    );
    change.status = status;
    Some(change)
}
