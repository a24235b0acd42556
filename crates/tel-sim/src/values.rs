use tel_protocol::{NodeId, Value};

/// Deterministic value for `node_id` at publish cycle `tick`. The value type
/// follows the identifier so every datatype tag can be exercised.
pub fn synthesize(node_id: &NodeId, tick: u64) -> Value {
    let name = node_id.identifier_text().to_ascii_lowercase();
    if name.contains("bool") || name.contains("flag") || name.contains("running") {
        Value::Bool(tick % 2 == 0)
    } else if name.contains("count") {
        Value::U32((tick % u64::from(u32::MAX)) as u32)
    } else if name.contains("text") || name.contains("state") {
        Value::String(format!("state-{}", tick % 4))
    } else if name.contains("int") {
        Value::I32((tick % 200) as i32 - 100)
    } else {
        let phase = tick as f64 * 0.1;
        Value::F64(20.0 + 10.0 * phase.sin())
    }
}
