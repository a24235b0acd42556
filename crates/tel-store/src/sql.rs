/// Parameterized insert for one event row. The table name is validated by
/// the config layer and inserted verbatim.
pub fn insert_statement(table: &str) -> String {
    format!(
        "INSERT INTO {table} (time, node_id, name, datatype, source, value) \
         VALUES ($1, $2, $3, $4, $5, $6)"
    )
}
