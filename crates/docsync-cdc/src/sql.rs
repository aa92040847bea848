//! MySQL dialect statement builders.
//!
//! Identifiers are backtick-quoted; every value is bound through a `?`
//! placeholder. Builders are pure so they can be checked without a server.

use crate::common::{ColumnValue, Definition, Row};

/// A statement with its bound parameters, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<ColumnValue>,
}

impl Statement {
    fn new(sql: String, params: Vec<ColumnValue>) -> Self {
        Self { sql, params }
    }
}

/// Quote an identifier, doubling embedded backticks.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Escape `LIKE` wildcards so `value` matches literally.
pub fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Columns of every table in the current database whose name starts with
/// `prefix`, ordered by table then column position.
pub fn list_columns(prefix: &str) -> Statement {
    Statement::new(
        "SELECT TABLE_NAME, COLUMN_NAME, COLUMN_TYPE \
         FROM INFORMATION_SCHEMA.COLUMNS \
         WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME LIKE ? \
         ORDER BY TABLE_NAME, ORDINAL_POSITION"
            .to_string(),
        vec![ColumnValue::Text(format!("{}%", escape_like(prefix)))],
    )
}

pub fn drop_table(definition: &Definition) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_identifier(&definition.target_name))
}

pub fn create_table(definition: &Definition) -> String {
    let columns: Vec<String> = definition
        .fields
        .iter()
        .map(|field| {
            format!(
                "{} {}{}",
                quote_identifier(&field.target_name),
                field.column_type,
                if field.primary { " PRIMARY KEY" } else { "" }
            )
        })
        .collect();
    format!(
        "CREATE TABLE {} ({})",
        quote_identifier(&definition.target_name),
        columns.join(", ")
    )
}

/// Insert that overwrites an existing record with the same primary key.
pub fn insert(definition: &Definition, row: &Row) -> Statement {
    let columns: Vec<String> = row.keys().map(|c| quote_identifier(c)).collect();
    let placeholders = vec!["?"; row.len()].join(", ");
    Statement::new(
        format!(
            "REPLACE INTO {} ({}) VALUES ({})",
            quote_identifier(&definition.target_name),
            columns.join(", "),
            placeholders
        ),
        row.values().cloned().collect(),
    )
}

/// Keyed update of the given columns; `None` when there is nothing to set.
pub fn update(definition: &Definition, id: &ColumnValue, changes: &Row) -> Option<Statement> {
    if changes.is_empty() {
        return None;
    }

    let sets: Vec<String> = changes
        .keys()
        .map(|c| format!("{} = ?", quote_identifier(c)))
        .collect();
    let mut params: Vec<ColumnValue> = changes.values().cloned().collect();
    params.push(id.clone());

    Some(Statement::new(
        format!(
            "UPDATE {} SET {} WHERE {} = ?",
            quote_identifier(&definition.target_name),
            sets.join(", "),
            quote_identifier(&definition.id_target_field)
        ),
        params,
    ))
}

pub fn delete(definition: &Definition, id: &ColumnValue) -> Statement {
    Statement::new(
        format!(
            "DELETE FROM {} WHERE {} = ?",
            quote_identifier(&definition.target_name),
            quote_identifier(&definition.id_target_field)
        ),
        vec![id.clone()],
    )
}

pub fn create_checkpoint_table(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\
         `service` VARCHAR(64) NOT NULL PRIMARY KEY, \
         `timestamp` BIGINT UNSIGNED NOT NULL)",
        quote_identifier(table)
    )
}

pub fn read_checkpoint(table: &str, deployment: &str) -> Statement {
    Statement::new(
        format!(
            "SELECT `timestamp` FROM {} WHERE `service` = ?",
            quote_identifier(table)
        ),
        vec![ColumnValue::Text(deployment.to_string())],
    )
}

pub fn write_checkpoint(table: &str, deployment: &str, timestamp: u64) -> Statement {
    Statement::new(
        format!(
            "INSERT INTO {} (`service`, `timestamp`) VALUES (?, ?) \
             ON DUPLICATE KEY UPDATE `timestamp` = VALUES(`timestamp`)",
            quote_identifier(table)
        ),
        vec![
            ColumnValue::Text(deployment.to_string()),
            // BIGINT UNSIGNED column; bound as text so the high bit survives
            ColumnValue::Text(timestamp.to_string()),
        ],
    )
}
