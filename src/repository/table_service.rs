use serde_json::{Map, Value};
use sqlx::{postgres::PgRow, PgConnection, Postgres, QueryBuilder, Row};

use crate::error::AppError;

const ALLOWED_TABLES: &[&str] = &["apartments", "apartment_owners", "bills", "owners", "rooms"];

pub async fn list_rows(
    pool: &sqlx::PgPool,
    table: &str,
    filters: Option<&Map<String, Value>>,
    limit: i64,
    offset: i64,
    order_by: &str,
    ascending: bool,
) -> Result<Vec<Value>, AppError> {
    let table_name = validate_table(table)?;
    let order_name = if order_by.trim().is_empty() {
        "created_at"
    } else {
        validate_identifier(order_by)?
    };

    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query.push(table_name).push(" t WHERE 1=1");
    push_filters(&mut query, filters)?;

    query.push(" ORDER BY t.").push(order_name);
    query.push(if ascending { " ASC" } else { " DESC" });
    // Tie-break on id so equal sort keys keep a stable order between calls.
    query.push(", t.id ASC");
    query
        .push(" LIMIT ")
        .push_bind(limit.clamp(1, 1000))
        .push(" OFFSET ")
        .push_bind(offset.max(0));

    let rows = query.build().fetch_all(pool).await.map_err(map_db_error)?;
    Ok(read_rows(rows))
}

pub async fn get_row(
    pool: &sqlx::PgPool,
    table: &str,
    row_id: &str,
    id_field: &str,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    let id_name = validate_identifier(id_field)?;

    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query.push(table_name).push(" t WHERE ");
    push_eq(&mut query, id_name, &Value::String(row_id.to_string()));
    query.push(" LIMIT 1");

    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::NotFound(format!("{table_name} record not found.")))
}

pub async fn create_row(
    pool: &sqlx::PgPool,
    table: &str,
    payload: &Map<String, Value>,
) -> Result<Value, AppError> {
    let (table_name, mut query) = build_insert(table, payload)?;
    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::Internal(format!("Could not create {table_name} record.")))
}

/// Same as `create_row` but executes within an existing transaction.
pub async fn create_row_tx(
    conn: &mut PgConnection,
    table: &str,
    payload: &Map<String, Value>,
) -> Result<Value, AppError> {
    let (table_name, mut query) = build_insert(table, payload)?;
    let row = query
        .build()
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::Internal(format!("Could not create {table_name} record.")))
}

pub async fn update_row(
    pool: &sqlx::PgPool,
    table: &str,
    row_id: &str,
    payload: &Map<String, Value>,
    id_field: &str,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    let id_name = validate_identifier(id_field)?;
    if payload.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }
    let keys = sorted_keys(payload)?;

    let mut query = QueryBuilder::<Postgres>::new("UPDATE ");
    query.push(table_name).push(" t SET ");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push(*key);
            separated.push_unseparated(" = r.");
            separated.push_unseparated(*key);
        }
    }
    // jsonb_populate_record lets PostgreSQL coerce uuid/numeric/jsonb/date
    // columns from the JSON payload using the table definition.
    query
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table_name)
        .push(", ");
    query.push_bind(Value::Object(payload.clone()));
    query.push(") r WHERE ");
    push_eq(&mut query, id_name, &Value::String(row_id.to_string()));
    query.push(" RETURNING row_to_json(t) AS row");

    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::NotFound(format!("{table_name} record not found.")))
}

pub async fn delete_row(
    pool: &sqlx::PgPool,
    table: &str,
    row_id: &str,
    id_field: &str,
) -> Result<Value, AppError> {
    let existing = get_row(pool, table, row_id, id_field).await?;
    let table_name = validate_table(table)?;
    let id_name = validate_identifier(id_field)?;

    let mut query = QueryBuilder::<Postgres>::new("DELETE FROM ");
    query.push(table_name).push(" t WHERE ");
    push_eq(&mut query, id_name, &Value::String(row_id.to_string()));
    query.build().execute(pool).await.map_err(map_db_error)?;

    Ok(existing)
}

pub async fn count_rows(
    pool: &sqlx::PgPool,
    table: &str,
    filters: Option<&Map<String, Value>>,
) -> Result<i64, AppError> {
    let table_name = validate_table(table)?;

    let mut query = QueryBuilder::<Postgres>::new("SELECT COUNT(*)::bigint AS total FROM ");
    query.push(table_name).push(" t WHERE 1=1");
    push_filters(&mut query, filters)?;

    let row = query.build().fetch_one(pool).await.map_err(map_db_error)?;
    Ok(row.try_get::<i64, _>("total").unwrap_or(0))
}

pub fn map_db_error(error: sqlx::Error) -> AppError {
    let message = error.to_string();
    tracing::error!(db_error = %message, "Database query failed");

    let code = error
        .as_database_error()
        .and_then(|db_error| db_error.code())
        .map(|code| code.into_owned())
        .unwrap_or_default();

    if code == "23505"
        || message
            .to_ascii_lowercase()
            .contains("duplicate key value violates unique constraint")
    {
        return AppError::Conflict("Duplicate value violates a unique constraint.".to_string());
    }
    if code == "23503" {
        return AppError::Conflict(
            "Record is still referenced by, or references, another record.".to_string(),
        );
    }
    AppError::Dependency("Database operation failed.".to_string())
}

fn build_insert<'a>(
    table: &'a str,
    payload: &Map<String, Value>,
) -> Result<(&'a str, QueryBuilder<'static, Postgres>), AppError> {
    let table_name = validate_table(table)?;
    if payload.is_empty() {
        return Err(AppError::BadRequest(format!(
            "Could not create {table_name} record."
        )));
    }
    let keys = sorted_keys(payload)?;

    let mut query = QueryBuilder::<Postgres>::new("INSERT INTO ");
    query.push(table_name).push(" (");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push(*key);
        }
    }
    query.push(") SELECT ");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push("r.");
            separated.push_unseparated(*key);
        }
    }
    query
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table_name)
        .push(", ");
    query.push_bind(Value::Object(payload.clone()));
    query
        .push(") r RETURNING row_to_json(")
        .push(table_name)
        .push(".*) AS row");

    Ok((table_name, query))
}

fn sorted_keys(payload: &Map<String, Value>) -> Result<Vec<&str>, AppError> {
    let mut keys = payload
        .keys()
        .map(|key| validate_identifier(key))
        .collect::<Result<Vec<_>, _>>()?;
    keys.sort_unstable();
    Ok(keys)
}

fn read_rows(rows: Vec<PgRow>) -> Vec<Value> {
    rows.into_iter()
        .filter_map(|row| row.try_get::<Option<Value>, _>("row").ok().flatten())
        .collect()
}

fn validate_table(table: &str) -> Result<&str, AppError> {
    let normalized = validate_identifier(table)?;
    if ALLOWED_TABLES.contains(&normalized) {
        return Ok(normalized);
    }
    Err(AppError::Forbidden(format!(
        "Table '{normalized}' is not allowed."
    )))
}

fn validate_identifier(identifier: &str) -> Result<&str, AppError> {
    let trimmed = identifier.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest(
            "Identifier cannot be empty.".to_string(),
        ));
    }
    if !trimmed.chars().all(|character| {
        character.is_ascii_lowercase() || character.is_ascii_digit() || character == '_'
    }) || trimmed
        .chars()
        .next()
        .is_some_and(|first| first.is_ascii_digit())
    {
        return Err(AppError::BadRequest(format!(
            "Invalid identifier '{trimmed}'."
        )));
    }
    Ok(trimmed)
}

/// Bind type chosen for an equality filter.
#[derive(Debug, Clone, PartialEq)]
enum FilterValue {
    Id(uuid::Uuid),
    Text(String),
    Flag(bool),
    Number(i64),
}

fn push_filters(
    query: &mut QueryBuilder<Postgres>,
    filters: Option<&Map<String, Value>>,
) -> Result<(), AppError> {
    let Some(filter_map) = filters else {
        return Ok(());
    };
    for (key, value) in filter_map {
        let column = validate_identifier(key)?;
        if value.is_null() {
            continue;
        }
        if value.is_array() || value.is_object() {
            return Err(AppError::BadRequest(format!(
                "Filter '{column}' only supports scalar values."
            )));
        }
        query.push(" AND ");
        push_eq(query, column, value);
    }
    Ok(())
}

fn push_eq(query: &mut QueryBuilder<Postgres>, column: &str, value: &Value) {
    query.push("t.").push(column);
    match filter_value(column, value) {
        FilterValue::Id(id) => {
            query.push(" = ").push_bind(id);
        }
        FilterValue::Flag(flag) => {
            query.push(" = ").push_bind(flag);
        }
        FilterValue::Number(number) => {
            query.push(" = ").push_bind(number);
        }
        // Compare as text so non-text columns never fail on the bind type.
        FilterValue::Text(text) => {
            query.push("::text = ").push_bind(text);
        }
    }
}

fn filter_value(column: &str, value: &Value) -> FilterValue {
    match value {
        Value::Bool(flag) => FilterValue::Flag(*flag),
        Value::Number(number) => number
            .as_i64()
            .map(FilterValue::Number)
            .unwrap_or_else(|| FilterValue::Text(number.to_string())),
        Value::String(text) => {
            let is_id_column = column == "id" || column.ends_with("_id");
            match uuid::Uuid::parse_str(text.trim()) {
                Ok(id) if is_id_column => FilterValue::Id(id),
                _ => FilterValue::Text(text.clone()),
            }
        }
        other => FilterValue::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};
    use sqlx::{Postgres, QueryBuilder};

    use super::{build_insert, filter_value, push_filters, validate_table, FilterValue};

    #[test]
    fn insert_sql_uses_jsonb_populate_record() {
        let mut payload = Map::new();
        payload.insert("name".to_string(), Value::String("Somchai".to_string()));
        payload.insert("tax_id".to_string(), Value::String("0105556000000".to_string()));
        payload.insert("address".to_string(), Value::String("Bangkok".to_string()));

        let (_, query) = build_insert("owners", &payload).expect("insert should build");
        let sql = query.sql();
        assert!(
            sql.starts_with("INSERT INTO owners (address, name, tax_id) SELECT r.address, r.name, r.tax_id"),
            "Expected sorted columns with r.col references but got: {sql}"
        );
        assert!(
            sql.contains("jsonb_populate_record(NULL::owners"),
            "Expected jsonb_populate_record in SQL but got: {sql}"
        );
    }

    #[test]
    fn insert_rejects_unknown_tables_and_bad_columns() {
        let payload = Map::from_iter([("name".to_string(), json!("x"))]);
        assert!(build_insert("leases", &payload).is_err());
        assert!(build_insert("owners", &Map::new()).is_err());

        let bad = Map::from_iter([("name; DROP".to_string(), json!("x"))]);
        assert!(build_insert("owners", &bad).is_err());
        assert!(validate_table("Bills").is_err());
    }

    #[test]
    fn binds_ids_only_on_id_columns() {
        let id = "550e8400-e29b-41d4-a716-446655440000";
        assert_eq!(
            filter_value("apartment_id", &json!(id)),
            FilterValue::Id(uuid::Uuid::parse_str(id).unwrap())
        );
        assert_eq!(
            filter_value("room_number", &json!(id)),
            FilterValue::Text(id.to_string())
        );
        assert_eq!(
            filter_value("room_id", &json!("101")),
            FilterValue::Text("101".to_string())
        );
        assert_eq!(filter_value("rent", &json!(5)), FilterValue::Number(5));
    }

    #[test]
    fn filters_skip_nulls_and_reject_arrays() {
        let mut query = QueryBuilder::<Postgres>::new("SELECT 1 FROM bills t WHERE 1=1");
        let filters = Map::from_iter([
            ("room_id".to_string(), Value::Null),
            (
                "apartment_id".to_string(),
                json!("550e8400-e29b-41d4-a716-446655440000"),
            ),
        ]);
        push_filters(&mut query, Some(&filters)).expect("filters should build");
        assert!(query.sql().ends_with("WHERE 1=1 AND t.apartment_id = $1"));

        let mut query = QueryBuilder::<Postgres>::new("SELECT 1 FROM bills t WHERE 1=1");
        let filters = Map::from_iter([("room_id".to_string(), json!(["a", "b"]))]);
        assert!(push_filters(&mut query, Some(&filters)).is_err());
    }
}
