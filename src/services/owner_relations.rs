use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    repository::table_service::{create_row_tx, map_db_error},
};

/// Parses and de-duplicates a submitted apartment id list, keeping the
/// first occurrence of each id.
pub fn normalize_apartment_ids(raw_ids: &[String]) -> AppResult<Vec<Uuid>> {
    let mut seen = HashSet::new();
    let mut ids = Vec::with_capacity(raw_ids.len());
    for raw in raw_ids {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        let id = Uuid::parse_str(trimmed).map_err(|_| {
            AppError::UnprocessableEntity(format!(
                "apartment_ids contains an invalid id '{trimmed}'."
            ))
        })?;
        if seen.insert(id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

pub fn ensure_owner_unlinked(linked_apartments: i64) -> AppResult<()> {
    if linked_apartments > 0 {
        return Err(AppError::Conflict(format!(
            "Owner is still associated with {linked_apartments} apartment(s). Remove the associations first."
        )));
    }
    Ok(())
}

pub fn ensure_apartment_unreferenced(rooms: i64, bills: i64) -> AppResult<()> {
    if rooms > 0 || bills > 0 {
        return Err(AppError::Conflict(format!(
            "Apartment still has {rooms} room(s) and {bills} bill(s)."
        )));
    }
    Ok(())
}

pub async fn list_owner_apartment_ids(pool: &PgPool, owner_id: Uuid) -> AppResult<Vec<String>> {
    let rows = sqlx::query(
        "SELECT apartment_id::text AS id FROM apartment_owners
         WHERE owner_id = $1 ORDER BY created_at ASC, apartment_id ASC",
    )
    .bind(owner_id)
    .fetch_all(pool)
    .await
    .map_err(map_db_error)?;
    Ok(collect_ids(&rows))
}

pub async fn list_apartment_owner_ids(pool: &PgPool, apartment_id: Uuid) -> AppResult<Vec<String>> {
    let rows = sqlx::query(
        "SELECT owner_id::text AS id FROM apartment_owners
         WHERE apartment_id = $1 ORDER BY created_at ASC, owner_id ASC",
    )
    .bind(apartment_id)
    .fetch_all(pool)
    .await
    .map_err(map_db_error)?;
    Ok(collect_ids(&rows))
}

/// Relation ids for a page of records, keyed by the record id. `column` is
/// the side the page was listed from (`owner_id` or `apartment_id`).
pub async fn linked_ids_by_record(
    pool: &PgPool,
    column: RelationSide,
    record_ids: &[Uuid],
) -> AppResult<HashMap<String, Vec<String>>> {
    if record_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let (key, other) = match column {
        RelationSide::Owner => ("owner_id", "apartment_id"),
        RelationSide::Apartment => ("apartment_id", "owner_id"),
    };
    let sql = format!(
        "SELECT {key}::text AS key, {other}::text AS id FROM apartment_owners
         WHERE {key} = ANY($1) ORDER BY created_at ASC, {other} ASC"
    );
    let rows = sqlx::query(&sql)
        .bind(record_ids)
        .fetch_all(pool)
        .await
        .map_err(map_db_error)?;

    let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
    for row in rows {
        let (Ok(key), Ok(id)) = (row.try_get::<String, _>("key"), row.try_get::<String, _>("id"))
        else {
            continue;
        };
        grouped.entry(key).or_default().push(id);
    }
    Ok(grouped)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationSide {
    Owner,
    Apartment,
}

/// Inserts the owner and its initial apartment links atomically.
pub async fn create_owner(
    pool: &PgPool,
    record: &Map<String, Value>,
    apartment_ids: &[Uuid],
) -> AppResult<Value> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| AppError::Dependency(format!("txn begin: {e}")))?;

    let owner = create_row_tx(&mut tx, "owners", record).await?;
    let owner_id = owner
        .get("id")
        .and_then(Value::as_str)
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .ok_or_else(|| AppError::Internal("Created owner has no id.".to_string()))?;

    ensure_apartments_exist(&mut tx, apartment_ids).await?;
    for apartment_id in apartment_ids {
        insert_link(&mut tx, owner_id, *apartment_id).await?;
    }

    tx.commit()
        .await
        .map_err(|e| AppError::Dependency(format!("txn commit: {e}")))?;
    Ok(owner)
}

pub async fn link_apartment(pool: &PgPool, owner_id: Uuid, apartment_id: Uuid) -> AppResult<()> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| AppError::Dependency(format!("txn begin: {e}")))?;
    ensure_owner_exists(&mut tx, owner_id).await?;
    ensure_apartments_exist(&mut tx, &[apartment_id]).await?;
    insert_link(&mut tx, owner_id, apartment_id).await?;
    tx.commit()
        .await
        .map_err(|e| AppError::Dependency(format!("txn commit: {e}")))?;

    tracing::info!(%owner_id, %apartment_id, "Linked owner to apartment");
    Ok(())
}

pub async fn unlink_apartment(pool: &PgPool, owner_id: Uuid, apartment_id: Uuid) -> AppResult<()> {
    let result =
        sqlx::query("DELETE FROM apartment_owners WHERE owner_id = $1 AND apartment_id = $2")
            .bind(owner_id)
            .bind(apartment_id)
            .execute(pool)
            .await
            .map_err(map_db_error)?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(
            "Owner is not associated with this apartment.".to_string(),
        ));
    }

    tracing::info!(%owner_id, %apartment_id, "Unlinked owner from apartment");
    Ok(())
}

/// Makes `apartment_ids` the owner's complete apartment set. Both sides of
/// the relation change together or not at all.
pub async fn replace_owner_apartments(
    pool: &PgPool,
    owner_id: Uuid,
    apartment_ids: &[Uuid],
) -> AppResult<Vec<String>> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| AppError::Dependency(format!("txn begin: {e}")))?;

    ensure_owner_exists(&mut tx, owner_id).await?;
    ensure_apartments_exist(&mut tx, apartment_ids).await?;

    sqlx::query("DELETE FROM apartment_owners WHERE owner_id = $1 AND NOT (apartment_id = ANY($2))")
        .bind(owner_id)
        .bind(apartment_ids)
        .execute(&mut *tx)
        .await
        .map_err(map_db_error)?;
    for apartment_id in apartment_ids {
        insert_link(&mut tx, owner_id, *apartment_id).await?;
    }

    tx.commit()
        .await
        .map_err(|e| AppError::Dependency(format!("txn commit: {e}")))?;

    tracing::info!(%owner_id, apartments = apartment_ids.len(), "Replaced owner apartments");
    Ok(apartment_ids.iter().map(Uuid::to_string).collect())
}

/// Deletes an owner that has no remaining apartment associations.
pub async fn delete_owner(pool: &PgPool, owner_id: Uuid) -> AppResult<Value> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| AppError::Dependency(format!("txn begin: {e}")))?;

    ensure_owner_exists(&mut tx, owner_id).await?;
    let linked = count_where(&mut tx, "apartment_owners", "owner_id", owner_id).await?;
    ensure_owner_unlinked(linked)?;

    let deleted = delete_returning(&mut tx, "owners", owner_id).await?;
    tx.commit()
        .await
        .map_err(|e| AppError::Dependency(format!("txn commit: {e}")))?;
    Ok(deleted)
}

/// Deletes an apartment without rooms or bills, dropping its owner links in
/// the same transaction.
pub async fn delete_apartment(pool: &PgPool, apartment_id: Uuid) -> AppResult<Value> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| AppError::Dependency(format!("txn begin: {e}")))?;

    ensure_apartments_exist(&mut tx, &[apartment_id]).await?;
    let rooms = count_where(&mut tx, "rooms", "apartment_id", apartment_id).await?;
    let bills = count_where(&mut tx, "bills", "apartment_id", apartment_id).await?;
    ensure_apartment_unreferenced(rooms, bills)?;

    sqlx::query("DELETE FROM apartment_owners WHERE apartment_id = $1")
        .bind(apartment_id)
        .execute(&mut *tx)
        .await
        .map_err(map_db_error)?;
    let deleted = delete_returning(&mut tx, "apartments", apartment_id).await?;

    tx.commit()
        .await
        .map_err(|e| AppError::Dependency(format!("txn commit: {e}")))?;
    Ok(deleted)
}

async fn insert_link(conn: &mut PgConnection, owner_id: Uuid, apartment_id: Uuid) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO apartment_owners (owner_id, apartment_id) VALUES ($1, $2)
         ON CONFLICT (owner_id, apartment_id) DO NOTHING",
    )
    .bind(owner_id)
    .bind(apartment_id)
    .execute(&mut *conn)
    .await
    .map_err(map_db_error)?;
    Ok(())
}

async fn ensure_owner_exists(conn: &mut PgConnection, owner_id: Uuid) -> AppResult<()> {
    // Row lock keeps a concurrent delete from racing the relation change.
    let found = sqlx::query("SELECT id FROM owners WHERE id = $1 FOR UPDATE")
        .bind(owner_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_db_error)?;
    if found.is_none() {
        return Err(AppError::NotFound("owners record not found.".to_string()));
    }
    Ok(())
}

async fn ensure_apartments_exist(conn: &mut PgConnection, apartment_ids: &[Uuid]) -> AppResult<()> {
    if apartment_ids.is_empty() {
        return Ok(());
    }
    let rows = sqlx::query("SELECT id FROM apartments WHERE id = ANY($1) FOR UPDATE")
        .bind(apartment_ids)
        .fetch_all(&mut *conn)
        .await
        .map_err(map_db_error)?;
    let found = rows
        .iter()
        .filter_map(|row| row.try_get::<Uuid, _>("id").ok())
        .collect::<HashSet<_>>();
    let missing = missing_ids(apartment_ids, &found);
    if !missing.is_empty() {
        return Err(AppError::NotFound(format!(
            "Apartment(s) not found: {}.",
            missing.join(", ")
        )));
    }
    Ok(())
}

async fn count_where(
    conn: &mut PgConnection,
    table: &str,
    column: &str,
    id: Uuid,
) -> AppResult<i64> {
    let sql = format!("SELECT COUNT(*)::bigint AS total FROM {table} WHERE {column} = $1");
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_one(&mut *conn)
        .await
        .map_err(map_db_error)?;
    Ok(row.try_get::<i64, _>("total").unwrap_or(0))
}

async fn delete_returning(conn: &mut PgConnection, table: &str, id: Uuid) -> AppResult<Value> {
    let sql = format!("DELETE FROM {table} t WHERE t.id = $1 RETURNING row_to_json(t) AS row");
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_db_error)?;
    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::NotFound(format!("{table} record not found.")))
}

fn missing_ids(requested: &[Uuid], found: &HashSet<Uuid>) -> Vec<String> {
    requested
        .iter()
        .filter(|id| !found.contains(id))
        .map(Uuid::to_string)
        .collect()
}

fn collect_ids(rows: &[sqlx::postgres::PgRow]) -> Vec<String> {
    rows.iter()
        .filter_map(|row| row.try_get::<String, _>("id").ok())
        .collect()
}
