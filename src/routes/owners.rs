use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    error::AppResult,
    repository::table_service::{get_row, list_rows, update_row},
    routes::{record_id, with_ids},
    schemas::{
        clamp_limit, parse_record_id, remove_nulls, serialize_to_map, validate_input,
        CreateOwnerInput, ListQuery, OwnerApartmentPath, OwnerApartmentsInput, OwnerPath,
        UpdateOwnerInput,
    },
    services::owner_relations::{
        create_owner as create_owner_tx, delete_owner as delete_owner_tx, link_apartment,
        linked_ids_by_record, list_owner_apartment_ids, normalize_apartment_ids,
        replace_owner_apartments, unlink_apartment, RelationSide,
    },
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/owners", axum::routing::get(list_owners).post(create_owner))
        .route(
            "/owners/{owner_id}",
            axum::routing::get(get_owner)
                .patch(update_owner)
                .delete(delete_owner),
        )
        .route(
            "/owners/{owner_id}/apartments",
            axum::routing::put(set_owner_apartments),
        )
        .route(
            "/owners/{owner_id}/apartments/{apartment_id}",
            axum::routing::post(add_owner_apartment).delete(remove_owner_apartment),
        )
}

async fn list_owners(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Value>> {
    let pool = state.db_pool()?;
    let rows = list_rows(
        pool,
        "owners",
        None,
        clamp_limit(query.limit),
        query.offset,
        "name",
        true,
    )
    .await?;

    let ids = rows
        .iter()
        .filter_map(|row| row.get("id").and_then(Value::as_str))
        .filter_map(|raw| Uuid::parse_str(raw).ok())
        .collect::<Vec<_>>();
    let mut apartments = linked_ids_by_record(pool, RelationSide::Owner, &ids).await?;

    let data = rows
        .into_iter()
        .map(|row| {
            let apartment_ids = row
                .get("id")
                .and_then(Value::as_str)
                .and_then(|id| apartments.remove(id))
                .unwrap_or_default();
            with_ids(row, "apartment_ids", apartment_ids)
        })
        .collect::<Vec<_>>();
    Ok(Json(json!({ "data": data })))
}

async fn create_owner(
    State(state): State<AppState>,
    Json(payload): Json<CreateOwnerInput>,
) -> AppResult<impl IntoResponse> {
    validate_input(&payload)?;
    let pool = state.db_pool()?;

    let apartment_ids = normalize_apartment_ids(&payload.apartment_ids)?;
    let record = remove_nulls(serialize_to_map(&payload));
    let created = create_owner_tx(pool, &record, &apartment_ids).await?;

    let created_id = record_id(&created);
    tracing::info!(
        owner_id = %created_id,
        apartments = apartment_ids.len(),
        "Owner created"
    );
    let linked = apartment_ids.iter().map(Uuid::to_string).collect();
    Ok((StatusCode::CREATED, Json(with_ids(created, "apartment_ids", linked))))
}

async fn get_owner(
    State(state): State<AppState>,
    Path(path): Path<OwnerPath>,
) -> AppResult<Json<Value>> {
    let pool = state.db_pool()?;
    let owner_id = parse_record_id(&path.owner_id, "owners record")?;
    let record = get_row(pool, "owners", &owner_id.to_string(), "id").await?;
    let apartment_ids = list_owner_apartment_ids(pool, owner_id).await?;
    Ok(Json(with_ids(record, "apartment_ids", apartment_ids)))
}

async fn update_owner(
    State(state): State<AppState>,
    Path(path): Path<OwnerPath>,
    Json(payload): Json<UpdateOwnerInput>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let pool = state.db_pool()?;
    let owner_id = parse_record_id(&path.owner_id, "owners record")?;

    let patch = remove_nulls(serialize_to_map(&payload));
    let updated = update_row(pool, "owners", &owner_id.to_string(), &patch, "id").await?;
    let apartment_ids = list_owner_apartment_ids(pool, owner_id).await?;
    Ok(Json(with_ids(updated, "apartment_ids", apartment_ids)))
}

async fn delete_owner(
    State(state): State<AppState>,
    Path(path): Path<OwnerPath>,
) -> AppResult<Json<Value>> {
    let pool = state.db_pool()?;
    let owner_id = parse_record_id(&path.owner_id, "owners record")?;
    let deleted = delete_owner_tx(pool, owner_id).await?;
    tracing::info!(%owner_id, "Owner deleted");
    Ok(Json(deleted))
}

async fn set_owner_apartments(
    State(state): State<AppState>,
    Path(path): Path<OwnerPath>,
    Json(payload): Json<OwnerApartmentsInput>,
) -> AppResult<Json<Value>> {
    let pool = state.db_pool()?;
    let owner_id = parse_record_id(&path.owner_id, "owners record")?;
    let apartment_ids = normalize_apartment_ids(&payload.apartment_ids)?;
    let linked = replace_owner_apartments(pool, owner_id, &apartment_ids).await?;
    Ok(Json(json!({ "owner_id": owner_id, "apartment_ids": linked })))
}

async fn add_owner_apartment(
    State(state): State<AppState>,
    Path(path): Path<OwnerApartmentPath>,
) -> AppResult<Json<Value>> {
    let pool = state.db_pool()?;
    let owner_id = parse_record_id(&path.owner_id, "owners record")?;
    let apartment_id = parse_record_id(&path.apartment_id, "apartments record")?;
    link_apartment(pool, owner_id, apartment_id).await?;

    let apartment_ids = list_owner_apartment_ids(pool, owner_id).await?;
    Ok(Json(json!({ "owner_id": owner_id, "apartment_ids": apartment_ids })))
}

async fn remove_owner_apartment(
    State(state): State<AppState>,
    Path(path): Path<OwnerApartmentPath>,
) -> AppResult<Json<Value>> {
    let pool = state.db_pool()?;
    let owner_id = parse_record_id(&path.owner_id, "owners record")?;
    let apartment_id = parse_record_id(&path.apartment_id, "apartments record")?;
    unlink_apartment(pool, owner_id, apartment_id).await?;

    let apartment_ids = list_owner_apartment_ids(pool, owner_id).await?;
    Ok(Json(json!({ "owner_id": owner_id, "apartment_ids": apartment_ids })))
}
