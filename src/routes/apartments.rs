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
    repository::table_service::{create_row, get_row, list_rows, update_row},
    routes::{record_id, with_ids},
    schemas::{
        clamp_limit, parse_record_id, remove_nulls, serialize_to_map, validate_input,
        ApartmentPath, CreateApartmentInput, ListQuery, UpdateApartmentInput,
    },
    services::owner_relations::{
        delete_apartment as delete_apartment_tx, linked_ids_by_record, list_apartment_owner_ids,
        RelationSide,
    },
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/apartments",
            axum::routing::get(list_apartments).post(create_apartment),
        )
        .route(
            "/apartments/{apartment_id}",
            axum::routing::get(get_apartment)
                .patch(update_apartment)
                .delete(delete_apartment),
        )
}

async fn list_apartments(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Value>> {
    let pool = state.db_pool()?;
    let rows = list_rows(
        pool,
        "apartments",
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
    let mut owners = linked_ids_by_record(pool, RelationSide::Apartment, &ids).await?;

    let data = rows
        .into_iter()
        .map(|row| {
            let owner_ids = row
                .get("id")
                .and_then(Value::as_str)
                .and_then(|id| owners.remove(id))
                .unwrap_or_default();
            with_ids(row, "owner_ids", owner_ids)
        })
        .collect::<Vec<_>>();
    Ok(Json(json!({ "data": data })))
}

async fn create_apartment(
    State(state): State<AppState>,
    Json(payload): Json<CreateApartmentInput>,
) -> AppResult<impl IntoResponse> {
    validate_input(&payload)?;
    let pool = state.db_pool()?;

    let record = remove_nulls(serialize_to_map(&payload));
    let created = create_row(pool, "apartments", &record).await?;
    let created_id = record_id(&created);
    tracing::info!(
        apartment_id = %created_id,
        "Apartment created"
    );
    Ok((StatusCode::CREATED, Json(with_ids(created, "owner_ids", Vec::new()))))
}

async fn get_apartment(
    State(state): State<AppState>,
    Path(path): Path<ApartmentPath>,
) -> AppResult<Json<Value>> {
    let pool = state.db_pool()?;
    let apartment_id = parse_record_id(&path.apartment_id, "apartments record")?;
    let record = get_row(pool, "apartments", &apartment_id.to_string(), "id").await?;
    let owner_ids = list_apartment_owner_ids(pool, apartment_id).await?;
    Ok(Json(with_ids(record, "owner_ids", owner_ids)))
}

async fn update_apartment(
    State(state): State<AppState>,
    Path(path): Path<ApartmentPath>,
    Json(payload): Json<UpdateApartmentInput>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let pool = state.db_pool()?;
    let apartment_id = parse_record_id(&path.apartment_id, "apartments record")?;

    let patch = remove_nulls(serialize_to_map(&payload));
    let updated = update_row(pool, "apartments", &apartment_id.to_string(), &patch, "id").await?;
    // Apartment names are printed on report rows.
    state.invalidate_reports();

    let owner_ids = list_apartment_owner_ids(pool, apartment_id).await?;
    Ok(Json(with_ids(updated, "owner_ids", owner_ids)))
}

async fn delete_apartment(
    State(state): State<AppState>,
    Path(path): Path<ApartmentPath>,
) -> AppResult<Json<Value>> {
    let pool = state.db_pool()?;
    let apartment_id = parse_record_id(&path.apartment_id, "apartments record")?;
    let deleted = delete_apartment_tx(pool, apartment_id).await?;
    state.invalidate_reports();

    tracing::info!(%apartment_id, "Apartment deleted");
    Ok(Json(deleted))
}
