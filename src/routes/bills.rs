use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Map, Value};

use crate::{
    error::AppResult,
    repository::table_service::{create_row, delete_row, get_row, list_rows, update_row},
    routes::{non_empty_opt, record_id},
    schemas::{clamp_limit, parse_record_id, BillInput, BillPath, BillsQuery},
    services::{
        bill_calculator::calculate,
        bill_store::{ensure_room_in_apartment, BillRecord},
        bill_validation::{apply_room_tenant_snapshot, validate_bill_input},
    },
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/bills", axum::routing::get(list_bills).post(create_bill))
        .route("/bills/preview", axum::routing::post(preview_bill))
        .route(
            "/bills/{bill_id}",
            axum::routing::get(get_bill)
                .put(replace_bill)
                .delete(delete_bill),
        )
}

async fn list_bills(
    State(state): State<AppState>,
    Query(query): Query<BillsQuery>,
) -> AppResult<Json<Value>> {
    let pool = state.db_pool()?;

    let mut filters = Map::new();
    if let Some(apartment_id) = non_empty_opt(query.apartment_id.as_deref()) {
        let apartment_id = parse_record_id(&apartment_id, "apartments record")?;
        filters.insert(
            "apartment_id".to_string(),
            Value::String(apartment_id.to_string()),
        );
    }
    if let Some(room_id) = non_empty_opt(query.room_id.as_deref()) {
        let room_id = parse_record_id(&room_id, "rooms record")?;
        filters.insert("room_id".to_string(), Value::String(room_id.to_string()));
    }

    let rows = list_rows(
        pool,
        "bills",
        Some(&filters),
        clamp_limit(query.limit),
        query.offset,
        "billing_date",
        false,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

async fn create_bill(
    State(state): State<AppState>,
    Json(payload): Json<BillInput>,
) -> AppResult<impl IntoResponse> {
    let record = price_bill(&state, payload).await?;
    let pool = state.db_pool()?;

    let grand_total = record.grand_total;
    let created = create_row(pool, "bills", &record.into_payload()).await?;
    state.invalidate_reports();

    let created_id = record_id(&created);
    tracing::info!(
        bill_id = %created_id,
        %grand_total,
        "Bill created"
    );
    Ok((StatusCode::CREATED, Json(created)))
}

/// Prices a submission exactly as create would, without storing it.
async fn preview_bill(
    State(state): State<AppState>,
    Json(payload): Json<BillInput>,
) -> AppResult<Json<Value>> {
    let record = price_bill(&state, payload).await?;
    Ok(Json(Value::Object(record.into_payload())))
}

async fn get_bill(
    State(state): State<AppState>,
    Path(path): Path<BillPath>,
) -> AppResult<Json<Value>> {
    let pool = state.db_pool()?;
    let bill_id = parse_record_id(&path.bill_id, "bills record")?;
    let record = get_row(pool, "bills", &bill_id.to_string(), "id").await?;
    Ok(Json(record))
}

/// Full replacement. Derived amounts are recomputed from the new inputs,
/// never carried over from the stored row.
async fn replace_bill(
    State(state): State<AppState>,
    Path(path): Path<BillPath>,
    Json(payload): Json<BillInput>,
) -> AppResult<Json<Value>> {
    let pool = state.db_pool()?;
    let bill_id = parse_record_id(&path.bill_id, "bills record")?.to_string();
    get_row(pool, "bills", &bill_id, "id").await?;

    let record = price_bill(&state, payload).await?;
    let mut patch = record.into_payload();
    patch.insert(
        "updated_at".to_string(),
        Value::String(chrono::Utc::now().to_rfc3339()),
    );
    let updated = update_row(pool, "bills", &bill_id, &patch, "id").await?;
    state.invalidate_reports();

    tracing::info!(%bill_id, "Bill replaced");
    Ok(Json(updated))
}

async fn delete_bill(
    State(state): State<AppState>,
    Path(path): Path<BillPath>,
) -> AppResult<Json<Value>> {
    let pool = state.db_pool()?;
    let bill_id = parse_record_id(&path.bill_id, "bills record")?.to_string();
    let deleted = delete_row(pool, "bills", &bill_id, "id").await?;
    state.invalidate_reports();

    tracing::info!(%bill_id, "Bill deleted");
    Ok(Json(deleted))
}

/// Resolves the room, fills tenant gaps from it, validates the submission
/// and derives the computed amounts.
async fn price_bill(state: &AppState, mut payload: BillInput) -> AppResult<BillRecord> {
    let pool = state.db_pool()?;

    let room = match non_empty_opt(payload.room_id.as_deref())
        .and_then(|raw| uuid::Uuid::parse_str(&raw).ok())
    {
        Some(room_id) => Some(get_row(pool, "rooms", &room_id.to_string(), "id").await?),
        None => None,
    };
    if let Some(room) = &room {
        apply_room_tenant_snapshot(&mut payload, room);
    }

    let draft = validate_bill_input(&payload, state.reporting_tz)?;
    if let Some(room) = &room {
        ensure_room_in_apartment(room, draft.apartment_id)?;
    }
    get_row(pool, "apartments", &draft.apartment_id.to_string(), "id").await?;

    let derived = calculate(&draft.charges);
    Ok(BillRecord::new(draft, derived))
}
