use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};

use crate::{
    error::{AppError, AppResult},
    repository::table_service::{count_rows, create_row, delete_row, get_row, list_rows, update_row},
    routes::{json_map, non_empty_opt},
    schemas::{
        clamp_limit, parse_record_id, remove_nulls, serialize_to_map, validate_input,
        CreateRoomInput, RoomPath, RoomsQuery, UpdateRoomInput,
    },
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/rooms", axum::routing::get(list_rooms).post(create_room))
        .route(
            "/rooms/{room_id}",
            axum::routing::get(get_room)
                .patch(update_room)
                .delete(delete_room),
        )
}

async fn list_rooms(
    State(state): State<AppState>,
    Query(query): Query<RoomsQuery>,
) -> AppResult<Json<Value>> {
    let pool = state.db_pool()?;

    let filters = match non_empty_opt(query.apartment_id.as_deref()) {
        Some(apartment_id) => {
            let apartment_id = parse_record_id(&apartment_id, "apartments record")?;
            Some(json_map(&[(
                "apartment_id",
                Value::String(apartment_id.to_string()),
            )]))
        }
        None => None,
    };
    let rows = list_rows(
        pool,
        "rooms",
        filters.as_ref(),
        clamp_limit(query.limit),
        0,
        "room_number",
        true,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

async fn create_room(
    State(state): State<AppState>,
    Json(payload): Json<CreateRoomInput>,
) -> AppResult<impl IntoResponse> {
    validate_input(&payload)?;
    let pool = state.db_pool()?;

    let apartment_id = uuid::Uuid::parse_str(payload.apartment_id.trim()).map_err(|_| {
        AppError::UnprocessableEntity("apartment_id must be a valid id.".to_string())
    })?;
    get_row(pool, "apartments", &apartment_id.to_string(), "id").await?;

    let mut record = remove_nulls(serialize_to_map(&payload));
    record.insert(
        "apartment_id".to_string(),
        Value::String(apartment_id.to_string()),
    );
    let created = create_row(pool, "rooms", &record).await?;
    state.invalidate_reports();
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_room(
    State(state): State<AppState>,
    Path(path): Path<RoomPath>,
) -> AppResult<Json<Value>> {
    let pool = state.db_pool()?;
    let room_id = parse_record_id(&path.room_id, "rooms record")?;
    let record = get_row(pool, "rooms", &room_id.to_string(), "id").await?;
    Ok(Json(record))
}

async fn update_room(
    State(state): State<AppState>,
    Path(path): Path<RoomPath>,
    Json(payload): Json<UpdateRoomInput>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let pool = state.db_pool()?;
    let room_id = parse_record_id(&path.room_id, "rooms record")?;

    let patch = remove_nulls(serialize_to_map(&payload));
    let updated = update_row(pool, "rooms", &room_id.to_string(), &patch, "id").await?;
    // Room numbers are printed on report rows.
    state.invalidate_reports();
    Ok(Json(updated))
}

async fn delete_room(
    State(state): State<AppState>,
    Path(path): Path<RoomPath>,
) -> AppResult<Json<Value>> {
    let pool = state.db_pool()?;
    let room_id = parse_record_id(&path.room_id, "rooms record")?.to_string();

    let bills = count_rows(
        pool,
        "bills",
        Some(&json_map(&[("room_id", Value::String(room_id.clone()))])),
    )
    .await?;
    if bills > 0 {
        return Err(AppError::Conflict(format!(
            "Room still has {bills} bill(s)."
        )));
    }

    let deleted = delete_row(pool, "rooms", &room_id, "id").await?;
    state.invalidate_reports();
    tracing::info!(%room_id, "Room deleted");
    Ok(Json(deleted))
}
