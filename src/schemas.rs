use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::error::AppError;
use crate::services::bill_calculator::{ChargeAmount, MeterReading};

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateApartmentInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(max = 500))]
    pub address: Option<String>,
    #[validate(length(max = 50))]
    pub phone: Option<String>,
    #[validate(length(max = 50))]
    pub tax_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct UpdateApartmentInput {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[validate(length(max = 500))]
    pub address: Option<String>,
    #[validate(length(max = 50))]
    pub phone: Option<String>,
    #[validate(length(max = 50))]
    pub tax_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateRoomInput {
    pub apartment_id: String,
    #[validate(length(min = 1, max = 50))]
    pub room_number: String,
    #[validate(length(max = 255))]
    pub tenant_name: Option<String>,
    #[validate(length(max = 500))]
    pub tenant_address: Option<String>,
    #[validate(length(max = 50))]
    pub tenant_phone: Option<String>,
    #[validate(length(max = 50))]
    pub tenant_tax_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct UpdateRoomInput {
    #[validate(length(min = 1, max = 50))]
    pub room_number: Option<String>,
    #[validate(length(max = 255))]
    pub tenant_name: Option<String>,
    #[validate(length(max = 500))]
    pub tenant_address: Option<String>,
    #[validate(length(max = 50))]
    pub tenant_phone: Option<String>,
    #[validate(length(max = 50))]
    pub tenant_tax_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateOwnerInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(max = 500))]
    pub address: Option<String>,
    #[validate(length(max = 50))]
    pub phone: Option<String>,
    #[validate(length(min = 1, max = 50))]
    pub tax_id: String,
    #[serde(default, skip_serializing)]
    pub apartment_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct UpdateOwnerInput {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[validate(length(max = 500))]
    pub address: Option<String>,
    #[validate(length(max = 50))]
    pub phone: Option<String>,
    #[validate(length(min = 1, max = 50))]
    pub tax_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct OwnerApartmentsInput {
    #[serde(default)]
    pub apartment_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct RentalPeriodInput {
    pub from: Option<String>,
    pub to: Option<String>,
}

/// Raw bill submission. Everything is optional here so that missing fields
/// surface as one itemized validation error instead of a decode failure.
/// Legacy clients send `discount` / `other_fee` as plain numbers.
#[derive(Debug, Clone, Default, Deserialize, serde::Serialize)]
pub struct BillInput {
    pub apartment_id: Option<String>,
    pub room_id: Option<String>,
    pub billing_date: Option<String>,
    pub payment_due_date: Option<String>,
    pub tenant_name: Option<String>,
    pub tenant_address: Option<String>,
    pub tenant_phone: Option<String>,
    pub tenant_tax_id: Option<String>,
    pub rental_period: Option<RentalPeriodInput>,
    pub rent: Option<Decimal>,
    #[serde(default, alias = "discount")]
    pub discounts: Option<ChargeAmount>,
    pub electricity: Option<MeterReading>,
    pub water: Option<MeterReading>,
    pub aircon_fee: Option<Decimal>,
    pub fridge_fee: Option<Decimal>,
    #[serde(default, alias = "other_fee")]
    pub other_fees: Option<ChargeAmount>,
    pub document_number: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct ListQuery {
    #[serde(default = "default_limit_100")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct RoomsQuery {
    pub apartment_id: Option<String>,
    #[serde(default = "default_limit_500")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct BillsQuery {
    pub apartment_id: Option<String>,
    pub room_id: Option<String>,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct MonthlyReportQuery {
    pub month: Option<i64>,
    pub year: Option<i64>,
    pub apartment_id: Option<String>,
}

/// Parses a path or body id. Malformed ids can never match a row, so they
/// surface as not found.
pub fn parse_record_id(raw: &str, entity: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw.trim()).map_err(|_| AppError::NotFound(format!("{entity} not found.")))
}

pub fn clamp_limit(limit: i64) -> i64 {
    limit.clamp(1, 500)
}

fn default_limit_100() -> i64 {
    100
}

fn default_limit_500() -> i64 {
    500
}

pub fn serialize_to_map<T>(value: &T) -> serde_json::Map<String, serde_json::Value>
where
    T: serde::Serialize,
{
    let json = serde_json::to_value(value)
        .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));
    json.as_object().cloned().unwrap_or_default()
}

pub fn remove_nulls(
    mut map: serde_json::Map<String, serde_json::Value>,
) -> serde_json::Map<String, serde_json::Value> {
    map.retain(|_, value| !value.is_null());
    map
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct ApartmentPath {
    pub apartment_id: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct RoomPath {
    pub room_id: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct OwnerPath {
    pub owner_id: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct OwnerApartmentPath {
    pub owner_id: String,
    pub apartment_id: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct BillPath {
    pub bill_id: String,
}
