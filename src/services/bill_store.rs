use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    repository::table_service::map_db_error,
    schemas::serialize_to_map,
    services::{
        bill_calculator::{DerivedAmounts, LineItem, MeterReading},
        bill_validation::{BillDraft, BillValidationError, RentalPeriod},
        monthly_report::{MonthWindow, ReportSourceBill},
    },
};

/// Column image of a priced bill. Discounts and other fees are always
/// stored itemized.
#[derive(Debug, Clone, Serialize)]
pub struct BillRecord {
    pub apartment_id: Uuid,
    pub room_id: Uuid,
    pub billing_date: DateTime<Utc>,
    pub payment_due_date: NaiveDate,
    pub tenant_name: String,
    pub tenant_address: Option<String>,
    pub tenant_phone: Option<String>,
    pub tenant_tax_id: Option<String>,
    pub rental_period: RentalPeriod,
    pub rent: Decimal,
    pub discounts: Vec<LineItem>,
    pub electricity: MeterReading,
    pub water: MeterReading,
    pub aircon_fee: Decimal,
    pub fridge_fee: Decimal,
    pub other_fees: Vec<LineItem>,
    pub net_rent: Decimal,
    pub electricity_cost: Decimal,
    pub water_cost: Decimal,
    pub other_fees_total: Decimal,
    pub grand_total: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_number: Option<String>,
}

impl BillRecord {
    pub fn new(draft: BillDraft, derived: DerivedAmounts) -> Self {
        let charges = draft.charges;
        Self {
            apartment_id: draft.apartment_id,
            room_id: draft.room_id,
            billing_date: draft.billing_date,
            payment_due_date: draft.payment_due_date,
            tenant_name: draft.tenant.tenant_name,
            tenant_address: draft.tenant.tenant_address,
            tenant_phone: draft.tenant.tenant_phone,
            tenant_tax_id: draft.tenant.tenant_tax_id,
            rental_period: draft.rental_period,
            rent: charges.rent,
            discounts: charges.discounts.into_line_items("Discount"),
            electricity: charges.electricity,
            water: charges.water,
            aircon_fee: charges.aircon_fee,
            fridge_fee: charges.fridge_fee,
            other_fees: charges.other_fees.into_line_items("Other fees"),
            net_rent: derived.net_rent,
            electricity_cost: derived.electricity_cost,
            water_cost: derived.water_cost,
            other_fees_total: derived.other_fees_total,
            grand_total: derived.grand_total,
            document_number: draft.document_number,
        }
    }

    /// Payload for `table_service` writes. Optional tenant fields stay as
    /// explicit nulls so a full update clears them.
    pub fn into_payload(self) -> Map<String, Value> {
        serialize_to_map(&self)
    }
}

/// The room must exist under the apartment the bill names.
pub fn ensure_room_in_apartment(
    room: &Value,
    apartment_id: Uuid,
) -> Result<(), BillValidationError> {
    let room_apartment = room
        .get("apartment_id")
        .and_then(Value::as_str)
        .and_then(|raw| Uuid::parse_str(raw).ok());
    if room_apartment != Some(apartment_id) {
        return Err(BillValidationError::single(
            "room_id",
            "does not belong to the given apartment",
        ));
    }
    Ok(())
}

pub fn report_source_query(
    window: &MonthWindow,
    apartment_id: Option<Uuid>,
) -> QueryBuilder<'static, Postgres> {
    let mut query = QueryBuilder::<Postgres>::new(
        "SELECT row_to_json(t) AS row FROM (\
         SELECT b.id, b.apartment_id, r.room_number, a.name AS apartment_name, \
         b.tenant_name, b.rental_period, b.net_rent, b.electricity_cost, b.water_cost, \
         b.other_fees_total, b.grand_total, b.billing_date, b.created_at \
         FROM bills b \
         LEFT JOIN rooms r ON r.id = b.room_id \
         LEFT JOIN apartments a ON a.id = b.apartment_id \
         WHERE b.billing_date >= ",
    );
    query.push_bind(window.start);
    query.push(" AND b.billing_date < ").push_bind(window.end);
    if let Some(apartment_id) = apartment_id {
        query.push(" AND b.apartment_id = ").push_bind(apartment_id);
    }
    // Running numbers follow this order, so it is applied to the outer select.
    query.push(") t ORDER BY t.created_at ASC, t.id ASC");
    query
}

/// Bills billed inside `window`, in creation order.
pub async fn fetch_report_source(
    pool: &PgPool,
    window: &MonthWindow,
    apartment_id: Option<Uuid>,
) -> AppResult<Vec<ReportSourceBill>> {
    let rows = report_source_query(window, apartment_id)
        .build()
        .fetch_all(pool)
        .await
        .map_err(map_db_error)?;

    rows.into_iter()
        .map(|row| {
            let value = row.try_get::<Option<Value>, _>("row").map_err(|error| {
                tracing::error!(%error, "Report row could not be decoded");
                AppError::Internal("Stored bill could not be read.".to_string())
            })?;
            decode_report_row(value)
        })
        .collect()
}

/// Every fetched row must decode; skipping one would shift the running
/// numbers of all rows after it.
fn decode_report_row(value: Option<Value>) -> AppResult<ReportSourceBill> {
    let value = value.ok_or_else(|| {
        tracing::error!("Report row is null");
        AppError::Internal("Stored bill could not be read.".to_string())
    })?;
    serde_json::from_value::<ReportSourceBill>(value).map_err(|error| {
        tracing::error!(%error, "Stored bill does not match the report shape");
        AppError::Internal("Stored bill could not be read.".to_string())
    })
}
