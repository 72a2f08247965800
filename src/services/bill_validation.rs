use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    error::AppError,
    schemas::BillInput,
    services::{
        bill_calculator::{BillCharges, MeterReading},
        monthly_report::parse_billing_instant,
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldIssue {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, Error)]
#[error("Bill validation failed: {}", render_issues(.issues))]
pub struct BillValidationError {
    pub issues: Vec<FieldIssue>,
}

impl BillValidationError {
    pub fn single(field: &str, message: &str) -> Self {
        Self {
            issues: vec![FieldIssue {
                field: field.to_string(),
                message: message.to_string(),
            }],
        }
    }

    #[cfg(test)]
    pub fn has_field(&self, field: &str) -> bool {
        self.issues.iter().any(|issue| issue.field == field)
    }
}

impl From<BillValidationError> for AppError {
    fn from(error: BillValidationError) -> Self {
        AppError::UnprocessableEntity(error.to_string())
    }
}

fn render_issues(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(|issue| format!("{} {}", issue.field, issue.message))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RentalPeriod {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantSnapshot {
    pub tenant_name: String,
    pub tenant_address: Option<String>,
    pub tenant_phone: Option<String>,
    pub tenant_tax_id: Option<String>,
}

/// A bill submission that passed validation and is safe to price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillDraft {
    pub apartment_id: Uuid,
    pub room_id: Uuid,
    pub billing_date: DateTime<Utc>,
    pub payment_due_date: NaiveDate,
    pub tenant: TenantSnapshot,
    pub rental_period: RentalPeriod,
    pub charges: BillCharges,
    pub document_number: Option<String>,
}

/// Fills tenant fields the submission left blank from the room's current
/// tenant snapshot. Fields the client did send are never overwritten.
pub fn apply_room_tenant_snapshot(input: &mut BillInput, room: &Value) {
    let slots = [
        ("tenant_name", &mut input.tenant_name),
        ("tenant_address", &mut input.tenant_address),
        ("tenant_phone", &mut input.tenant_phone),
        ("tenant_tax_id", &mut input.tenant_tax_id),
    ];
    for (field, slot) in slots {
        if non_empty(slot.as_deref()).is_some() {
            continue;
        }
        if let Some(value) = room
            .get(field)
            .and_then(Value::as_str)
            .and_then(|value| non_empty(Some(value)))
        {
            *slot = Some(value.to_string());
        }
    }
}

pub fn validate_bill_input(input: &BillInput, tz: Tz) -> Result<BillDraft, BillValidationError> {
    let mut issues = Vec::new();
    let mut report = |field: &str, message: &str| {
        issues.push(FieldIssue {
            field: field.to_string(),
            message: message.to_string(),
        });
    };

    let apartment_id = required_uuid(input.apartment_id.as_deref(), "apartment_id", &mut report);
    let room_id = required_uuid(input.room_id.as_deref(), "room_id", &mut report);

    let billing_date = match non_empty(input.billing_date.as_deref()) {
        None => {
            report("billing_date", "is required");
            None
        }
        Some(raw) => {
            let parsed = parse_billing_instant(raw, tz);
            if parsed.is_none() {
                report("billing_date", "must be an ISO date or RFC 3339 timestamp");
            }
            parsed
        }
    };
    let payment_due_date = required_date(
        input.payment_due_date.as_deref(),
        "payment_due_date",
        &mut report,
    );

    let tenant_name = non_empty(input.tenant_name.as_deref()).map(ToOwned::to_owned);
    if tenant_name.is_none() {
        report("tenant_name", "is required");
    }

    let rental_period = match &input.rental_period {
        None => {
            report("rental_period", "is required");
            None
        }
        Some(period) => {
            let from = required_date(period.from.as_deref(), "rental_period.from", &mut report);
            let to = required_date(period.to.as_deref(), "rental_period.to", &mut report);
            match (from, to) {
                (Some(from), Some(to)) if from >= to => {
                    report("rental_period", "must start before it ends");
                    None
                }
                (Some(from), Some(to)) => Some(RentalPeriod { from, to }),
                _ => None,
            }
        }
    };

    match input.rent {
        None => report("rent", "is required"),
        Some(rent) if rent <= Decimal::ZERO => report("rent", "must be greater than zero"),
        Some(_) => {}
    }

    for (field, reading) in [("electricity", &input.electricity), ("water", &input.water)] {
        match reading {
            None => report(field, "is required"),
            Some(reading) => check_meter(field, reading, &mut report),
        }
    }

    for (field, fee) in [("aircon_fee", input.aircon_fee), ("fridge_fee", input.fridge_fee)] {
        if fee.is_some_and(|amount| amount < Decimal::ZERO) {
            report(field, "must not be negative");
        }
    }

    for (field, charge) in [
        ("discounts", &input.discounts),
        ("other_fees", &input.other_fees),
    ] {
        if let Some(charge) = charge {
            if charge.amounts().iter().any(|amount| *amount < Decimal::ZERO) {
                report(field, "amounts must not be negative");
            }
        }
    }

    if !issues.is_empty() {
        return Err(BillValidationError { issues });
    }

    let (
        Some(apartment_id),
        Some(room_id),
        Some(billing_date),
        Some(payment_due_date),
        Some(tenant_name),
        Some(rental_period),
        Some(rent),
        Some(electricity),
        Some(water),
    ) = (
        apartment_id,
        room_id,
        billing_date,
        payment_due_date,
        tenant_name,
        rental_period,
        input.rent,
        input.electricity.clone(),
        input.water.clone(),
    )
    else {
        return Err(BillValidationError::single("bill", "is incomplete"));
    };

    Ok(BillDraft {
        apartment_id,
        room_id,
        billing_date,
        payment_due_date,
        tenant: TenantSnapshot {
            tenant_name,
            tenant_address: non_empty(input.tenant_address.as_deref()).map(ToOwned::to_owned),
            tenant_phone: non_empty(input.tenant_phone.as_deref()).map(ToOwned::to_owned),
            tenant_tax_id: non_empty(input.tenant_tax_id.as_deref()).map(ToOwned::to_owned),
        },
        rental_period,
        charges: BillCharges {
            rent,
            discounts: input.discounts.clone().unwrap_or_default(),
            electricity,
            water,
            aircon_fee: input.aircon_fee.unwrap_or(Decimal::ZERO),
            fridge_fee: input.fridge_fee.unwrap_or(Decimal::ZERO),
            other_fees: input.other_fees.clone().unwrap_or_default(),
        },
        document_number: non_empty(input.document_number.as_deref()).map(ToOwned::to_owned),
    })
}

fn check_meter(field: &str, reading: &MeterReading, report: &mut impl FnMut(&str, &str)) {
    if reading.end_meter < reading.start_meter {
        report(
            &format!("{field}.end_meter"),
            "must not be lower than start_meter",
        );
    }
    if reading.rate < Decimal::ZERO {
        report(&format!("{field}.rate"), "must not be negative");
    }
    if reading.meter_fee < Decimal::ZERO {
        report(&format!("{field}.meter_fee"), "must not be negative");
    }
}

fn required_uuid(
    value: Option<&str>,
    field: &str,
    report: &mut impl FnMut(&str, &str),
) -> Option<Uuid> {
    let Some(raw) = non_empty(value) else {
        report(field, "is required");
        return None;
    };
    let parsed = Uuid::parse_str(raw).ok();
    if parsed.is_none() {
        report(field, "must be a valid id");
    }
    parsed
}

fn required_date(
    value: Option<&str>,
    field: &str,
    report: &mut impl FnMut(&str, &str),
) -> Option<NaiveDate> {
    let Some(raw) = non_empty(value) else {
        report(field, "is required");
        return None;
    };
    let parsed = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok();
    if parsed.is_none() {
        report(field, "must be an ISO date (YYYY-MM-DD)");
    }
    parsed
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|item| !item.is_empty())
}

#[cfg(test)]
mod tests {
    use super::{apply_room_tenant_snapshot, validate_bill_input};
    use crate::schemas::BillInput;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn valid_input() -> BillInput {
        serde_json::from_value(json!({
            "apartment_id": "550e8400-e29b-41d4-a716-446655440000",
            "room_id": "6fa459ea-ee8a-3ca4-894e-db77e160355e",
            "billing_date": "2024-03-01",
            "payment_due_date": "2024-03-05",
            "tenant_name": "Napat S.",
            "rental_period": { "from": "2024-03-01", "to": "2024-03-31" },
            "rent": 10000,
            "discounts": [{ "description": "Loyalty", "amount": 500 }],
            "electricity": { "start_meter": 100, "end_meter": 150, "rate": 7, "meter_fee": 50 },
            "water": { "start_meter": 50, "end_meter": 70, "rate": 15, "meter_fee": 50 },
            "aircon_fee": 300,
            "other_fees": [{ "description": "Cleaning", "amount": 200 }]
        }))
        .expect("fixture should decode")
    }

    #[test]
    fn accepts_complete_bill() {
        let draft = validate_bill_input(&valid_input(), chrono_tz::UTC).expect("valid bill");
        assert_eq!(draft.charges.rent, dec!(10000));
        assert_eq!(draft.charges.fridge_fee, dec!(0));
        assert_eq!(
            draft.billing_date,
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(draft.tenant.tenant_name, "Napat S.");
        assert!(draft.tenant.tenant_phone.is_none());
    }

    #[test]
    fn plain_billing_date_uses_reporting_zone() {
        let draft =
            validate_bill_input(&valid_input(), chrono_tz::Asia::Bangkok).expect("valid bill");
        assert_eq!(
            draft.billing_date,
            Utc.with_ymd_and_hms(2024, 2, 29, 17, 0, 0).unwrap()
        );
    }

    #[test]
    fn rejects_non_positive_rent() {
        let mut input = valid_input();
        input.rent = Some(dec!(0));
        let error = validate_bill_input(&input, chrono_tz::UTC).unwrap_err();
        assert!(error.has_field("rent"));
    }

    #[test]
    fn rejects_meter_running_backwards() {
        let mut input = valid_input();
        if let Some(water) = input.water.as_mut() {
            water.end_meter = dec!(40);
        }
        let error = validate_bill_input(&input, chrono_tz::UTC).unwrap_err();
        assert!(error.has_field("water.end_meter"));
        assert!(!error.has_field("electricity.end_meter"));
    }

    #[test]
    fn rejects_inverted_or_empty_rental_period() {
        let mut input = valid_input();
        if let Some(period) = input.rental_period.as_mut() {
            period.to = period.from.clone();
        }
        let error = validate_bill_input(&input, chrono_tz::UTC).unwrap_err();
        assert!(error.has_field("rental_period"));
    }

    #[test]
    fn reports_every_missing_field_at_once() {
        let error = validate_bill_input(&BillInput::default(), chrono_tz::UTC).unwrap_err();
        for field in [
            "apartment_id",
            "room_id",
            "billing_date",
            "payment_due_date",
            "tenant_name",
            "rental_period",
            "rent",
            "electricity",
            "water",
        ] {
            assert!(error.has_field(field), "expected issue for {field}");
        }
    }

    #[test]
    fn rejects_negative_line_items() {
        let mut input = valid_input();
        input.other_fees = serde_json::from_value(json!([{ "description": "x", "amount": -1 }]))
            .expect("fees should decode");
        let error = validate_bill_input(&input, chrono_tz::UTC).unwrap_err();
        assert!(error.has_field("other_fees"));
    }

    #[test]
    fn copies_missing_tenant_fields_from_room() {
        let mut input = valid_input();
        input.tenant_name = Some("  ".to_string());
        input.tenant_phone = Some("081-000-0000".to_string());
        let room = json!({
            "tenant_name": "Room Tenant",
            "tenant_phone": "099-999-9999",
            "tenant_tax_id": "3100000000001"
        });

        apply_room_tenant_snapshot(&mut input, &room);

        assert_eq!(input.tenant_name.as_deref(), Some("Room Tenant"));
        assert_eq!(input.tenant_phone.as_deref(), Some("081-000-0000"));
        assert_eq!(input.tenant_tax_id.as_deref(), Some("3100000000001"));
        assert!(input.tenant_address.is_none());
    }
}
