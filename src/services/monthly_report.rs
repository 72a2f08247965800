use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{error::AppError, services::bill_validation::RentalPeriod};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReportParameterError {
    #[error("month is required.")]
    MissingMonth,
    #[error("year is required.")]
    MissingYear,
    #[error("month must be between 1 and 12, got {0}.")]
    MonthOutOfRange(i64),
    #[error("year must be a four-digit year, got {0}.")]
    YearOutOfRange(i64),
    #[error("apartment_id '{0}' is not a valid id.")]
    InvalidApartmentId(String),
}

impl From<ReportParameterError> for AppError {
    fn from(error: ReportParameterError) -> Self {
        AppError::BadRequest(error.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonthSelection {
    pub month: u32,
    pub year: i32,
    pub apartment_id: Option<Uuid>,
}

impl MonthSelection {
    pub fn parse(
        month: Option<i64>,
        year: Option<i64>,
        apartment_id: Option<&str>,
    ) -> Result<Self, ReportParameterError> {
        let month = month.ok_or(ReportParameterError::MissingMonth)?;
        let year = year.ok_or(ReportParameterError::MissingYear)?;
        if !(1..=12).contains(&month) {
            return Err(ReportParameterError::MonthOutOfRange(month));
        }
        if !(1000..=9999).contains(&year) {
            return Err(ReportParameterError::YearOutOfRange(year));
        }
        let apartment_id = match apartment_id.map(str::trim).filter(|value| !value.is_empty()) {
            None => None,
            Some(raw) => Some(
                Uuid::parse_str(raw)
                    .map_err(|_| ReportParameterError::InvalidApartmentId(raw.to_string()))?,
            ),
        };

        Ok(Self {
            month: month as u32,
            year: year as i32,
            apartment_id,
        })
    }

    /// Cache key that is distinct for every (month, year, apartment) selection.
    pub fn cache_key(&self) -> String {
        format!(
            "{:04}-{:02}:{}",
            self.year,
            self.month,
            self.apartment_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "*".to_string())
        )
    }

    /// Half-open `[start, end)` window covering the calendar month in `tz`.
    pub fn window(&self, tz: Tz) -> Result<MonthWindow, ReportParameterError> {
        let first = NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .ok_or(ReportParameterError::MonthOutOfRange(i64::from(self.month)))?;
        let next = if self.month == 12 {
            NaiveDate::from_ymd_opt(self.year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(self.year, self.month + 1, 1)
        }
        .ok_or(ReportParameterError::YearOutOfRange(i64::from(self.year)))?;

        Ok(MonthWindow {
            start: local_midnight(first, tz),
            end: local_midnight(next, tz),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl MonthWindow {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }
}

/// First instant of `date` in `tz`. When midnight falls in a DST gap the
/// first valid instant after it is used.
pub fn local_midnight(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let naive = date.and_time(NaiveTime::MIN);
    match tz.from_local_datetime(&naive).earliest() {
        Some(local) => local.with_timezone(&Utc),
        None => (1..=24)
            .filter_map(|step| {
                let shifted = naive + chrono::Duration::minutes(30 * step);
                tz.from_local_datetime(&shifted).earliest()
            })
            .next()
            .map(|local| local.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&naive)),
    }
}

/// Accepts an RFC 3339 timestamp, or a plain `YYYY-MM-DD` date which is read
/// as local midnight in the reporting zone.
pub fn parse_billing_instant(raw: &str, tz: Tz) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .map(|date| local_midnight(date, tz))
}

/// Invoice label `MMYY-NNN`, e.g. `0324-001`.
pub fn running_number(month: u32, year: i32, sequence: usize) -> String {
    format!("{:02}{:02}-{:03}", month, year.rem_euclid(100), sequence)
}

/// A persisted bill joined with its room and apartment names, as fetched
/// for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReportSourceBill {
    pub id: Uuid,
    pub apartment_id: Uuid,
    pub room_number: Option<String>,
    pub apartment_name: Option<String>,
    pub tenant_name: String,
    pub rental_period: RentalPeriod,
    pub net_rent: Decimal,
    pub electricity_cost: Decimal,
    pub water_cost: Decimal,
    pub other_fees_total: Decimal,
    pub grand_total: Decimal,
    pub billing_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRow {
    pub id: Uuid,
    pub running_number: String,
    pub room_number: Option<String>,
    pub apartment_name: Option<String>,
    pub tenant_name: String,
    pub rental_period: RentalPeriod,
    pub rent: Decimal,
    pub electricity_cost: Decimal,
    pub water_cost: Decimal,
    pub other_fees_total: Decimal,
    pub grand_total: Decimal,
    pub billing_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub total_bills: usize,
    pub total_rent: Decimal,
    pub total_electricity: Decimal,
    pub total_water: Decimal,
    pub total_other_fees: Decimal,
    pub grand_total: Decimal,
}

impl ReportSummary {
    fn add(&mut self, row: &ReportRow) {
        self.total_bills += 1;
        self.total_rent += row.rent;
        self.total_electricity += row.electricity_cost;
        self.total_water += row.water_cost;
        self.total_other_fees += row.other_fees_total;
        self.grand_total += row.grand_total;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlyReport {
    pub month: u32,
    pub year: i32,
    pub apartment_id: Option<Uuid>,
    pub bills: Vec<ReportRow>,
    pub summary: ReportSummary,
}

/// Numbers and totals the bills of one month. Bills outside the window or
/// the apartment filter are dropped; the rest keep the order they were
/// fetched in, and that order alone decides the running numbers.
pub fn build_monthly_report<I>(
    selection: &MonthSelection,
    window: &MonthWindow,
    candidates: I,
) -> MonthlyReport
where
    I: IntoIterator<Item = ReportSourceBill>,
{
    let mut summary = ReportSummary::default();
    let bills = candidates
        .into_iter()
        .filter(|bill| window.contains(bill.billing_date))
        .filter(|bill| {
            selection.apartment_id.is_none() || selection.apartment_id == Some(bill.apartment_id)
        })
        .enumerate()
        .map(|(index, bill)| {
            let row = ReportRow {
                id: bill.id,
                running_number: running_number(selection.month, selection.year, index + 1),
                room_number: bill.room_number,
                apartment_name: bill.apartment_name,
                tenant_name: bill.tenant_name,
                rental_period: bill.rental_period,
                rent: bill.net_rent,
                electricity_cost: bill.electricity_cost,
                water_cost: bill.water_cost,
                other_fees_total: bill.other_fees_total,
                grand_total: bill.grand_total,
                billing_date: bill.billing_date,
            };
            summary.add(&row);
            row
        })
        .collect::<Vec<_>>();

    MonthlyReport {
        month: selection.month,
        year: selection.year,
        apartment_id: selection.apartment_id,
        bills,
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::{
        build_monthly_report, local_midnight, parse_billing_instant, running_number,
        MonthSelection, ReportParameterError, ReportSourceBill,
    };
    use crate::services::bill_validation::RentalPeriod;
    use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    const APARTMENT_A: &str = "550e8400-e29b-41d4-a716-446655440000";
    const APARTMENT_B: &str = "6fa459ea-ee8a-3ca4-894e-db77e160355e";

    fn source(
        room_number: &str,
        apartment: &str,
        billing_date: DateTime<Utc>,
        net_rent: Decimal,
    ) -> ReportSourceBill {
        ReportSourceBill {
            id: Uuid::new_v4(),
            apartment_id: Uuid::parse_str(apartment).unwrap(),
            room_number: Some(room_number.to_string()),
            apartment_name: Some("Baan Suan".to_string()),
            tenant_name: format!("Tenant {room_number}"),
            rental_period: RentalPeriod {
                from: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                to: NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            },
            net_rent,
            electricity_cost: dec!(400),
            water_cost: dec!(350),
            other_fees_total: dec!(200),
            grand_total: net_rent + dec!(950),
            billing_date,
        }
    }

    fn march_2024(apartment: Option<&str>) -> MonthSelection {
        MonthSelection::parse(Some(3), Some(2024), apartment).unwrap()
    }

    #[test]
    fn formats_running_numbers() {
        assert_eq!(running_number(3, 2024, 1), "0324-001");
        assert_eq!(running_number(12, 2009, 42), "1209-042");
        assert_eq!(running_number(1, 2030, 1234), "0130-1234");
    }

    #[test]
    fn numbers_by_fetch_order_not_room_number() {
        let selection = march_2024(Some(APARTMENT_A));
        let window = selection.window(chrono_tz::UTC).unwrap();
        let first = source("305", APARTMENT_A, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(), dec!(9500));
        let second = source("101", APARTMENT_A, Utc.with_ymd_and_hms(2024, 3, 31, 0, 0, 0).unwrap(), dec!(8000));
        let (first_id, second_id) = (first.id, second.id);

        let report = build_monthly_report(&selection, &window, vec![first, second]);

        assert_eq!(report.bills.len(), 2);
        assert_eq!(report.bills[0].id, first_id);
        assert_eq!(report.bills[0].running_number, "0324-001");
        assert_eq!(report.bills[1].id, second_id);
        assert_eq!(report.bills[1].running_number, "0324-002");
        assert_eq!(report.bills[0].rent, dec!(9500));
    }

    #[test]
    fn sums_every_category() {
        let selection = march_2024(None);
        let window = selection.window(chrono_tz::UTC).unwrap();
        let day = Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap();
        let report = build_monthly_report(
            &selection,
            &window,
            vec![
                source("1", APARTMENT_A, day, dec!(9500)),
                source("2", APARTMENT_B, day, dec!(7000.50)),
            ],
        );

        assert_eq!(report.summary.total_bills, 2);
        assert_eq!(report.summary.total_rent, dec!(16500.50));
        assert_eq!(report.summary.total_electricity, dec!(800));
        assert_eq!(report.summary.total_water, dec!(700));
        assert_eq!(report.summary.total_other_fees, dec!(400));
        assert_eq!(report.summary.grand_total, dec!(18400.50));
    }

    #[test]
    fn restarts_numbering_for_each_month() {
        let march = march_2024(None);
        let april = MonthSelection::parse(Some(4), Some(2024), None).unwrap();
        let bills = vec![
            source("1", APARTMENT_A, Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap(), dec!(1)),
            source("2", APARTMENT_A, Utc.with_ymd_and_hms(2024, 3, 6, 0, 0, 0).unwrap(), dec!(1)),
            source("3", APARTMENT_A, Utc.with_ymd_and_hms(2024, 4, 2, 0, 0, 0).unwrap(), dec!(1)),
        ];

        let march_report =
            build_monthly_report(&march, &march.window(chrono_tz::UTC).unwrap(), bills.clone());
        let april_report =
            build_monthly_report(&april, &april.window(chrono_tz::UTC).unwrap(), bills);

        assert_eq!(march_report.bills.len(), 2);
        assert_eq!(april_report.bills.len(), 1);
        assert_eq!(april_report.bills[0].running_number, "0424-001");
    }

    #[test]
    fn month_boundaries_are_half_open() {
        let selection = march_2024(None);
        let window = selection.window(chrono_tz::UTC).unwrap();
        let month_start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let next_month = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();

        assert!(window.contains(month_start));
        assert!(window.contains(next_month - Duration::milliseconds(1)));
        assert!(!window.contains(next_month));
        assert!(!window.contains(month_start - Duration::seconds(1)));

        let report = build_monthly_report(
            &selection,
            &window,
            vec![
                source("1", APARTMENT_A, month_start, dec!(1)),
                source("2", APARTMENT_A, next_month, dec!(1)),
            ],
        );
        assert_eq!(report.summary.total_bills, 1);
    }

    #[test]
    fn window_follows_reporting_zone() {
        let selection = march_2024(None);
        let window = selection.window(chrono_tz::Asia::Bangkok).unwrap();
        assert_eq!(window.start, Utc.with_ymd_and_hms(2024, 2, 29, 17, 0, 0).unwrap());
        assert_eq!(window.end, Utc.with_ymd_and_hms(2024, 3, 31, 17, 0, 0).unwrap());

        let december = MonthSelection::parse(Some(12), Some(2024), None).unwrap();
        let window = december.window(chrono_tz::UTC).unwrap();
        assert_eq!(window.end, Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn midnight_inside_dst_gap_moves_forward() {
        // Santiago skips 00:00-01:00 local on 2024-09-08.
        let date = NaiveDate::from_ymd_opt(2024, 9, 8).unwrap();
        let instant = local_midnight(date, chrono_tz::America::Santiago);
        assert_eq!(instant, Utc.with_ymd_and_hms(2024, 9, 8, 4, 0, 0).unwrap());
    }

    #[test]
    fn empty_month_is_not_an_error() {
        let selection = march_2024(None);
        let window = selection.window(chrono_tz::UTC).unwrap();
        let report = build_monthly_report(&selection, &window, Vec::new());
        assert!(report.bills.is_empty());
        assert_eq!(report.summary.total_bills, 0);
        assert_eq!(report.summary.grand_total, Decimal::ZERO);
        assert_eq!(report.summary.total_rent, Decimal::ZERO);
    }

    #[test]
    fn apartment_filter_drops_other_apartments_before_numbering() {
        let selection = march_2024(Some(APARTMENT_B));
        let window = selection.window(chrono_tz::UTC).unwrap();
        let day = Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap();
        let report = build_monthly_report(
            &selection,
            &window,
            vec![
                source("1", APARTMENT_A, day, dec!(1)),
                source("2", APARTMENT_B, day, dec!(1)),
            ],
        );
        assert_eq!(report.bills.len(), 1);
        assert_eq!(report.bills[0].room_number.as_deref(), Some("2"));
        assert_eq!(report.bills[0].running_number, "0324-001");
    }

    #[test]
    fn rejects_bad_parameters() {
        assert_eq!(
            MonthSelection::parse(None, Some(2024), None),
            Err(ReportParameterError::MissingMonth)
        );
        assert_eq!(
            MonthSelection::parse(Some(3), None, None),
            Err(ReportParameterError::MissingYear)
        );
        assert_eq!(
            MonthSelection::parse(Some(13), Some(2024), None),
            Err(ReportParameterError::MonthOutOfRange(13))
        );
        assert_eq!(
            MonthSelection::parse(Some(0), Some(2024), None),
            Err(ReportParameterError::MonthOutOfRange(0))
        );
        assert_eq!(
            MonthSelection::parse(Some(3), Some(24), None),
            Err(ReportParameterError::YearOutOfRange(24))
        );
        assert!(matches!(
            MonthSelection::parse(Some(3), Some(2024), Some("room-1")),
            Err(ReportParameterError::InvalidApartmentId(_))
        ));
    }

    #[test]
    fn cache_keys_distinguish_selections() {
        assert_eq!(march_2024(None).cache_key(), "2024-03:*");
        assert_ne!(
            march_2024(None).cache_key(),
            march_2024(Some(APARTMENT_A)).cache_key()
        );
    }

    #[test]
    fn parses_billing_instants() {
        assert_eq!(
            parse_billing_instant("2024-03-01T10:30:00+07:00", chrono_tz::UTC),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 3, 30, 0).unwrap())
        );
        assert_eq!(
            parse_billing_instant("2024-03-01", chrono_tz::UTC),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_billing_instant("01/03/2024", chrono_tz::UTC), None);
    }
}
