use axum::{
    extract::{Query, State},
    Json,
};
use serde_json::Value;

use crate::{
    error::{AppError, AppResult},
    schemas::MonthlyReportQuery,
    services::{
        bill_store::fetch_report_source,
        monthly_report::{build_monthly_report, MonthSelection},
    },
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route("/reports/monthly", axum::routing::get(monthly_report))
}

async fn monthly_report(
    State(state): State<AppState>,
    Query(query): Query<MonthlyReportQuery>,
) -> AppResult<Json<Value>> {
    let selection =
        MonthSelection::parse(query.month, query.year, query.apartment_id.as_deref())?;
    let window = selection.window(state.reporting_tz)?;
    let pool = state.db_pool()?.clone();

    // Concurrent misses for one key share a single load.
    let report = state
        .report_cache
        .try_get_with(state.report_cache_key(&selection.cache_key()), async move {
            let bills = fetch_report_source(&pool, &window, selection.apartment_id).await?;
            let report = build_monthly_report(&selection, &window, bills);
            tracing::info!(
                month = report.month,
                year = report.year,
                bills = report.summary.total_bills,
                "Monthly report built"
            );
            serde_json::to_value(&report)
                .map_err(|error| AppError::Internal(format!("report serialization: {error}")))
        })
        .await
        .map_err(|error| (*error).clone())?;

    Ok(Json(report))
}
