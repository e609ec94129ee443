//! Financial reporting over completed payments.

use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, TimeZone, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, instrument};
use utoipa::{IntoParams, ToSchema};

use crate::{
    entities::payment::{self, PaymentStatus},
    errors::ServiceError,
    services::money::sum_to_decimal,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display, ToSchema)]
#[strum(serialize_all = "lowercase")]
pub enum TimeRange {
    Daily,
    Weekly,
    #[default]
    Monthly,
    Yearly,
}

impl FromStr for TimeRange {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "yearly" => Ok(Self::Yearly),
            other => Err(ServiceError::ValidationError(format!(
                "Invalid timeRange '{}'; expected daily, weekly, monthly or yearly",
                other
            ))),
        }
    }
}

impl TimeRange {
    /// Sort key and display label of the bucket containing `at`.
    fn bucket(self, at: DateTime<Utc>) -> ((i32, u32, u32), String) {
        match self {
            Self::Daily => (
                (at.year(), at.month(), at.day()),
                at.format("%Y-%m-%d").to_string(),
            ),
            Self::Weekly => {
                let week = at.iso_week();
                (
                    (week.year(), week.week(), 0),
                    format!("W{} {}", week.week(), week.year()),
                )
            }
            Self::Monthly => ((at.year(), at.month(), 0), at.format("%b %Y").to_string()),
            Self::Yearly => ((at.year(), 0, 0), at.year().to_string()),
        }
    }
}

/// Query string of `GET /api/reports/financial`
#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct ReportQuery {
    /// daily | weekly | monthly | yearly (default monthly)
    pub time_range: Option<String>,
    /// Inclusive start date, `YYYY-MM-DD`
    pub start_date: Option<String>,
    /// Inclusive end date, `YYYY-MM-DD`
    pub end_date: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PeriodTotals {
    pub period: String,
    pub orders: u64,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub revenue: Decimal,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FinancialReport {
    /// Buckets in chronological order, whatever the time range
    pub monthly_data: Vec<PeriodTotals>,
    pub total_orders: u64,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub total_revenue: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub average_order_value: Decimal,
}

fn parse_date(raw: Option<&str>, field: &str) -> Result<Option<NaiveDate>, ServiceError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(value) => NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| {
                ServiceError::ValidationError(format!("{} must be a date in YYYY-MM-DD format", field))
            }),
    }
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

/// Groups `(created_at, amount_minor)` rows into report buckets and totals.
/// Sums are kept in `i128` so that many large payments cannot overflow.
pub fn aggregate(
    range: TimeRange,
    rows: &[(DateTime<Utc>, i64)],
) -> Result<FinancialReport, ServiceError> {
    let mut buckets: BTreeMap<(i32, u32, u32), (String, u64, i128)> = BTreeMap::new();
    let mut total_minor = 0i128;

    for (created_at, amount_minor) in rows {
        let (key, label) = range.bucket(*created_at);
        let entry = buckets.entry(key).or_insert((label, 0, 0));
        entry.1 += 1;
        entry.2 += i128::from(*amount_minor);
        total_minor += i128::from(*amount_minor);
    }

    let total_orders = rows.len() as u64;
    let total_revenue = sum_to_decimal(total_minor)?;
    let average_order_value = if total_orders == 0 {
        Decimal::ZERO
    } else {
        (total_revenue / Decimal::from(total_orders))
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    };

    let monthly_data = buckets
        .into_values()
        .map(|(period, orders, revenue)| {
            Ok(PeriodTotals {
                period,
                orders,
                revenue: sum_to_decimal(revenue)?,
            })
        })
        .collect::<Result<Vec<_>, ServiceError>>()?;

    Ok(FinancialReport {
        monthly_data,
        total_orders,
        total_revenue,
        average_order_value,
    })
}

#[derive(Clone)]
pub struct ReportService {
    db: Arc<DatabaseConnection>,
}

impl ReportService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Completed payments in the (inclusive) date range, bucketed by `timeRange`.
    #[instrument(skip(self))]
    pub async fn financial_report(&self, query: ReportQuery) -> Result<FinancialReport, ServiceError> {
        let range = match query.time_range.as_deref() {
            None | Some("") => TimeRange::default(),
            Some(raw) => raw.parse()?,
        };
        let start = parse_date(query.start_date.as_deref(), "startDate")?;
        let end = parse_date(query.end_date.as_deref(), "endDate")?;
        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                return Err(ServiceError::ValidationError(
                    "startDate must not be after endDate".to_string(),
                ));
            }
        }

        let mut select = payment::Entity::find()
            .select_only()
            .column(payment::Column::CreatedAt)
            .column(payment::Column::AmountMinor)
            .filter(payment::Column::Status.eq(PaymentStatus::Completed));
        if let Some(start) = start {
            select = select.filter(payment::Column::CreatedAt.gte(start_of_day(start)));
        }
        if let Some(end) = end {
            let next_day = end.checked_add_days(Days::new(1)).ok_or_else(|| {
                ServiceError::ValidationError("endDate is out of range".to_string())
            })?;
            select = select.filter(payment::Column::CreatedAt.lt(start_of_day(next_day)));
        }

        let rows: Vec<(DateTime<Utc>, i64)> = select
            .order_by_asc(payment::Column::CreatedAt)
            .into_tuple()
            .all(&*self.db)
            .await?;

        debug!(range = %range, rows = rows.len(), "building financial report");
        aggregate(range, &rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;
    use test_case::test_case;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn empty_report_is_all_zeros() {
        let report = aggregate(TimeRange::Monthly, &[]).unwrap();
        assert!(report.monthly_data.is_empty());
        assert_eq!(report.total_orders, 0);
        assert_eq!(report.total_revenue, Decimal::ZERO);
        assert_eq!(report.average_order_value, Decimal::ZERO);
    }

    #[test]
    fn monthly_buckets_are_chronological_with_year() {
        let rows = vec![
            (at(2023, 12, 5), 10_000),
            (at(2024, 1, 2), 5_000),
            (at(2024, 1, 20), 2_500),
            (at(2024, 3, 1), 1_000),
        ];
        let report = aggregate(TimeRange::Monthly, &rows).unwrap();
        let periods: Vec<_> = report.monthly_data.iter().map(|b| b.period.as_str()).collect();
        assert_eq!(periods, ["Dec 2023", "Jan 2024", "Mar 2024"]);
        assert_eq!(report.monthly_data[1].orders, 2);
        assert_eq!(report.monthly_data[1].revenue, dec!(75.00));
        assert_eq!(report.total_orders, 4);
        assert_eq!(report.total_revenue, dec!(185.00));
        assert_eq!(report.average_order_value, dec!(46.25));
    }

    #[test_case(TimeRange::Daily, "2024-01-01")]
    #[test_case(TimeRange::Weekly, "W1 2024")]
    #[test_case(TimeRange::Monthly, "Jan 2024")]
    #[test_case(TimeRange::Yearly, "2024")]
    fn bucket_labels(range: TimeRange, expected: &str) {
        let report = aggregate(range, &[(at(2024, 1, 1), 100)]).unwrap();
        assert_eq!(report.monthly_data[0].period, expected);
    }

    #[test]
    fn weekly_buckets_use_iso_year_at_year_boundary() {
        // 2024-12-30 belongs to ISO week 1 of 2025.
        let report = aggregate(TimeRange::Weekly, &[(at(2024, 12, 30), 100), (at(2025, 1, 2), 100)]).unwrap();
        assert_eq!(report.monthly_data.len(), 1);
        assert_eq!(report.monthly_data[0].period, "W1 2025");
        assert_eq!(report.monthly_data[0].orders, 2);
    }

    #[test]
    fn average_rounds_to_cents() {
        let report = aggregate(TimeRange::Yearly, &[(at(2024, 1, 1), 1_000), (at(2024, 2, 1), 1_000), (at(2024, 3, 1), 1_001)]).unwrap();
        assert_eq!(report.average_order_value, dec!(10.00));
    }

    #[test]
    fn totals_do_not_overflow_on_large_payments() {
        let rows = vec![(at(2024, 1, 1), i64::MAX), (at(2024, 1, 2), i64::MAX)];
        let report = aggregate(TimeRange::Monthly, &rows).unwrap();
        assert_eq!(report.total_revenue, dec!(184467440737095516.14));
        assert_eq!(report.monthly_data[0].revenue, report.total_revenue);
        assert!(report.average_order_value > Decimal::ZERO);
    }

    #[test]
    fn unknown_time_range_is_rejected() {
        assert_matches!("hourly".parse::<TimeRange>(), Err(ServiceError::ValidationError(_)));
        assert_eq!("Weekly".parse::<TimeRange>().unwrap(), TimeRange::Weekly);
    }

    #[test]
    fn dates_must_be_iso_formatted() {
        assert_eq!(
            parse_date(Some("2024-02-29"), "startDate").unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 29)
        );
        assert_eq!(parse_date(Some(""), "startDate").unwrap(), None);
        assert_matches!(
            parse_date(Some("29/02/2024"), "startDate"),
            Err(ServiceError::ValidationError(_))
        );
    }
}
