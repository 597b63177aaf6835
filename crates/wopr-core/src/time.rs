// [crates/wopr-core/src/time.rs]
//! UTC windowing helpers shared by the meter aggregator (§4.15) and the
//! auto-topup scheduler (§4.17). The spec's Open Question on daily/monthly
//! window timezone is resolved in favor of UTC everywhere (SPEC_FULL.md §9).

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};

/// `now` truncated to `00:00:00 UTC` of the same calendar day.
pub fn day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0)
        .single()
        .expect("valid calendar date")
}

/// The first of the current month at `00:00:00 UTC`.
pub fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .expect("valid calendar date")
}

/// Next UTC midnight strictly after `now`.
pub fn next_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    day_start(now) + Duration::days(1)
}

/// Next Monday at UTC midnight, strictly after `now`.
pub fn next_monday(now: DateTime<Utc>) -> DateTime<Utc> {
    let today = day_start(now);
    let days_until_monday = match today.weekday() {
        chrono::Weekday::Mon => 7,
        other => (7 - other.num_days_from_monday()) % 7,
    };
    let days_until_monday = if days_until_monday == 0 { 7 } else { days_until_monday };
    today + Duration::days(days_until_monday as i64)
}

/// First of next month at UTC midnight.
pub fn next_month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let this_month = month_start(now);
    if this_month.month() == 12 {
        Utc.with_ymd_and_hms(this_month.year() + 1, 1, 1, 0, 0, 0).single().unwrap()
    } else {
        Utc.with_ymd_and_hms(this_month.year(), this_month.month() + 1, 1, 0, 0, 0)
            .single()
            .unwrap()
    }
}
