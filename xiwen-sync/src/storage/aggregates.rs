//! Derived views over the score records
//!
//! Pure functions so they can be checked against any record list.

use crate::database::{DailyScore, Record};
use chrono::{Datelike, Local, NaiveDate};
use std::collections::BTreeMap;

/// Sum of every record's score
pub fn total_score(records: &[Record]) -> i64 {
    records.iter().map(|r| r.score).sum()
}

/// Records whose timestamp falls on `day` in the local calendar
pub fn records_on_day(records: &[Record], day: NaiveDate) -> Vec<Record> {
    records
        .iter()
        .filter(|r| local_day(r) == day)
        .cloned()
        .collect()
}

/// Positive and negative sums per day of `month` (1-12) in `year`.
/// Days without records are absent from the map.
pub fn daily_score_summary(records: &[Record], month: u32, year: i32) -> BTreeMap<u32, DailyScore> {
    let mut summary: BTreeMap<u32, DailyScore> = BTreeMap::new();

    for record in records {
        let day = local_day(record);
        if day.month() != month || day.year() != year {
            continue;
        }

        let bucket = summary.entry(day.day()).or_default();
        if record.score > 0 {
            bucket.positive += record.score;
        } else {
            bucket.negative += record.score;
        }
    }

    summary
}

fn local_day(record: &Record) -> NaiveDate {
    record.date.with_timezone(&Local).date_naive()
}
