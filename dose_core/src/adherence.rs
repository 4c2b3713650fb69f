//! Adherence reporting over a trailing window.
//!
//! Compares the doses a schedule expected in the window against the doses
//! actually recorded, per medication and overall.

use crate::{AdherenceReport, Error, Medication, MedicationAdherence, Result, Schedule};
use chrono::{DateTime, Days, Duration, TimeZone, Utc};

/// Default length of the trailing report window
pub const REPORT_DAYS: u32 = 7;

/// Start of a trailing window ending at `end`: `days` before it, at local midnight
pub fn trailing_window_start<Tz: TimeZone>(end: &DateTime<Tz>, days: u32) -> Result<DateTime<Tz>> {
    let start_date = end
        .date_naive()
        .checked_sub_days(Days::new(u64::from(days)))
        .ok_or_else(|| Error::Other(format!("cannot go {} days back from {}", days, end.naive_local())))?;

    let midnight = start_date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| Error::Other(format!("no midnight on {}", start_date)))?;
    end.timezone()
        .from_local_datetime(&midnight)
        .earliest()
        .or_else(|| end.timezone().from_local_datetime(&(midnight + Duration::hours(1))).earliest())
        .ok_or_else(|| Error::Other(format!("no local midnight on {}", start_date)))
}

/// Adherence over the `days` leading up to `now`
pub fn trailing_report<Tz: TimeZone>(
    medications: &[Medication],
    now: &DateTime<Tz>,
    days: u32,
) -> Result<AdherenceReport> {
    let start = trailing_window_start(now, days)?;
    adherence_report(medications, &start, now)
}

/// Build an adherence report for `[window_start, window_end]`
///
/// Taken doses are capped at the expected count, so no medication can exceed
/// 100%. With nothing expected a medication (or the whole report) counts as
/// fully adherent.
pub fn adherence_report<Tz: TimeZone>(
    medications: &[Medication],
    window_start: &DateTime<Tz>,
    window_end: &DateTime<Tz>,
) -> Result<AdherenceReport> {
    let start_utc = window_start.with_timezone(&Utc);
    let end_utc = window_end.with_timezone(&Utc);
    let window_days = (window_end.date_naive() - window_start.date_naive()).num_days();

    let mut total_expected: u32 = 0;
    let mut total_taken: u32 = 0;
    let mut breakdown = Vec::with_capacity(medications.len());

    for med in medications {
        let expected = expected_doses(&med.schedule, window_start, window_end, window_days)?;
        let recorded = med
            .taken_history
            .iter()
            .filter(|t| **t >= start_utc && **t <= end_utc)
            .count();
        let taken = u32::try_from(recorded).unwrap_or(u32::MAX).min(expected);

        total_expected = total_expected.saturating_add(expected);
        total_taken = total_taken.saturating_add(taken);

        tracing::debug!(
            "Adherence for {}: {}/{} doses",
            med.name,
            taken,
            expected
        );

        breakdown.push(MedicationAdherence {
            medication_id: med.id.clone(),
            name: med.name.clone(),
            expected_doses: expected,
            taken_doses: taken,
            adherence: percentage(taken, expected),
        });
    }

    let report = AdherenceReport {
        window_start: start_utc,
        window_end: end_utc,
        overall_adherence: percentage(total_taken, total_expected),
        medications: breakdown,
    };

    tracing::info!(
        "Adherence report: {}% over {} medications",
        report.overall_adherence,
        report.medications.len()
    );

    Ok(report)
}

/// Number of doses a schedule expects in the window
///
/// Time-of-day schedules step through the window one calendar day at a time
/// from its start, counting every enabled slot per step. Interval schedules use
/// the closed form `floor(24 / hours * window_days)`, which ignores the start
/// hour and partial days.
pub fn expected_doses<Tz: TimeZone>(
    schedule: &Schedule,
    window_start: &DateTime<Tz>,
    window_end: &DateTime<Tz>,
    window_days: i64,
) -> Result<u32> {
    schedule.validate()?;

    match schedule {
        Schedule::TimeOfDay { .. } => {
            let per_day = schedule.slot_hours().len() as u32;
            if per_day == 0 {
                return Ok(0);
            }

            let end = window_end.naive_local();
            let mut cursor = window_start.naive_local();
            let mut days = 0u32;
            while cursor <= end {
                days = days.saturating_add(1);
                cursor = match cursor.checked_add_days(Days::new(1)) {
                    Some(next) => next,
                    None => break,
                };
            }
            Ok(days.saturating_mul(per_day))
        }
        Schedule::Interval { hours, .. } => {
            let per_day = 24.0 / f64::from(*hours);
            Ok((per_day * window_days.max(0) as f64).floor() as u32)
        }
    }
}

/// Rounded percentage, half-up; 100 when nothing was expected
fn percentage(taken: u32, expected: u32) -> u32 {
    if expected == 0 {
        return 100;
    }
    (f64::from(taken) / f64::from(expected) * 100.0).round() as u32
}
