//! Next-dose calculation.
//!
//! Given a medication's schedule and taken-dose history, compute when the next
//! dose is due relative to `now`. Calendar arithmetic happens in the time zone
//! of `now`, so callers pass `Local::now()` in production and a fixed zone in tests.

use crate::{Error, Medication, MedicationWithNextDose, Result, Schedule};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use std::cmp::Ordering;

/// A time-of-day slot that passed less than this many minutes ago is still due today
pub const GRACE_MINUTES: i64 = 5;

/// Compute the next due dose for a schedule
///
/// ## Time-of-day schedules
///
/// Each enabled slot yields today's occurrence if it is after the last taken
/// dose and not more than [`GRACE_MINUTES`] in the past, otherwise tomorrow's
/// occurrence. The earliest slot wins. No enabled slots means no next dose.
///
/// ## Interval schedules
///
/// Without history the series is anchored at `start_hour` today; otherwise at
/// the last taken dose plus one interval. The series is stepped forward by
/// whole intervals until it reaches `now`.
pub fn next_dose<Tz: TimeZone>(
    schedule: &Schedule,
    taken_history: &[DateTime<Utc>],
    now: &DateTime<Tz>,
) -> Result<Option<DateTime<Utc>>> {
    schedule.validate()?;

    let tz = now.timezone();
    let today = now.date_naive();
    let now_utc = now.with_timezone(&Utc);
    let last_taken = taken_history.iter().max().copied();

    match schedule {
        Schedule::TimeOfDay { .. } => {
            let tomorrow = today
                .succ_opt()
                .ok_or_else(|| Error::Other(format!("no calendar day after {}", today)))?;
            let grace_cutoff = now_utc - Duration::minutes(GRACE_MINUTES);

            let mut earliest: Option<DateTime<Utc>> = None;
            for hour in schedule.slot_hours() {
                let today_dose = local_at_hour(&tz, today, hour)?;
                let still_due = last_taken.map_or(true, |taken| today_dose > taken)
                    && today_dose > grace_cutoff;

                let candidate = if still_due {
                    today_dose
                } else {
                    local_at_hour(&tz, tomorrow, hour)?
                };

                earliest = Some(earliest.map_or(candidate, |e| e.min(candidate)));
            }
            Ok(earliest)
        }
        Schedule::Interval { hours, start_hour } => {
            let step = Duration::hours(i64::from(*hours));
            let first = match last_taken {
                Some(taken) => taken + step,
                None => local_at_hour(&tz, today, *start_hour)?,
            };
            Ok(Some(advance_to(first, step, now_utc)))
        }
    }
}

/// The most recent dose due at or before `now` that is still untaken
///
/// Time-of-day slots behave like [`next_dose`] evaluated at `since` (the last
/// time the caller looked), so a slot is pending when it came due after that
/// point or is still inside its grace window.
///
/// Interval doses sit on the grid `start_hour + k * hours` (or `last_taken +
/// k * hours` once a dose is recorded) and the latest grid point not after
/// `now` stays pending until a later dose is taken, however long ago it came
/// due. `since` plays no part for them.
pub fn pending_dose<Tz: TimeZone>(
    schedule: &Schedule,
    taken_history: &[DateTime<Utc>],
    since: &DateTime<Tz>,
    now: &DateTime<Tz>,
) -> Result<Option<DateTime<Utc>>> {
    schedule.validate()?;

    let now_utc = now.with_timezone(&Utc);

    match schedule {
        Schedule::TimeOfDay { .. } => {
            let due = next_dose(schedule, taken_history, since)?;
            Ok(due.filter(|due| *due <= now_utc))
        }
        Schedule::Interval { hours, start_hour } => {
            let step = Duration::hours(i64::from(*hours));
            let first = match taken_history.iter().max() {
                Some(taken) => *taken + step,
                None => {
                    let anchor = local_at_hour(&now.timezone(), now.date_naive(), *start_hour)?;
                    retreat_to(anchor, step, now_utc)
                }
            };
            Ok(latest_not_after(first, step, now_utc))
        }
    }
}

/// Annotate every medication with its next dose and sort ascending, `None` last
pub fn rank_by_next_dose<Tz: TimeZone>(
    medications: &[Medication],
    now: &DateTime<Tz>,
) -> Result<Vec<MedicationWithNextDose>> {
    let mut ranked = medications
        .iter()
        .map(|med| {
            let next = next_dose(&med.schedule, &med.taken_history, now)?;
            Ok(MedicationWithNextDose {
                medication: med.clone(),
                next_dose: next,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    ranked.sort_by(|a, b| compare_next_dose(a.next_dose, b.next_dose));
    tracing::debug!("Ranked {} medications by next dose", ranked.len());
    Ok(ranked)
}

fn compare_next_dose(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Smallest `first + k * step` (k >= 0) that is not before `now`
fn advance_to(first: DateTime<Utc>, step: Duration, now: DateTime<Utc>) -> DateTime<Utc> {
    if first >= now {
        return first;
    }

    // Jump close in one go so long gaps in history don't loop per interval
    let step_ms = step.num_milliseconds();
    let behind_ms = (now - first).num_milliseconds();
    let mut candidate = first + Duration::milliseconds(behind_ms / step_ms * step_ms);
    while candidate < now {
        candidate += step;
    }
    candidate
}

/// Largest `first + k * step` (k >= 0) that is not after `now`
fn latest_not_after(
    first: DateTime<Utc>,
    step: Duration,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if first > now {
        return None;
    }
    let step_ms = step.num_milliseconds();
    let behind_ms = (now - first).num_milliseconds();
    Some(first + Duration::milliseconds(behind_ms / step_ms * step_ms))
}

/// Largest `anchor - k * step` (k >= 0) that is not after `now`
fn retreat_to(anchor: DateTime<Utc>, step: Duration, now: DateTime<Utc>) -> DateTime<Utc> {
    if anchor <= now {
        return anchor;
    }
    let step_ms = step.num_milliseconds();
    let ahead_ms = (anchor - now).num_milliseconds();
    let steps = (ahead_ms + step_ms - 1) / step_ms;
    anchor - Duration::milliseconds(steps * step_ms)
}

/// `date` at `hour:00:00.000` in `tz`, as UTC
///
/// Ambiguous local times resolve to the earlier instant; times skipped by a DST
/// jump resolve to the hour after.
fn local_at_hour<Tz: TimeZone>(tz: &Tz, date: NaiveDate, hour: u32) -> Result<DateTime<Utc>> {
    let naive = date
        .and_hms_opt(hour, 0, 0)
        .ok_or_else(|| Error::Configuration(format!("invalid dose hour {}", hour)))?;

    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| Error::Other(format!("no local time for {} at {:02}:00", date, hour)))
}
