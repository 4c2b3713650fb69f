//! Core domain types for the medication tracker.
//!
//! This module defines the fundamental types used throughout the system:
//! - Dosing schedules (time-of-day slots or fixed intervals)
//! - Medications and their taken-dose history
//! - Profiles grouping medications
//! - Derived views (next-dose annotation, adherence report, reminders)

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Schedule Types
// ============================================================================

/// Wall-clock hour of the morning slot
pub const MORNING_HOUR: u32 = 8;
/// Wall-clock hour of the noon slot
pub const NOON_HOUR: u32 = 13;
/// Wall-clock hour of the evening slot
pub const EVENING_HOUR: u32 = 20;

/// Recurring dosing rule for a medication
///
/// Unknown `type` tags fail at deserialization, so every consumer can match
/// exhaustively on the two variants.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    /// Doses at fixed wall-clock slots
    TimeOfDay {
        #[serde(default)]
        morning: bool,
        #[serde(default)]
        noon: bool,
        #[serde(default)]
        evening: bool,
    },
    /// A dose every `hours` hours, anchored at `start_hour` until the first dose is taken
    Interval { hours: u32, start_hour: u32 },
}

impl Schedule {
    /// Check the invariants the calculators rely on
    pub fn validate(&self) -> Result<()> {
        match self {
            Schedule::TimeOfDay { .. } => Ok(()),
            Schedule::Interval { hours, start_hour } => {
                if *hours == 0 {
                    return Err(Error::Configuration(
                        "interval schedule must have hours > 0".into(),
                    ));
                }
                if *start_hour > 23 {
                    return Err(Error::Configuration(format!(
                        "interval start hour {} is outside 0..=23",
                        start_hour
                    )));
                }
                Ok(())
            }
        }
    }

    /// Hours of the enabled slots, in day order. Empty for interval schedules.
    pub fn slot_hours(&self) -> Vec<u32> {
        match self {
            Schedule::TimeOfDay {
                morning,
                noon,
                evening,
            } => [
                (*morning, MORNING_HOUR),
                (*noon, NOON_HOUR),
                (*evening, EVENING_HOUR),
            ]
            .into_iter()
            .filter_map(|(enabled, hour)| enabled.then_some(hour))
            .collect(),
            Schedule::Interval { .. } => Vec::new(),
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::TimeOfDay {
                morning,
                noon,
                evening,
            } => {
                let names: Vec<&str> = [(*morning, "morning"), (*noon, "noon"), (*evening, "evening")]
                    .into_iter()
                    .filter_map(|(enabled, name)| enabled.then_some(name))
                    .collect();
                if names.is_empty() {
                    write!(f, "no slots")
                } else {
                    write!(f, "{}", names.join(", "))
                }
            }
            Schedule::Interval { hours, start_hour } => {
                write!(f, "every {}h from {:02}:00", hours, start_hour)
            }
        }
    }
}

// ============================================================================
// Medication Types
// ============================================================================

/// A tracked medication and its dose history
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Medication {
    pub id: String,
    pub name: String,
    pub quantity: f64,
    pub unit: String,
    pub schedule: Schedule,
    /// Append-only; not guaranteed to be sorted
    #[serde(default)]
    pub taken_history: Vec<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stock: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_stock_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Medication {
    /// Create a medication with a fresh id and empty history
    pub fn new(
        name: impl Into<String>,
        quantity: f64,
        unit: impl Into<String>,
        schedule: Schedule,
    ) -> Result<Self> {
        schedule.validate()?;
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            quantity,
            unit: unit.into(),
            schedule,
            taken_history: Vec::new(),
            stock: None,
            low_stock_threshold: None,
            notes: None,
        })
    }

    /// Most recent taken dose, if any
    pub fn last_taken(&self) -> Option<DateTime<Utc>> {
        self.taken_history.iter().max().copied()
    }

    /// Record a dose taken at `at`, drawing down stock when it is tracked
    pub fn record_dose(&mut self, at: DateTime<Utc>) {
        self.taken_history.push(at);
        if let Some(stock) = self.stock {
            if stock > 0.0 {
                self.stock = Some((stock - self.quantity).max(0.0));
            }
        }
    }

    /// True when both stock and threshold are set and stock has fallen to the threshold
    pub fn is_stock_low(&self) -> bool {
        match (self.stock, self.low_stock_threshold) {
            (Some(stock), Some(threshold)) => stock <= threshold,
            _ => false,
        }
    }

    /// Human readable dose, e.g. "1 tablet"
    pub fn dose_text(&self) -> String {
        format!("{} {}", self.quantity, self.unit)
    }
}

/// A medication decorated with its computed next due dose (never persisted)
#[derive(Clone, Debug, Serialize)]
pub struct MedicationWithNextDose {
    #[serde(flatten)]
    pub medication: Medication,
    pub next_dose: Option<DateTime<Utc>>,
}

// ============================================================================
// Profile Types
// ============================================================================

/// A person whose medications are tracked
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub medications: Vec<Medication>,
}

impl Profile {
    pub fn new(name: impl Into<String>, avatar: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            avatar: avatar.into(),
            medications: Vec::new(),
        }
    }

    pub fn medication(&self, id: &str) -> Option<&Medication> {
        self.medications.iter().find(|m| m.id == id)
    }

    pub fn medication_mut(&mut self, id: &str) -> Option<&mut Medication> {
        self.medications.iter_mut().find(|m| m.id == id)
    }
}

// ============================================================================
// Report Types
// ============================================================================

/// Adherence of a single medication over the report window
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MedicationAdherence {
    pub medication_id: String,
    pub name: String,
    pub expected_doses: u32,
    /// Capped at `expected_doses`
    pub taken_doses: u32,
    /// Percentage, 0..=100
    pub adherence: u32,
}

/// Adherence across all medications of a profile
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AdherenceReport {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub overall_adherence: u32,
    pub medications: Vec<MedicationAdherence>,
}

// ============================================================================
// Notification Types
// ============================================================================

/// A user-facing alert for a due dose
#[derive(Clone, Debug, PartialEq)]
pub struct Reminder {
    pub profile_id: String,
    pub medication_id: String,
    pub due: DateTime<Utc>,
    pub title: String,
    pub body: String,
}

impl Reminder {
    pub fn for_dose(profile: &Profile, medication: &Medication, due: DateTime<Utc>) -> Self {
        Self {
            profile_id: profile.id.clone(),
            medication_id: medication.id.clone(),
            due,
            title: format!("Medication time for {}!", profile.name),
            body: format!(
                "Please take '{}'. Dose: {}",
                medication.name,
                medication.dose_text()
            ),
        }
    }
}
