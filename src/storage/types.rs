//! Core data types for the month-granular store
//!
//! This module defines the fundamental types used throughout the storage layer:
//! - `MonthIndex`: months since January 2001
//! - `MonthDayKey`: one day within a month, the unique record key
//! - `DayFlags`: four independent boolean markers
//! - `DayRecord`: one day's measurement, trend, flags and note
//! - `MonthData`: every `DayRecord` of one month
//! - `MutationCounter`: shared version stamp bumped on every committed write

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Calendar year of month index 0
pub const EPOCH_YEAR: i32 = 2001;

/// Number of independent flags per day
pub const FLAG_COUNT: usize = 4;

/// Smoothing factor of the trend (exponential moving average) weight
pub const TREND_SMOOTHING: f32 = 0.1;

/// Day within a month, 1-based
pub type DaySlot = u8;

/// Integer count of months since January 2001
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonthIndex(pub i32);

impl MonthIndex {
    pub const fn new(index: i32) -> Self {
        Self(index)
    }

    /// Build from a calendar year and 1-based month
    pub fn from_year_month(year: i32, month: u32) -> Option<Self> {
        if !(1..=12).contains(&month) {
            return None;
        }
        Some(Self((year - EPOCH_YEAR) * 12 + month as i32 - 1))
    }

    /// Month containing a calendar date
    pub fn from_date(date: NaiveDate) -> Self {
        Self((date.year() - EPOCH_YEAR) * 12 + date.month0() as i32)
    }

    pub fn year(self) -> i32 {
        EPOCH_YEAR + self.0.div_euclid(12)
    }

    /// Calendar month, 1..=12
    pub fn month_of_year(self) -> u32 {
        self.0.rem_euclid(12) as u32 + 1
    }

    pub fn days_in_month(self) -> u8 {
        let next = self.succ();
        match (
            NaiveDate::from_ymd_opt(self.year(), self.month_of_year(), 1),
            NaiveDate::from_ymd_opt(next.year(), next.month_of_year(), 1),
        ) {
            (Some(first), Some(next_first)) => next_first.signed_duration_since(first).num_days() as u8,
            // December of the last year chrono represents
            _ => 31,
        }
    }

    pub fn succ(self) -> Self {
        Self(self.0 + 1)
    }

    pub fn pred(self) -> Self {
        Self(self.0 - 1)
    }

    /// Key of the first day of this month
    pub fn first_day(self) -> MonthDayKey {
        MonthDayKey { month: self, day: 1 }
    }

    /// Key of the last day of this month
    pub fn last_day(self) -> MonthDayKey {
        MonthDayKey {
            month: self,
            day: self.days_in_month(),
        }
    }

    /// Iterate months from `self` to `last` inclusive
    pub fn through(self, last: MonthIndex) -> impl Iterator<Item = MonthIndex> {
        (self.0..=last.0).map(MonthIndex)
    }
}

impl std::fmt::Display for MonthIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year(), self.month_of_year())
    }
}

impl std::str::FromStr for MonthIndex {
    type Err = String;

    /// Parse `YYYY-MM`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s
            .split_once('-')
            .ok_or_else(|| format!("Expected YYYY-MM, got {}", s))?;
        let year: i32 = year.trim().parse().map_err(|_| format!("Invalid year: {}", year))?;
        let month: u32 = month.trim().parse().map_err(|_| format!("Invalid month: {}", month))?;
        MonthIndex::from_year_month(year, month).ok_or_else(|| format!("Month out of range: {}", month))
    }
}

/// A specific day within a month; the storage key of one `DayRecord`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MonthDayKey {
    pub month: MonthIndex,
    pub day: DaySlot,
}

impl MonthDayKey {
    /// Create a key, returning None if the day does not exist in the month
    pub fn new(month: MonthIndex, day: DaySlot) -> Option<Self> {
        if day >= 1 && day <= month.days_in_month() {
            Some(Self { month, day })
        } else {
            None
        }
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            month: MonthIndex::from_date(date),
            day: date.day() as DaySlot,
        }
    }

    /// Calendar date of this key (None only for years chrono cannot represent)
    pub fn to_date(self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.month.year(), self.month.month_of_year(), self.day as u32)
    }

    /// Single-integer encoding used as the `days` table primary key
    pub fn encode(self) -> i64 {
        ((self.month.0 as i64) << 5) | self.day as i64
    }

    pub fn decode(value: i64) -> Self {
        Self {
            month: MonthIndex((value >> 5) as i32),
            day: (value & 0x1f) as DaySlot,
        }
    }

    /// Key `days` days later (earlier when negative)
    pub fn add_days(self, days: i64) -> Self {
        let shifted = self
            .date()
            .checked_add_signed(Duration::days(days))
            .unwrap_or(if days < 0 { NaiveDate::MIN } else { NaiveDate::MAX });
        Self::from_date(shifted)
    }

    /// Signed number of days from `self` to `other`
    pub fn days_until(self, other: MonthDayKey) -> i64 {
        other.date().signed_duration_since(self.date()).num_days()
    }

    /// Calendar date, saturating at chrono's limits
    fn date(self) -> NaiveDate {
        self.to_date().unwrap_or(if self.month.0 < 0 {
            NaiveDate::MIN
        } else {
            NaiveDate::MAX
        })
    }
}

impl std::fmt::Display for MonthDayKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{:02}", self.month, self.day)
    }
}

/// Four independent boolean markers for one day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DayFlags(u8);

impl DayFlags {
    const MASK: u8 = (1 << FLAG_COUNT) - 1;

    pub const fn empty() -> Self {
        Self(0)
    }

    /// Build from a bitmask; bits above `FLAG_COUNT` are dropped
    pub fn from_bits(bits: u8) -> Self {
        Self(bits & Self::MASK)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    /// Whether flag `index` is set (out-of-range indexes are never set)
    pub fn get(self, index: usize) -> bool {
        index < FLAG_COUNT && self.0 & (1 << index) != 0
    }

    pub fn set(&mut self, index: usize, value: bool) {
        if index >= FLAG_COUNT {
            return;
        }
        if value {
            self.0 |= 1 << index;
        } else {
            self.0 &= !(1 << index);
        }
    }

    /// Builder: set flag `index`
    pub fn with(mut self, index: usize) -> Self {
        self.set(index, true);
        self
    }

    pub fn any(self) -> bool {
        self.0 != 0
    }

    pub fn to_array(self) -> [bool; FLAG_COUNT] {
        std::array::from_fn(|i| self.get(i))
    }
}

/// One day's data
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DayRecord {
    /// Measured weight; None when nothing was measured that day
    pub scale_weight: Option<f32>,
    /// Smoothed weight derived from measurements
    pub trend_weight: Option<f32>,
    pub flags: DayFlags,
    pub note: Option<String>,
}

impl DayRecord {
    /// A record holding a single measurement
    pub fn measured(weight: f32) -> Self {
        Self {
            scale_weight: Some(weight),
            ..Default::default()
        }
    }

    /// Builder: set flag `index`
    pub fn flag(mut self, index: usize) -> Self {
        self.flags.set(index, true);
        self
    }

    /// Builder: set the note (blank notes are stored as no note)
    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.set_note(Some(note.into()));
        self
    }

    pub fn set_note(&mut self, note: Option<String>) {
        self.note = note.filter(|n| !n.trim().is_empty());
    }

    pub fn is_measured(&self) -> bool {
        self.scale_weight.is_some()
    }

    /// True when there is nothing worth persisting
    pub fn is_empty(&self) -> bool {
        self.scale_weight.is_none() && !self.flags.any() && self.note.is_none()
    }
}

/// All day records of one month, indexed by day slot
#[derive(Debug, Clone, PartialEq)]
pub struct MonthData {
    month: MonthIndex,
    days: Vec<DayRecord>,
}

impl MonthData {
    /// A month with no recorded data
    pub fn empty(month: MonthIndex) -> Self {
        Self {
            month,
            days: vec![DayRecord::default(); month.days_in_month() as usize],
        }
    }

    pub fn month(&self) -> MonthIndex {
        self.month
    }

    /// Number of days in this month
    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn day(&self, day: DaySlot) -> Option<&DayRecord> {
        (day as usize).checked_sub(1).and_then(|i| self.days.get(i))
    }

    pub fn day_mut(&mut self, day: DaySlot) -> Option<&mut DayRecord> {
        (day as usize).checked_sub(1).and_then(move |i| self.days.get_mut(i))
    }

    /// Iterate `(key, record)` pairs in day order
    pub fn iter(&self) -> impl Iterator<Item = (MonthDayKey, &DayRecord)> {
        let month = self.month;
        self.days.iter().enumerate().map(move |(i, record)| {
            (
                MonthDayKey {
                    month,
                    day: i as DaySlot + 1,
                },
                record,
            )
        })
    }

    /// True when no day holds anything worth persisting
    pub fn is_empty(&self) -> bool {
        self.days.iter().all(DayRecord::is_empty)
    }

    pub fn measured_count(&self) -> usize {
        self.days.iter().filter(|d| d.is_measured()).count()
    }

    /// Re-derive trend weights from `seed` (the trend carried in from earlier
    /// months) and return the trend carried out of this month.
    pub fn apply_trend(&mut self, seed: Option<f32>) -> Option<f32> {
        let mut trend = seed;
        for record in &mut self.days {
            record.trend_weight = match record.scale_weight {
                Some(weight) => {
                    let next = match trend {
                        Some(prev) => prev + TREND_SMOOTHING * (weight - prev),
                        None => weight,
                    };
                    trend = Some(next);
                    Some(next)
                }
                None => None,
            };
        }
        trend
    }
}

/// Shared, monotonically increasing version stamp
///
/// Cloning yields another handle to the same counter.
#[derive(Debug, Clone, Default)]
pub struct MutationCounter(Arc<AtomicU64>);

impl MutationCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value; consumers keep it as a staleness snapshot
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Whether the counter moved past `snapshot`
    pub fn has_advanced_since(&self, snapshot: u64) -> bool {
        self.current() > snapshot
    }

    pub(crate) fn bump(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}
