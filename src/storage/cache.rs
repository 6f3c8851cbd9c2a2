//! Month Cache - in-memory view of the store
//!
//! Months are loaded lazily on first access and kept until [`MonthCache::flush`].
//! Every mutation is written through to the store before it becomes visible
//! in memory, so a failed write leaves the cache exactly as it was.

use crate::storage::error::{StoreError, StoreResult};
use crate::storage::store::PersistentStore;
use crate::storage::types::{DayRecord, MonthData, MonthDayKey, MonthIndex, MutationCounter};
use crate::units::WeightUnit;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Lazily populated map of `MonthIndex -> MonthData` in front of a store
pub struct MonthCache {
    store: PersistentStore,
    months: HashMap<MonthIndex, MonthData>,
}

impl MonthCache {
    pub fn new(store: PersistentStore) -> Self {
        Self {
            store,
            months: HashMap::new(),
        }
    }

    /// Read access to the underlying store for range/aggregate queries
    pub fn store(&self) -> &PersistentStore {
        &self.store
    }

    /// Give the store back, dropping all cached months
    pub fn into_store(self) -> PersistentStore {
        self.store
    }

    pub fn mutation_counter(&self) -> MutationCounter {
        self.store.mutation_counter()
    }

    /// Number of months currently held in memory
    pub fn len(&self) -> usize {
        self.months.len()
    }

    pub fn is_empty(&self) -> bool {
        self.months.is_empty()
    }

    pub fn is_cached(&self, month: MonthIndex) -> bool {
        self.months.contains_key(&month)
    }

    /// Month data, loaded from the store on a miss
    ///
    /// The same cached object is returned until the cache is flushed.
    pub fn get(&mut self, month: MonthIndex) -> StoreResult<&MonthData> {
        match self.months.entry(month) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let data = self.store.load_month(month)?;
                Ok(entry.insert(data))
            }
        }
    }

    /// Nearest earlier month with at least one non-empty day
    pub fn month_before(&mut self, month: MonthIndex) -> StoreResult<Option<&MonthData>> {
        match self.store.month_before(month)? {
            Some(prev) => self.get(prev).map(Some),
            None => Ok(None),
        }
    }

    /// Nearest later month with at least one non-empty day
    pub fn month_after(&mut self, month: MonthIndex) -> StoreResult<Option<&MonthData>> {
        match self.store.month_after(month)? {
            Some(next) => self.get(next).map(Some),
            None => Ok(None),
        }
    }

    /// Apply `f` to a month and commit it
    ///
    /// Trend weights are re-derived from this month forward, seeded by the
    /// latest earlier measurement, until a measured month comes out
    /// unchanged. Every month whose records changed is saved in one
    /// transaction. In-memory state is replaced only after the commit.
    pub fn mutate<F>(&mut self, month: MonthIndex, f: F) -> StoreResult<()>
    where
        F: FnOnce(&mut MonthData),
    {
        let mut working = self.get(month)?.clone();
        f(&mut working);

        let seed = self.store.trend_before(month)?;
        let mut trend = working.apply_trend(seed);
        let mut changed = vec![working];

        // months without measurements pass the trend through unchanged
        let mut cursor = month;
        while let Some(next) = self.store.month_after(cursor)? {
            cursor = next;
            let mut data = self.get(next)?.clone();
            trend = data.apply_trend(trend);
            if &data != self.get(next)? {
                changed.push(data);
            } else if data.measured_count() > 0 {
                break;
            }
        }

        match self.store.save_months(changed.iter()) {
            Ok(version) => {
                debug!(
                    month = %month,
                    propagated = changed.len() - 1,
                    version,
                    "Committed mutation"
                );
                for data in changed {
                    self.months.insert(data.month(), data);
                }
                Ok(())
            }
            Err(e) => {
                warn!(month = %month, error = %e, "Mutation rolled back");
                Err(e)
            }
        }
    }

    /// Apply `f` to a single day and commit it
    pub fn update_day<F>(&mut self, key: MonthDayKey, f: F) -> StoreResult<()>
    where
        F: FnOnce(&mut DayRecord),
    {
        if MonthDayKey::new(key.month, key.day).is_none() {
            return Err(StoreError::InvalidDay {
                month: key.month.to_string(),
                day: key.day,
            });
        }

        self.mutate(key.month, |data| {
            if let Some(record) = data.day_mut(key.day) {
                f(record);
            }
        })
    }

    /// Change the unit label of stored weights
    pub fn set_weight_unit(&mut self, unit: WeightUnit) -> StoreResult<()> {
        self.store.set_weight_unit(unit)
    }

    /// Drop every cached month without touching the store
    pub fn flush(&mut self) {
        let dropped = self.months.len();
        self.months.clear();
        debug!(dropped, "Flushed month cache");
    }

    /// Delete every stored day, then flush
    pub fn delete_all(&mut self) -> StoreResult<()> {
        self.store.delete_all()?;
        self.flush();
        Ok(())
    }
}
