//! Holiday lookups over a per-year snapshot cache.
//!
//! Each cached value is an immutable [`HolidaySnapshot`] behind an `Arc`.
//! A refresh builds a complete new snapshot and inserts it in one step, so a
//! reader holds either the previous year view or the new one.
//!
//! Snapshots are stamped with the epoch at which their load started. A lazy
//! load that began before a refresh may still land in the cache after it;
//! readers discard any snapshot older than the year's last refresh.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use moka::future::Cache;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::model::holiday::{HolidayEntry, HolidayType};
use crate::store::{HolidayStore, StoreError};

/// Result of a single-day lookup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HolidayLookup {
    pub holiday_type: Option<HolidayType>,
    /// Holiday data was unavailable and the day was assumed to be a workday.
    pub degraded: bool,
}

impl HolidayLookup {
    pub fn workday() -> Self {
        Self::default()
    }

    pub fn of(holiday_type: HolidayType) -> Self {
        Self {
            holiday_type: Some(holiday_type),
            degraded: false,
        }
    }

    pub fn is_holiday(&self) -> bool {
        self.holiday_type.is_some()
    }

    pub fn is_rest_day(&self) -> bool {
        self.holiday_type.is_some_and(HolidayType::is_rest_day)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HolidayCount {
    /// Days off (statutory, company, other).
    pub rest_days: u32,
    pub special_workdays: u32,
}

/// All active holidays of one year, keyed by date.
#[derive(Debug, Default)]
pub struct HolidaySnapshot {
    year: i32,
    epoch: u64,
    by_date: BTreeMap<NaiveDate, HolidayEntry>,
}

impl HolidaySnapshot {
    pub fn build(year: i32, entries: Vec<HolidayEntry>) -> Self {
        let mut by_date = BTreeMap::new();
        for entry in entries {
            if !entry.is_active() || entry.year() != year {
                continue;
            }
            if let Some(previous) = by_date.insert(entry.date(), entry) {
                warn!(
                    date = %previous.date(),
                    "Duplicate active holiday entries for one date, keeping the later row"
                );
            }
        }
        Self {
            year,
            epoch: 0,
            by_date,
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn len(&self) -> usize {
        self.by_date.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_date.is_empty()
    }

    pub fn lookup(&self, date: NaiveDate) -> Option<&HolidayEntry> {
        self.by_date.get(&date)
    }

    pub fn in_month(&self, month: u32) -> Vec<HolidayEntry> {
        self.by_date
            .values()
            .filter(|entry| entry.month() == month)
            .cloned()
            .collect()
    }

    pub fn count(&self, month: u32) -> HolidayCount {
        self.by_date
            .values()
            .filter(|entry| entry.month() == month)
            .fold(HolidayCount::default(), |mut acc, entry| {
                if entry.holiday_type().is_rest_day() {
                    acc.rest_days += 1;
                } else {
                    acc.special_workdays += 1;
                }
                acc
            })
    }
}

pub struct HolidayCalendar {
    store: Arc<dyn HolidayStore>,
    cache: Cache<i32, Arc<HolidaySnapshot>>,
    epoch: AtomicU64,
    /// Epoch of the latest refresh per year.
    refreshed: Mutex<HashMap<i32, u64>>,
}

impl HolidayCalendar {
    pub fn new(store: Arc<dyn HolidayStore>, max_years: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_years)
            .time_to_live(ttl)
            .build();
        Self {
            store,
            cache,
            epoch: AtomicU64::new(0),
            refreshed: Mutex::new(HashMap::new()),
        }
    }

    async fn load(&self, year: i32, epoch: u64) -> Result<HolidaySnapshot, StoreError> {
        let entries = self.store.list_active_holidays(year).await?;
        Ok(HolidaySnapshot {
            epoch,
            ..HolidaySnapshot::build(year, entries)
        })
    }

    fn refreshed_epoch(&self, year: i32) -> u64 {
        self.refreshed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&year)
            .copied()
            .unwrap_or(0)
    }

    async fn cached(&self, year: i32) -> Result<Arc<HolidaySnapshot>, StoreError> {
        self.cache
            .try_get_with(year, async {
                debug!(year, "Holiday cache miss, loading year");
                let epoch = self.epoch.load(Ordering::SeqCst);
                self.load(year, epoch).await.map(Arc::new)
            })
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    /// Cached snapshot of a year; a miss loads it once even under concurrent callers.
    pub async fn snapshot(&self, year: i32) -> Result<Arc<HolidaySnapshot>, StoreError> {
        let snapshot = self.cached(year).await?;
        if snapshot.epoch >= self.refreshed_epoch(year) {
            return Ok(snapshot);
        }
        debug!(year, "Dropping holiday snapshot loaded before the last refresh");
        self.cache.invalidate(&year).await;
        self.cached(year).await
    }

    /// Reloads a year from the store and swaps the snapshot in.
    pub async fn refresh_cache(&self, year: i32) -> Result<Arc<HolidaySnapshot>, StoreError> {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.refreshed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(year, epoch);

        let snapshot = Arc::new(self.load(year, epoch).await?);
        self.cache.insert(year, snapshot.clone()).await;
        info!(year, holidays = snapshot.len(), "Holiday cache refreshed");
        Ok(snapshot)
    }

    /// Writes one entry through to the store and reloads its year.
    pub async fn upsert_holiday(&self, entry: HolidayEntry) -> Result<(), StoreError> {
        let year = entry.year();
        self.store.upsert_holiday(&entry).await?;
        self.refresh_cache(year).await?;
        Ok(())
    }

    pub async fn invalidate(&self, year: i32) {
        self.cache.invalidate(&year).await;
    }

    /// Years currently held in the cache, ascending.
    pub fn cached_years(&self) -> Vec<i32> {
        let mut years: Vec<i32> = self.cache.iter().map(|(year, _)| *year).collect();
        years.sort_unstable();
        years
    }

    /// Holiday status of a day. Never fails: when the store is down the day
    /// counts as a workday and the lookup is flagged as degraded.
    pub async fn is_holiday(&self, date: NaiveDate) -> HolidayLookup {
        match self.snapshot(date.year()).await {
            Ok(snapshot) => snapshot
                .lookup(date)
                .map(|entry| HolidayLookup::of(entry.holiday_type()))
                .unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, %date, "Holiday data unavailable, treating day as workday");
                HolidayLookup {
                    holiday_type: None,
                    degraded: true,
                }
            }
        }
    }

    /// Active holidays of a month, ordered by date.
    pub async fn holidays_in_month(
        &self,
        year: i32,
        month: u32,
    ) -> Result<Vec<HolidayEntry>, StoreError> {
        Ok(self.snapshot(year).await?.in_month(month))
    }

    pub async fn count_holidays(&self, year: i32, month: u32) -> Result<HolidayCount, StoreError> {
        Ok(self.snapshot(year).await?.count(month))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{Fault, MemoryStore};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// Reads the first listing right away but returns it only once released.
    struct GatedHolidays {
        inner: Arc<MemoryStore>,
        calls: AtomicUsize,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl HolidayStore for GatedHolidays {
        async fn list_active_holidays(&self, year: i32) -> Result<Vec<HolidayEntry>, StoreError> {
            let rows = self.inner.list_active_holidays(year).await;
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                self.entered.notify_one();
                self.release.notified().await;
            }
            rows
        }

        async fn upsert_holiday(&self, entry: &HolidayEntry) -> Result<(), StoreError> {
            self.inner.upsert_holiday(entry).await
        }
    }

    struct UnreadableHolidays;

    #[async_trait]
    impl HolidayStore for UnreadableHolidays {
        async fn list_active_holidays(&self, _year: i32) -> Result<Vec<HolidayEntry>, StoreError> {
            Err(StoreError::Decode {
                entity: "holiday",
                reason: "unknown value \"weekend\"".to_string(),
            })
        }

        async fn upsert_holiday(&self, _entry: &HolidayEntry) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn calendar(store: Arc<MemoryStore>) -> HolidayCalendar {
        HolidayCalendar::new(store, 8, Duration::from_secs(3600))
    }

    fn seeded() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.add_holiday(HolidayEntry::new(d(2024, 10, 1), HolidayType::Statutory, None));
        store.add_holiday(HolidayEntry::new(d(2024, 10, 2), HolidayType::Statutory, None));
        store.add_holiday(HolidayEntry::new(d(2024, 10, 12), HolidayType::SpecialWorkday, None));
        store.add_holiday(HolidayEntry::new(d(2024, 10, 20), HolidayType::Company, None));
        store.add_holiday(HolidayEntry::new(d(2024, 11, 1), HolidayType::Other, None));
        store
    }

    #[tokio::test]
    async fn test_lookup_and_lazy_load() {
        let store = seeded();
        let cal = calendar(store.clone());

        assert_eq!(store.holiday_loads(), 0);
        let lookup = cal.is_holiday(d(2024, 10, 1)).await;
        assert!(lookup.is_holiday());
        assert!(lookup.is_rest_day());
        assert_eq!(lookup.holiday_type, Some(HolidayType::Statutory));

        let lookup = cal.is_holiday(d(2024, 10, 3)).await;
        assert!(!lookup.is_holiday());
        assert!(!lookup.degraded);

        // Both lookups were served by one load of the year.
        assert_eq!(store.holiday_loads(), 1);
    }

    #[tokio::test]
    async fn test_special_workday_is_not_a_rest_day() {
        let cal = calendar(seeded());
        let lookup = cal.is_holiday(d(2024, 10, 12)).await;
        assert!(lookup.is_holiday());
        assert!(!lookup.is_rest_day());
    }

    #[tokio::test]
    async fn test_month_listing_and_count() {
        let cal = calendar(seeded());

        let october = cal.holidays_in_month(2024, 10).await.unwrap();
        let dates: Vec<_> = october.iter().map(HolidayEntry::date).collect();
        assert_eq!(
            dates,
            vec![d(2024, 10, 1), d(2024, 10, 2), d(2024, 10, 12), d(2024, 10, 20)]
        );

        let count = cal.count_holidays(2024, 10).await.unwrap();
        assert_eq!(
            count,
            HolidayCount {
                rest_days: 3,
                special_workdays: 1
            }
        );
        assert_eq!(cal.count_holidays(2024, 3).await.unwrap(), HolidayCount::default());
    }

    #[tokio::test]
    async fn test_refresh_replaces_snapshot() {
        let store = seeded();
        let cal = calendar(store.clone());

        let before = cal.snapshot(2024).await.unwrap();
        assert!(before.lookup(d(2024, 12, 25)).is_none());

        store.add_holiday(HolidayEntry::new(d(2024, 12, 25), HolidayType::Company, None));
        // Still the cached view until a refresh.
        assert!(!cal.is_holiday(d(2024, 12, 25)).await.is_holiday());

        cal.refresh_cache(2024).await.unwrap();
        assert!(cal.is_holiday(d(2024, 12, 25)).await.is_holiday());
        // A reader holding the old snapshot keeps a consistent view.
        assert!(before.lookup(d(2024, 12, 25)).is_none());
        assert_eq!(before.len(), 5);
        assert_eq!(cal.cached_years(), vec![2024]);

        assert_eq!(store.holiday_loads(), 2);
        cal.invalidate(2024).await;
        assert!(cal.is_holiday(d(2024, 12, 25)).await.is_holiday());
        assert_eq!(store.holiday_loads(), 3);
    }

    #[tokio::test]
    async fn test_upsert_replaces_active_entry() {
        let store = seeded();
        let cal = calendar(store.clone());
        assert!(cal.is_holiday(d(2024, 10, 12)).await.is_holiday());

        cal.upsert_holiday(HolidayEntry::new(d(2024, 10, 12), HolidayType::Company, None))
            .await
            .unwrap();
        let lookup = cal.is_holiday(d(2024, 10, 12)).await;
        assert_eq!(lookup.holiday_type, Some(HolidayType::Company));
        assert_eq!(cal.snapshot(2024).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_store_outage_degrades_to_workday() {
        let store = seeded();
        store.set_fault(Fault::Holidays, true);
        let cal = calendar(store.clone());

        let lookup = cal.is_holiday(d(2024, 10, 1)).await;
        assert!(!lookup.is_holiday());
        assert!(lookup.degraded);
        assert!(cal.count_holidays(2024, 10).await.is_err());

        // Recovers once the store is back; failures are not cached.
        store.set_fault(Fault::Holidays, false);
        assert!(cal.is_holiday(d(2024, 10, 1)).await.is_holiday());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_refresh_wins_over_slower_lazy_load() {
        let store = seeded();
        let gated = Arc::new(GatedHolidays {
            inner: store.clone(),
            calls: AtomicUsize::new(0),
            entered: Notify::new(),
            release: Notify::new(),
        });
        let cal = Arc::new(HolidayCalendar::new(gated.clone(), 8, Duration::from_secs(3600)));

        let lazy = {
            let cal = cal.clone();
            tokio::spawn(async move { cal.snapshot(2024).await.unwrap() })
        };
        gated.entered.notified().await;

        store.add_holiday(HolidayEntry::new(d(2024, 12, 25), HolidayType::Company, None));
        let refresh = {
            let cal = cal.clone();
            tokio::spawn(async move { cal.refresh_cache(2024).await.unwrap() })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        gated.release.notify_one();
        let stale = lazy.await.unwrap();
        let fresh = refresh.await.unwrap();
        assert!(stale.lookup(d(2024, 12, 25)).is_none());
        assert!(fresh.lookup(d(2024, 12, 25)).is_some());

        // Whichever insert landed last, readers see the refreshed data.
        assert!(cal.is_holiday(d(2024, 12, 25)).await.is_holiday());
        assert!(cal.snapshot(2024).await.unwrap().lookup(d(2024, 12, 25)).is_some());
    }

    #[tokio::test]
    async fn test_unreadable_holiday_data_degrades() {
        let cal = HolidayCalendar::new(Arc::new(UnreadableHolidays), 8, Duration::from_secs(3600));
        let lookup = cal.is_holiday(d(2024, 10, 1)).await;
        assert!(lookup.degraded);
        assert!(!lookup.is_holiday());
        assert!(cal.holidays_in_month(2024, 10).await.is_err());
    }

    #[test]
    fn test_snapshot_drops_inactive_and_foreign_rows() {
        let rows = vec![
            HolidayEntry::new(d(2024, 1, 1), HolidayType::Statutory, None),
            HolidayEntry::new(d(2024, 1, 2), HolidayType::Company, None).retired(),
            HolidayEntry::new(d(2025, 1, 1), HolidayType::Statutory, None),
        ];
        let snapshot = HolidaySnapshot::build(2024, rows);
        assert_eq!(snapshot.year(), 2024);
        assert_eq!(snapshot.len(), 1);
        assert!(!snapshot.is_empty());
    }
}
