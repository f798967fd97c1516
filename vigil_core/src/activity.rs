//! Activity aggregation for the monthly calendar heat-map.
//!
//! Event records are bucketed by the local calendar day of `created_at`.
//! The index is updated incrementally, so a freshly logged record can be
//! added without rescanning the store, and any month can be viewed from it.

use crate::{DocumentStore, Error, EventKind, EventRecord, Identity, Result};
use chrono::{Datelike, Months, NaiveDate, TimeZone, Utc};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Red-channel increment per sin
pub const INTENSITY_STEP: u32 = 40;

/// Red-channel ceiling
pub const INTENSITY_MAX: u32 = 255;

/// Display intensity for a day: `min(sin_count * 40, 255)`
pub fn sin_intensity(sin_count: u32) -> u8 {
    let value = sin_count.saturating_mul(INTENSITY_STEP).min(INTENSITY_MAX);
    u8::try_from(value).unwrap_or(u8::MAX)
}

/// An RGB display color
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rgb({}, {}, {})", self.r, self.g, self.b)
    }
}

// ============================================================================
// Month
// ============================================================================

/// A calendar month, stored as its first day
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Month(NaiveDate);

impl Month {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        NaiveDate::from_ymd_opt(year, month, 1)
            .map(Month)
            .ok_or_else(|| Error::InvalidInput(format!("no such month {}-{:02}", year, month)))
    }

    /// The month containing `date`
    pub fn of(date: NaiveDate) -> Self {
        Month(date.with_day(1).unwrap_or(date))
    }

    /// The current month in the given time zone
    pub fn current<Tz: TimeZone>(tz: &Tz) -> Self {
        Self::of(Utc::now().with_timezone(tz).date_naive())
    }

    pub fn year(self) -> i32 {
        self.0.year()
    }

    pub fn month(self) -> u32 {
        self.0.month()
    }

    pub fn first_day(self) -> NaiveDate {
        self.0
    }

    pub fn last_day(self) -> NaiveDate {
        self.days().last().unwrap_or(self.0)
    }

    /// Every day from the 1st to the last day, inclusive
    pub fn days(self) -> impl Iterator<Item = NaiveDate> {
        let month = self.0.month();
        self.0.iter_days().take_while(move |d| d.month() == month)
    }

    pub fn len_days(self) -> u32 {
        self.last_day().day()
    }

    pub fn contains(self, date: NaiveDate) -> bool {
        date.year() == self.year() && date.month() == self.month()
    }

    /// Following month; saturates at the end of the representable range
    pub fn next(self) -> Self {
        self.forward(1)
    }

    /// Preceding month; saturates at the start of the representable range
    pub fn prev(self) -> Self {
        self.back(1)
    }

    /// Move `n` months ahead, stopping at the last representable month
    pub fn forward(self, n: u32) -> Self {
        self.0
            .checked_add_months(Months::new(n))
            .map(Month)
            .unwrap_or_else(|| Month::of(NaiveDate::MAX))
    }

    /// Move `n` months back, stopping at the first representable month
    pub fn back(self, n: u32) -> Self {
        self.0
            .checked_sub_months(Months::new(n))
            .map(Month)
            .unwrap_or_else(|| Month::of(NaiveDate::MIN))
    }

    /// Move by `delta` months (negative goes back)
    pub fn offset(self, delta: i32) -> Self {
        if delta < 0 {
            self.back(delta.unsigned_abs())
        } else {
            self.forward(delta.unsigned_abs())
        }
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year(), self.month())
    }
}

impl FromStr for Month {
    type Err = Error;

    /// Parse `YYYY-MM`
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidInput(format!("expected YYYY-MM, got {:?}", s));
        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        Month::new(year, month)
    }
}

// ============================================================================
// Day Buckets
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct DayCounts {
    sins: u32,
    prayers: u32,
}

/// Per-day counts for one calendar cell
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DayBucket {
    pub date: NaiveDate,
    pub sin_count: u32,
    pub prayer_count: u32,
}

impl DayBucket {
    pub fn intensity(&self) -> u8 {
        sin_intensity(self.sin_count)
    }

    pub fn color(&self) -> Rgb {
        Rgb {
            r: self.intensity(),
            g: 0,
            b: 0,
        }
    }

    pub fn count(&self, kind: EventKind) -> u32 {
        match kind {
            EventKind::Sin => self.sin_count,
            EventKind::Prayer => self.prayer_count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sin_count == 0 && self.prayer_count == 0
    }
}

/// One month of day buckets, 1st through last day
#[derive(Clone, Debug, PartialEq)]
pub struct MonthView {
    pub month: Month,
    pub days: Vec<DayBucket>,
}

impl MonthView {
    pub fn day(&self, date: NaiveDate) -> Option<&DayBucket> {
        if !self.month.contains(date) {
            return None;
        }
        self.days.get(date.day0() as usize)
    }

    pub fn total(&self, kind: EventKind) -> u32 {
        self.days.iter().map(|d| d.count(kind)).sum()
    }

    /// Days with at least one sin or prayer
    pub fn active_days(&self) -> usize {
        self.days.iter().filter(|d| !d.is_empty()).count()
    }

    /// Blank cells before the 1st in a Sunday-first week grid
    pub fn leading_blanks(&self) -> u32 {
        self.month.first_day().weekday().num_days_from_sunday()
    }
}

// ============================================================================
// Activity Index
// ============================================================================

/// Incrementally maintained day → counts map in a fixed time zone
#[derive(Clone, Debug)]
pub struct ActivityIndex<Tz: TimeZone> {
    tz: Tz,
    days: BTreeMap<NaiveDate, DayCounts>,
    seen: HashSet<Uuid>,
    skipped: usize,
}

impl<Tz: TimeZone> ActivityIndex<Tz> {
    pub fn new(tz: Tz) -> Self {
        Self {
            tz,
            days: BTreeMap::new(),
            seen: HashSet::new(),
            skipped: 0,
        }
    }

    pub fn from_records<'a, I>(tz: Tz, records: I) -> Self
    where
        I: IntoIterator<Item = &'a EventRecord>,
    {
        let mut index = Self::new(tz);
        index.extend(records);
        index
    }

    pub fn time_zone(&self) -> &Tz {
        &self.tz
    }

    /// Count one record. Returns `false` if it has no timestamp or was
    /// already counted.
    pub fn record(&mut self, record: &EventRecord) -> bool {
        let Some(created_at) = record.created_at else {
            self.skipped += 1;
            return false;
        };
        if !self.seen.insert(record.id) {
            return false;
        }

        let day = created_at.with_timezone(&self.tz).date_naive();
        let counts = self.days.entry(day).or_default();
        match record.kind {
            EventKind::Sin => counts.sins += 1,
            EventKind::Prayer => counts.prayers += 1,
        }
        true
    }

    /// Count many records, returning how many were added
    pub fn extend<'a, I>(&mut self, records: I) -> usize
    where
        I: IntoIterator<Item = &'a EventRecord>,
    {
        records.into_iter().filter(|r| self.record(r)).count()
    }

    /// Records ignored for lack of a usable timestamp
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn total(&self, kind: EventKind) -> u32 {
        self.days
            .values()
            .map(|c| match kind {
                EventKind::Sin => c.sins,
                EventKind::Prayer => c.prayers,
            })
            .sum()
    }

    pub fn clear(&mut self) {
        self.days.clear();
        self.seen.clear();
        self.skipped = 0;
    }

    /// Buckets for every day of `month`, zero-filled
    pub fn month_view(&self, month: Month) -> MonthView {
        let mut days: Vec<DayBucket> = month
            .days()
            .map(|date| DayBucket {
                date,
                sin_count: 0,
                prayer_count: 0,
            })
            .collect();

        for (date, counts) in self.days.range(month.first_day()..=month.last_day()) {
            if let Some(bucket) = days.get_mut(date.day0() as usize) {
                bucket.sin_count = counts.sins;
                bucket.prayer_count = counts.prayers;
            }
        }

        MonthView { month, days }
    }
}

// ============================================================================
// Calendar
// ============================================================================

/// Load status of the calendar
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CalendarState {
    Loading,
    Ready,
    Failed(String),
}

/// Month-paged calendar over a user's sins and prayers
pub struct ActivityCalendar<Tz: TimeZone> {
    index: ActivityIndex<Tz>,
    month: Month,
    state: CalendarState,
}

impl<Tz: TimeZone> ActivityCalendar<Tz> {
    pub fn new(tz: Tz, month: Month) -> Self {
        Self {
            index: ActivityIndex::new(tz),
            month,
            state: CalendarState::Loading,
        }
    }

    /// Fetch both collections and rebuild the index.
    ///
    /// On failure the index is emptied and the calendar moves to `Failed`;
    /// nothing from an earlier load remains visible.
    pub fn load<S: DocumentStore + ?Sized>(
        &mut self,
        store: &S,
        user: Option<&Identity>,
    ) -> Result<()> {
        self.state = CalendarState::Loading;

        let result = match user {
            None => Err(Error::AuthRequired("view your calendar".into())),
            Some(user) => store.list_events(&user.uid, EventKind::Sin).and_then(|sins| {
                let prayers = store.list_events(&user.uid, EventKind::Prayer)?;
                Ok((sins, prayers))
            }),
        };

        match result {
            Ok((sins, prayers)) => {
                let mut index = ActivityIndex::new(self.index.time_zone().clone());
                index.extend(sins.iter().chain(prayers.iter()));
                if index.skipped() > 0 {
                    tracing::warn!(
                        "Skipped {} records without a usable timestamp",
                        index.skipped()
                    );
                }
                tracing::info!(
                    "Calendar loaded: {} sins, {} prayers",
                    index.total(EventKind::Sin),
                    index.total(EventKind::Prayer)
                );
                self.index = index;
                self.state = CalendarState::Ready;
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to load calendar: {}", e);
                self.index.clear();
                self.state = CalendarState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    pub fn state(&self) -> &CalendarState {
        &self.state
    }

    /// The displayed month, only when the last load succeeded
    pub fn view(&self) -> Option<MonthView> {
        match self.state {
            CalendarState::Ready => Some(self.index.month_view(self.month)),
            _ => None,
        }
    }

    /// Add a newly logged record without reloading
    pub fn record(&mut self, record: &EventRecord) -> bool {
        if self.state != CalendarState::Ready {
            return false;
        }
        self.index.record(record)
    }

    pub fn month(&self) -> Month {
        self.month
    }

    pub fn set_month(&mut self, month: Month) {
        self.month = month;
    }

    pub fn next_month(&mut self) -> Month {
        self.month = self.month.next();
        self.month
    }

    pub fn prev_month(&mut self) -> Month {
        self.month = self.month.prev();
        self.month
    }

    pub fn index(&self) -> &ActivityIndex<Tz> {
        &self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EventDraft, MemoryStore, SavedVerse, VerseDraft};
    use chrono::{DateTime, FixedOffset};

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn event(kind: EventKind, created_at: Option<DateTime<Utc>>) -> EventRecord {
        EventRecord {
            id: Uuid::new_v4(),
            user_id: "u1".into(),
            kind,
            title: None,
            description: "test".into(),
            created_at,
        }
    }

    fn march_2024() -> Month {
        Month::new(2024, 3).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_day_bucket_scenario() {
        let records = vec![
            event(EventKind::Sin, Some(at(2024, 3, 3, 9))),
            event(EventKind::Sin, Some(at(2024, 3, 3, 18))),
            event(EventKind::Prayer, Some(at(2024, 3, 5, 7))),
        ];
        let index = ActivityIndex::from_records(Utc, &records);
        let view = index.month_view(march_2024());

        assert_eq!(view.days.len(), 31);
        let day3 = view.day(date(2024, 3, 3)).unwrap();
        assert_eq!((day3.sin_count, day3.prayer_count), (2, 0));
        assert_eq!(day3.color().to_string(), "rgb(80, 0, 0)");

        let day5 = view.day(date(2024, 3, 5)).unwrap();
        assert_eq!((day5.sin_count, day5.prayer_count), (0, 1));
        assert_eq!(day5.color().to_string(), "rgb(0, 0, 0)");

        assert_eq!(view.active_days(), 2);
    }

    #[test]
    fn test_intensity_saturates_at_seven() {
        assert_eq!(sin_intensity(0), 0);
        assert_eq!(sin_intensity(1), 40);
        assert_eq!(sin_intensity(6), 240);
        assert_eq!(sin_intensity(7), 255);
        assert_eq!(sin_intensity(100), 255);
        assert_eq!(sin_intensity(u32::MAX), 255);

        for n in 0..20 {
            assert!(sin_intensity(n) <= sin_intensity(n + 1));
        }
    }

    #[test]
    fn test_counts_only_records_inside_month() {
        let records = vec![
            event(EventKind::Sin, Some(at(2024, 2, 29, 12))),
            event(EventKind::Sin, Some(at(2024, 3, 1, 0))),
            event(EventKind::Sin, Some(at(2024, 3, 31, 23))),
            event(EventKind::Prayer, Some(at(2024, 3, 15, 8))),
            event(EventKind::Prayer, Some(at(2024, 4, 1, 0))),
            event(EventKind::Prayer, None),
        ];
        let index = ActivityIndex::from_records(Utc, &records);
        let view = index.month_view(march_2024());

        let in_month = |kind: EventKind| {
            records
                .iter()
                .filter(|r| r.kind == kind)
                .filter_map(|r| r.created_at)
                .filter(|t| march_2024().contains(t.date_naive()))
                .count() as u32
        };
        assert_eq!(view.total(EventKind::Sin), in_month(EventKind::Sin));
        assert_eq!(view.total(EventKind::Prayer), in_month(EventKind::Prayer));
        assert_eq!(view.total(EventKind::Sin), 2);
        assert_eq!(index.skipped(), 1);
    }

    #[test]
    fn test_buckets_use_local_day() {
        let plus_ten = FixedOffset::east_opt(10 * 3600).unwrap();
        let records = vec![event(EventKind::Sin, Some(at(2024, 3, 31, 20)))];

        let index = ActivityIndex::from_records(plus_ten, &records);
        assert_eq!(index.month_view(march_2024()).total(EventKind::Sin), 0);
        let april = index.month_view(Month::new(2024, 4).unwrap());
        assert_eq!(april.day(date(2024, 4, 1)).unwrap().sin_count, 1);
    }

    #[test]
    fn test_record_is_counted_once() {
        let record = event(EventKind::Sin, Some(at(2024, 3, 3, 9)));
        let mut index = ActivityIndex::new(Utc);
        assert!(index.record(&record));
        assert!(!index.record(&record));
        assert_eq!(index.total(EventKind::Sin), 1);
    }

    #[test]
    fn test_month_navigation_is_reversible() {
        for (y, m) in [(2024, 1), (2024, 3), (2023, 12), (2000, 2)] {
            let month = Month::new(y, m).unwrap();
            assert_eq!(month.prev().next(), month);
            assert_eq!(month.next().prev(), month);
        }
        assert_eq!(Month::new(2023, 12).unwrap().next(), Month::new(2024, 1).unwrap());
        assert_eq!(Month::new(2024, 1).unwrap().prev(), Month::new(2023, 12).unwrap());
        assert_eq!(march_2024().offset(-14), Month::new(2023, 1).unwrap());
        assert_eq!(march_2024().offset(0), march_2024());
        assert_eq!(march_2024().forward(10), Month::new(2025, 1).unwrap());
        assert_eq!(march_2024().back(3), Month::new(2023, 12).unwrap());
    }

    #[test]
    fn test_large_offsets_saturate() {
        let last = Month::of(NaiveDate::MAX);
        let first = Month::of(NaiveDate::MIN);
        assert_eq!(march_2024().offset(i32::MAX), last);
        assert_eq!(march_2024().offset(i32::MIN), first);
        assert_eq!(march_2024().forward(u32::MAX), last);
        assert_eq!(last.next(), last);
        assert_eq!(first.prev(), first);
    }

    #[test]
    fn test_month_lengths() {
        assert_eq!(Month::new(2024, 2).unwrap().len_days(), 29);
        assert_eq!(Month::new(2023, 2).unwrap().len_days(), 28);
        assert_eq!(Month::new(2024, 4).unwrap().len_days(), 30);
        assert_eq!(march_2024().last_day(), date(2024, 3, 31));
    }

    #[test]
    fn test_month_parse_and_display() {
        let month: Month = "2024-02".parse().unwrap();
        assert_eq!(month, Month::new(2024, 2).unwrap());
        assert_eq!(month.to_string(), "2024-02");
        assert!("2024-13".parse::<Month>().is_err());
        assert!("march".parse::<Month>().is_err());
        assert!(Month::new(2024, 0).is_err());
    }

    #[test]
    fn test_leading_blanks() {
        // 1 March 2024 was a Friday
        let view = ActivityIndex::new(Utc).month_view(march_2024());
        assert_eq!(view.leading_blanks(), 5);
    }

    /// Store that fails every read
    struct OfflineStore;

    impl DocumentStore for OfflineStore {
        fn append_event(&self, _: &str, _: &EventDraft) -> Result<EventRecord> {
            Err(Error::Fetch("offline".into()))
        }
        fn list_events(&self, _: &str, _: EventKind) -> Result<Vec<EventRecord>> {
            Err(Error::Fetch("offline".into()))
        }
        fn append_verse(&self, _: &str, _: &VerseDraft) -> Result<SavedVerse> {
            Err(Error::Fetch("offline".into()))
        }
        fn list_verses(&self, _: &str) -> Result<Vec<SavedVerse>> {
            Err(Error::Fetch("offline".into()))
        }
        fn delete_verse(&self, _: &str, _: Uuid) -> Result<bool> {
            Err(Error::Fetch("offline".into()))
        }
    }

    #[test]
    fn test_calendar_failure_hides_stale_data() {
        let store = MemoryStore::new();
        let user = Identity::new("u1");
        store.insert_event(event(EventKind::Sin, Some(at(2024, 3, 3, 9))));

        let mut calendar = ActivityCalendar::new(Utc, march_2024());
        assert_eq!(calendar.state(), &CalendarState::Loading);
        calendar.load(&store, Some(&user)).unwrap();
        assert_eq!(calendar.view().unwrap().total(EventKind::Sin), 1);

        let err = calendar.load(&OfflineStore, Some(&user)).unwrap_err();
        assert!(matches!(err, Error::Fetch(_)));
        assert!(matches!(calendar.state(), CalendarState::Failed(_)));
        assert!(calendar.view().is_none());
        assert_eq!(calendar.index().total(EventKind::Sin), 0);

        calendar.load(&store, Some(&user)).unwrap();
        assert_eq!(calendar.state(), &CalendarState::Ready);
    }

    #[test]
    fn test_calendar_requires_user() {
        let mut calendar = ActivityCalendar::new(Utc, march_2024());
        let err = calendar.load(&MemoryStore::new(), None).unwrap_err();
        assert!(matches!(err, Error::AuthRequired(_)));
        assert!(calendar.view().is_none());
    }

    #[test]
    fn test_navigation_does_not_touch_index() {
        let store = MemoryStore::new();
        let user = Identity::new("u1");
        store.insert_event(event(EventKind::Sin, Some(at(2024, 3, 3, 9))));
        store.insert_event(event(EventKind::Prayer, Some(at(2024, 4, 10, 9))));

        let mut calendar = ActivityCalendar::new(Utc, march_2024());
        calendar.load(&store, Some(&user)).unwrap();

        assert_eq!(calendar.next_month(), Month::new(2024, 4).unwrap());
        assert_eq!(calendar.view().unwrap().total(EventKind::Prayer), 1);
        assert_eq!(calendar.prev_month(), march_2024());
        assert_eq!(calendar.view().unwrap().total(EventKind::Sin), 1);
        assert_eq!(calendar.index().total(EventKind::Sin), 1);
        assert_eq!(calendar.index().total(EventKind::Prayer), 1);
    }

    #[test]
    fn test_incremental_record_matches_reload() {
        let store = MemoryStore::new();
        let user = Identity::new("u1");
        let mut calendar = ActivityCalendar::new(Utc, march_2024());
        calendar.load(&store, Some(&user)).unwrap();

        let draft = EventDraft {
            kind: EventKind::Prayer,
            title: None,
            description: "evening".into(),
            created_at: at(2024, 3, 9, 21),
        };
        let record = store.append_event("u1", &draft).unwrap();
        assert!(calendar.record(&record));
        let incremental = calendar.view().unwrap();

        calendar.load(&store, Some(&user)).unwrap();
        assert_eq!(calendar.view().unwrap(), incremental);
    }
}
