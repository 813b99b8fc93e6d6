use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use strum::{AsRefStr, Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, serde::Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HolidayType {
    Statutory,
    Company,
    SpecialWorkday,
    Other,
}

impl HolidayType {
    /// Whether the calendar day is a day off. A special workday is a
    /// holiday-table entry that turns a weekend into a normal workday.
    pub fn is_rest_day(self) -> bool {
        !matches!(self, HolidayType::SpecialWorkday)
    }
}

/// One row of the holiday calendar.
///
/// `year`, `month` and `day` are always derived from `date`; the only way to
/// build an entry is [`HolidayEntry::new`], so they cannot drift apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HolidayEntry {
    date: NaiveDate,
    holiday_type: HolidayType,
    year: i32,
    month: u32,
    day: u32,
    active: bool,
    name: Option<String>,
}

impl HolidayEntry {
    pub fn new(date: NaiveDate, holiday_type: HolidayType, name: Option<String>) -> Self {
        Self {
            date,
            holiday_type,
            year: date.year(),
            month: date.month(),
            day: date.day(),
            active: true,
            name,
        }
    }

    pub fn retired(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn holiday_type(&self) -> HolidayType {
        self.holiday_type
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn day(&self) -> u32 {
        self.day
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}
