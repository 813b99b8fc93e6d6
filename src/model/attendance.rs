use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::model::holiday::HolidayType;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AttendanceStatus {
    Normal,
    Late,
    EarlyLeave,
    Makeup,
    Absent,
    OnLeave,
    OutsideWork,
    Abnormal,
}

/// Something the classifier noticed about a day, kept next to the status so
/// a reviewer can see why a day ended up where it did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    /// No policy covers the day.
    Unconfigured,
    /// Several active assignments covered the day; `chosen_assignment` won.
    PolicyConflict { chosen_assignment: u64 },
    LateArrival { minutes: u32 },
    EarlyDeparture { minutes: u32 },
    MissingClockIn,
    MissingClockOut,
    ClockOutBeforeClockIn,
    /// Holiday data could not be loaded; the day was treated as a workday.
    HolidayDataDegraded,
    /// Worked less than the policy minimum.
    ShortDay { minutes: u32 },
}

/// Derived per-day result. Fully determined by its inputs, so it carries no
/// wall-clock stamps: recomputing with unchanged inputs gives an equal value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyAttendanceRecord {
    pub employee_id: u64,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub worked_minutes: u32,
    pub first_clock_in: Option<NaiveDateTime>,
    pub last_clock_out: Option<NaiveDateTime>,
    pub policy_id_used: Option<u64>,
    pub holiday_type: Option<HolidayType>,
    pub anomalies: Vec<Anomaly>,
}

impl DailyAttendanceRecord {
    pub fn is_rest_day(&self) -> bool {
        self.holiday_type.is_some_and(HolidayType::is_rest_day)
    }

    pub fn has_anomaly(&self, anomaly: &Anomaly) -> bool {
        self.anomalies.contains(anomaly)
    }
}
