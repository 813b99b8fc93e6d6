use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ClockKind {
    ClockIn,
    ClockOut,
}

/// Where a punch came from. `Makeup` is an approved after-the-fact punch,
/// `OutsideWork` a field-work check-in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ClockSource {
    Device,
    Mobile,
    Makeup,
    OutsideWork,
}

/// Raw punch. Append-only; the engine never rewrites these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockEvent {
    pub employee_id: u64,
    /// Local time of the employee's policy.
    pub timestamp: NaiveDateTime,
    pub kind: ClockKind,
    pub source: ClockSource,
}
