pub mod aggregator;
pub mod classifier;
pub mod holiday_calendar;
pub mod resolver;
