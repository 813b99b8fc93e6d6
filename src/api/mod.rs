pub mod assignment;
pub mod attendance;
pub mod holiday;
pub mod jobs;
