pub mod attendance;
pub mod clock_event;
pub mod holiday;
pub mod leave_request;
pub mod policy;
pub mod summary;
