//! Attendance computation for the HRM service: work-time policy resolution,
//! holiday calendar, daily classification, monthly summaries and the jobs
//! that keep them current.

pub mod api;
pub mod config;
pub mod db;
pub mod docs;
pub mod engine;
pub mod error;
pub mod model;
pub mod routes;
pub mod scheduler;
pub mod store;
