// Common library for the URL change trigger: schedules, policy, detection and scheduling

pub mod config;
pub mod detector;
pub mod errors;
pub mod models;
pub mod policy;
pub mod schedule;
pub mod scheduler;
pub mod storage;
pub mod telemetry;
