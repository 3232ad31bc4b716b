//! Recurring tasks, overdue detection and goal tracking over JSON files shared
//! by a to-do app and a habit tracker.
//!
//! [`tracker::Tracker`] is the entry point: every task listing first fills in
//! the instances recurring chains are owed up to today, then marks tasks more
//! than a day past due as missed.

pub mod clock;
pub mod commands;
pub mod config;
pub mod error;
pub mod goals;
pub mod models;
pub mod recurrence;
pub mod storage;
pub mod tracker;
