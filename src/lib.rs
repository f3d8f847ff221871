//! Polls a public bookings API and sends one Pushover notification per new
//! booking, remembering the highest notified id between runs.
//!
//! - `booking_api`: fetches recent bookings.
//! - `selector`: decides which of them are new.
//! - `pushover` / `message`: renders and delivers notifications.
//! - `cursor` / `db`: persists the high-water mark.
//! - `runner`: ties one run together.
//! - `logging`: tracing setup shared by the binaries.

pub mod booking_api;
pub mod config;
pub mod cursor;
pub mod db;
pub mod logging;
pub mod message;
pub mod model;
pub mod pushover;
pub mod runner;
pub mod selector;
