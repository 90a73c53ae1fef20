//! Request handlers organized by audience.

pub mod admin;
pub mod caches;
pub mod health;
