//! Offline-first sync engine for appointment-tagged audio recordings.
//!
//! Recordings and status events are written to device-local SQLite stores
//! first and reconciled with the remote service when connectivity allows.

pub mod auth;
pub mod capture;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod dispatch;
pub mod model;
pub mod recorder;
pub mod remote;
pub mod sync;
pub mod upload;
pub mod view;
