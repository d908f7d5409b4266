//! CodePrep API Library Crate
//!
//! This library contains all the core logic for the CodePrep web service,
//! including the application state, database access, session authentication,
//! API handlers, the streaming assistant relay, contest sync and routing.
//! The `api` binary is a thin wrapper around this library.

pub mod auth;
pub mod config;
pub mod contests;
pub mod db;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod ws;
