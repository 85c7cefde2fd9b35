//! termrelay server library: HTTP routes, the terminal WebSocket and
//! application state. Separated from main.rs for integration testing.

pub mod auth;
pub mod config;
pub mod error;
pub mod logging;
pub mod routes;
pub mod state;
pub mod websocket;
