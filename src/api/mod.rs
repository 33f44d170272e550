//! HTTP API Module
//!
//! Provides a JSON REST API for peer management and server settings.

mod http;

pub use http::{AppState, ErrorResponse, HttpServer, PeerResponse};
