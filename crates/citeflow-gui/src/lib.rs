//! Web front end for citeflow: a query page, a JSON API over research runs,
//! report downloads and server-sent completion events.

pub mod config;
pub mod error;
pub mod metrics;
pub mod routes;
pub mod state;
pub mod telemetry;
