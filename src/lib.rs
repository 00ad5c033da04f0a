pub mod api;
pub mod auth;
pub mod charger;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod pricing;
pub mod telemetry;
pub mod upstream;
