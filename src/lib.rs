pub mod config;
pub mod error;
pub mod flatten;
pub mod http_client;
pub mod identity;
pub mod logging;
pub mod manifest;
pub mod match_fetch;
pub mod match_ids;
pub mod rate_limit;
pub mod riot_api;
pub mod staging;
pub mod warehouse;
