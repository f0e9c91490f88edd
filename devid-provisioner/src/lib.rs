pub mod allowlist;
pub mod config;
pub mod error;
pub mod http;
pub mod issuance;
pub mod session;
pub mod spire_notify;
