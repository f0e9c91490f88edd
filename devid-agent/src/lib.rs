//! Shared pieces used by the agent binary and the standalone NVRAM blob
//! utilities (`blob-store`, `blob-retrieve`, `blob-clear`), which are
//! separate binaries so they can run without the rest of the agent's
//! dependencies (no HTTP client, no SPIRE socket) on a node that only
//! needs to move bytes in and out of NVRAM.

pub mod blob_config;
