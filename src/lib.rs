//! Nutrilog remote store server, shared by the `nutrilog-server` and
//! `nutrilog-admin` binaries.

pub mod server;
