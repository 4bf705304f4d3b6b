//! `talon-core` — configuration layer shared by every talon crate.
//!
//! Holds the `.env` file loader and the typed [`config::Config`] built from
//! it. Nothing here touches the network or the database.

pub mod config;
pub mod env;

pub use config::Config;
