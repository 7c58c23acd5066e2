#![cfg_attr(not(test), forbid(unsafe_code))]
#![warn(clippy::pedantic)]
#![allow(clippy::multiple_crate_versions)] // TODO(deps-001): remove once transitive dependencies converge.

//! Models, wire protocol and configuration shared by the Bazaar Chat client
//! crates.

pub mod config;
pub mod models;
