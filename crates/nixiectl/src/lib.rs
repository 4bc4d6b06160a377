//! Nixie Control - CLI front-end library.
//!
//! The binary stays thin: argument parsing in `main.rs`, rendering here.
//! Everything with behavior lives in `nixie_common`.

pub mod output;
