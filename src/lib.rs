//! Outfit suggestion service.
//!
//! Users upload clothing photos tagged top, bottom, shoes or accessory. The
//! service draws random outfits from a user's items, skips combinations the
//! user disliked, and records likes and dislikes. The whole store plus the
//! upload tree can be backed up to a zip archive and restored from one.
//!
//! # Layout
//! - [`storage`]: JSON-file store of users, items and preference records
//! - [`sampler`]: random suggestion with dislike avoidance
//! - [`archive`]: backup and union-merge restore
//! - [`routes`]: the HTTP API served by the `server` binary

pub mod archive;
pub mod auth;
pub mod config;
pub mod errors;
pub mod models;
pub mod password;
pub mod routes;
pub mod sampler;
pub mod state;
pub mod storage;
pub mod uploads;
pub mod user_models;
