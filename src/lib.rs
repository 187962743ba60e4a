// src/lib.rs

//! Feedmaster achievement bot library.
//!
//! Polls the Feedmaster feed for newly earned achievements, renders a card
//! for the rare ones and publishes them to Bluesky and Discord under an
//! hourly post budget.

pub mod error;
pub mod models;
pub mod pipeline;
pub mod publishers;
pub mod render;
pub mod services;
pub mod storage;
pub mod utils;
