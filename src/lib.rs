//! Bilingual tutor chat API - Library exports for testing
//!

pub mod api;
pub mod config;
pub mod core;
pub mod error;
pub mod infrastructure;
