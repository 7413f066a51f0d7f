//! Tuneserve: async job core for adjusting, loading and querying a model.

pub mod api;
pub mod backend;
pub mod config;
pub mod error;
pub mod jobs;
pub mod prompt;
pub mod resource;
pub mod service;
