//! The rule language: versioned configs, condition trees, templates.

pub mod condition;
pub mod config;
pub mod template;
