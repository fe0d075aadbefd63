//! Textual pipeline definitions.

pub mod yaml;
