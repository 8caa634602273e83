//! Shared helpers for probing loosely-shaped provider JSON.

pub mod json;
