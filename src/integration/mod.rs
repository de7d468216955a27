//! Router-level tests and the fixtures shared with unit tests

pub mod fixtures;

mod e2e;
