//! Sonority core: device hot-plug handling, mixer routing and component
//! lifecycle management on top of a pluggable audio backend.

pub mod domain;

pub use domain::*;
