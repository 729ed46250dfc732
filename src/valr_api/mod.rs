//! VALR REST client and wire models

pub mod client;
pub mod model;

pub use client::{REST_URL, RestClient};
