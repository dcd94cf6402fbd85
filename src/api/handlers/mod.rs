//! API request handlers

pub mod channels;
pub mod health;
