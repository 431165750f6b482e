#![forbid(unsafe_code)]

pub mod agents;
pub mod classify;
pub mod crons;
pub mod fsio;
pub mod goals;
pub mod memory;
pub mod source;
pub mod usage;
