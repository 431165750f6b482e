#![forbid(unsafe_code)]

pub mod markdown;
pub mod model;
pub mod projects;
pub mod storage;
