pub mod date_utils;
pub mod layering;
pub mod models;
pub mod stats;
