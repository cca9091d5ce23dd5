pub mod bootstrap;
pub mod calendar_bridge;
pub mod commands;
pub mod oauth;
pub mod store;
