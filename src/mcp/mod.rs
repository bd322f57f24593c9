pub mod client;
pub mod registry;
pub mod stdio_cache;
