// Library crate exposing modules for the binary, integration tests and benches

pub mod cache;
pub mod client;
pub mod config;
pub mod model;
pub mod parser;
pub mod repository;
pub mod scraper;
pub mod util;
