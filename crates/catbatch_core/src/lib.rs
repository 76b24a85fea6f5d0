pub mod cancel;
pub mod client;
pub mod config;
pub mod diff;
pub mod error;
pub mod executor;
pub mod failure_log;
pub mod gateway;
pub mod model;
pub mod normalize;
pub mod planner;
pub mod rate_limit;
pub mod search;
pub mod wikitext;

#[cfg(test)]
mod testing;
