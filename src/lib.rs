//! Planet Fetch - the polling and ingestion core of a planet style feed aggregator.
//!
//! Every configured feed gets its own worker that fetches the feed, stores
//! newly seen channels and items, then sleeps for as long as the feed asks.

pub mod config;
pub mod db;
pub mod scheduler;
pub mod sink;
pub mod source;
pub mod worker;
