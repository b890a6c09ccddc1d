pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod fs_util;
pub mod graph;
pub mod interrupt;
pub mod listing;
pub mod output;
pub mod prompt;
pub mod registry;
pub mod remote;
pub mod resolve;
pub mod store;
