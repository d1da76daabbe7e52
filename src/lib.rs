#![deny(unused)]

#[macro_use]
extern crate tracing;

pub mod bench;
pub mod cache;
pub mod config;
pub mod report;
pub mod trace;

pub use config::Config;
pub use report::{Report, TextReporter};
