#![allow(clippy::uninlined_format_args)]

pub mod api;
pub mod app;
pub mod cache;
pub mod config;
pub mod data;
pub mod feed;
pub mod fetch;
pub mod logging;
pub mod model;
pub mod mpv;
pub mod player;
pub mod prefetch;
pub mod route;
pub mod scroll;
pub mod ui;
pub mod view;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::{run, RunOptions};
