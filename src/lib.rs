pub mod app;
pub mod audio;
pub mod clock;
pub mod config;
pub mod core;
pub mod display;
pub mod error;
pub mod library;
pub mod logging;
pub mod model;
pub mod slot;
pub mod switcher;
pub mod ui;

pub use error::{Error, Result};
