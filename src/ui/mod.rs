//! Terminal UI building blocks.

pub mod error;
pub mod heatmap;
pub mod recorder;

pub use error::report_error;
pub use recorder::{SessionView, SpectrogramTui, UserCommand};
