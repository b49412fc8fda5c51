//! Application command handlers for spectrec.
//!
//! # Commands
//! - `record`: Live spectrogram in the terminal (default)
//! - `stream`: Headless NDJSON output of spectrogram rows
//! - `config`: Open configuration file in user's preferred editor
//! - `list_devices`: List available audio input devices
//! - `logs`: Display recent log entries

pub mod config;
pub mod list_devices;
pub mod logs;
mod pipeline;
pub mod record;
pub mod stream;

pub use config::handle_config;
pub use list_devices::handle_list_devices;
pub use logs::handle_logs;
pub use record::handle_record;
pub use stream::handle_stream;
