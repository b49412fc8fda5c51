mod app;
mod commands;
mod config;
mod logging;
mod spectrogram;
mod ui;

#[tokio::main]
async fn main() {
    if let Err(e) = app::run().await {
        tracing::error!("Exiting with error: {e:#}");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
