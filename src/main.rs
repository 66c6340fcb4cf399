// src/main.rs
#![warn(clippy::all, rust_2018_idioms)]
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod camera;
mod config;
mod encoder;
mod error;
mod overlay;
mod recorder;
mod run_log;
mod session;
mod ui;

use anyhow::{anyhow, Context};

use crate::config::Config;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("Starting field logger");

    let config = Config::load().context("Failed to load configuration")?;

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1400.0, 900.0])
            .with_min_inner_size([640.0, 480.0]),
        ..Default::default()
    };

    eframe::run_native(
        "Encoder App",
        native_options,
        Box::new(move |cc| Ok(Box::new(ui::FieldLoggerApp::new(cc, config)))),
    )
    .map_err(|e| anyhow!("UI exited with an error: {}", e))
}
