#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod app;
mod config;
mod error;
mod events;
mod loader;
mod markdown;
mod navigation;
mod rewrite;
mod source;
mod toc;
mod viewer;

use clap::Parser;
use eframe::egui;

use crate::app::ReaderApp;
use crate::config::Args;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> eframe::Result<()> {
    env_logger::init();

    let args = Args::parse();
    log::info!("Opening book content from {}", args.content);

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1000.0, 750.0])
            .with_min_inner_size([400.0, 300.0])
            .with_title("EPUB Reader")
            .with_drag_and_drop(true),
        ..Default::default()
    };

    eframe::run_native(
        "epub-reader",
        options,
        Box::new(move |cc| Ok(Box::new(ReaderApp::new(cc, args)))),
    )
}
