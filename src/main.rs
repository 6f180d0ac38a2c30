// src/main.rs
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]
mod config;
mod engine;
mod gui;
mod instruments;
mod logging;
mod recorder;
mod sweep;
mod types;

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use eframe::egui;

use config::{ExperimentLabel, RunConfig};
use sweep::CancelToken;
use types::{ConnectionMode, SweepMode};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Search,
    Linear,
}

/// Receiver sensitivity sweep: adaptive level search or fixed-level sweep
/// over a frequency span.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// JSON run configuration; missing file means defaults.
    #[arg(long, default_value = "sweep.json")]
    config: PathBuf,
    /// Run once without the GUI.
    #[arg(long)]
    headless: bool,
    /// Rebuild plots and the spreadsheet from an existing CSV, then exit.
    #[arg(long, value_name = "CSV")]
    replot: Option<PathBuf>,
    /// Use the simulated bench instead of the instruments.
    #[arg(long)]
    simulate: bool,
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,
    /// Experiment name used verbatim for output files.
    #[arg(long)]
    experiment: Option<String>,
    /// Unit number; with the flags below builds the experiment name.
    #[arg(long)]
    unit: Option<String>,
    #[arg(long)]
    with_resistors: bool,
    #[arg(long)]
    with_screen: bool,
    #[arg(long, default_value = "1.0")]
    firmware: String,
}

impl Args {
    fn apply(&self, config: &mut RunConfig) {
        if self.simulate {
            config.connection = ConnectionMode::Simulation;
        }
        match self.mode {
            Some(ModeArg::Search) => config.mode = SweepMode::Search,
            Some(ModeArg::Linear) => config.mode = SweepMode::Linear,
            None => {}
        }
        if let Some(unit) = &self.unit {
            config.experiment.label = Some(ExperimentLabel {
                unit: unit.clone(),
                with_resistors: self.with_resistors,
                with_screen: self.with_screen,
                firmware: self.firmware.clone(),
            });
        }
        if let Some(name) = &self.experiment {
            config.experiment.name = Some(name.clone());
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let (mut config, source) = RunConfig::load(&args.config)?;
    args.apply(&mut config);
    logging::init(&config.output.log_dir)?;
    log::info!("{source}");
    config.validate().context("checking the run configuration")?;

    if let Some(csv) = &args.replot {
        let summary = engine::replot(csv, &config.output.images_dir)?;
        log::info!("{summary}");
        return Ok(());
    }
    if args.headless {
        let summary = engine::run_sweep(&config, None, &CancelToken::new())?;
        log::info!("{summary}");
        return Ok(());
    }

    let viewport = egui::ViewportBuilder::default()
        .with_inner_size([1280.0, 800.0])
        .with_min_inner_size([960.0, 600.0])
        .with_title("Sensitivity sweep");
    let options = eframe::NativeOptions {
        viewport,
        ..Default::default()
    };
    eframe::run_native(
        "sensitivity-sweep",
        options,
        Box::new(move |_cc| Box::new(gui::SweepApp::new(config))),
    )
    .map_err(|e| anyhow!("GUI failed: {e}"))
}
