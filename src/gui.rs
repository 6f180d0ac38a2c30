// src/gui.rs
use eframe::egui;
use egui::Color32;
use egui_plot::{Line, Plot, PlotPoints};
use std::sync::mpsc::{channel, Receiver, Sender};

use crate::config::{ExperimentLabel, RunConfig};
use crate::engine;
use crate::sweep::{format_hms, CancelToken};
use crate::types::*;

const LOG_LINES: usize = 12;

pub struct SweepApp {
    // run setup
    connection_mode: ConnectionMode,
    sweep_mode: SweepMode,
    label: ExperimentLabel,
    custom_name: String,
    span_text: String,

    // run state
    is_running: bool,
    curve: Vec<[f64; 2]>,
    progress: Option<(usize, usize, u64)>,
    last_summary: String,
    log_messages: Vec<String>,

    rx: Receiver<SweepMessage>,
    tx_cmd: Sender<GuiCommand>,
    cancel: CancelToken,
}

impl SweepApp {
    pub fn new(config: RunConfig) -> Self {
        let (tx, rx) = channel();
        let (tx_cmd, rx_cmd) = channel();
        let cancel = CancelToken::new();

        let f = &config.frequency;
        let span_text = format!(
            "{} to {} MHz, step {} MHz, center {} MHz",
            f.start_mhz, f.stop_mhz, f.step_mhz, f.center_mhz
        );
        let label = config.experiment.label.clone().unwrap_or(ExperimentLabel {
            unit: "1".to_owned(),
            with_resistors: true,
            with_screen: true,
            firmware: "1.0".to_owned(),
        });
        let custom_name = config.experiment.name.clone().unwrap_or_default();
        let connection_mode = config.connection;
        let sweep_mode = config.mode;

        // Worker ends on its own once `tx_cmd` is dropped with the app.
        engine::spawn_thread(config, tx, rx_cmd, cancel.clone());

        Self {
            connection_mode,
            sweep_mode,
            label,
            custom_name,
            span_text,
            is_running: false,
            curve: Vec::new(),
            progress: None,
            last_summary: String::new(),
            log_messages: vec!["Sensitivity sweep ready.".to_owned()],
            rx,
            tx_cmd,
            cancel,
        }
    }

    fn log(&mut self, msg: &str) {
        self.log_messages.push(format!("> {}", msg));
        if self.log_messages.len() > LOG_LINES {
            self.log_messages.remove(0);
        }
    }

    fn experiment_name(&self) -> String {
        let custom = self.custom_name.trim();
        if custom.is_empty() {
            self.label.name()
        } else {
            custom.to_owned()
        }
    }

    fn start(&mut self) {
        let experiment = self.experiment_name();
        self.curve.clear();
        self.progress = None;
        let sent = self.tx_cmd.send(GuiCommand::StartSweep {
            mode: self.connection_mode,
            sweep: self.sweep_mode,
            experiment: experiment.clone(),
        });
        match sent {
            Ok(()) => {
                self.is_running = true;
                self.log(&format!("Starting '{experiment}'"));
            }
            Err(_) => self.log("Sweep engine is not running"),
        }
    }

    fn drain_messages(&mut self) {
        while let Ok(msg) = self.rx.try_recv() {
            match msg {
                SweepMessage::Log(s) => self.log(&s),
                SweepMessage::Running(b) => self.is_running = b,
                SweepMessage::CurvePoint {
                    frequency_mhz,
                    sensitivity_db,
                } => self.curve.push([frequency_mhz, sensitivity_db]),
                SweepMessage::Progress {
                    index,
                    total,
                    remaining_secs,
                } => self.progress = Some((index, total, remaining_secs)),
                SweepMessage::Finished(summary) => {
                    self.log(&summary);
                    self.last_summary = summary;
                }
            }
        }
    }

    fn setup_panel(&mut self, ui: &mut egui::Ui) {
        ui.add_space(10.0);
        ui.heading("Sensitivity sweep");
        ui.label(&self.span_text);
        ui.separator();

        ui.add_enabled_ui(!self.is_running, |ui| {
            ui.horizontal(|ui| {
                ui.selectable_value(&mut self.connection_mode, ConnectionMode::Simulation, "SIM");
                ui.selectable_value(&mut self.connection_mode, ConnectionMode::Hardware, "REAL");
            });
            ui.horizontal(|ui| {
                ui.selectable_value(&mut self.sweep_mode, SweepMode::Search, "Level search");
                ui.selectable_value(&mut self.sweep_mode, SweepMode::Linear, "Fixed level");
            });

            ui.add_space(10.0);
            ui.label("EXPERIMENT");
            egui::Grid::new("experiment").num_columns(2).show(ui, |ui| {
                ui.label("Unit");
                ui.text_edit_singleline(&mut self.label.unit);
                ui.end_row();
                ui.label("Firmware");
                ui.text_edit_singleline(&mut self.label.firmware);
                ui.end_row();
                ui.label("Name override");
                ui.text_edit_singleline(&mut self.custom_name);
                ui.end_row();
            });
            ui.checkbox(&mut self.label.with_resistors, "Resistors fitted");
            ui.checkbox(&mut self.label.with_screen, "Screen fitted");
        });
        ui.label(egui::RichText::new(self.experiment_name()).small().color(Color32::GRAY));

        ui.add_space(10.0);
        if self.is_running {
            let stop = egui::Button::new(egui::RichText::new("⏹ STOP").color(Color32::WHITE)).fill(Color32::RED);
            if ui.add(stop).clicked() {
                self.cancel.cancel();
                self.log("Stop requested");
            }
        } else if ui.button("▶ START SWEEP").clicked() {
            self.start();
        }

        if let Some((index, total, remaining)) = self.progress {
            ui.add(egui::ProgressBar::new((index + 1) as f32 / total.max(1) as f32).show_percentage());
            ui.label(format!(
                "Point {} of {total}, about {} left",
                index + 1,
                format_hms(std::time::Duration::from_secs(remaining))
            ));
        }

        ui.add_space(10.0);
        ui.separator();
        egui::ScrollArea::vertical().max_height(220.0).show(ui, |ui| {
            for m in &self.log_messages {
                ui.monospace(m);
            }
        });
    }
}

impl eframe::App for SweepApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_messages();
        if self.is_running {
            ctx.request_repaint_after(std::time::Duration::from_millis(100));
        }

        let mut visuals = egui::Visuals::dark();
        visuals.widgets.noninteractive.bg_fill = Color32::from_rgb(10, 10, 15);
        ctx.set_visuals(visuals);

        egui::SidePanel::left("setup").min_width(300.0).show(ctx, |ui| self.setup_panel(ui));

        egui::CentralPanel::default().show(ctx, |ui| {
            if self.curve.is_empty() {
                ui.label("Start a sweep to see the sensitivity curve.");
            } else if !self.last_summary.is_empty() && !self.is_running {
                ui.label(&self.last_summary);
            }
            Plot::new("sensitivity_plot")
                .view_aspect(2.0)
                .x_axis_label("Frequency, MHz")
                .y_axis_label("Sensitivity, dB")
                .auto_bounds_x()
                .auto_bounds_y()
                .show(ui, |plot_ui| {
                    if !self.curve.is_empty() {
                        plot_ui.line(
                            Line::new(PlotPoints::new(self.curve.clone()))
                                .name("sensitivity")
                                .color(Color32::from_rgb(0, 255, 255)),
                        );
                    }
                });
        });
    }
}
