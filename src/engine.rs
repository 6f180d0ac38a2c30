// src/engine.rs
use std::path::Path;
use std::sync::mpsc::{Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::config::RunConfig;
use crate::instruments::discovery;
use crate::instruments::link::LinkConfig;
use crate::instruments::{Akip4122, Generator, Oscilloscope, RigolDsg, ScpiLink, SimulatedBench};
use crate::recorder::read_points;
use crate::sweep::plot::PlotStyle;
use crate::sweep::sink::{write_reports, PngLiveCurve};
use crate::sweep::{
    CancelToken, DataSink, FileSink, LiveCurve, ProgressObserver, RunPaths, SweepError, SweepProgress,
};
use crate::types::{ConnectionMode, GuiCommand, SweepMessage, SweepMode, SweepRun};

type Bench = (Box<dyn Generator + Send>, Box<dyn Oscilloscope + Send>);

/// Forwards the live sensitivity curve to the GUI.
pub struct ChannelLiveCurve {
    tx: Sender<SweepMessage>,
}

impl LiveCurve for ChannelLiveCurve {
    fn push(&mut self, frequency_mhz: f64, sensitivity_db: f64) -> Result<(), SweepError> {
        // A closed window is not a measurement failure.
        self.tx
            .send(SweepMessage::CurvePoint {
                frequency_mhz,
                sensitivity_db,
            })
            .ok();
        Ok(())
    }
}

/// Background worker: waits for start commands and runs one sweep per
/// command. Exits once the GUI side of the channel is gone.
pub fn spawn_thread(
    config: RunConfig,
    tx: Sender<SweepMessage>,
    rx_cmd: Receiver<GuiCommand>,
    cancel: CancelToken,
) -> JoinHandle<()> {
    thread::spawn(move || {
        tx.send(SweepMessage::Log("Sweep engine ready.".to_owned())).ok();
        while let Ok(cmd) = rx_cmd.recv() {
            match cmd {
                GuiCommand::StartSweep {
                    mode,
                    sweep,
                    experiment,
                } => {
                    let mut run_config = config.clone();
                    run_config.connection = mode;
                    run_config.mode = sweep;
                    run_config.experiment.name = Some(experiment);
                    cancel.reset();
                    tx.send(SweepMessage::Running(true)).ok();
                    let summary = match run_sweep(&run_config, Some(&tx), &cancel) {
                        Ok(summary) => summary,
                        Err(e) => {
                            log::error!("Sweep failed: {e:#}");
                            format!("Sweep failed: {e:#}")
                        }
                    };
                    tx.send(SweepMessage::Finished(summary)).ok();
                    tx.send(SweepMessage::Running(false)).ok();
                }
            }
        }
        log::info!("Sweep engine stopped");
    })
}

/// Builds and checks the configured sweep, opens the bench, runs it and
/// returns a one-line summary. Nothing is sent to the instruments until the
/// sweep has been built. With a `reporter` the live curve and progress go to
/// the GUI, otherwise the live curve is a PNG next to the final plots.
pub fn run_sweep(config: &RunConfig, reporter: Option<&Sender<SweepMessage>>, cancel: &CancelToken) -> Result<String> {
    config.validate()?;
    let stem = config.experiment.file_stem();

    match config.mode {
        SweepMode::Search => {
            let mut orchestrator = config.orchestrator()?;
            orchestrator.validate()?;
            if let Some(tx) = reporter {
                orchestrator = orchestrator.with_observer(progress_observer(tx.clone()));
            }
            let paths = RunPaths::new(&config.output.data_dir, &config.output.images_dir, &stem);
            let mut sink = FileSink::create(paths.clone(), live_curve(reporter, &paths))?;
            let (mut generator, mut scope) = open_bench(config)?;
            report(reporter, bench_ready(config, &stem));
            let run = orchestrator.run(generator.as_mut(), scope.as_mut(), &mut sink, cancel)?;
            log::debug!("Orchestrator left in state {:?}", orchestrator.state());
            Ok(summarize(&run, &sink.paths().csv.display().to_string()))
        }
        SweepMode::Linear => {
            let mut linear = config.linear_sweep()?;
            if let Some(tx) = reporter {
                linear = linear.with_observer(progress_observer(tx.clone()));
            }
            let (mut generator, mut scope) = open_bench(config)?;
            report(reporter, bench_ready(config, &stem));
            let mut make_sink = |pass: u32| -> Result<Box<dyn DataSink + Send>, SweepError> {
                let paths = RunPaths::new(
                    &config.output.data_dir,
                    &config.output.images_dir,
                    &format!("{stem}_pass{pass}"),
                );
                let live = live_curve(reporter, &paths);
                Ok(Box::new(FileSink::create(paths, live)?))
            };
            let runs = linear.run(generator.as_mut(), scope.as_mut(), &mut make_sink, cancel)?;
            let points: usize = runs.iter().map(|r| r.points.len()).sum();
            let complete = runs.iter().filter(|r| r.completed).count();
            Ok(format!(
                "Linear sweep: {complete} of {} passes complete, {points} points in {}",
                config.linear.passes,
                config.output.data_dir.display()
            ))
        }
    }
}

/// Rebuilds plots and the workbook from a CSV written by an earlier run.
pub fn replot(csv: &Path, images_dir: &Path) -> Result<String> {
    let points = read_points(csv).with_context(|| format!("reading {}", csv.display()))?;
    if points.is_empty() {
        return Err(anyhow!("{} holds no rows", csv.display()));
    }
    let stem = csv
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow!("{} has no usable file name", csv.display()))?;
    let data_dir = csv.parent().unwrap_or_else(|| Path::new("."));
    let paths = RunPaths::with_stem(data_dir, images_dir, stem);
    write_reports(&paths, &points, &PlotStyle::default())?;
    Ok(format!("Replotted {} rows from {}", points.len(), csv.display()))
}

fn summarize(run: &SweepRun, csv: &str) -> String {
    if run.completed {
        format!(
            "Sweep complete: {} points, center reference {} V, rows in {csv}",
            run.points.len(),
            run.center_voltage_v
        )
    } else {
        format!("Sweep cancelled after {} points, rows in {csv}", run.points.len())
    }
}

fn bench_ready(config: &RunConfig, stem: &str) -> String {
    format!("Bench ready ({:?}); starting {:?} sweep '{stem}'", config.connection, config.mode)
}

fn report(reporter: Option<&Sender<SweepMessage>>, message: String) {
    log::info!("{message}");
    if let Some(tx) = reporter {
        tx.send(SweepMessage::Log(message)).ok();
    }
}

fn live_curve(reporter: Option<&Sender<SweepMessage>>, paths: &RunPaths) -> Box<dyn LiveCurve + Send> {
    match reporter {
        Some(tx) => Box::new(ChannelLiveCurve { tx: tx.clone() }),
        None => Box::new(PngLiveCurve::new(paths.live_png.clone())),
    }
}

fn progress_observer(tx: Sender<SweepMessage>) -> ProgressObserver {
    Box::new(move |progress: &SweepProgress| {
        tx.send(SweepMessage::Progress {
            index: progress.index,
            total: progress.total,
            remaining_secs: progress.remaining.as_secs(),
        })
        .ok();
    })
}

fn open_bench(config: &RunConfig) -> Result<Bench> {
    match config.connection {
        ConnectionMode::Simulation => {
            let mut simulation = config.simulation.clone();
            simulation.center_mhz = config.frequency.center_mhz;
            let bench = SimulatedBench::new(simulation);
            Ok((Box::new(bench.generator()), Box::new(bench.oscilloscope())))
        }
        ConnectionMode::Hardware => {
            let gen_cfg = &config.generator;
            let link = match &gen_cfg.link {
                Some(link) => link.clone(),
                None => {
                    let host = discovery::scan(&gen_cfg.discovery, &gen_cfg.idn_match)
                        .context("looking for the signal generator")?;
                    LinkConfig::Tcp {
                        host,
                        port: gen_cfg.discovery.port,
                    }
                }
            };
            let generator = RigolDsg::connect(
                ScpiLink::open(&link, Duration::from_millis(gen_cfg.timeout_ms))
                    .with_context(|| format!("opening generator link {link}"))?,
                gen_cfg.factory_reset,
                gen_cfg.initial_level_db,
                config.frequency.center_mhz,
            )
            .context("initialising the signal generator")?;

            let osc_cfg = &config.oscilloscope;
            let scope = Akip4122::connect(
                ScpiLink::open(&osc_cfg.link, Duration::from_millis(osc_cfg.timeout_ms))
                    .with_context(|| format!("opening oscilloscope link {}", osc_cfg.link))?,
                osc_cfg.reset,
            )
            .context("initialising the oscilloscope")?;
            Ok((Box::new(generator), Box::new(scope)))
        }
    }
}
