use std::iter;
use std::time::{Duration, Instant};

use ndarray::Array1;

use crate::instruments::{Generator, Oscilloscope};
use crate::sweep::{
    CancelToken, DataSink, FrequencyWindowPolicy, LevelSearchEngine, SensitivityModel, SweepError,
};
use crate::types::{SweepPoint, SweepRun};

const CENTER_TOLERANCE_MHZ: f64 = 1e-9;

/// Ascending frequency grid of a run plus its center frequency.
#[derive(Clone, Debug)]
pub struct FrequencyPlan {
    grid: Array1<f64>,
    center_mhz: f64,
}

impl FrequencyPlan {
    /// `start..stop` (stop excluded) in steps of `step`.
    pub fn new(start_mhz: f64, stop_mhz: f64, step_mhz: f64, center_mhz: f64) -> Result<Self, SweepError> {
        if !(step_mhz > 0.0) {
            return Err(SweepError::Config(format!("frequency step must be positive, got {step_mhz}")));
        }
        if !(start_mhz < stop_mhz) {
            return Err(SweepError::Config(format!(
                "frequency span is empty: start {start_mhz} MHz, stop {stop_mhz} MHz"
            )));
        }
        Ok(Self {
            grid: Array1::range(start_mhz, stop_mhz, step_mhz),
            center_mhz,
        })
    }

    pub fn grid(&self) -> &Array1<f64> {
        &self.grid
    }

    pub fn len(&self) -> usize {
        self.grid.len()
    }

    pub fn center_mhz(&self) -> f64 {
        self.center_mhz
    }

    pub fn is_center(&self, frequency_mhz: f64) -> bool {
        (frequency_mhz - self.center_mhz).abs() < CENTER_TOLERANCE_MHZ
    }

    /// Every frequency the run will command, the center included.
    pub fn all_frequencies(&self) -> impl Iterator<Item = f64> + '_ {
        self.grid.iter().copied().chain(iter::once(self.center_mhz))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    Running,
    Finalizing,
    Done,
}

/// Reported after every recorded point.
#[derive(Clone, Copy, Debug)]
pub struct SweepProgress {
    pub index: usize,
    pub total: usize,
    pub point: SweepPoint,
    pub remaining: Duration,
}

pub type ProgressObserver = Box<dyn FnMut(&SweepProgress) + Send>;

/// `1h 2m 3s` style duration.
pub fn format_hms(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Leaves the RF output off and releases both instruments, reporting the
/// first failure after attempting all of them.
pub fn shutdown<G, O>(generator: &mut G, scope: &mut O) -> Result<(), SweepError>
where
    G: Generator + ?Sized,
    O: Oscilloscope + ?Sized,
{
    let output_result = generator.output_off();
    let generator_result = generator.disconnect();
    let scope_result = scope.disconnect();
    output_result?;
    generator_result?;
    scope_result?;
    Ok(())
}

/// Drives a full adaptive sweep: center reference first, then every grid
/// frequency in ascending order.
pub struct SweepOrchestrator {
    plan: FrequencyPlan,
    window: FrequencyWindowPolicy,
    engine: LevelSearchEngine,
    model: SensitivityModel,
    state: RunState,
    observer: Option<ProgressObserver>,
}

impl SweepOrchestrator {
    pub fn new(
        plan: FrequencyPlan,
        window: FrequencyWindowPolicy,
        engine: LevelSearchEngine,
        model: SensitivityModel,
    ) -> Self {
        Self {
            plan,
            window,
            engine,
            model,
            state: RunState::NotStarted,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: ProgressObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Checks that the window covers every frequency the run will command.
    pub fn validate(&self) -> Result<(), SweepError> {
        self.window.validate_span(self.plan.all_frequencies())
    }

    /// Runs the sweep once. A cancelled run still shuts the bench down and
    /// finalizes the sink, and comes back with `completed == false`.
    pub fn run<G, O, S>(
        &mut self,
        generator: &mut G,
        scope: &mut O,
        sink: &mut S,
        cancel: &CancelToken,
    ) -> Result<SweepRun, SweepError>
    where
        G: Generator + ?Sized,
        O: Oscilloscope + ?Sized,
        S: DataSink + ?Sized,
    {
        if self.state != RunState::NotStarted {
            return Err(SweepError::Config("a sweep orchestrator runs only once".into()));
        }
        if let Err(e) = self.validate() {
            self.state = RunState::Done;
            if let Err(se) = shutdown(generator, scope) {
                log::error!("Instrument shutdown after a rejected span also failed: {se}");
            }
            return Err(e);
        }
        log::info!(
            "Sweep of {} points, center {} MHz, {} dB steps",
            self.plan.len(),
            self.plan.center_mhz(),
            self.engine.db_step()
        );

        self.state = RunState::Running;
        let mut run = SweepRun::default();
        let measured = self.measure(generator, scope, sink, cancel, &mut run);

        self.state = RunState::Finalizing;
        let released = shutdown(generator, scope);
        let outcome = match measured {
            Ok(()) => released.and_then(|()| {
                run.completed = true;
                sink.finalize(&run)?;
                log::info!("Sweep finished: {} points", run.points.len());
                Ok(run)
            }),
            Err(SweepError::Cancelled) => {
                log::warn!("Sweep cancelled after {} of {} points", run.points.len(), self.plan.len());
                if let Err(e) = released {
                    log::error!("Instrument shutdown after cancellation failed: {e}");
                }
                sink.finalize(&run).map(|()| run)
            }
            Err(e) => {
                log::error!("Sweep aborted after {} points: {e}", run.points.len());
                if let Err(se) = released {
                    log::error!("Instrument shutdown after failure also failed: {se}");
                }
                Err(e)
            }
        };
        self.state = RunState::Done;
        outcome
    }

    fn measure<G, O, S>(
        &mut self,
        generator: &mut G,
        scope: &mut O,
        sink: &mut S,
        cancel: &CancelToken,
        run: &mut SweepRun,
    ) -> Result<(), SweepError>
    where
        G: Generator + ?Sized,
        O: Oscilloscope + ?Sized,
        S: DataSink + ?Sized,
    {
        let center = self.plan.center_mhz();
        generator.output_on()?;
        generator.set_level(self.window.min_level(center)?)?;
        generator.set_frequency(center)?;
        let reference = self.engine.search(&self.window, center, generator, scope, cancel)?;
        log::debug!(
            "Center search visited {} levels, {} without data",
            reference.visited,
            reference.skipped
        );
        let reference = reference.selected;
        self.model.set_reference(reference.voltage_v)?;
        run.center_voltage_v = reference.voltage_v;
        log::info!(
            "Center reference at {center} MHz: {} V at {} dB",
            reference.voltage_v,
            reference.level_db
        );

        let total = self.plan.len();
        for (index, &frequency_mhz) in self.plan.grid().iter().enumerate() {
            cancel.check()?;
            let started = Instant::now();
            let sample = if self.plan.is_center(frequency_mhz) {
                reference
            } else {
                generator.set_level(self.window.min_level(frequency_mhz)?)?;
                generator.set_frequency(frequency_mhz)?;
                let outcome = self.engine.search(&self.window, frequency_mhz, generator, scope, cancel)?;
                if outcome.skipped > 0 {
                    log::warn!(
                        "{frequency_mhz} MHz: {} of {} levels had no oscilloscope data",
                        outcome.skipped,
                        outcome.visited
                    );
                }
                outcome.selected
            };
            let point = SweepPoint {
                frequency_mhz,
                level_db: sample.level_db,
                voltage_v: sample.voltage_v,
                peak_to_peak_v: sample.peak_to_peak_v,
                sensitivity_db: self.model.sensitivity(sample.voltage_v, sample.level_db)?,
            };
            sink.record(&point)?;
            run.points.push(point);

            let remaining = started.elapsed() * (total - index - 1) as u32;
            log::info!(
                "Point {} of {total}: {frequency_mhz} MHz, level {} dB, {} V, sensitivity {:.2} dB; about {} left",
                index + 1,
                point.level_db,
                point.voltage_v,
                point.sensitivity_db,
                format_hms(remaining)
            );
            if let Some(observer) = self.observer.as_mut() {
                observer(&SweepProgress {
                    index,
                    total,
                    point,
                    remaining,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruments::scripted::{reading, Command, RecordingGenerator, ScriptedOscilloscope};
    use crate::sweep::sink::memory::MemorySink;
    use crate::sweep::{LevelBand, SearchThresholds, SelectionPolicy};

    fn orchestrator(start: f64, stop: f64) -> SweepOrchestrator {
        let plan = FrequencyPlan::new(start, stop, 1.0, 1160.0).unwrap();
        let window = FrequencyWindowPolicy::from_tables(
            vec![LevelBand::new(1120.0, 1250.0, -20)],
            vec![LevelBand::new(1120.0, 1250.0, 0)],
        )
        .unwrap();
        let engine = LevelSearchEngine::new(10, SearchThresholds::default(), SelectionPolicy::LastBeforeOvershoot);
        SweepOrchestrator::new(plan, window, engine, SensitivityModel::default())
    }

    fn scripted_sweep() -> ScriptedOscilloscope {
        ScriptedOscilloscope::from_voltages(&[
            // center: overshoot at 0 dB keeps -10 dB
            0.9, 0.95, 1.3, //
            // 1158: never overshoots
            0.97, 0.98, 0.99, //
            // 1159: falls below the floor at -10 dB
            0.9, 0.7, //
            // 1161
            0.85, 0.95, 1.3,
        ])
    }

    #[test]
    fn plan_excludes_stop() {
        let plan = FrequencyPlan::new(1120.0, 1125.0, 1.0, 1122.0).unwrap();
        assert_eq!(plan.grid().to_vec(), vec![1120.0, 1121.0, 1122.0, 1123.0, 1124.0]);
        assert!(plan.is_center(1122.0));
        assert!(FrequencyPlan::new(1120.0, 1120.0, 1.0, 1120.0).is_err());
        assert!(FrequencyPlan::new(1120.0, 1130.0, 0.0, 1125.0).is_err());
    }

    #[test]
    fn full_run_measures_reference_once_and_reuses_it() {
        let mut sweep = orchestrator(1158.0, 1162.0);
        let mut generator = RecordingGenerator::default();
        let mut scope = scripted_sweep();
        let mut sink = MemorySink::default();
        assert_eq!(sweep.state(), RunState::NotStarted);

        let run = sweep.run(&mut generator, &mut scope, &mut sink, &CancelToken::new()).unwrap();

        assert_eq!(sweep.state(), RunState::Done);
        assert!(run.completed);
        assert_eq!(run.center_voltage_v, 0.95);
        assert_eq!(scope.reads, 11);
        assert!(scope.disconnected);
        assert!(!generator.output_enabled());
        assert_eq!(generator.commands.first(), Some(&Command::OutputOn));
        assert_eq!(generator.commands.last(), Some(&Command::Disconnect));
        let center_tunes = generator
            .commands
            .iter()
            .filter(|c| **c == Command::Frequency(1160.0))
            .count();
        assert_eq!(center_tunes, 1);

        let levels: Vec<i32> = run.points.iter().map(|p| p.level_db).collect();
        assert_eq!(levels, vec![0, -20, -10, -10]);
        let center = run.points[2];
        assert_eq!(center.frequency_mhz, 1160.0);
        assert_eq!(center.sensitivity_db, -10.0);
        assert!((run.points[0].sensitivity_db - 0.04 / 0.0245).abs() < 1e-9);
        assert!((run.points[1].sensitivity_db - (-0.05 / 0.0245 - 20.0)).abs() < 1e-9);
        assert_eq!(sink.points, run.points);
        assert_eq!(sink.finalized.as_ref(), Some(&run));
    }

    #[test]
    fn levels_for_every_point_start_at_the_window_minimum() {
        let mut sweep = orchestrator(1158.0, 1162.0);
        let mut generator = RecordingGenerator::default();
        let mut scope = scripted_sweep();
        let mut sink = MemorySink::default();
        sweep.run(&mut generator, &mut scope, &mut sink, &CancelToken::new()).unwrap();
        let levels = generator.levels();
        assert!(levels.iter().all(|l| (-20..=0).contains(l)));
        // Each tune is preceded by parking the level at the window minimum.
        for (i, command) in generator.commands.iter().enumerate() {
            if let Command::Frequency(_) = command {
                assert_eq!(generator.commands[i - 1], Command::Level(-20));
            }
        }
    }

    #[test]
    fn span_outside_the_window_is_rejected_before_any_command() {
        let mut sweep = orchestrator(1100.0, 1130.0);
        let mut generator = RecordingGenerator::default();
        let mut scope = scripted_sweep();
        let mut sink = MemorySink::default();
        let result = sweep.run(&mut generator, &mut scope, &mut sink, &CancelToken::new());
        assert!(matches!(result, Err(SweepError::RangeLookup { .. })));
        assert_eq!(generator.commands, vec![Command::OutputOff, Command::Disconnect]);
        assert_eq!(scope.reads, 0);
        assert!(scope.disconnected);
        assert!(sink.points.is_empty());
        assert!(sink.finalized.is_none());
        assert_eq!(sweep.state(), RunState::Done);
    }

    #[test]
    fn validate_reports_a_span_the_window_misses() {
        assert!(orchestrator(1158.0, 1162.0).validate().is_ok());
        let sweep = orchestrator(1100.0, 1130.0);
        assert!(matches!(sweep.validate(), Err(SweepError::RangeLookup { .. })));
        assert_eq!(sweep.state(), RunState::NotStarted);
    }

    struct FailingFinalize {
        recorded: usize,
    }

    impl DataSink for FailingFinalize {
        fn record(&mut self, _point: &SweepPoint) -> Result<(), SweepError> {
            self.recorded += 1;
            Ok(())
        }

        fn finalize(&mut self, _run: &SweepRun) -> Result<(), SweepError> {
            Err(SweepError::Plot("disk full".into()))
        }
    }

    #[test]
    fn failed_finalize_still_ends_the_run() {
        let mut sweep = orchestrator(1158.0, 1162.0);
        let mut generator = RecordingGenerator::default();
        let mut scope = scripted_sweep();
        let mut sink = FailingFinalize { recorded: 0 };
        let result = sweep.run(&mut generator, &mut scope, &mut sink, &CancelToken::new());
        assert!(matches!(result, Err(SweepError::Plot(_))));
        assert_eq!(sink.recorded, 4);
        assert!(!generator.output_enabled());
        assert!(scope.disconnected);
        assert_eq!(sweep.state(), RunState::Done);
    }

    #[test]
    fn failed_finalize_after_cancellation_still_ends_the_run() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut sweep = orchestrator(1158.0, 1162.0);
        let mut generator = RecordingGenerator::default();
        let mut scope = scripted_sweep();
        let mut sink = FailingFinalize { recorded: 0 };
        let result = sweep.run(&mut generator, &mut scope, &mut sink, &cancel);
        assert!(matches!(result, Err(SweepError::Plot(_))));
        assert_eq!(sink.recorded, 0);
        assert_eq!(sweep.state(), RunState::Done);
    }

    #[test]
    fn dropout_mid_sweep_does_not_abort() {
        let mut sweep = orchestrator(1158.0, 1160.0);
        let mut generator = RecordingGenerator::default();
        let mut scope = ScriptedOscilloscope::new([
            Some(reading(0.9)),
            Some(reading(0.95)),
            Some(reading(1.3)),
            Some(reading(0.9)),
            None,
            Some(reading(1.4)),
            Some(reading(0.97)),
            Some(reading(0.98)),
            Some(reading(0.99)),
        ]);
        let mut sink = MemorySink::default();
        let run = sweep.run(&mut generator, &mut scope, &mut sink, &CancelToken::new()).unwrap();
        assert!(run.completed);
        assert_eq!(run.points.len(), 2);
        assert_eq!(run.points[0].level_db, -20);
        assert_eq!(run.points[1].level_db, 0);
    }

    #[test]
    fn failure_mid_sweep_still_turns_the_output_off() {
        let mut sweep = orchestrator(1158.0, 1162.0);
        let mut generator = RecordingGenerator::default();
        // Center reference only; every later read is a dropout.
        let mut scope = ScriptedOscilloscope::from_voltages(&[0.9, 0.95, 1.3]);
        let mut sink = MemorySink::default();
        let result = sweep.run(&mut generator, &mut scope, &mut sink, &CancelToken::new());
        assert!(matches!(result, Err(SweepError::NoValidSample { .. })));
        assert!(!generator.output_enabled());
        assert!(scope.disconnected);
        assert!(sink.finalized.is_none());
        assert_eq!(sweep.state(), RunState::Done);
    }

    #[test]
    fn cancellation_between_points_keeps_recorded_rows() {
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let mut sweep = orchestrator(1158.0, 1162.0).with_observer(Box::new(move |progress| {
            if progress.index == 0 {
                trigger.cancel();
            }
        }));
        let mut generator = RecordingGenerator::default();
        let mut scope = scripted_sweep();
        let mut sink = MemorySink::default();
        let run = sweep.run(&mut generator, &mut scope, &mut sink, &cancel).unwrap();
        assert!(!run.completed);
        assert_eq!(run.points.len(), 1);
        assert_eq!(sink.points.len(), 1);
        assert_eq!(sink.finalized.map(|r| r.points.len()), Some(1));
        assert!(!generator.output_enabled());
    }

    #[test]
    fn runs_only_once() {
        let mut sweep = orchestrator(1158.0, 1162.0);
        let mut generator = RecordingGenerator::default();
        let mut scope = scripted_sweep();
        let mut sink = MemorySink::default();
        sweep.run(&mut generator, &mut scope, &mut sink, &CancelToken::new()).unwrap();
        let again = sweep.run(&mut generator, &mut scope, &mut sink, &CancelToken::new());
        assert!(matches!(again, Err(SweepError::Config(_))));
    }

    #[test]
    fn hms_formatting() {
        assert_eq!(format_hms(Duration::from_secs(3725)), "1h 2m 5s");
        assert_eq!(format_hms(Duration::ZERO), "0h 0m 0s");
    }
}
