//! Fixed-level frequency sweep, repeated for a number of passes.
use std::thread;
use std::time::{Duration, Instant};

use crate::instruments::{Generator, Oscilloscope, ScopeReading};
use crate::sweep::orchestrator::{format_hms, shutdown, FrequencyPlan, ProgressObserver, SweepProgress};
use crate::sweep::{CancelToken, DataSink, SensitivityModel, SweepError};
use crate::types::{SweepPoint, SweepRun};

const CENTER_ATTEMPTS: usize = 3;

pub type SinkFactory<'a> = dyn FnMut(u32) -> Result<Box<dyn DataSink + Send>, SweepError> + 'a;

pub struct LinearSweep {
    plan: FrequencyPlan,
    level_db: i32,
    passes: u32,
    settle: Duration,
    slope_v_per_db: f64,
    observer: Option<ProgressObserver>,
}

impl LinearSweep {
    pub fn new(plan: FrequencyPlan, level_db: i32, passes: u32, slope_v_per_db: f64) -> Self {
        Self {
            plan,
            level_db,
            passes: passes.max(1),
            settle: Duration::ZERO,
            slope_v_per_db,
            observer: None,
        }
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn with_observer(mut self, observer: ProgressObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Runs every pass, asking `make_sink` for a fresh sink per pass (numbered
    /// from 1). Cancellation ends the current pass early and skips the rest.
    pub fn run<G, O>(
        &mut self,
        generator: &mut G,
        scope: &mut O,
        make_sink: &mut SinkFactory<'_>,
        cancel: &CancelToken,
    ) -> Result<Vec<SweepRun>, SweepError>
    where
        G: Generator + ?Sized,
        O: Oscilloscope + ?Sized,
    {
        log::info!(
            "Linear sweep at {} dB: {} points, {} passes",
            self.level_db,
            self.plan.len(),
            self.passes
        );
        let mut runs = Vec::new();
        let measured = self.measure(generator, scope, make_sink, cancel, &mut runs);
        let released = shutdown(generator, scope);
        match measured {
            Ok(()) => {
                released?;
                Ok(runs)
            }
            Err(SweepError::Cancelled) => {
                log::warn!("Linear sweep cancelled during pass {}", runs.len());
                if let Err(e) = released {
                    log::error!("Instrument shutdown after cancellation failed: {e}");
                }
                Ok(runs)
            }
            Err(e) => {
                if let Err(se) = released {
                    log::error!("Instrument shutdown after failure also failed: {se}");
                }
                Err(e)
            }
        }
    }

    fn measure<G, O>(
        &mut self,
        generator: &mut G,
        scope: &mut O,
        make_sink: &mut SinkFactory<'_>,
        cancel: &CancelToken,
        runs: &mut Vec<SweepRun>,
    ) -> Result<(), SweepError>
    where
        G: Generator + ?Sized,
        O: Oscilloscope + ?Sized,
    {
        generator.output_on()?;
        generator.set_level(self.level_db)?;
        let total = self.plan.len();

        for pass in 1..=self.passes {
            cancel.check()?;
            let mut sink = make_sink(pass)?;
            let center = self.center_reading(generator, scope, cancel)?;
            let model = SensitivityModel::new(self.slope_v_per_db);
            model.set_reference(center.average_v)?;
            log::info!("Pass {pass}: center reference {} V", center.average_v);

            let mut run = SweepRun {
                center_voltage_v: center.average_v,
                ..SweepRun::default()
            };
            let pass_result = self.measure_pass(generator, scope, sink.as_mut(), cancel, &model, &mut run, pass, total);
            run.completed = pass_result.is_ok();
            // Rows of an interrupted pass still get their plots.
            let finalized = match &pass_result {
                Ok(()) | Err(SweepError::Cancelled) => sink.finalize(&run),
                Err(_) => Ok(()),
            };
            runs.push(run);
            pass_result?;
            finalized?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn measure_pass<G, O>(
        &mut self,
        generator: &mut G,
        scope: &mut O,
        sink: &mut (dyn DataSink + Send),
        cancel: &CancelToken,
        model: &SensitivityModel,
        run: &mut SweepRun,
        pass: u32,
        total: usize,
    ) -> Result<(), SweepError>
    where
        G: Generator + ?Sized,
        O: Oscilloscope + ?Sized,
    {
        for (index, &frequency_mhz) in self.plan.grid().iter().enumerate() {
            cancel.check()?;
            let started = Instant::now();
            generator.set_frequency(frequency_mhz)?;
            self.settle();
            let Some(reading) = scope.read_all()? else {
                log::warn!("No oscilloscope data at {frequency_mhz} MHz; frequency skipped");
                continue;
            };
            let point = SweepPoint {
                frequency_mhz,
                level_db: self.level_db,
                voltage_v: reading.average_v,
                peak_to_peak_v: reading.peak_to_peak_v,
                sensitivity_db: model.sensitivity(reading.average_v, self.level_db)?,
            };
            sink.record(&point)?;
            run.points.push(point);

            let left = (total - index - 1) + (self.passes - pass) as usize * total;
            let remaining = started.elapsed() * left as u32;
            log::info!(
                "Pass {pass}, point {} of {total}: {frequency_mhz} MHz, {} V; about {} left",
                index + 1,
                point.voltage_v,
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

    fn center_reading<G, O>(
        &self,
        generator: &mut G,
        scope: &mut O,
        cancel: &CancelToken,
    ) -> Result<ScopeReading, SweepError>
    where
        G: Generator + ?Sized,
        O: Oscilloscope + ?Sized,
    {
        let center = self.plan.center_mhz();
        generator.set_frequency(center)?;
        for attempt in 1..=CENTER_ATTEMPTS {
            cancel.check()?;
            self.settle();
            if let Some(reading) = scope.read_all()? {
                return Ok(reading);
            }
            log::warn!("No oscilloscope data at center {center} MHz (attempt {attempt} of {CENTER_ATTEMPTS})");
        }
        Err(SweepError::NoValidSample { frequency_mhz: center })
    }

    fn settle(&self) {
        if !self.settle.is_zero() {
            thread::sleep(self.settle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruments::scripted::{reading, Command, RecordingGenerator, ScriptedOscilloscope};
    use crate::sweep::sink::memory::MemorySink;
    use std::sync::{Arc, Mutex};

    /// Sink handed out per pass that forwards into a shared list for inspection.
    struct SharedSink(Arc<Mutex<MemorySink>>);

    impl DataSink for SharedSink {
        fn record(&mut self, point: &SweepPoint) -> Result<(), SweepError> {
            self.0.lock().unwrap().record(point)
        }

        fn finalize(&mut self, run: &SweepRun) -> Result<(), SweepError> {
            self.0.lock().unwrap().finalize(run)
        }
    }

    fn sweep(passes: u32) -> LinearSweep {
        let plan = FrequencyPlan::new(1158.0, 1161.0, 1.0, 1160.0).unwrap();
        LinearSweep::new(plan, -30, passes, 0.0245)
    }

    #[test]
    fn each_pass_gets_its_own_sink_and_reference() {
        let mut scope = ScriptedOscilloscope::from_voltages(&[
            1.0, 0.9, 0.95, 1.0, // pass 1: center then grid
            0.5, 0.6, 0.7, 0.5, // pass 2
        ]);
        let mut generator = RecordingGenerator::default();
        let sinks: Vec<Arc<Mutex<MemorySink>>> = Vec::new();
        let sinks = Arc::new(Mutex::new(sinks));
        let handed_out = sinks.clone();
        let mut factory = move |pass: u32| -> Result<Box<dyn DataSink + Send>, SweepError> {
            assert_eq!(handed_out.lock().unwrap().len() as u32 + 1, pass);
            let sink = Arc::new(Mutex::new(MemorySink::default()));
            handed_out.lock().unwrap().push(sink.clone());
            Ok(Box::new(SharedSink(sink)))
        };

        let runs = sweep(2)
            .run(&mut generator, &mut scope, &mut factory, &CancelToken::new())
            .unwrap();

        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|r| r.completed && r.points.len() == 3));
        assert_eq!(runs[0].center_voltage_v, 1.0);
        assert_eq!(runs[1].center_voltage_v, 0.5);
        // Center reading of each pass sits at the sweep level, so it maps to it exactly.
        assert_eq!(runs[0].points[2].sensitivity_db, -30.0);
        assert_eq!(runs[1].points[2].sensitivity_db, -30.0);
        assert!(runs.iter().flat_map(|r| &r.points).all(|p| p.level_db == -30));

        let sinks = sinks.lock().unwrap();
        assert_eq!(sinks.len(), 2);
        for (sink, run) in sinks.iter().zip(&runs) {
            let sink = sink.lock().unwrap();
            assert_eq!(sink.points, run.points);
            assert_eq!(sink.finalized.as_ref(), Some(run));
        }
        assert_eq!(generator.levels(), vec![-30]);
        assert!(!generator.output_enabled());
        assert!(scope.disconnected);
    }

    #[test]
    fn transient_reads_skip_the_frequency() {
        let mut scope = ScriptedOscilloscope::new([
            Some(reading(1.0)),
            Some(reading(0.9)),
            None,
            Some(reading(1.1)),
        ]);
        let mut generator = RecordingGenerator::default();
        let mut factory = |_: u32| -> Result<Box<dyn DataSink + Send>, SweepError> {
            Ok(Box::new(MemorySink::default()))
        };
        let runs = sweep(1)
            .run(&mut generator, &mut scope, &mut factory, &CancelToken::new())
            .unwrap();
        let frequencies: Vec<f64> = runs[0].points.iter().map(|p| p.frequency_mhz).collect();
        assert_eq!(frequencies, vec![1158.0, 1160.0]);
    }

    #[test]
    fn center_retries_then_gives_up() {
        let mut scope = ScriptedOscilloscope::new([None, None, None]);
        let mut generator = RecordingGenerator::default();
        let mut factory = |_: u32| -> Result<Box<dyn DataSink + Send>, SweepError> {
            Ok(Box::new(MemorySink::default()))
        };
        let result = sweep(1).run(&mut generator, &mut scope, &mut factory, &CancelToken::new());
        assert!(matches!(result, Err(SweepError::NoValidSample { frequency_mhz }) if frequency_mhz == 1160.0));
        assert_eq!(scope.reads, CENTER_ATTEMPTS);
        assert_eq!(generator.commands.last(), Some(&Command::Disconnect));
    }

    #[test]
    fn cancellation_stops_remaining_passes() {
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let mut scope = ScriptedOscilloscope::from_voltages(&[1.0, 0.9, 0.95, 1.0, 1.0, 0.9]);
        let mut generator = RecordingGenerator::default();
        let mut factory = |_: u32| -> Result<Box<dyn DataSink + Send>, SweepError> {
            Ok(Box::new(MemorySink::default()))
        };
        let mut linear = sweep(3).with_observer(Box::new(move |progress| {
            if progress.index == 1 {
                trigger.cancel();
            }
        }));
        let runs = linear.run(&mut generator, &mut scope, &mut factory, &cancel).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].points.len(), 2);
        assert!(!runs[0].completed);
        assert!(!generator.output_enabled());
    }
}
