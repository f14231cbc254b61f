use crate::{AcquisitionConfig, DaqReturn, Driver, DriverError, SampleMode, Task};
use log::{debug, error, info};
use std::{
    fmt,
    path::{Path, PathBuf},
};
use thiserror::Error;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// Where a cycle is in its lifecycle.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CycleState {
    Idle,
    /// Channel, clock, trigger and log target are set.
    Configured,
    /// Started and waiting for the trigger edge.
    Armed,
    /// Blocked in the driver until the finite acquisition completes.
    Acquiring,
    /// Acquisition done; the task is being cleared, which closes the log file.
    Logging,
    Error,
    Cleanup,
    Terminate,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Configured => "configured",
            Self::Armed => "armed",
            Self::Acquiring => "acquiring",
            Self::Logging => "logging",
            Self::Error => "error",
            Self::Cleanup => "cleanup",
            Self::Terminate => "terminate",
        };
        f.write_str(name)
    }
}

/// A cycle that completed and left its log file behind.
#[derive(Debug, Clone)]
pub struct CycleRecord {
    pub index: u32,
    pub path: PathBuf,
    pub samples: u64,
    pub started: OffsetDateTime,
    pub finished: OffsetDateTime,
}

/// The failure that ended a run.
#[derive(Error, Debug, Clone)]
#[error("cycle {cycle} failed while {state}: {error}")]
pub struct CycleFailure {
    pub cycle: u32,
    /// Last state reached before the failing call.
    pub state: CycleState,
    pub error: DriverError,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub requested: u32,
    pub completed: Vec<CycleRecord>,
    pub failure: Option<CycleFailure>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none() && self.completed.len() == self.requested as usize
    }

    pub fn output_paths(&self) -> Vec<PathBuf> {
        self.completed.iter().map(|c| c.path.clone()).collect()
    }

    /// Tell the operator how the run ended.
    pub fn log_summary(&self) {
        for record in &self.completed {
            let started = record
                .started
                .format(&Rfc3339)
                .unwrap_or_else(|_| record.started.to_string());
            let seconds = (record.finished - record.started).as_seconds_f64();
            debug!(
                "cycle {} started {started}, took {seconds:.3} s, {}",
                record.index,
                record.path.display()
            );
        }
        match &self.failure {
            Some(failure) => {
                error!("{}", failure.error);
                error!(
                    "Run stopped in cycle {} ({}); {} of {} cycles completed",
                    failure.cycle,
                    failure.state,
                    self.completed.len(),
                    self.requested
                );
            }
            None => info!("All {} cycles completed", self.completed.len()),
        }
    }
}

/// Runs the configured number of triggered acquisitions, one task per cycle.
pub struct RunController<D: Driver> {
    driver: D,
    config: AcquisitionConfig,
    state: CycleState,
}

impl<D: Driver> RunController<D> {
    pub fn new(driver: D, config: AcquisitionConfig) -> Self {
        Self {
            driver,
            config,
            state: CycleState::Idle,
        }
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn into_driver(self) -> D {
        self.driver
    }

    /// Run every cycle in order. The first failure ends the run.
    pub fn run(&mut self) -> RunReport {
        let mut report = RunReport {
            requested: self.config.cycles,
            completed: Vec::with_capacity(self.config.cycles as usize),
            failure: None,
        };
        for index in 0..self.config.cycles {
            match self.run_cycle(index) {
                Ok(record) => report.completed.push(record),
                Err(failure) => {
                    report.failure = Some(failure);
                    break;
                }
            }
        }
        report
    }

    pub fn run_cycle(&mut self, index: u32) -> Result<CycleRecord, CycleFailure> {
        let started = OffsetDateTime::now_utc();
        let path = self.config.output_path(index);
        self.state = CycleState::Idle;

        let mut task = match Task::create(&mut self.driver, "") {
            Ok(task) => task,
            Err(error) => {
                self.state = CycleState::Terminate;
                return Err(failure(index, CycleState::Idle, error));
            }
        };

        if let Err(status) = acquire(&mut task, &self.config, index, &path, &mut self.state) {
            let reached = self.state;
            self.state = CycleState::Error;
            // The message must be read before stop/clear overwrite it.
            let error = DriverError::capture(task.driver_mut(), status);
            self.state = CycleState::Cleanup;
            drop(task);
            self.state = CycleState::Terminate;
            return Err(failure(index, reached, error));
        }

        self.state = CycleState::Logging;
        if let Err(error) = task.clear() {
            self.state = CycleState::Terminate;
            return Err(failure(index, CycleState::Logging, error));
        }

        info!(
            "Acquisition {index} complete of {}",
            self.config.physical_channel
        );
        info!("Wrote {} samples", self.config.samples);
        self.state = CycleState::Idle;
        Ok(CycleRecord {
            index,
            path,
            samples: self.config.samples,
            started,
            finished: OffsetDateTime::now_utc(),
        })
    }
}

fn failure(cycle: u32, state: CycleState, error: DriverError) -> CycleFailure {
    debug!(
        "cycle {cycle} terminated in {state} with status {}",
        error.status.code()
    );
    CycleFailure {
        cycle,
        state,
        error,
    }
}

/// Configure, arm and wait out one acquisition on `task`.
fn acquire<D: Driver>(
    task: &mut Task<'_, D>,
    config: &AcquisitionConfig,
    index: u32,
    path: &Path,
    state: &mut CycleState,
) -> Result<(), DaqReturn> {
    task.create_ai_voltage_chan(
        &config.physical_channel,
        &config.channel_name,
        config.terminal,
        config.min_val,
        config.max_val,
    )?;
    task.cfg_samp_clk_timing(
        &config.clock_source,
        config.rate,
        config.clock_edge,
        SampleMode::Finite,
        config.samples,
    )?;
    task.cfg_dig_edge_start_trig(&config.trigger_source, config.trigger_edge)?;
    info!("{} filename", path.display());
    task.configure_logging(
        path,
        config.logging_mode,
        &config.group_name,
        config.logging_operation,
    )?;
    *state = CycleState::Configured;

    task.start()?;
    *state = CycleState::Armed;
    info!(
        "Cycle {index}: waiting for trigger on {}",
        config.trigger_source
    );

    // The driver does not report the trigger edge separately; capture
    // starts and finishes inside this wait.
    *state = CycleState::Acquiring;
    task.wait_until_done(config.wait_timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{load_conf, read_segments, RunArgs, SimFault, SimOp, SimulatedDaq};
    use std::collections::HashSet;

    fn config(dir: &Path, cycles: u32) -> AcquisitionConfig {
        let args = RunArgs {
            rate: Some(1000.0),
            duration: 0.5,
            cycles,
            filename_prefix: dir.join("cycle_").to_string_lossy().into_owned(),
        };
        AcquisitionConfig::new(&load_conf(None).unwrap(), &args).unwrap()
    }

    #[test]
    fn full_run_writes_one_file_per_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = RunController::new(SimulatedDaq::new(), config(dir.path(), 3));
        let report = controller.run();

        assert!(report.is_success());
        let paths = report.output_paths();
        assert_eq!(paths.len(), 3);
        assert_eq!(paths.iter().collect::<HashSet<_>>().len(), 3);
        assert_eq!(paths[2], dir.path().join("cycle_2.tdms"));
        for path in &paths {
            let segments = read_segments(path).unwrap();
            assert_eq!(segments.len(), 1);
            assert_eq!(segments[0].samples.len(), 501);
        }
        assert_eq!(controller.state(), CycleState::Idle);
        assert_eq!(controller.driver().live_tasks(), 0);
    }

    #[test]
    fn each_cycle_follows_the_driver_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = RunController::new(SimulatedDaq::new(), config(dir.path(), 1));
        controller.run();
        assert_eq!(
            controller.driver().ops(),
            vec![
                SimOp::CreateTask,
                SimOp::CreateAiVoltageChan,
                SimOp::CfgSampClkTiming,
                SimOp::CfgDigEdgeStartTrig,
                SimOp::ConfigureLogging,
                SimOp::StartTask,
                SimOp::WaitUntilTaskDone,
                SimOp::ClearTask,
            ]
        );
    }

    #[test]
    fn mid_run_failure_stops_the_run_and_releases_the_task() {
        let dir = tempfile::tempdir().unwrap();
        let daq = SimulatedDaq::new().with_fault(SimFault::new(
            SimOp::StartTask,
            2,
            DaqReturn::ResourceReserved,
            "The specified resource is reserved.",
        ));
        let mut controller = RunController::new(daq, config(dir.path(), 4));
        let report = controller.run();

        assert!(!report.is_success());
        assert_eq!(report.completed.len(), 1);
        let failure = report.failure.unwrap();
        assert_eq!(failure.cycle, 1);
        assert_eq!(failure.state, CycleState::Configured);
        assert_eq!(failure.error.status, DaqReturn::ResourceReserved);
        assert!(failure
            .error
            .message
            .starts_with("The specified resource is reserved."));
        assert_eq!(controller.state(), CycleState::Terminate);

        let daq = controller.into_driver();
        assert_eq!(daq.live_tasks(), 0);
        let ops = daq.ops();
        assert_eq!(
            &ops[ops.len() - 3..],
            &[SimOp::StartTask, SimOp::StopTask, SimOp::ClearTask]
        );
        assert!(!dir.path().join("cycle_2.tdms").exists());
    }

    #[test]
    fn failure_to_create_a_task_needs_no_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let daq = SimulatedDaq::new().with_fault(SimFault::new(
            SimOp::CreateTask,
            1,
            DaqReturn::Other(-200220),
            "Device identifier is invalid.",
        ));
        let mut controller = RunController::new(daq, config(dir.path(), 2));
        let report = controller.run();

        assert!(report.completed.is_empty());
        let failure = report.failure.unwrap();
        assert_eq!(failure.state, CycleState::Idle);
        assert_eq!(failure.error.status.code(), -200220);
        assert_eq!(controller.driver().ops(), vec![SimOp::CreateTask]);
    }

    #[test]
    fn bad_channel_fails_the_first_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path(), 2);
        config.physical_channel = "Dev1/port0/line0".to_string();
        let mut controller = RunController::new(SimulatedDaq::new(), config);
        let report = controller.run();

        let failure = report.failure.unwrap();
        assert_eq!(failure.cycle, 0);
        assert_eq!(failure.state, CycleState::Idle);
        assert_eq!(failure.error.status, DaqReturn::PhysicalChanDoesNotExist);
        assert!(failure.error.to_string().starts_with("DAQmx Error: "));
        assert_eq!(controller.driver().live_tasks(), 0);
    }

    #[test]
    fn wait_timeout_is_reported_from_the_acquiring_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path(), 1);
        config.wait_timeout = Some(std::time::Duration::from_millis(5));
        let daq = SimulatedDaq::new().with_trigger_delay(std::time::Duration::from_secs(60));
        let mut controller = RunController::new(daq, config);
        let report = controller.run();

        let failure = report.failure.unwrap();
        assert_eq!(failure.state, CycleState::Acquiring);
        assert_eq!(failure.error.status, DaqReturn::WaitUntilDoneTimeout);
        assert_eq!(controller.driver().live_tasks(), 0);
    }

    #[test]
    fn failing_clear_is_still_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let daq = SimulatedDaq::new().with_fault(SimFault::new(
            SimOp::ClearTask,
            1,
            DaqReturn::InvalidTask,
            "Task specified is invalid or does not exist.",
        ));
        let mut controller = RunController::new(daq, config(dir.path(), 3));
        let report = controller.run();

        assert!(report.completed.is_empty());
        let failure = report.failure.unwrap();
        assert_eq!(failure.state, CycleState::Logging);
        assert_eq!(failure.error.status, DaqReturn::InvalidTask);
        assert_eq!(controller.state(), CycleState::Terminate);

        let daq = controller.into_driver();
        assert_eq!(daq.live_tasks(), 0);
        let ops = daq.ops();
        assert_eq!(ops.len(), 10);
        assert_eq!(
            ops[7..],
            [SimOp::ClearTask, SimOp::StopTask, SimOp::ClearTask]
        );
    }
}
