//! In-process stand-in for the vendor driver.
//!
//! `SimulatedDaq` follows the same call contract as NI-DAQmx for the calls in
//! [`Driver`]: handles must be live, a task needs a channel before it can
//! start, and the extended error info describes the last failure. Waiting on
//! a finite task synthesizes the waveform and writes it to the configured log
//! file through [`WaveformWriter`].

use crate::{
    open_log_file, DaqReturn, Driver, Edge, LoggingMode, LoggingOperation, SampleMode,
    SegmentHeader, TaskHandle, TerminalConfig, WaveformWriter,
};
use log::debug;
use ndarray::Array1;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{
    collections::HashMap,
    f64::consts::PI,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

/// Samples generated and written per chunk.
const CHUNK_LEN: usize = 65536;
/// Frequency of the synthesized test tone.
const TONE_HZ: f64 = 50.0;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum SimOp {
    CreateTask,
    CreateAiVoltageChan,
    CfgSampClkTiming,
    CfgDigEdgeStartTrig,
    ConfigureLogging,
    StartTask,
    WaitUntilTaskDone,
    StopTask,
    ClearTask,
}

/// One recorded driver call.
#[derive(Clone, PartialEq, Debug)]
pub struct SimCall {
    pub op: SimOp,
    pub task: Option<TaskHandle>,
}

/// Makes the `occurrence`-th call (1-based) of `op` fail with `status`.
#[derive(Clone, Debug)]
pub struct SimFault {
    pub op: SimOp,
    pub occurrence: usize,
    pub status: DaqReturn,
    pub message: String,
}

impl SimFault {
    pub fn new(op: SimOp, occurrence: usize, status: DaqReturn, message: &str) -> Self {
        Self {
            op,
            occurrence,
            status,
            message: message.to_string(),
        }
    }
}

#[derive(Clone, Debug)]
struct SimChannel {
    physical: String,
    min_val: f64,
    max_val: f64,
}

#[derive(Clone, Copy, Debug)]
struct SimTiming {
    rate: f64,
    mode: SampleMode,
    samps_per_chan: u64,
}

#[derive(Clone, Debug)]
struct SimLogging {
    path: PathBuf,
    group: String,
    operation: LoggingOperation,
}

#[derive(Debug)]
struct SimTask {
    name: String,
    channels: Vec<SimChannel>,
    timing: Option<SimTiming>,
    trigger: Option<String>,
    logging: Option<SimLogging>,
    running: bool,
}

pub struct SimulatedDaq {
    tasks: HashMap<TaskHandle, SimTask>,
    next_handle: usize,
    calls: Vec<SimCall>,
    counts: HashMap<SimOp, usize>,
    faults: Vec<SimFault>,
    last_error: String,
    trigger_delay: Duration,
    rng: StdRng,
}

impl Default for SimulatedDaq {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDaq {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            next_handle: 1,
            calls: Vec::new(),
            counts: HashMap::new(),
            faults: Vec::new(),
            last_error: String::new(),
            trigger_delay: Duration::ZERO,
            rng: StdRng::seed_from_u64(0x5eed),
        }
    }

    pub fn with_fault(mut self, fault: SimFault) -> Self {
        self.faults.push(fault);
        self
    }

    /// Time between `start_task` and the simulated trigger edge. Waits
    /// actually sleep for this long.
    pub fn with_trigger_delay(mut self, delay: Duration) -> Self {
        self.trigger_delay = delay;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn calls(&self) -> &[SimCall] {
        &self.calls
    }

    pub fn ops(&self) -> Vec<SimOp> {
        self.calls.iter().map(|c| c.op).collect()
    }

    /// Number of tasks created and not yet cleared.
    pub fn live_tasks(&self) -> usize {
        self.tasks.len()
    }

    fn record(&mut self, op: SimOp, task: Option<TaskHandle>) -> Result<(), DaqReturn> {
        self.calls.push(SimCall { op, task });
        let count = self.counts.entry(op).or_insert(0);
        *count += 1;
        let count = *count;

        let fault = self
            .faults
            .iter()
            .find(|f| f.op == op && f.occurrence == count)
            .cloned();
        match fault {
            Some(fault) => Err(self.fail(task, fault.status, &fault.message)),
            None => Ok(()),
        }
    }

    fn fail(&mut self, task: Option<TaskHandle>, status: DaqReturn, message: &str) -> DaqReturn {
        let mut info = message.to_string();
        if let Some(name) = task.and_then(|t| self.tasks.get(&t)).map(|t| t.name.clone()) {
            info.push_str(&format!("\nTask Name: {name}\n"));
        }
        info.push_str(&format!("\nStatus Code: {}", status.code()));
        debug!("simulated driver failure: {}", info.replace('\n', " "));
        self.last_error = info;
        status
    }

    fn task_mut(&mut self, task: TaskHandle) -> Result<&mut SimTask, DaqReturn> {
        if !self.tasks.contains_key(&task) {
            return Err(self.fail(
                None,
                DaqReturn::InvalidTask,
                "Task specified is invalid or does not exist.",
            ));
        }
        self.tasks.get_mut(&task).ok_or(DaqReturn::InvalidTask)
    }

    fn attribute_error(&mut self, task: TaskHandle, message: &str) -> DaqReturn {
        self.fail(Some(task), DaqReturn::InvalidAttributeValue, message)
    }

    fn write_log(
        &mut self,
        logging: &SimLogging,
        channels: &[SimChannel],
        timing: SimTiming,
    ) -> anyhow::Result<()> {
        for channel in channels {
            let header = SegmentHeader {
                group: logging.group.clone(),
                channel: channel.physical.clone(),
                rate: timing.rate,
                n_samples: timing.samps_per_chan,
            };
            let file = open_log_file(&logging.path, logging.operation)?;
            let mut writer = WaveformWriter::new(file, &header, CHUNK_LEN)?;
            let mut produced = 0u64;
            while produced < timing.samps_per_chan {
                let len = (timing.samps_per_chan - produced).min(CHUNK_LEN as u64) as usize;
                let chunk = self.synthesize(channel, timing.rate, produced, len);
                writer.append(chunk.view())?;
                produced += len as u64;
            }
            let written = writer.finish()?;
            debug!(
                "simulated driver wrote {written} samples of {} to {}",
                channel.physical,
                logging.path.display()
            );
        }
        Ok(())
    }

    /// A tone at half scale plus a little noise, clamped to the channel range.
    fn synthesize(&mut self, channel: &SimChannel, rate: f64, first: u64, len: usize) -> Array1<f64> {
        let mid = (channel.max_val + channel.min_val) / 2.0;
        let amplitude = (channel.max_val - channel.min_val) / 4.0;
        let noise = amplitude * 0.05;
        let rng = &mut self.rng;
        Array1::from_shape_fn(len, |i| {
            let t = (first + i as u64) as f64 / rate;
            let v = mid + amplitude * (2.0 * PI * TONE_HZ * t).sin() + rng.random_range(-noise..=noise);
            v.clamp(channel.min_val, channel.max_val)
        })
    }
}

fn is_ai_channel(physical: &str) -> bool {
    let mut parts = physical.trim_start_matches('/').split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(dev), Some(chan), None) => {
            !dev.is_empty()
                && chan
                    .strip_prefix("ai")
                    .is_some_and(|n| n.parse::<u32>().is_ok())
        }
        _ => false,
    }
}

impl Driver for SimulatedDaq {
    fn create_task(&mut self, name: &str) -> Result<TaskHandle, DaqReturn> {
        self.record(SimOp::CreateTask, None)?;
        let handle = TaskHandle(self.next_handle);
        let name = if name.is_empty() {
            format!("_unnamedTask<{}>", self.next_handle - 1)
        } else {
            name.to_string()
        };
        self.next_handle += 1;
        self.tasks.insert(
            handle,
            SimTask {
                name,
                channels: Vec::new(),
                timing: None,
                trigger: None,
                logging: None,
                running: false,
            },
        );
        Ok(handle)
    }

    fn create_ai_voltage_chan(
        &mut self,
        task: TaskHandle,
        physical_channel: &str,
        _name: &str,
        _terminal: TerminalConfig,
        min_val: f64,
        max_val: f64,
    ) -> Result<(), DaqReturn> {
        self.record(SimOp::CreateAiVoltageChan, Some(task))?;
        self.task_mut(task)?;
        if !is_ai_channel(physical_channel) {
            return Err(self.fail(
                Some(task),
                DaqReturn::PhysicalChanDoesNotExist,
                &format!("Physical channel specified does not exist on this device.\nPhysical Channel Name: {physical_channel}"),
            ));
        }
        if !(min_val < max_val) {
            return Err(self.attribute_error(
                task,
                &format!("Minimum {min_val} must be less than maximum {max_val}."),
            ));
        }
        self.task_mut(task)?.channels.push(SimChannel {
            physical: physical_channel.trim_start_matches('/').to_string(),
            min_val,
            max_val,
        });
        Ok(())
    }

    fn cfg_samp_clk_timing(
        &mut self,
        task: TaskHandle,
        _source: &str,
        rate: f64,
        _active_edge: Edge,
        mode: SampleMode,
        samps_per_chan: u64,
    ) -> Result<(), DaqReturn> {
        self.record(SimOp::CfgSampClkTiming, Some(task))?;
        self.task_mut(task)?;
        if !(rate.is_finite() && rate > 0.0) {
            return Err(self.attribute_error(
                task,
                &format!("Requested sample clock rate {rate} is not supported."),
            ));
        }
        if mode == SampleMode::Finite && samps_per_chan < 2 {
            return Err(self.attribute_error(
                task,
                &format!("Samples per channel {samps_per_chan} is too small for a finite acquisition."),
            ));
        }
        self.task_mut(task)?.timing = Some(SimTiming {
            rate,
            mode,
            samps_per_chan,
        });
        Ok(())
    }

    fn cfg_dig_edge_start_trig(
        &mut self,
        task: TaskHandle,
        source: &str,
        _edge: Edge,
    ) -> Result<(), DaqReturn> {
        self.record(SimOp::CfgDigEdgeStartTrig, Some(task))?;
        self.task_mut(task)?;
        if source.trim().is_empty() {
            return Err(self.attribute_error(task, "Trigger source must not be empty."));
        }
        self.task_mut(task)?.trigger = Some(source.to_string());
        Ok(())
    }

    fn configure_logging(
        &mut self,
        task: TaskHandle,
        path: &Path,
        _mode: LoggingMode,
        group_name: &str,
        operation: LoggingOperation,
    ) -> Result<(), DaqReturn> {
        self.record(SimOp::ConfigureLogging, Some(task))?;
        self.task_mut(task)?;
        if path.as_os_str().is_empty() {
            return Err(self.attribute_error(task, "Logging file path must not be empty."));
        }
        self.task_mut(task)?.logging = Some(SimLogging {
            path: path.to_path_buf(),
            group: group_name.to_string(),
            operation,
        });
        Ok(())
    }

    fn start_task(&mut self, task: TaskHandle) -> Result<(), DaqReturn> {
        self.record(SimOp::StartTask, Some(task))?;
        let sim = self.task_mut(task)?;
        let no_channels = sim.channels.is_empty();
        let logging = sim.logging.clone();
        if no_channels {
            return Err(self.fail(
                Some(task),
                DaqReturn::NoChansInTask,
                "Specified operation cannot be performed when there are no channels in the task.",
            ));
        }
        if let Some(logging) = logging {
            let problem = match logging.operation {
                LoggingOperation::Open if !logging.path.exists() => Some("does not exist"),
                LoggingOperation::Create if logging.path.exists() => Some("already exists"),
                _ => None,
            };
            if let Some(problem) = problem {
                return Err(self.fail(
                    Some(task),
                    DaqReturn::LogFileAccess,
                    &format!("Logging file {} {problem}.", logging.path.display()),
                ));
            }
        }
        self.task_mut(task)?.running = true;
        Ok(())
    }

    fn wait_until_task_done(
        &mut self,
        task: TaskHandle,
        timeout: Option<Duration>,
    ) -> Result<(), DaqReturn> {
        self.record(SimOp::WaitUntilTaskDone, Some(task))?;
        let sim = self.task_mut(task)?;
        if !sim.running {
            return Ok(());
        }
        let channels = sim.channels.clone();
        let timing = sim.timing;
        let logging = sim.logging.clone();
        let trigger = sim.trigger.clone();

        if let Some(timing) = timing {
            if timing.mode == SampleMode::Continuous {
                thread::sleep(timeout.unwrap_or(Duration::ZERO));
                return Err(self.fail(
                    Some(task),
                    DaqReturn::WaitUntilDoneTimeout,
                    "Wait Until Done did not indicate all samples were acquired.",
                ));
            }
        }

        if let Some(timeout) = timeout {
            if trigger.is_some() && self.trigger_delay > timeout {
                thread::sleep(timeout);
                return Err(self.fail(
                    Some(task),
                    DaqReturn::WaitUntilDoneTimeout,
                    "Wait Until Done did not indicate all samples were acquired.",
                ));
            }
        }
        if trigger.is_some() {
            thread::sleep(self.trigger_delay);
        }

        if let (Some(logging), Some(timing)) = (logging, timing) {
            if let Err(e) = self.write_log(&logging, &channels, timing) {
                return Err(self.fail(
                    Some(task),
                    DaqReturn::LogFileAccess,
                    &format!("Could not write {}: {e}", logging.path.display()),
                ));
            }
        }
        self.task_mut(task)?.running = false;
        Ok(())
    }

    fn stop_task(&mut self, task: TaskHandle) -> Result<(), DaqReturn> {
        self.record(SimOp::StopTask, Some(task))?;
        self.task_mut(task)?.running = false;
        Ok(())
    }

    fn clear_task(&mut self, task: TaskHandle) -> Result<(), DaqReturn> {
        self.record(SimOp::ClearTask, Some(task))?;
        self.task_mut(task)?;
        self.tasks.remove(&task);
        Ok(())
    }

    fn extended_error_info(&mut self) -> String {
        self.last_error.clone()
    }
}
