use crate::DaqReturn;
use serde::Deserialize;
use std::{fmt, path::Path, time::Duration};
use thiserror::Error;

/// Opaque handle to one driver task.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TaskHandle(pub usize);

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task {:#x}", self.0)
    }
}

#[derive(Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "kebab-case")]
pub enum TerminalConfig {
    Default,
    Rse,
    Nrse,
    Diff,
    PseudoDiff,
}

#[derive(Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "kebab-case")]
pub enum Edge {
    Rising,
    Falling,
}

#[derive(Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "kebab-case")]
pub enum SampleMode {
    Finite,
    Continuous,
}

#[derive(Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "kebab-case")]
pub enum LoggingMode {
    Log,
    LogAndRead,
}

/// What the driver does with an existing (or missing) log file.
#[derive(Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "kebab-case")]
pub enum LoggingOperation {
    Open,
    OpenOrCreate,
    CreateOrReplace,
    Create,
}

/// The subset of the vendor driver API the run controller needs.
///
/// Every call returns the driver status on failure. The extended, human
/// readable description of the last failure is only available through
/// [`Driver::extended_error_info`] and only until the next driver call.
pub trait Driver {
    fn create_task(&mut self, name: &str) -> Result<TaskHandle, DaqReturn>;

    fn create_ai_voltage_chan(
        &mut self,
        task: TaskHandle,
        physical_channel: &str,
        name: &str,
        terminal: TerminalConfig,
        min_val: f64,
        max_val: f64,
    ) -> Result<(), DaqReturn>;

    fn cfg_samp_clk_timing(
        &mut self,
        task: TaskHandle,
        source: &str,
        rate: f64,
        active_edge: Edge,
        mode: SampleMode,
        samps_per_chan: u64,
    ) -> Result<(), DaqReturn>;

    fn cfg_dig_edge_start_trig(
        &mut self,
        task: TaskHandle,
        source: &str,
        edge: Edge,
    ) -> Result<(), DaqReturn>;

    fn configure_logging(
        &mut self,
        task: TaskHandle,
        path: &Path,
        mode: LoggingMode,
        group_name: &str,
        operation: LoggingOperation,
    ) -> Result<(), DaqReturn>;

    fn start_task(&mut self, task: TaskHandle) -> Result<(), DaqReturn>;

    /// Blocks until the task finishes. `None` waits forever.
    fn wait_until_task_done(
        &mut self,
        task: TaskHandle,
        timeout: Option<Duration>,
    ) -> Result<(), DaqReturn>;

    fn stop_task(&mut self, task: TaskHandle) -> Result<(), DaqReturn>;

    fn clear_task(&mut self, task: TaskHandle) -> Result<(), DaqReturn>;

    fn extended_error_info(&mut self) -> String;
}

/// Which driver a run talks to.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Backend {
    Simulated,
    #[cfg(feature = "nidaqmx")]
    NiDaqmx,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("NI-DAQmx support is not built in; rebuild with `--features nidaqmx` or pass --simulate")]
pub struct BackendUnavailable;

impl Backend {
    /// The simulator runs only when asked for.
    pub fn select(simulate: bool) -> Result<Self, BackendUnavailable> {
        if simulate {
            Ok(Self::Simulated)
        } else {
            Self::hardware()
        }
    }

    #[cfg(feature = "nidaqmx")]
    fn hardware() -> Result<Self, BackendUnavailable> {
        Ok(Self::NiDaqmx)
    }

    #[cfg(not(feature = "nidaqmx"))]
    fn hardware() -> Result<Self, BackendUnavailable> {
        Err(BackendUnavailable)
    }
}

/// A failed driver call together with the driver's explanation of it.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("DAQmx Error: {message}")]
pub struct DriverError {
    pub status: DaqReturn,
    pub message: String,
}

impl DriverError {
    /// Reads the extended error info for `status`. Must run before any other
    /// driver call, which would overwrite it.
    pub fn capture<D: Driver + ?Sized>(driver: &mut D, status: DaqReturn) -> Self {
        let mut message = driver.extended_error_info();
        if message.trim().is_empty() {
            message = format!("driver call failed with status code {}", status.code());
        }
        Self { status, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulator_only_on_request() {
        assert_eq!(Backend::select(true), Ok(Backend::Simulated));
        #[cfg(feature = "nidaqmx")]
        assert_eq!(Backend::select(false), Ok(Backend::NiDaqmx));
        #[cfg(not(feature = "nidaqmx"))]
        assert_eq!(Backend::select(false), Err(BackendUnavailable));
    }

    #[test]
    fn empty_driver_message_falls_back_to_the_status() {
        let mut daq = crate::SimulatedDaq::new();
        let error = DriverError::capture(&mut daq, DaqReturn::InvalidTask);
        assert_eq!(error.status, DaqReturn::InvalidTask);
        assert_eq!(
            error.to_string(),
            "DAQmx Error: driver call failed with status code -200088"
        );
    }
}
