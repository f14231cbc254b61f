use crate::{
    DaqReturn, Driver, DriverError, Edge, LoggingMode, LoggingOperation, SampleMode, TaskHandle,
    TerminalConfig,
};
use log::{debug, warn};
use std::{path::Path, time::Duration};

/// A live driver task.
///
/// Owns its handle exclusively. Dropping a `Task` that was not cleared with
/// [`Task::clear`] stops and clears it, so a handle never outlives the scope
/// that created it.
pub struct Task<'d, D: Driver> {
    driver: &'d mut D,
    handle: TaskHandle,
    released: bool,
}

impl<'d, D: Driver> Task<'d, D> {
    pub fn create(driver: &'d mut D, name: &str) -> Result<Self, DriverError> {
        match driver.create_task(name) {
            Ok(handle) => {
                debug!("{handle}: created");
                Ok(Self {
                    driver,
                    handle,
                    released: false,
                })
            }
            Err(status) => Err(DriverError::capture(driver, status)),
        }
    }

    pub fn handle(&self) -> TaskHandle {
        self.handle
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut *self.driver
    }

    pub fn create_ai_voltage_chan(
        &mut self,
        physical_channel: &str,
        name: &str,
        terminal: TerminalConfig,
        min_val: f64,
        max_val: f64,
    ) -> Result<(), DaqReturn> {
        debug!(
            "{}: ai voltage channel {physical_channel} {terminal:?} [{min_val}, {max_val}] V",
            self.handle
        );
        self.driver
            .create_ai_voltage_chan(self.handle, physical_channel, name, terminal, min_val, max_val)
    }

    pub fn cfg_samp_clk_timing(
        &mut self,
        source: &str,
        rate: f64,
        active_edge: Edge,
        mode: SampleMode,
        samps_per_chan: u64,
    ) -> Result<(), DaqReturn> {
        debug!(
            "{}: sample clock {rate} S/s {active_edge:?} {mode:?} {samps_per_chan} samples",
            self.handle
        );
        self.driver
            .cfg_samp_clk_timing(self.handle, source, rate, active_edge, mode, samps_per_chan)
    }

    pub fn cfg_dig_edge_start_trig(&mut self, source: &str, edge: Edge) -> Result<(), DaqReturn> {
        debug!("{}: start trigger {source} {edge:?}", self.handle);
        self.driver.cfg_dig_edge_start_trig(self.handle, source, edge)
    }

    pub fn configure_logging(
        &mut self,
        path: &Path,
        mode: LoggingMode,
        group_name: &str,
        operation: LoggingOperation,
    ) -> Result<(), DaqReturn> {
        debug!("{}: logging to {} ({mode:?})", self.handle, path.display());
        self.driver
            .configure_logging(self.handle, path, mode, group_name, operation)
    }

    pub fn start(&mut self) -> Result<(), DaqReturn> {
        self.driver.start_task(self.handle)
    }

    pub fn wait_until_done(&mut self, timeout: Option<Duration>) -> Result<(), DaqReturn> {
        self.driver.wait_until_task_done(self.handle, timeout)
    }

    /// Clears the task. If the driver refuses, the guard still owns the
    /// handle and stops and clears it again when dropped.
    pub fn clear(mut self) -> Result<(), DriverError> {
        debug!("{}: clearing", self.handle);
        if let Err(status) = self.driver.clear_task(self.handle) {
            return Err(DriverError::capture(&mut *self.driver, status));
        }
        self.released = true;
        Ok(())
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        debug!("{}: stopping and clearing", self.handle);
        if let Err(e) = self.driver.stop_task(self.handle) {
            warn!("{}: stop failed with status {}", self.handle, e.code());
        }
        if let Err(e) = self.driver.clear_task(self.handle) {
            warn!("{}: clear failed with status {}", self.handle, e.code());
        }
    }
}

impl<D: Driver> Drop for Task<'_, D> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SimFault, SimOp, SimulatedDaq};

    #[test]
    fn dropping_an_uncleared_task_stops_and_clears_it() {
        let mut daq = SimulatedDaq::new();
        {
            let mut task = Task::create(&mut daq, "").unwrap();
            task.create_ai_voltage_chan("Dev1/ai0", "", TerminalConfig::Diff, -10.0, 10.0)
                .unwrap();
        }
        assert_eq!(daq.live_tasks(), 0);
        assert_eq!(
            daq.ops(),
            vec![
                SimOp::CreateTask,
                SimOp::CreateAiVoltageChan,
                SimOp::StopTask,
                SimOp::ClearTask
            ]
        );
    }

    #[test]
    fn explicit_clear_is_not_repeated_on_drop() {
        let mut daq = SimulatedDaq::new();
        let task = Task::create(&mut daq, "").unwrap();
        task.clear().unwrap();
        assert_eq!(daq.live_tasks(), 0);
        assert_eq!(daq.ops(), vec![SimOp::CreateTask, SimOp::ClearTask]);
    }

    #[test]
    fn refused_clear_is_retried_on_drop() {
        let mut daq = SimulatedDaq::new().with_fault(SimFault::new(
            SimOp::ClearTask,
            1,
            DaqReturn::InvalidTask,
            "Task specified is invalid or does not exist.",
        ));
        let task = Task::create(&mut daq, "").unwrap();
        let error = task.clear().unwrap_err();
        assert_eq!(error.status, DaqReturn::InvalidTask);
        assert!(error.message.starts_with("Task specified is invalid"));
        assert_eq!(daq.live_tasks(), 0);
        assert_eq!(
            daq.ops(),
            vec![
                SimOp::CreateTask,
                SimOp::ClearTask,
                SimOp::StopTask,
                SimOp::ClearTask
            ]
        );
    }
}
