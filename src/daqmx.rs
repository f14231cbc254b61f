//! NI-DAQmx status codes, attribute values and (behind the `nidaqmx` feature)
//! the C library bindings.

#![allow(non_upper_case_globals)]
#![allow(non_snake_case)]

use crate::{Edge, LoggingMode, LoggingOperation, SampleMode, TerminalConfig};
use log::warn;
use std::{ffi::CString, path::Path};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DaqReturn {
    Success,
    /// Positive status codes are warnings; the call still completed.
    Warning(i32),
    ResourceReserved,
    InvalidAttributeValue,
    InvalidTask,
    PhysicalChanDoesNotExist,
    NoChansInTask,
    WaitUntilDoneTimeout,
    LogFileAccess,
    Other(i32),
}

impl From<i32> for DaqReturn {
    fn from(value: i32) -> Self {
        match value {
            0 => Self::Success,
            -50103 => Self::ResourceReserved,
            -200077 => Self::InvalidAttributeValue,
            -200088 => Self::InvalidTask,
            -200170 => Self::PhysicalChanDoesNotExist,
            -200478 => Self::NoChansInTask,
            -200560 => Self::WaitUntilDoneTimeout,
            -201401 => Self::LogFileAccess,
            v if v > 0 => Self::Warning(v),
            v => Self::Other(v),
        }
    }
}

impl DaqReturn {
    pub fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Warning(v) => v,
            Self::ResourceReserved => -50103,
            Self::InvalidAttributeValue => -200077,
            Self::InvalidTask => -200088,
            Self::PhysicalChanDoesNotExist => -200170,
            Self::NoChansInTask => -200478,
            Self::WaitUntilDoneTimeout => -200560,
            Self::LogFileAccess => -201401,
            Self::Other(v) => v,
        }
    }

    pub fn is_failure(self) -> bool {
        self.code() < 0
    }
}

/// Turns a raw status into a `Result`. Warnings are logged and treated as success.
pub fn check(code: i32) -> Result<(), DaqReturn> {
    match DaqReturn::from(code) {
        DaqReturn::Success => Ok(()),
        DaqReturn::Warning(w) => {
            warn!("DAQmx warning {w}");
            Ok(())
        }
        res => Err(res),
    }
}

pub const DAQmx_Val_Cfg_Default: i32 = -1;
pub const DAQmx_Val_RSE: i32 = 10083;
pub const DAQmx_Val_NRSE: i32 = 10078;
pub const DAQmx_Val_Diff: i32 = 10106;
pub const DAQmx_Val_PseudoDiff: i32 = 12529;
pub const DAQmx_Val_Volts: i32 = 10348;
pub const DAQmx_Val_Rising: i32 = 10280;
pub const DAQmx_Val_Falling: i32 = 10171;
pub const DAQmx_Val_FiniteSamps: i32 = 10178;
pub const DAQmx_Val_ContSamps: i32 = 10123;
pub const DAQmx_Val_Log: i32 = 15844;
pub const DAQmx_Val_LogAndRead: i32 = 15842;
pub const DAQmx_Val_Open: i32 = 10437;
pub const DAQmx_Val_OpenOrCreate: i32 = 15846;
pub const DAQmx_Val_CreateOrReplace: i32 = 15847;
pub const DAQmx_Val_Create: i32 = 15848;
pub const DAQmx_Val_WaitInfinitely: f64 = -1.0;

/// Size of the buffer handed to `DAQmxGetExtendedErrorInfo`.
pub const ERROR_BUFFER_LEN: usize = 2048;

impl TerminalConfig {
    pub fn raw(self) -> i32 {
        match self {
            Self::Default => DAQmx_Val_Cfg_Default,
            Self::Rse => DAQmx_Val_RSE,
            Self::Nrse => DAQmx_Val_NRSE,
            Self::Diff => DAQmx_Val_Diff,
            Self::PseudoDiff => DAQmx_Val_PseudoDiff,
        }
    }
}

impl Edge {
    pub fn raw(self) -> i32 {
        match self {
            Self::Rising => DAQmx_Val_Rising,
            Self::Falling => DAQmx_Val_Falling,
        }
    }
}

impl SampleMode {
    pub fn raw(self) -> i32 {
        match self {
            Self::Finite => DAQmx_Val_FiniteSamps,
            Self::Continuous => DAQmx_Val_ContSamps,
        }
    }
}

impl LoggingMode {
    pub fn raw(self) -> i32 {
        match self {
            Self::Log => DAQmx_Val_Log,
            Self::LogAndRead => DAQmx_Val_LogAndRead,
        }
    }
}

impl LoggingOperation {
    pub fn raw(self) -> i32 {
        match self {
            Self::Open => DAQmx_Val_Open,
            Self::OpenOrCreate => DAQmx_Val_OpenOrCreate,
            Self::CreateOrReplace => DAQmx_Val_CreateOrReplace,
            Self::Create => DAQmx_Val_Create,
        }
    }
}

/// Converts a NUL-padded C buffer into a `String`.
pub fn buffer_to_string(mut buffer: Vec<u8>) -> String {
    if let Some(end) = buffer.iter().position(|&b| b == 0) {
        buffer.truncate(end);
    }
    String::from_utf8_lossy(&buffer).trim_end().to_string()
}

/// Converts call arguments to C strings. A refused argument never reaches the
/// library, so its extended error info would describe some earlier call;
/// the reason is kept here instead until the next call goes through.
#[derive(Debug, Default)]
pub struct CArgs {
    rejected: Option<String>,
}

impl CArgs {
    pub fn c_string(&mut self, what: &str, value: &str) -> Result<CString, DaqReturn> {
        CString::new(value).map_err(|_| {
            self.reject(format!("{what} contains a NUL byte: {value:?}"))
        })
    }

    pub fn path(&mut self, what: &str, path: &Path) -> Result<CString, DaqReturn> {
        match path.to_str() {
            Some(value) => self.c_string(what, value),
            None => Err(self.reject(format!("{what} is not valid UTF-8: {path:?}"))),
        }
    }

    fn reject(&mut self, message: String) -> DaqReturn {
        self.rejected = Some(message);
        DaqReturn::InvalidAttributeValue
    }

    /// Forgets an earlier refusal once a call reaches the library.
    pub fn passed(&mut self) {
        self.rejected = None;
    }

    pub fn take_rejection(&mut self) -> Option<String> {
        self.rejected.take()
    }
}

#[cfg(feature = "nidaqmx")]
mod ffi {
    use libc::{c_char, c_void};

    pub type TaskHandle = *mut c_void;

    #[cfg_attr(windows, link(name = "NIDAQmx"))]
    #[cfg_attr(not(windows), link(name = "nidaqmx"))]
    extern "C" {
        pub fn DAQmxCreateTask(taskName: *const c_char, taskHandle: *mut TaskHandle) -> i32;
        pub fn DAQmxCreateAIVoltageChan(
            taskHandle: TaskHandle,
            physicalChannel: *const c_char,
            nameToAssignToChannel: *const c_char,
            terminalConfig: i32,
            minVal: f64,
            maxVal: f64,
            units: i32,
            customScaleName: *const c_char,
        ) -> i32;
        pub fn DAQmxCfgSampClkTiming(
            taskHandle: TaskHandle,
            source: *const c_char,
            rate: f64,
            activeEdge: i32,
            sampleMode: i32,
            sampsPerChan: u64,
        ) -> i32;
        pub fn DAQmxCfgDigEdgeStartTrig(
            taskHandle: TaskHandle,
            triggerSource: *const c_char,
            triggerEdge: i32,
        ) -> i32;
        pub fn DAQmxConfigureLogging(
            taskHandle: TaskHandle,
            filePath: *const c_char,
            loggingMode: i32,
            groupName: *const c_char,
            operation: i32,
        ) -> i32;
        pub fn DAQmxStartTask(taskHandle: TaskHandle) -> i32;
        pub fn DAQmxWaitUntilTaskDone(taskHandle: TaskHandle, timeToWait: f64) -> i32;
        pub fn DAQmxStopTask(taskHandle: TaskHandle) -> i32;
        pub fn DAQmxClearTask(taskHandle: TaskHandle) -> i32;
        pub fn DAQmxGetExtendedErrorInfo(errorString: *mut c_char, bufferSize: u32) -> i32;
    }
}

#[cfg(feature = "nidaqmx")]
pub use self::nidaqmx::NiDaqmx;

#[cfg(feature = "nidaqmx")]
mod nidaqmx {
    use super::{
        check, ffi, CArgs, DaqReturn, DAQmx_Val_Volts, DAQmx_Val_WaitInfinitely, ERROR_BUFFER_LEN,
    };
    use crate::{Driver, Edge, LoggingMode, LoggingOperation, SampleMode, TaskHandle, TerminalConfig};
    use std::{path::Path, ptr, time::Duration};

    fn raw(task: TaskHandle) -> ffi::TaskHandle {
        task.0 as ffi::TaskHandle
    }

    /// Driver backed by the installed NI-DAQmx library.
    #[derive(Debug, Default)]
    pub struct NiDaqmx {
        args: CArgs,
    }

    impl NiDaqmx {
        pub fn new() -> Self {
            Self::default()
        }

        fn call(&mut self, code: i32) -> Result<(), DaqReturn> {
            self.args.passed();
            check(code)
        }
    }

    impl Driver for NiDaqmx {
        fn create_task(&mut self, name: &str) -> Result<TaskHandle, DaqReturn> {
            let name = self.args.c_string("task name", name)?;
            let mut handle: ffi::TaskHandle = ptr::null_mut();
            self.call(unsafe { ffi::DAQmxCreateTask(name.as_ptr(), &mut handle) })?;
            Ok(TaskHandle(handle as usize))
        }

        fn create_ai_voltage_chan(
            &mut self,
            task: TaskHandle,
            physical_channel: &str,
            name: &str,
            terminal: TerminalConfig,
            min_val: f64,
            max_val: f64,
        ) -> Result<(), DaqReturn> {
            let physical_channel = self.args.c_string("physical channel", physical_channel)?;
            let name = self.args.c_string("channel name", name)?;
            self.call(unsafe {
                ffi::DAQmxCreateAIVoltageChan(
                    raw(task),
                    physical_channel.as_ptr(),
                    name.as_ptr(),
                    terminal.raw(),
                    min_val,
                    max_val,
                    DAQmx_Val_Volts,
                    ptr::null(),
                )
            })
        }

        fn cfg_samp_clk_timing(
            &mut self,
            task: TaskHandle,
            source: &str,
            rate: f64,
            active_edge: Edge,
            mode: SampleMode,
            samps_per_chan: u64,
        ) -> Result<(), DaqReturn> {
            let source = self.args.c_string("clock source", source)?;
            self.call(unsafe {
                ffi::DAQmxCfgSampClkTiming(
                    raw(task),
                    source.as_ptr(),
                    rate,
                    active_edge.raw(),
                    mode.raw(),
                    samps_per_chan,
                )
            })
        }

        fn cfg_dig_edge_start_trig(
            &mut self,
            task: TaskHandle,
            source: &str,
            edge: Edge,
        ) -> Result<(), DaqReturn> {
            let source = self.args.c_string("trigger source", source)?;
            self.call(unsafe { ffi::DAQmxCfgDigEdgeStartTrig(raw(task), source.as_ptr(), edge.raw()) })
        }

        fn configure_logging(
            &mut self,
            task: TaskHandle,
            path: &Path,
            mode: LoggingMode,
            group_name: &str,
            operation: LoggingOperation,
        ) -> Result<(), DaqReturn> {
            let path = self.args.path("log file path", path)?;
            let group_name = self.args.c_string("group name", group_name)?;
            self.call(unsafe {
                ffi::DAQmxConfigureLogging(
                    raw(task),
                    path.as_ptr(),
                    mode.raw(),
                    group_name.as_ptr(),
                    operation.raw(),
                )
            })
        }

        fn start_task(&mut self, task: TaskHandle) -> Result<(), DaqReturn> {
            self.call(unsafe { ffi::DAQmxStartTask(raw(task)) })
        }

        fn wait_until_task_done(
            &mut self,
            task: TaskHandle,
            timeout: Option<Duration>,
        ) -> Result<(), DaqReturn> {
            let time_to_wait = timeout
                .map(|t| t.as_secs_f64())
                .unwrap_or(DAQmx_Val_WaitInfinitely);
            self.call(unsafe { ffi::DAQmxWaitUntilTaskDone(raw(task), time_to_wait) })
        }

        fn stop_task(&mut self, task: TaskHandle) -> Result<(), DaqReturn> {
            self.call(unsafe { ffi::DAQmxStopTask(raw(task)) })
        }

        fn clear_task(&mut self, task: TaskHandle) -> Result<(), DaqReturn> {
            self.call(unsafe { ffi::DAQmxClearTask(raw(task)) })
        }

        fn extended_error_info(&mut self) -> String {
            if let Some(message) = self.args.take_rejection() {
                return message;
            }
            let mut buffer = vec![0u8; ERROR_BUFFER_LEN];
            let res = unsafe {
                ffi::DAQmxGetExtendedErrorInfo(
                    buffer.as_mut_ptr() as *mut libc::c_char,
                    ERROR_BUFFER_LEN as u32,
                )
            };
            if res < 0 {
                return String::new();
            }
            super::buffer_to_string(buffer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_both_ways() {
        for code in [0, -50103, -200077, -200088, -200170, -200478, -200560, -201401] {
            assert_eq!(DaqReturn::from(code).code(), code);
        }
        assert_eq!(DaqReturn::from(-209801), DaqReturn::Other(-209801));
        assert_eq!(DaqReturn::from(200015), DaqReturn::Warning(200015));
    }

    #[test]
    fn warnings_are_not_failures() {
        assert!(check(0).is_ok());
        assert!(check(200015).is_ok());
        assert_eq!(check(-200088), Err(DaqReturn::InvalidTask));
        assert!(!DaqReturn::Warning(1).is_failure());
        assert!(DaqReturn::Other(-1).is_failure());
    }

    #[test]
    fn attribute_values_match_the_c_header() {
        assert_eq!(TerminalConfig::Diff.raw(), 10106);
        assert_eq!(TerminalConfig::Default.raw(), -1);
        assert_eq!(Edge::Rising.raw(), 10280);
        assert_eq!(SampleMode::Finite.raw(), 10178);
        assert_eq!(LoggingMode::Log.raw(), 15844);
        assert_eq!(LoggingOperation::OpenOrCreate.raw(), 15846);
    }

    #[test]
    fn error_buffer_stops_at_nul() {
        let mut buffer = b"Task specified is invalid\n".to_vec();
        buffer.resize(64, 0);
        assert_eq!(buffer_to_string(buffer), "Task specified is invalid");
        assert_eq!(buffer_to_string(vec![0u8; 16]), "");
    }

    #[test]
    fn refused_arguments_keep_their_own_message() {
        let mut args = CArgs::default();
        assert!(args.c_string("trigger source", "/Dev1/PFI0").is_ok());
        assert_eq!(args.take_rejection(), None);

        assert_eq!(
            args.c_string("channel name", "ai\0x"),
            Err(DaqReturn::InvalidAttributeValue)
        );
        let message = args.take_rejection().unwrap();
        assert!(message.starts_with("channel name contains a NUL byte"));
        assert_eq!(args.take_rejection(), None);

        assert!(args.path("log file path", Path::new("bad\0.tdms")).is_err());
        args.passed();
        assert_eq!(args.take_rejection(), None);
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_log_path_is_refused() {
        use std::{ffi::OsStr, os::unix::ffi::OsStrExt};

        let mut args = CArgs::default();
        let path = Path::new(OsStr::from_bytes(b"run_\xff0.tdms"));
        assert_eq!(
            args.path("log file path", path),
            Err(DaqReturn::InvalidAttributeValue)
        );
        assert!(args
            .take_rejection()
            .unwrap()
            .starts_with("log file path is not valid UTF-8"));
    }
}
