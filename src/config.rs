use crate::{Edge, LoggingMode, LoggingOperation, RunArgs, TerminalConfig};
use confique::Config;
use log::info;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

/// Settings file. Every field has a default, so the file is optional.
#[derive(Config, Debug, Clone)]
pub struct Conf {
    #[config(nested)]
    pub channel: ChannelSettings,
    #[config(nested)]
    pub timing: TimingSettings,
    #[config(nested)]
    pub trigger: TriggerSettings,
    #[config(nested)]
    pub logging: LoggingSettings,
}

#[derive(Config, Debug, Clone)]
pub struct ChannelSettings {
    #[config(default = "/Dev1/ai0")]
    pub physical_channel: String,
    /// Name assigned to the channel in the task; empty keeps the physical name.
    #[config(default = "")]
    pub name: String,
    #[config(default = "diff")]
    pub terminal: TerminalConfig,
    #[config(default = 10.0)]
    pub max_val: f64,
    /// Defaults to `-max_val`.
    pub min_val: Option<f64>,
}

#[derive(Config, Debug, Clone)]
pub struct TimingSettings {
    /// Used when the rate is not given on the command line.
    #[config(default = 100000.0)]
    pub rate: f64,
    /// Empty selects the onboard clock.
    #[config(default = "")]
    pub clock_source: String,
    #[config(default = "rising")]
    pub active_edge: Edge,
    /// Absent waits for the trigger forever.
    pub wait_timeout_secs: Option<f64>,
}

#[derive(Config, Debug, Clone)]
pub struct TriggerSettings {
    #[config(default = "/Dev1/PFI0")]
    pub source: String,
    #[config(default = "rising")]
    pub edge: Edge,
}

#[derive(Config, Debug, Clone)]
pub struct LoggingSettings {
    #[config(default = "tdms")]
    pub extension: String,
    #[config(default = "GroupName")]
    pub group_name: String,
    #[config(default = "log")]
    pub mode: LoggingMode,
    #[config(default = "open-or-create")]
    pub operation: LoggingOperation,
}

/// Load the settings file, or the built-in defaults when `path` is `None`.
pub fn load_conf(path: Option<&Path>) -> Result<Conf, confique::Error> {
    match path {
        Some(path) => Conf::builder().file(path).load(),
        None => Conf::builder().load(),
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("sample rate must be positive, got {0}")]
    NonPositiveRate(f64),
    #[error("duration must be positive, got {0}")]
    NonPositiveDuration(f64),
    #[error("at least one cycle is required")]
    NoCycles,
    #[error("filename prefix must not be empty")]
    EmptyFilenameTemplate,
    #[error("file extension must not be empty")]
    EmptyExtension,
    #[error("physical channel must not be empty")]
    EmptyChannel,
    #[error("trigger source must not be empty")]
    EmptyTriggerSource,
    #[error("voltage range [{min}, {max}] is empty")]
    InvertedRange { min: f64, max: f64 },
    #[error("wait timeout must be positive, got {0}")]
    InvalidTimeout(f64),
    #[error("{rate} S/s for {duration} s needs more samples than a task can hold")]
    TooManySamples { rate: f64, duration: f64 },
}

/// Number of samples per channel for a finite acquisition. One sample is
/// added so truncating `rate * duration` never loses the tail. `None` when
/// the count does not fit in a `u64`.
pub fn sample_count(rate: f64, duration: f64) -> Option<u64> {
    let product = (rate * duration).floor();
    if !(product.is_finite() && product >= 0.0 && product < u64::MAX as f64) {
        return None;
    }
    (product as u64).checked_add(1)
}

/// `<template><index>.<extension>`
pub fn output_path(template: &str, index: u32, extension: &str) -> PathBuf {
    PathBuf::from(format!("{template}{index}.{extension}"))
}

/// Everything one run needs, validated.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionConfig {
    pub rate: f64,
    pub duration: f64,
    pub samples: u64,
    pub cycles: u32,
    pub filename_template: String,
    pub extension: String,
    pub physical_channel: String,
    pub channel_name: String,
    pub terminal: TerminalConfig,
    pub min_val: f64,
    pub max_val: f64,
    pub clock_source: String,
    pub clock_edge: Edge,
    pub trigger_source: String,
    pub trigger_edge: Edge,
    pub group_name: String,
    pub logging_mode: LoggingMode,
    pub logging_operation: LoggingOperation,
    pub wait_timeout: Option<Duration>,
}

impl AcquisitionConfig {
    pub fn new(conf: &Conf, args: &RunArgs) -> Result<Self, ConfigError> {
        let rate = args.rate.unwrap_or(conf.timing.rate);
        if !(rate.is_finite() && rate > 0.0) {
            return Err(ConfigError::NonPositiveRate(rate));
        }
        if !(args.duration.is_finite() && args.duration > 0.0) {
            return Err(ConfigError::NonPositiveDuration(args.duration));
        }
        if args.cycles == 0 {
            return Err(ConfigError::NoCycles);
        }
        if args.filename_prefix.is_empty() {
            return Err(ConfigError::EmptyFilenameTemplate);
        }
        let extension = conf.logging.extension.trim_start_matches('.');
        if extension.is_empty() {
            return Err(ConfigError::EmptyExtension);
        }
        if conf.channel.physical_channel.trim().is_empty() {
            return Err(ConfigError::EmptyChannel);
        }
        if conf.trigger.source.trim().is_empty() {
            return Err(ConfigError::EmptyTriggerSource);
        }
        let max_val = conf.channel.max_val;
        let min_val = conf.channel.min_val.unwrap_or(-max_val);
        if !(min_val < max_val) {
            return Err(ConfigError::InvertedRange {
                min: min_val,
                max: max_val,
            });
        }
        let wait_timeout = match conf.timing.wait_timeout_secs {
            Some(secs) if !(secs.is_finite() && secs > 0.0) => {
                return Err(ConfigError::InvalidTimeout(secs))
            }
            Some(secs) => Some(
                Duration::try_from_secs_f64(secs)
                    .map_err(|_| ConfigError::InvalidTimeout(secs))?,
            ),
            None => None,
        };
        let samples =
            sample_count(rate, args.duration).ok_or(ConfigError::TooManySamples {
                rate,
                duration: args.duration,
            })?;

        Ok(Self {
            rate,
            duration: args.duration,
            samples,
            cycles: args.cycles,
            filename_template: args.filename_prefix.clone(),
            extension: extension.to_string(),
            physical_channel: conf.channel.physical_channel.clone(),
            channel_name: conf.channel.name.clone(),
            terminal: conf.channel.terminal,
            min_val,
            max_val,
            clock_source: conf.timing.clock_source.clone(),
            clock_edge: conf.timing.active_edge,
            trigger_source: conf.trigger.source.clone(),
            trigger_edge: conf.trigger.edge,
            group_name: conf.logging.group_name.clone(),
            logging_mode: conf.logging.mode,
            logging_operation: conf.logging.operation,
            wait_timeout,
        })
    }

    pub fn output_path(&self, index: u32) -> PathBuf {
        output_path(&self.filename_template, index, &self.extension)
    }

    /// Write the run parameters to the log.
    pub fn log_parameters(&self) {
        let mut param_log = String::new();
        let params = [
            ("Channel", self.physical_channel.clone()),
            ("Terminal", format!("{:?}", self.terminal)),
            ("Range (V)", format!("[{}, {}]", self.min_val, self.max_val)),
            ("Rate (S/s)", self.rate.to_string()),
            ("Duration (s)", self.duration.to_string()),
            ("Samples per cycle", self.samples.to_string()),
            ("Cycles", self.cycles.to_string()),
            ("Trigger", format!("{} {:?}", self.trigger_source, self.trigger_edge)),
            (
                "Output",
                format!("{}<n>.{}", self.filename_template, self.extension),
            ),
            (
                "Wait timeout",
                self.wait_timeout
                    .map(|t| format!("{:.3} s", t.as_secs_f64()))
                    .unwrap_or_else(|| "none".to_string()),
            ),
        ];
        for (name, value) in params {
            param_log.push_str(&format!("{name}: {value}\n"));
        }
        if param_log.ends_with('\n') {
            param_log.pop();
        }
        info!("Acquisition parameters:\n{}", param_log);
    }
}
