use clap::{error::ErrorKind, Parser};
use log::LevelFilter;
use std::{ffi::OsString, fmt::Display, path::PathBuf};
use thiserror::Error;

pub const USAGE: &str = concat!(
    "usage: startacq 14 10 U235_100ng_14s_100ksps_\n",
    "       startacq 100000 14 10 U235_100ng_14s_100ksps_"
);

/// Triggered finite analog acquisition, one log file per trigger
#[derive(Parser, Debug)]
#[command(name = "startacq", version)]
#[command(override_usage = "startacq [OPTIONS] [RATE_SPS] <DURATION_S> <CYCLES> <FILENAME_PREFIX>")]
pub struct Cli {
    /// [rate_sps] duration_s cycles filename_prefix
    #[arg(value_name = "ARGS", allow_negative_numbers = true)]
    pub args: Vec<String>,

    /// Settings file (TOML)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Also write the log to this file
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(short, long, value_name = "LEVEL", default_value = "info")]
    pub log_level: LevelFilter,

    /// Use the simulated driver instead of NI-DAQmx
    #[arg(long)]
    pub simulate: bool,

    /// Wait for a key press before exiting
    #[arg(long)]
    pub pause: bool,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum UsageError {
    #[error("expected 3 or 4 arguments, got {0}")]
    ArgumentCount(usize),
    #[error("{name} must be a number, got {value:?}")]
    NotANumber { name: &'static str, value: String },
}

/// The positional part of the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct RunArgs {
    /// `None` uses the rate from the settings file.
    pub rate: Option<f64>,
    pub duration: f64,
    pub cycles: u32,
    pub filename_prefix: String,
}

fn number<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, UsageError> {
    value.trim().parse().map_err(|_| UsageError::NotANumber {
        name,
        value: value.to_string(),
    })
}

impl RunArgs {
    /// Accepts `duration cycles prefix` or `rate duration cycles prefix`.
    pub fn from_positional(args: &[String]) -> Result<Self, UsageError> {
        let (rate, rest) = match args.len() {
            3 => (None, args),
            4 => (Some(number("rate_sps", &args[0])?), &args[1..]),
            n => return Err(UsageError::ArgumentCount(n)),
        };
        Ok(Self {
            rate,
            duration: number("duration_s", &rest[0])?,
            cycles: number("cycles", &rest[1])?,
            filename_prefix: rest[2].clone(),
        })
    }
}

/// Exit status for anything wrong with the command line or the settings.
pub const USAGE_EXIT: u8 = 1;

/// `reason` followed by the usage text.
fn usage_message(reason: impl Display) -> String {
    format!("{reason}\n{USAGE}")
}

/// What the command line asks for. Built before any driver exists, so a bad
/// command line never reaches the hardware.
#[derive(Debug)]
pub enum Invocation {
    Run { cli: Cli, args: RunArgs },
    Exit { code: u8, message: String },
}

impl Invocation {
    pub fn parse<I, T>(argv: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let cli = match Cli::try_parse_from(argv) {
            Ok(cli) => cli,
            Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
                return Self::Exit {
                    code: 0,
                    message: e.to_string(),
                }
            }
            Err(e) => return Self::usage(e),
        };
        match RunArgs::from_positional(&cli.args) {
            Ok(args) => Self::Run { cli, args },
            Err(e) => Self::usage(e),
        }
    }

    fn usage(reason: impl Display) -> Self {
        Self::Exit {
            code: USAGE_EXIT,
            message: usage_message(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn three_arguments_use_the_configured_rate() {
        let args = RunArgs::from_positional(&strings(&["14", "10", "U235_"])).unwrap();
        assert_eq!(
            args,
            RunArgs {
                rate: None,
                duration: 14.0,
                cycles: 10,
                filename_prefix: "U235_".to_string(),
            }
        );
    }

    #[test]
    fn four_arguments_carry_the_rate() {
        let args =
            RunArgs::from_positional(&strings(&["63072.24", "266", "1", "example"])).unwrap();
        assert_eq!(args.rate, Some(63072.24));
        assert_eq!(args.duration, 266.0);
        assert_eq!(args.cycles, 1);
    }

    #[test]
    fn wrong_argument_count_is_a_usage_error() {
        for n in [0, 1, 2, 5, 6] {
            let args = strings(&vec!["1"; n]);
            assert_eq!(
                RunArgs::from_positional(&args),
                Err(UsageError::ArgumentCount(n))
            );
        }
    }

    #[test]
    fn non_numeric_values_are_usage_errors() {
        assert!(matches!(
            RunArgs::from_positional(&strings(&["fast", "10", "x"])),
            Err(UsageError::NotANumber { name: "duration_s", .. })
        ));
        assert!(matches!(
            RunArgs::from_positional(&strings(&["14", "-2", "x"])),
            Err(UsageError::NotANumber { name: "cycles", .. })
        ));
    }

    #[test]
    fn options_parse_alongside_positionals() {
        let cli = Cli::try_parse_from([
            "startacq",
            "--simulate",
            "-l",
            "debug",
            "--config",
            "bench.toml",
            "100000",
            "14",
            "10",
            "run_",
        ])
        .unwrap();
        assert!(cli.simulate);
        assert!(!cli.pause);
        assert_eq!(cli.log_level, LevelFilter::Debug);
        assert_eq!(cli.config, Some(PathBuf::from("bench.toml")));
        assert_eq!(cli.args.len(), 4);
    }

    #[test]
    fn wrong_argument_count_exits_with_usage() {
        for argv in [
            vec!["startacq", "14", "10"],
            vec!["startacq", "100000", "14", "10", "run_", "extra"],
            vec!["startacq", "--simulate", "14", "10"],
        ] {
            match Invocation::parse(argv.clone()) {
                Invocation::Exit { code, message } => {
                    assert_eq!(code, USAGE_EXIT, "{argv:?}");
                    assert!(message.ends_with(USAGE), "{argv:?}");
                }
                Invocation::Run { .. } => panic!("{argv:?} should not run"),
            }
        }
    }

    #[test]
    fn unknown_options_and_bad_numbers_exit_with_usage() {
        for argv in [
            vec!["startacq", "--bogus", "14", "10", "run_"],
            vec!["startacq", "fast", "14", "10", "run_"],
        ] {
            assert!(matches!(
                Invocation::parse(argv),
                Invocation::Exit { code: USAGE_EXIT, .. }
            ));
        }
    }

    #[test]
    fn help_exits_cleanly() {
        match Invocation::parse(["startacq", "--help"]) {
            Invocation::Exit { code, message } => {
                assert_eq!(code, 0);
                assert!(message.contains("--simulate"));
            }
            Invocation::Run { .. } => panic!("--help should not run"),
        }
    }

    #[test]
    fn valid_command_line_runs() {
        match Invocation::parse(["startacq", "--pause", "14", "10", "run_"]) {
            Invocation::Run { cli, args } => {
                assert!(cli.pause);
                assert_eq!(args.cycles, 10);
                assert_eq!(args.filename_prefix, "run_");
            }
            Invocation::Exit { message, .. } => panic!("unexpected exit: {message}"),
        }
    }
}
