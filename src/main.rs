use log::{error, info, warn};
use startacq::*;
use std::process::ExitCode;

fn main() -> ExitCode {
    // No driver exists until the command line is known to be good.
    let (cli, run_args) = match Invocation::parse(std::env::args_os()) {
        Invocation::Run { cli, args } => (cli, args),
        Invocation::Exit { code, message } => {
            println!("{message}");
            return ExitCode::from(code);
        }
    };

    if let Err(e) = init_logging(cli.log_level, cli.log_file.as_deref()) {
        eprintln!("{e:#}");
        return ExitCode::from(USAGE_EXIT);
    }

    let backend = match Backend::select(cli.simulate) {
        Ok(backend) => backend,
        Err(e) => {
            error!("{e}");
            return ExitCode::from(USAGE_EXIT);
        }
    };

    let conf = match load_conf(cli.config.as_deref()) {
        Ok(conf) => conf,
        Err(e) => {
            error!("Could not load settings: {e}");
            return ExitCode::from(USAGE_EXIT);
        }
    };
    let config = match AcquisitionConfig::new(&conf, &run_args) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            println!("{USAGE}");
            return ExitCode::from(USAGE_EXIT);
        }
    };
    config.log_parameters();

    let report = run(config, backend);
    report.log_summary();

    if cli.pause {
        if let Err(e) = wait_for_keypress() {
            warn!("Could not wait for a key press: {e:#}");
        }
    }
    ExitCode::SUCCESS
}

fn run(config: AcquisitionConfig, backend: Backend) -> RunReport {
    match backend {
        Backend::Simulated => {
            info!("Using the simulated driver");
            RunController::new(SimulatedDaq::new(), config).run()
        }
        #[cfg(feature = "nidaqmx")]
        Backend::NiDaqmx => RunController::new(NiDaqmx::new(), config).run(),
    }
}
