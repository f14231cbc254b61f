use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyEventKind},
    terminal,
};
use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};
use std::{fs::OpenOptions, path::Path};

/// Log to the terminal and, if given, append to `log_file` as well.
pub fn init_logging(level: LevelFilter, log_file: Option<&Path>) -> Result<()> {
    let config = ConfigBuilder::new()
        .set_target_level(LevelFilter::Off)
        .set_thread_level(LevelFilter::Off)
        .build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        config.clone(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];
    if let Some(path) = log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening log file {}", path.display()))?;
        loggers.push(WriteLogger::new(level, config, file));
    }
    CombinedLogger::init(loggers).context("installing logger")?;
    Ok(())
}

/// Block until any key is pressed.
pub fn wait_for_keypress() -> Result<()> {
    println!("End of program, press any key to quit");
    // Raw mode so a single key press is enough; restored before returning.
    terminal::enable_raw_mode()?;
    let res = loop {
        match event::read() {
            Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => break Ok(()),
            Ok(_) => continue,
            Err(e) => break Err(e),
        }
    };
    terminal::disable_raw_mode()?;
    Ok(res?)
}
