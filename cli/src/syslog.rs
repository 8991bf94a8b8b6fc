use std::path::Path;
use std::sync::{Mutex, PoisonError};

use color_eyre::eyre;
use log::{Level, LevelFilter, Log, Metadata, Record};
use owo_colors::OwoColorize;

/// Prints `[file] [level]: message` to stderr.
struct Syslog {
    /// Name of the file being converted, if any.
    input: Mutex<Option<String>>,
}

static LOGGER: Syslog = Syslog {
    input: Mutex::new(None),
};

pub fn init_logging(level: LevelFilter) -> eyre::Result<()> {
    log::set_logger(&LOGGER).map_err(|err| eyre::eyre!("{err}"))?;
    log::set_max_level(level);
    Ok(())
}

/// Tag following log lines with `path`'s file name.
pub fn set_input(path: Option<&Path>) {
    let name = path.map(|path| {
        path.file_name()
            .unwrap_or(path.as_os_str())
            .to_string_lossy()
            .into_owned()
    });
    *LOGGER.input.lock().unwrap_or_else(PoisonError::into_inner) = name;
}

fn level_tag(level: Level) -> String {
    match level {
        Level::Error => "[error]".red().bold().to_string(),
        Level::Warn => "[warn]".yellow().bold().to_string(),
        Level::Info => "[info]".green().bold().to_string(),
        Level::Debug => "[debug]".blue().bold().to_string(),
        Level::Trace => "[trace]".magenta().bold().to_string(),
    }
}

fn format_line(input: Option<&str>, level: Level, args: &std::fmt::Arguments<'_>) -> String {
    let prefix = match input {
        Some(name) => format!(
            "{}{}{} ",
            "[".white().dimmed(),
            name.white().dimmed(),
            "]".white().dimmed()
        ),
        None => String::new(),
    };
    format!("{prefix}{}{} {args}", level_tag(level), ":".white().bold())
}

impl Log for Syslog {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let input = self.input.lock().unwrap_or_else(PoisonError::into_inner);
        eprintln!("{}", format_line(input.as_deref(), record.level(), record.args()));
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_carries_file_and_level() {
        let line = format_line(Some("eboot.bin"), Level::Warn, &format_args!("small file"));
        assert!(line.contains("eboot.bin"));
        assert!(line.contains("[warn]"));
        assert!(line.ends_with(" small file"));

        let line = format_line(None, Level::Trace, &format_args!("tag"));
        assert!(line.contains("[trace]"));
        assert!(!line.contains("eboot.bin"));
    }
}
