//! Run log for the overlay pipeline.
//!
//! Each launch truncates `pixel-overlay.log` in the per-user data directory,
//! so the file only describes the latest run:
//!   Windows:  `%APPDATA%\PixelOverlay\pixel-overlay.log`
//!   Linux:    `~/.local/share/PixelOverlay/pixel-overlay.log`
//!   macOS:    `~/Library/Application Support/PixelOverlay/pixel-overlay.log`
//!
//! Modules log through `log_info!` / `log_warn!` / `log_err!`.  Before
//! [`init`] runs (library callers, unit tests) nothing is written.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use chrono::{DateTime, Local, SecondsFormat, Utc};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
    Panic,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Panic => "PANIC",
        })
    }
}

struct Sink {
    file: Option<Mutex<File>>,
    path: Option<PathBuf>,
    echo_stderr: bool,
}

static SINK: OnceLock<Sink> = OnceLock::new();

/// Path of this run's log file, if one could be opened.
pub fn log_path() -> Option<&'static Path> {
    SINK.get().and_then(|sink| sink.path.as_deref())
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logger::write($crate::logger::Level::Info, &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logger::write($crate::logger::Level::Warn, &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_err {
    ($($arg:tt)*) => {
        $crate::logger::write($crate::logger::Level::Error, &format!($($arg)*));
    };
}

/// Record one message.  I/O errors are swallowed; logging never fails the
/// caller.
pub fn write(level: Level, msg: &str) {
    if SINK.get().is_some() {
        emit(&format_line(Local::now(), level, msg));
    }
}

fn emit(line: &str) {
    let Some(sink) = SINK.get() else {
        return;
    };
    if let Some(file) = &sink.file
        && let Ok(mut file) = file.lock()
    {
        let _ = writeln!(file, "{}", line);
    }
    if sink.echo_stderr {
        eprintln!("{}", line);
    }
}

/// `[HH:MM:SS.mmm] [LEVEL] message`, in local time.
pub fn format_line(at: DateTime<Local>, level: Level, msg: &str) -> String {
    format!("[{}] [{}] {}", at.format("%H:%M:%S%.3f"), level, msg)
}

fn session_header(started: DateTime<Utc>) -> String {
    format!(
        "=== pixel-overlay {} session started {} ===",
        env!("CARGO_PKG_VERSION"),
        started.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

/// Start logging to the default log file; `verbose` mirrors lines to stderr.
pub fn init(verbose: bool) {
    init_at(&log_file_path(), verbose);
}

/// [`init`] with an explicit file.  Only the first call in a process takes
/// effect.  When the file cannot be opened the run continues, logging to
/// stderr only if `verbose`.
pub fn init_at(path: &Path, verbose: bool) {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path);

    let sink = match file {
        Ok(f) => Sink {
            file: Some(Mutex::new(f)),
            path: Some(path.to_path_buf()),
            echo_stderr: verbose,
        },
        Err(e) => {
            eprintln!("[logger] could not open {}: {}", path.display(), e);
            Sink {
                file: None,
                path: None,
                echo_stderr: verbose,
            }
        }
    };
    if SINK.set(sink).is_err() {
        return;
    }

    emit(&session_header(Utc::now()));
    if let Some(path) = log_path() {
        emit(&format!("Log file: {}", path.display()));
    }

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        emit(&format_line(Local::now(), Level::Panic, &info.to_string()));
        prev(info);
    }));
}

fn log_file_path() -> PathBuf {
    data_dir().join("PixelOverlay").join("pixel-overlay.log")
}

/// Per-user data directory, without the app folder.
pub(crate) fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata);
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support");
        }
    }
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    PathBuf::from(".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn line_carries_local_clock_and_level() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 3).unwrap();
        assert_eq!(
            format_line(at, Level::Warn, "tile 0012,0067 skipped"),
            "[07:05:03.000] [WARN] tile 0012,0067 skipped"
        );
    }

    #[test]
    fn header_is_rfc3339_utc() {
        let started = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 3).unwrap();
        let header = session_header(started);
        assert!(header.ends_with("session started 2024-03-09T07:05:03Z ==="), "{}", header);
    }
}
