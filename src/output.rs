//! The report stream
//!
//! Test results are written to a dedicated stream rather than through `tracing`: the report is
//! the product of a run, diagnostics are not. Only rank 0 writes to stdout or stderr; with
//! `OutputTarget::Logfile` every rank writes its own file.

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::sync::Mutex;

use crate::config::{OutputTarget, ReportLevel};
use crate::error::Result;

/// Level-gated, thread-safe report writer.
pub struct Reporter {
    level: ReportLevel,
    verbose: bool,
    sink: Option<Mutex<Box<dyn Write + Send>>>,
}

impl Reporter {
    /// Open the report stream for `rank`.
    pub fn open(
        target: OutputTarget,
        level: ReportLevel,
        verbose: bool,
        rank: i32,
    ) -> Result<Reporter> {
        let sink: Option<Box<dyn Write + Send>> = match target {
            OutputTarget::Stdout if rank == 0 => Some(Box::new(io::stdout())),
            OutputTarget::Stderr if rank == 0 => Some(Box::new(io::stderr())),
            OutputTarget::Logfile => {
                let file = File::create(format!("mpi_conformance_{rank}.log"))?;
                Some(Box::new(BufWriter::new(file)))
            }
            _ => None,
        };
        Ok(Reporter {
            level,
            verbose,
            sink: sink.map(Mutex::new),
        })
    }

    /// A reporter writing into an arbitrary sink, regardless of rank.
    pub fn with_writer(level: ReportLevel, writer: Box<dyn Write + Send>) -> Reporter {
        Reporter {
            level,
            verbose: false,
            sink: Some(Mutex::new(writer)),
        }
    }

    /// A reporter that drops everything.
    pub fn silent(level: ReportLevel) -> Reporter {
        Reporter {
            level,
            verbose: false,
            sink: None,
        }
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Whether a line at `level` would be written by this process.
    ///
    /// Lets callers skip building diagnostics nobody reads.
    pub fn wants(&self, level: ReportLevel) -> bool {
        self.sink.is_some() && level <= self.level
    }

    /// Write a line if the configured level is at least `level`.
    pub fn line(&self, level: ReportLevel, args: fmt::Arguments<'_>) -> Result<()> {
        if !self.wants(level) {
            return Ok(());
        }
        if let Some(sink) = &self.sink {
            // A poisoned lock only means another thread panicked mid-line.
            let mut sink = sink.lock().unwrap_or_else(|e| e.into_inner());
            sink.write_fmt(args)?;
            sink.write_all(b"\n")?;
        }
        Ok(())
    }

    /// Always written, the final summary goes here.
    pub fn summary(&self, args: fmt::Arguments<'_>) -> Result<()> {
        self.line(ReportLevel::Summary, args)
    }

    /// Per-triple progress.
    pub fn run(&self, args: fmt::Arguments<'_>) -> Result<()> {
        self.line(ReportLevel::Run, args)
    }

    /// Everything else.
    pub fn full(&self, args: fmt::Arguments<'_>) -> Result<()> {
        self.line(ReportLevel::Full, args)
    }

    /// Hex dump of `bytes` at level `Full`, 16 bytes per line.
    pub fn hex_dump(&self, label: &str, bytes: &[u8]) -> Result<()> {
        if !self.wants(ReportLevel::Full) {
            return Ok(());
        }
        self.full(format_args!("{label} ({} bytes)", bytes.len()))?;
        for (row, chunk) in bytes.chunks(16).enumerate() {
            self.full(format_args!("  {:04x}: {}", row * 16, hex(chunk)))?;
        }
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        if let Some(sink) = &self.sink {
            sink.lock().unwrap_or_else(|e| e.into_inner()).flush()?;
        }
        Ok(())
    }
}

/// Space separated lowercase hex bytes.
pub fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}
