//! Run configuration
//!
//! Built once from the command line in `main` and read-only afterwards.

use clap::ValueEnum;

use crate::error::{Error, Result};

/// How much the report stream shows.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum ReportLevel {
    /// Only the final failure summary
    Summary,
    /// One line per executed test triple
    Run,
    /// Everything, including hex dumps of mismatching values
    Full,
}

/// Standard-conformance strictness of a test, and the global mode selecting which tests run.
///
/// Ordered from most to least permissive: a run in mode `m` executes every test whose own mode is
/// at least `m`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum Strictness {
    /// Known-problematic tests; only run when the global mode is `Disabled`
    Disabled,
    /// Tests relying on behavior the standard leaves to the implementation
    Relaxed,
    /// Tests that only rely on what the standard guarantees
    Strict,
}

impl Strictness {
    /// Whether a test declared with `test` mode runs under this global mode.
    pub fn permits(self, test: Strictness) -> bool {
        test >= self
    }
}

/// Where the report stream goes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputTarget {
    /// Standard output of rank 0
    Stdout,
    /// Standard error of rank 0
    Stderr,
    /// One `mpi_conformance_<rank>.log` per rank
    Logfile,
}

/// Everything a run needs to know before MPI is touched.
#[derive(Clone, Debug)]
pub struct Config {
    /// Test selections, names or classes, `^` prefix deselects
    pub tests: Vec<String>,
    /// Communicator selections
    pub comms: Vec<String>,
    /// Datatype selections
    pub types: Vec<String>,
    /// Number of datatype elements per buffer
    pub values_num: usize,
    pub report: ReportLevel,
    pub mode: Strictness,
    /// Threads per process, including the main thread
    pub threads: usize,
    pub output: OutputTarget,
    pub verbose: bool,
    /// Print the registries and exit
    pub list: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            tests: Vec::new(),
            comms: Vec::new(),
            types: Vec::new(),
            values_num: 1000,
            report: ReportLevel::Run,
            mode: Strictness::Relaxed,
            threads: 1,
            output: OutputTarget::Stdout,
            verbose: false,
            list: false,
        }
    }
}

impl Config {
    /// Reject settings no run can honor.
    pub fn validate(self) -> Result<Config> {
        if self.values_num == 0 {
            return Err(Error::Config("number of values must be at least 1".into()));
        }
        if self.threads == 0 {
            return Err(Error::Config("number of threads must be at least 1".into()));
        }
        Ok(self)
    }
}
