//! Fatal errors and MPI return code checking
//!
//! The suite distinguishes two kinds of failure. Anything that means the harness itself or the
//! MPI library's API contract broke (a call returning something other than `MPI_SUCCESS`, an
//! overflowing registry, a bad command line) is an `Error` and ends the run. Wrong data in a
//! receive buffer is not an error in this sense; test bodies count those mismatches and the
//! driver files them in the `FailureLedger`.

use std::os::raw::{c_char, c_int};

use thiserror::Error;

use mpi::ffi;

/// MPI_SUCCESS constant, cast as a c_int here for easier checking of MPI return values
pub const MPI_SUCCESS: c_int = ffi::MPI_SUCCESS as c_int;

/// Result type used throughout the harness
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal conditions that stop the whole run.
#[derive(Error, Debug)]
pub enum Error {
    /// An MPI call returned something other than `MPI_SUCCESS`
    #[error("{call} failed at {file}:{line} with code {code}: {message}")]
    Mpi {
        call: &'static str,
        file: &'static str,
        line: u32,
        code: c_int,
        message: String,
    },

    /// The MPI library disagrees with the layout the registry computed for a datatype
    #[error("datatype {name}: {what} is {actual}, expected {expected}")]
    TypeLayout {
        name: String,
        what: &'static str,
        expected: i64,
        actual: i64,
    },

    /// A fixed-capacity table overflowed
    #[error("{table} is full ({capacity} entries)")]
    Capacity {
        table: &'static str,
        capacity: usize,
    },

    /// A registry lookup with an id outside `0..count`
    #[error("{registry} id {id} out of range (0..{count})")]
    InvalidId {
        registry: &'static str,
        id: usize,
        count: usize,
    },

    /// A selection string matched neither a class nor an entry name
    #[error("{kind} `{name}` not recognized")]
    UnknownSelection { kind: &'static str, name: String },

    /// The run configuration is unusable
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A count does not fit into an MPI `int`
    #[error("count {0} exceeds the range of an MPI count")]
    Count(usize),

    /// A worker thread of the thread harness could not be created
    #[error("failed to spawn worker thread {thread}: {source}")]
    Spawn {
        thread: usize,
        #[source]
        source: std::io::Error,
    },

    /// The thread harness lost track of a worker or a fixture
    #[error("thread harness: {0}")]
    Harness(String),

    /// Writing the report stream or the persisted test files failed
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Turns the return code of an MPI call into a `Result`.
    ///
    /// Used through the `check!` macro, which fills in the call text and location.
    pub fn check(code: c_int, call: &'static str, file: &'static str, line: u32) -> Result<()> {
        if code == MPI_SUCCESS {
            Ok(())
        } else {
            Err(Error::Mpi {
                call,
                file,
                line,
                code,
                message: error_string(code),
            })
        }
    }
}

/// The MPI library's description of an error code.
pub fn error_string(code: c_int) -> String {
    let mut buffer = vec![0 as c_char; ffi::MPI_MAX_ERROR_STRING as usize];
    let mut len: c_int = 0;
    let res = unsafe { ffi::MPI_Error_string(code, buffer.as_mut_ptr(), &mut len) };
    if res != MPI_SUCCESS || len < 0 {
        return format!("unknown MPI error {code}");
    }
    let bytes: Vec<u8> = buffer[..len as usize].iter().map(|&c| c as u8).collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Calls a raw MPI function and converts its return code into a `Result<()>`.
///
/// The expression is evaluated inside an `unsafe` block, so extern statics such as
/// `ffi::RSMPI_INFO_NULL` can be used directly in the argument list.
///
/// ```ignore
/// check!(ffi::MPI_Barrier(comm))?;
/// ```
#[macro_export]
macro_rules! check {
    ($call:expr) => {{
        let code = unsafe { $call };
        $crate::error::Error::check(code, stringify!($call), file!(), line!())
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_passes() {
        assert!(Error::check(MPI_SUCCESS, "MPI_Barrier(comm)", file!(), line!()).is_ok());
    }

    #[test]
    fn capacity_message_names_table() {
        let err = Error::Capacity {
            table: "failure ledger",
            capacity: 4,
        };
        assert_eq!(err.to_string(), "failure ledger is full (4 entries)");
    }

    #[test]
    fn unknown_selection_is_not_recognized() {
        let err = Error::UnknownSelection {
            kind: "test",
            name: "Rnig".into(),
        };
        assert!(err.to_string().contains("not recognized"));
    }
}
