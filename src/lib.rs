//! Conformance and regression tests for Message Passing Interface implementations
//!
//! The suite drives an MPI library through its C API and checks what comes back. It is organized
//! as a matrix: every selected test runs on every selected communicator with every selected
//! datatype, as long as the test declares itself applicable to that combination.
//!
//! # Usage
//!
//! ```text
//! mpiexec -n 4 mpi-conformance -t P2P,Collective -d Std_C_Int -n 100
//! mpiexec -n 4 mpi-conformance -t All -t ^Dynamic -r full
//! mpi-conformance --list
//! ```
//!
//! # Structure
//!
//! - `datatype`: predefined and derived datatypes together with their memory layout, and buffers
//!   of them that can be filled with and checked against known values
//! - `comm`: the communicators tests run on, with one private duplicate per worker thread
//! - `case`: the test registry and the test bodies
//! - `select`: selection by name or class, and the applicability check
//! - `driver`: the loop over all selected triples
//! - `ledger`: the record of failing triples
//! - `threads`: the worker pool for tests calling MPI from several threads at once
//!
//! # Failures
//!
//! An MPI call returning an error, and anything else that means the suite itself cannot go on, is
//! an [`Error`](error::Error) and ends the run. Wrong data is a failure: it is recorded in the
//! ledger and the run continues.

pub mod case;
pub mod comm;
pub mod config;
pub mod datatype;
pub mod driver;
pub mod error;
pub mod ledger;
mod mask;
pub mod output;
pub mod select;
pub mod threads;

pub use crate::error::{Error, Result};
pub use crate::mask::ClassMask;
