//! End-to-end runs of the matrix against the MPI library the crate is linked with
//!
//! MPI can only be initialized once per process, so this is a plain binary instead of a libtest
//! harness. It runs as a singleton under `cargo test` and on any number of processes under
//! `mpiexec`.

use std::process;

use mpi::ffi;
use mpi::traits::*;
use mpi::Threading;

use mpi_conformance::case::TestRegistry;
use mpi_conformance::comm::{CommRegistry, RawComm};
use mpi_conformance::config::{Config, ReportLevel};
use mpi_conformance::datatype::TypeRegistry;
use mpi_conformance::driver::{Driver, Plan, RunSummary};
use mpi_conformance::output::Reporter;
use mpi_conformance::select::Selection;
use mpi_conformance::{Error, Result};

type Scenario = fn(RawComm) -> Result<()>;

fn strings(specs: &[&str]) -> Vec<String> {
    specs.iter().map(|s| s.to_string()).collect()
}

fn run_matrix(world: RawComm, config: &Config) -> Result<RunSummary> {
    let tests = TestRegistry::standard()?;
    let types = TypeRegistry::standard()?;
    let comms = CommRegistry::standard(world.0, config.threads)?;
    let plan = Plan {
        tests: Selection::apply(&tests, &config.tests)?,
        comms: Selection::apply(&comms, &config.comms)?,
        types: Selection::apply(&types, &config.types)?,
    };
    let reporter = Reporter::silent(ReportLevel::Summary);
    Driver::new(config, &tests, &comms, &types, &reporter, world).run(&plan)
}

fn ring_on_world(world: RawComm) -> Result<()> {
    let config = Config {
        tests: strings(&["Ring"]),
        comms: strings(&["MPI_COMM_WORLD"]),
        types: strings(&["MPI_INT32_T"]),
        values_num: 10,
        ..Config::default()
    };
    let summary = run_matrix(world, &config)?;
    assert_eq!(summary.executed, 1);
    assert_eq!(summary.skipped, 0);
    assert!(summary.ledger.is_empty());
    Ok(())
}

fn allreduce_sum_with_double(world: RawComm) -> Result<()> {
    let config = Config {
        tests: strings(&["Allreduce Sum"]),
        types: strings(&["MPI_DOUBLE"]),
        values_num: 100,
        ..Config::default()
    };
    let summary = run_matrix(world, &config)?;
    assert!(summary.executed > 0);
    assert!(summary.ledger.is_empty());
    Ok(())
}

fn everything_relaxed(world: RawComm) -> Result<()> {
    let config = Config {
        values_num: 16,
        ..Config::default()
    };
    let summary = run_matrix(world, &config)?;
    assert!(summary.executed > 0);
    // the duplicate datatype alone keeps predefined-op reductions from running everywhere
    assert!(summary.skipped > 0);
    assert!(summary.ledger.is_empty());
    Ok(())
}

fn threaded_rings(world: RawComm) -> Result<()> {
    let config = Config {
        tests: strings(&["Threaded"]),
        comms: strings(&["MPI_COMM_WORLD", "MPI_COMM_SELF"]),
        types: strings(&["MPI_INT64_T"]),
        values_num: 32,
        threads: 3,
        ..Config::default()
    };
    let summary = run_matrix(world, &config)?;
    assert_eq!(summary.executed, 4);
    assert!(summary.ledger.is_empty());
    Ok(())
}

fn reversed_world_mapping(world: RawComm) -> Result<()> {
    let comms = CommRegistry::standard(world.0, 1)?;
    let reversed = Selection::apply(&comms, &strings(&["Reversed MPI_COMM_WORLD"]))?;
    let comm = comms.get(reversed.ids()[0])?;
    let size = comm.size();
    let expected: Vec<_> = (0..size).map(|rank| size - 1 - rank).collect();
    assert_eq!(comm.mapping(), expected.as_slice());
    assert_eq!(comm.remote_size(), 0);
    Ok(())
}

fn rank_translation_everywhere(world: RawComm) -> Result<()> {
    let config = Config {
        tests: strings(&["Group_translate_ranks"]),
        types: strings(&["MPI_INT8_T"]),
        ..Config::default()
    };
    let summary = run_matrix(world, &config)?;
    assert!(summary.executed > 0);
    assert!(summary.ledger.is_empty());
    Ok(())
}

fn unknown_datatype(world: RawComm) -> Result<()> {
    let config = Config {
        types: strings(&["MPI_COMPLEX128"]),
        ..Config::default()
    };
    match run_matrix(world, &config) {
        Err(Error::UnknownSelection { kind: "datatype", .. }) => Ok(()),
        other => panic!("expected an unknown datatype, got {other:?}"),
    }
}

fn main() {
    let Some((universe, provided)) = mpi::initialize_with_threading(Threading::Multiple) else {
        eprintln!("MPI was already initialized");
        process::exit(1);
    };
    let world = universe.world();
    let raw = RawComm(world.as_raw());
    let rank = world.rank();

    let scenarios: &[(&str, Scenario)] = &[
        ("ring_on_world", ring_on_world),
        ("allreduce_sum_with_double", allreduce_sum_with_double),
        ("everything_relaxed", everything_relaxed),
        ("reversed_world_mapping", reversed_world_mapping),
        ("rank_translation_everywhere", rank_translation_everywhere),
        ("unknown_datatype", unknown_datatype),
    ];
    let threaded = if provided == Threading::Multiple {
        Some(("threaded_rings", threaded_rings as Scenario))
    } else {
        if rank == 0 {
            println!("threaded_rings ... ignored, MPI_THREAD_MULTIPLE not provided");
        }
        None
    };

    for &(name, scenario) in scenarios.iter().chain(threaded.iter()) {
        if let Err(e) = scenario(raw) {
            eprintln!("{name} ... FAILED on rank {rank}: {e}");
            unsafe {
                ffi::MPI_Abort(world.as_raw(), 1);
            }
        }
        if rank == 0 {
            println!("{name} ... ok");
        }
    }
}
