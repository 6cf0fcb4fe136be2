//! Command line driver of the conformance suite
//!
//! ```bash
//! # everything, on 4 processes
//! mpiexec -n 4 mpi-conformance
//!
//! # point-to-point tests on the world communicator with two ints, 10 values each
//! mpiexec -n 4 mpi-conformance -t P2P -c MPI_COMM_WORLD -d MPI_INT32_T,MPI_INT64_T -n 10
//!
//! # all but the threaded tests, 4 threads per process, hex dumps on mismatch
//! mpiexec -n 2 mpi-conformance -t ^Threaded -j 4 -r full
//! ```
//!
//! The exit status is 0 whenever the run completes, whether or not failures were recorded, and 2
//! for bad arguments, which are rejected before MPI is initialized.

use std::process;

use clap::Parser;
use mpi::environment::Universe;
use mpi::ffi;
use mpi::traits::*;
use mpi::Threading;
use tracing_subscriber::EnvFilter;

use mpi_conformance::case::TestRegistry;
use mpi_conformance::comm::{CommRegistry, RawComm};
use mpi_conformance::config::{Config, OutputTarget, ReportLevel, Strictness};
use mpi_conformance::datatype::TypeRegistry;
use mpi_conformance::driver::{Driver, Plan};
use mpi_conformance::output::Reporter;
use mpi_conformance::select::Selection;
use mpi_conformance::{Error, Result};

/// Conformance and regression tests for MPI implementations
#[derive(Parser, Debug)]
#[command(name = "mpi-conformance")]
#[command(version)]
struct Args {
    /// Tests to run, by name or class; comma separated, `^` prefix deselects
    #[arg(short = 't', long = "test", value_name = "TESTS")]
    tests: Vec<String>,

    /// Communicators to run on, by name or class
    #[arg(short = 'c', long = "comm", value_name = "COMMS")]
    comms: Vec<String>,

    /// Datatypes to run with, by name or class
    #[arg(short = 'd', long = "datatype", value_name = "TYPES")]
    types: Vec<String>,

    /// Number of datatype instances per buffer
    #[arg(short = 'n', long = "num-values", default_value_t = 1000)]
    values_num: usize,

    /// How much the report shows
    #[arg(short = 'r', long = "report", value_enum, default_value_t = ReportLevel::Run)]
    report: ReportLevel,

    /// Which tests run, by the strictness they declare
    #[arg(short = 'x', long = "execution-mode", value_enum, default_value_t = Strictness::Relaxed)]
    mode: Strictness,

    /// Threads per process for the threaded tests
    #[arg(short = 'j', long = "num-threads", default_value_t = 1)]
    threads: usize,

    /// Where the report goes
    #[arg(short = 'o', long = "output", value_enum, default_value_t = OutputTarget::Stdout)]
    output: OutputTarget,

    /// Log progress and report skipped triples
    #[arg(short, long)]
    verbose: bool,

    /// List tests, communicators and datatypes, then exit
    #[arg(short, long)]
    list: bool,
}

impl From<Args> for Config {
    fn from(args: Args) -> Config {
        Config {
            tests: args.tests,
            comms: args.comms,
            types: args.types,
            values_num: args.values_num,
            report: args.report,
            mode: args.mode,
            threads: args.threads,
            output: args.output,
            verbose: args.verbose,
            list: args.list,
        }
    }
}

fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match Config::from(args).validate() {
        Ok(config) => config,
        Err(e) => exit_early(&e),
    };

    // Bad test names are reported before MPI is even initialized.
    let tests = match TestRegistry::standard().and_then(|tests| {
        let selection = Selection::apply(&tests, &config.tests)?;
        Ok((tests, selection))
    }) {
        Ok(tests) => tests,
        Err(e) => exit_early(&e),
    };

    let (universe, provided) = match mpi::initialize_with_threading(Threading::Multiple) {
        Some(init) => init,
        None => exit_early(&Error::Harness("MPI was already initialized".into())),
    };
    if provided != Threading::Multiple && config.threads > 1 {
        tracing::warn!(
            ?provided,
            requested = config.threads,
            "MPI_THREAD_MULTIPLE not available, running with a single thread"
        );
        config.threads = 1;
    }

    if let Err(e) = run(&config, tests, &universe) {
        abort(&e);
    }
}

fn run(
    config: &Config,
    (tests, selected_tests): (TestRegistry, Selection),
    universe: &Universe,
) -> Result<()> {
    let world = universe.world();
    let reporter = Reporter::open(config.output, config.report, config.verbose, world.rank())?;
    let types = TypeRegistry::standard()?;
    let comms = CommRegistry::standard(world.as_raw(), config.threads)?;

    if config.list {
        return list(&reporter, &tests, &comms, &types);
    }

    let plan = Plan {
        tests: selected_tests,
        comms: Selection::apply(&comms, &config.comms)?,
        types: Selection::apply(&types, &config.types)?,
    };
    tracing::info!(
        tests = plan.tests.len(),
        comms = plan.comms.len(),
        types = plan.types.len(),
        threads = config.threads,
        "starting run"
    );

    let world_raw = RawComm(world.as_raw());
    let driver = Driver::new(config, &tests, &comms, &types, &reporter, world_raw);
    // Abort while the registries are alive, freeing them could block on a broken run.
    let summary = driver.run(&plan).unwrap_or_else(|e| abort(&e));

    summary.ledger.print_summary(&tests, &comms, &types, &reporter)?;
    reporter.summary(format_args!(
        "Executed {} triples, skipped {} not applicable",
        summary.executed, summary.skipped
    ))?;
    reporter.flush()
}

fn list(
    reporter: &Reporter,
    tests: &TestRegistry,
    comms: &CommRegistry,
    types: &TypeRegistry,
) -> Result<()> {
    reporter.summary(format_args!("Tests:"))?;
    for (id, test) in tests.iter().enumerate() {
        reporter.summary(format_args!(
            "  {id:3} {:<28} {} mode {:?}{}",
            test.name(),
            test.class(),
            test.strictness(),
            if test.needs_sync() { ", sync" } else { "" }
        ))?;
    }
    reporter.summary(format_args!("Communicators:"))?;
    for id in 0..comms.count() {
        reporter.summary(format_args!(
            "  {id:3} {:<36} {} size {}",
            comms.name(id)?,
            comms.class(id)?,
            comms.size(id)?
        ))?;
    }
    reporter.summary(format_args!("Datatypes:"))?;
    for id in 0..types.count() {
        reporter.summary(format_args!(
            "  {id:3} {:<44} {} extent {}",
            types.name(id)?,
            types.class(id)?,
            types.extent(id)?
        ))?;
    }
    reporter.flush()
}

/// Configuration errors, before MPI is initialized. Exits with 2 like other usage errors.
fn exit_early(e: &Error) -> ! {
    tracing::error!("{e}");
    eprintln!("mpi-conformance: {e}");
    process::exit(2)
}

/// Fatal errors once MPI runs: every process is taken down.
fn abort(e: &Error) -> ! {
    tracing::error!("{e}");
    eprintln!("mpi-conformance: {e}");
    unsafe {
        ffi::MPI_Abort(ffi::RSMPI_COMM_WORLD, 1);
    }
    process::exit(1)
}
