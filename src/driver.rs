//! The matrix driver
//!
//! Runs every selected test on every selected communicator with every selected datatype:
//!
//! ```text
//! for each (test, comm, datatype):
//!     skip unless applicable
//!     [barrier]  init  run  cleanup  [barrier]
//!     record a failure if run reported mismatches
//! ```
//!
//! The applicability decision and the barriers are the same on every process, which keeps the
//! collective calls of all processes in step. Errors end the run; mismatches do not.

use std::thread;

use mpi::ffi;

use crate::case::{Env, TestClass, TestRegistry};
use crate::check;
use crate::comm::{CommRegistry, RawComm};
use crate::config::Config;
use crate::datatype::TypeRegistry;
use crate::error::Result;
use crate::ledger::{FailureLedger, FailureRecord};
use crate::output::Reporter;
use crate::select::{check_run, check_sync, Selection};
use crate::threads::{Phase, Signals, ThreadHarness};

/// What a run leaves behind.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub ledger: FailureLedger,
    /// Triples that were applicable, whether or not this process is a member of the communicator
    pub executed: usize,
    pub skipped: usize,
}

/// The selected subsets of the three registries.
pub struct Plan {
    pub tests: Selection,
    pub comms: Selection,
    pub types: Selection,
}

pub struct Driver<'a> {
    config: &'a Config,
    tests: &'a TestRegistry,
    comms: &'a CommRegistry,
    types: &'a TypeRegistry,
    reporter: &'a Reporter,
    world: RawComm,
}

impl<'a> Driver<'a> {
    pub fn new(
        config: &'a Config,
        tests: &'a TestRegistry,
        comms: &'a CommRegistry,
        types: &'a TypeRegistry,
        reporter: &'a Reporter,
        world: RawComm,
    ) -> Driver<'a> {
        Driver {
            config,
            tests,
            comms,
            types,
            reporter,
            world,
        }
    }

    /// Execute the matrix. Collective over `world`.
    pub fn run(&self, plan: &Plan) -> Result<RunSummary> {
        let threads = self.config.threads;
        let signals = Signals::new(threads);
        thread::scope(|scope| {
            let mut harness = ThreadHarness::spawn(scope, threads)?;
            let mut summary = RunSummary::default();
            for &test_id in plan.tests.ids() {
                for &comm_id in plan.comms.ids() {
                    for &type_id in plan.types.ids() {
                        let env = Env {
                            test_id,
                            test: self.tests.get(test_id)?,
                            comm_id,
                            comm: self.comms.get(comm_id)?,
                            type_id,
                            datatype: self.types.get(type_id)?,
                            values_num: self.config.values_num,
                            thread: 0,
                            threads,
                            handle: self.comms.handle(comm_id, 0)?,
                            signals: Some(&signals),
                            reporter: self.reporter,
                        };
                        self.triple(&mut harness, &signals, env, &mut summary)?;
                    }
                }
            }
            Ok(summary)
        })
    }

    fn triple<'env>(
        &self,
        harness: &mut ThreadHarness<'env>,
        signals: &Signals,
        env: Env<'env>,
        summary: &mut RunSummary,
    ) -> Result<()> {
        if !check_run(&env, self.config.mode) {
            summary.skipped += 1;
            if self.reporter.verbose() {
                self.reporter.run(format_args!(
                    "{} {} on {} with {}: skipped",
                    env.test.class(),
                    env.test.name(),
                    env.comm.name(),
                    env.datatype.name()
                ))?;
            }
            return Ok(());
        }
        let _span = tracing::debug_span!(
            "triple",
            test = env.test.name(),
            comm = env.comm.name(),
            datatype = env.datatype.name()
        )
        .entered();

        let sync = check_sync(&env);
        if sync {
            check!(ffi::MPI_Barrier(self.world.0))?;
        }
        let errors = if env.comm.is_member() {
            self.execute(harness, signals, env.clone())?
        } else {
            0
        };
        if sync {
            check!(ffi::MPI_Barrier(self.world.0))?;
        }
        summary.executed += 1;

        if errors > 0 {
            summary.ledger.record(FailureRecord {
                comm: env.comm_id,
                datatype: env.type_id,
                test: env.test_id,
                values_num: env.values_num,
            })?;
        }
        self.reporter.run(format_args!(
            "{} {} on {} with {}: {}",
            env.test.class(),
            env.test.name(),
            env.comm.name(),
            env.datatype.name(),
            if errors == 0 {
                "ok".to_owned()
            } else {
                format!("FAILED ({errors} mismatches)")
            }
        ))
    }

    /// Init, run and cleanup on the main thread, or on every thread for threaded tests.
    fn execute<'env>(
        &self,
        harness: &mut ThreadHarness<'env>,
        signals: &Signals,
        env: Env<'env>,
    ) -> Result<usize> {
        if env.test.class().contains(TestClass::THREADED) {
            signals.reset();
            let mut envs = Vec::with_capacity(env.threads);
            for thread in 0..env.threads {
                let handle = env.comm.handle_for(thread)?;
                envs.push(env.for_thread(thread, handle));
            }
            harness.assign_all(envs)?;
        } else {
            harness.assign_one(env)?;
        }
        harness.dispatch(Phase::Init)?;
        let errors = harness.dispatch(Phase::Run)?;
        harness.dispatch(Phase::Cleanup)?;
        Ok(errors)
    }
}
