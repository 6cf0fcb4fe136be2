//! The test registry
//!
//! A test is a `TestCase` whose `init` builds a `Fixture` for one (test, communicator, datatype)
//! triple. The fixture owns all scratch state of the triple (buffers, requests, windows, files)
//! and is consumed by `cleanup`, so whatever `init` allocated is released when the triple ends,
//! explicitly or by `Drop`.
//!
//! # Standard section(s)
//!
//! Bodies are grouped by the chapter they exercise:
//!
//! - **3**: Point-to-point communication, `p2p`
//! - **5**: Collective communication, `collective`
//! - **8**: Environmental management, `environment`
//! - **10**: Process creation and management, `dynamic`
//! - **11**: One-sided communication, `one_sided`
//! - **12.4**: `MPI_THREAD_MULTIPLE`, `threaded`
//! - **13**: I/O, `io`

use std::mem;
use std::os::raw::c_int;

use conv::ConvUtil;
use mpi::ffi;
use mpi::ffi::{MPI_Comm, MPI_Datatype};
use mpi::topology::Rank;

use crate::comm::{CommClass, CommDescriptor, RawComm};
use crate::config::Strictness;
use crate::datatype::{TypeClass, TypeDescriptor, TypedBuffer};
use crate::error::{Error, Result};
use crate::mask::class_mask;
use crate::output::Reporter;
use crate::threads::Signals;

mod collective;
mod dynamic;
mod environment;
mod io;
mod one_sided;
mod p2p;
mod threaded;

/// Maximum number of registered tests
pub const MAX_TESTS: usize = 128;

class_mask! {
    /// Classification of a registered test
    pub struct TestClass {
        /// Version queries, null objects, datatype bounds
        const ENV = 0, "Environment";
        /// Point-to-point communication
        const P2P = 1, "P2P";
        /// Collective communication
        const COLL = 2, "Collective";
        /// RMA windows
        const ONE_SIDED = 3, "One-sided";
        /// Ports, connect and accept
        const DYNAMIC = 4, "Dynamic";
        /// MPI-IO
        const IO = 5, "IO";
        /// Concurrent MPI calls from several threads per process
        const THREADED = 6, "Threaded";
    }
}

/// Builds the per-triple state of a test.
pub trait TestCase: Send + Sync {
    /// Allocate and prepare everything `run` needs.
    fn init(&self, env: &Env<'_>) -> Result<Box<dyn Fixture>>;
}

impl<F> TestCase for F
where
    F: Fn(&Env<'_>) -> Result<Box<dyn Fixture>> + Send + Sync,
{
    fn init(&self, env: &Env<'_>) -> Result<Box<dyn Fixture>> {
        self(env)
    }
}

/// The scratch state of one triple.
pub trait Fixture {
    /// Perform the MPI calls under test and check the results.
    ///
    /// Returns the number of mismatching values. API failures are errors.
    fn run(&mut self, env: &Env<'_>) -> Result<usize>;

    /// Release what `Drop` cannot, e.g. collective frees or file deletion.
    fn cleanup(self: Box<Self>, _env: &Env<'_>) -> Result<()> {
        Ok(())
    }
}

/// A registered test.
pub struct TestDescriptor {
    name: &'static str,
    class: TestClass,
    comms: CommClass,
    min_size: Rank,
    types: TypeClass,
    mode: Strictness,
    sync: bool,
    case: Box<dyn TestCase>,
}

impl TestDescriptor {
    /// A test that runs on every communicator and datatype, in strict mode and without
    /// synchronization.
    pub fn new(
        name: &'static str,
        class: TestClass,
        case: impl TestCase + 'static,
    ) -> TestDescriptor {
        TestDescriptor {
            name,
            class,
            comms: CommClass::ALL,
            min_size: 1,
            types: TypeClass::ALL,
            mode: Strictness::Strict,
            sync: false,
            case: Box::new(case),
        }
    }

    /// Restrict to communicators of these classes.
    pub fn comms(mut self, comms: CommClass) -> TestDescriptor {
        self.comms = comms;
        self
    }

    /// Skip communicators with fewer processes.
    pub fn min_size(mut self, min_size: Rank) -> TestDescriptor {
        self.min_size = min_size;
        self
    }

    /// Restrict to datatypes of these classes.
    pub fn types(mut self, types: TypeClass) -> TestDescriptor {
        self.types = types;
        self
    }

    pub fn mode(mut self, mode: Strictness) -> TestDescriptor {
        self.mode = mode;
        self
    }

    /// Barrier on `MPI_COMM_WORLD` before and after every triple. Needed by tests that receive
    /// from `MPI_ANY_SOURCE` and could otherwise match a stray message.
    pub fn sync(mut self) -> TestDescriptor {
        self.sync = true;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn class(&self) -> TestClass {
        self.class
    }

    pub fn comm_classes(&self) -> CommClass {
        self.comms
    }

    pub fn min_comm_size(&self) -> Rank {
        self.min_size
    }

    pub fn type_classes(&self) -> TypeClass {
        self.types
    }

    pub fn strictness(&self) -> Strictness {
        self.mode
    }

    pub fn needs_sync(&self) -> bool {
        self.sync
    }

    pub fn case(&self) -> &dyn TestCase {
        &*self.case
    }
}

/// The static table of tests.
#[derive(Default)]
pub struct TestRegistry {
    tests: Vec<TestDescriptor>,
}

impl TestRegistry {
    pub fn new() -> TestRegistry {
        TestRegistry::default()
    }

    /// Every test this crate knows. No MPI calls are made.
    pub fn standard() -> Result<TestRegistry> {
        let mut registry = TestRegistry::new();
        environment::register(&mut registry)?;
        p2p::register(&mut registry)?;
        collective::register(&mut registry)?;
        one_sided::register(&mut registry)?;
        io::register(&mut registry)?;
        dynamic::register(&mut registry)?;
        threaded::register(&mut registry)?;
        tracing::debug!(count = registry.count(), "test registry ready");
        Ok(registry)
    }

    /// Append a test, returning its id.
    pub fn register(&mut self, descriptor: TestDescriptor) -> Result<usize> {
        if self.tests.len() >= MAX_TESTS {
            return Err(Error::Capacity {
                table: "test registry",
                capacity: MAX_TESTS,
            });
        }
        self.tests.push(descriptor);
        Ok(self.tests.len() - 1)
    }

    pub fn count(&self) -> usize {
        self.tests.len()
    }

    pub fn get(&self, id: usize) -> Result<&TestDescriptor> {
        self.tests.get(id).ok_or(Error::InvalidId {
            registry: "test",
            id,
            count: self.tests.len(),
        })
    }

    pub fn class(&self, id: usize) -> Result<TestClass> {
        self.get(id).map(TestDescriptor::class)
    }

    pub fn name(&self, id: usize) -> Result<&'static str> {
        self.get(id).map(TestDescriptor::name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TestDescriptor> {
        self.tests.iter()
    }
}

/// Everything a test body sees of the triple it runs in.
///
/// One `Env` per participating thread; `handle` is that thread's own communicator.
#[derive(Clone)]
pub struct Env<'a> {
    pub test_id: usize,
    pub test: &'a TestDescriptor,
    pub comm_id: usize,
    pub comm: &'a CommDescriptor,
    pub type_id: usize,
    pub datatype: &'a TypeDescriptor,
    pub values_num: usize,
    pub thread: usize,
    pub threads: usize,
    pub handle: RawComm,
    pub signals: Option<&'a Signals>,
    pub reporter: &'a Reporter,
}

impl<'a> Env<'a> {
    /// The communicator of the calling thread
    pub fn comm_raw(&self) -> MPI_Comm {
        self.handle.0
    }

    pub fn dtype(&self) -> MPI_Datatype {
        self.datatype.as_raw()
    }

    /// Rank in the local group
    pub fn rank(&self) -> Rank {
        self.comm.rank()
    }

    /// Size of the local group
    pub fn size(&self) -> Rank {
        self.comm.size()
    }

    /// `values_num` as an MPI count
    pub fn count(&self) -> Result<c_int> {
        self.count_of(self.values_num)
    }

    /// Any element count as an MPI count
    pub fn count_of(&self, n: usize) -> Result<c_int> {
        n.value_as::<c_int>().map_err(|_| Error::Count(n))
    }

    /// A zeroed buffer of `blocks * values_num` instances of the datatype.
    pub fn alloc(&self, blocks: usize) -> TypedBuffer {
        TypedBuffer::alloc(self.datatype, blocks * self.values_num)
    }

    /// Check block `block` of `buf` against the standard pattern of `rank`.
    pub fn check(&self, buf: &TypedBuffer, block: usize, rank: Rank) -> Result<usize> {
        buf.check_standard_block(block, self.values_num, rank, self.reporter)
    }

    /// The environment of worker `thread` for the same triple.
    pub fn for_thread(&self, thread: usize, handle: RawComm) -> Env<'a> {
        Env {
            thread,
            handle,
            ..self.clone()
        }
    }

    /// Thread-unique tag, so the threads of one process never match each other's messages.
    pub fn tag(&self, base: c_int) -> c_int {
        base + self.thread as c_int
    }

    /// Ring neighbors in the local group: (receive from, send to)
    pub fn ring(&self) -> (Rank, Rank) {
        let (rank, size) = (self.rank(), self.size());
        ((rank + size - 1) % size, (rank + 1) % size)
    }
}

/// A status for calls that fill one in.
fn status() -> ffi::MPI_Status {
    // Plain C struct of integers, all-zero is a valid value.
    unsafe { mem::zeroed() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::ClassMask;

    struct Nothing;

    impl Fixture for Nothing {
        fn run(&mut self, _env: &Env<'_>) -> Result<usize> {
            Ok(0)
        }
    }

    fn nothing(_env: &Env<'_>) -> Result<Box<dyn Fixture>> {
        Ok(Box::new(Nothing))
    }

    #[test]
    fn builder_defaults() {
        let descriptor = TestDescriptor::new("Nothing", TestClass::ENV, nothing);
        assert_eq!(descriptor.comm_classes(), CommClass::ALL);
        assert_eq!(descriptor.type_classes(), TypeClass::ALL);
        assert_eq!(descriptor.min_comm_size(), 1);
        assert_eq!(descriptor.strictness(), Strictness::Strict);
        assert!(!descriptor.needs_sync());

        let descriptor = descriptor.min_size(2).comms(CommClass::INTRA).sync();
        assert_eq!(descriptor.min_comm_size(), 2);
        assert_eq!(descriptor.comm_classes(), CommClass::INTRA);
        assert!(descriptor.needs_sync());
    }

    #[test]
    fn standard_registry_is_consistent() {
        let registry = TestRegistry::standard().unwrap();
        assert!(registry.count() > 0 && registry.count() <= MAX_TESTS);
        let mut names: Vec<_> = registry.iter().map(|t| t.name().to_ascii_lowercase()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), registry.count(), "test names must be unique");
        for &(_, class) in TestClass::NAMES {
            assert!(
                registry.iter().any(|t| t.class().intersects(class)),
                "no test of class {class}"
            );
        }
        // A name lookup must never be mistaken for a class lookup.
        assert!(registry.iter().all(|t| TestClass::from_name(t.name()).is_none()));
    }

    #[test]
    fn registry_capacity_is_fatal() {
        let mut registry = TestRegistry::new();
        for _ in 0..MAX_TESTS {
            registry
                .register(TestDescriptor::new("Nothing", TestClass::ENV, nothing))
                .unwrap();
        }
        assert!(matches!(
            registry.register(TestDescriptor::new("Nothing", TestClass::ENV, nothing)),
            Err(Error::Capacity { .. })
        ));
        assert!(matches!(registry.get(MAX_TESTS), Err(Error::InvalidId { .. })));
    }
}
