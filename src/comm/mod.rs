//! The communicator registry
//!
//! Every test runs once per selected communicator. The registry owns all communicators it
//! creates and, for the threaded tests, one private duplicate of each per worker thread, so no
//! two threads ever share a communicator context.

use std::os::raw::c_int;

use smallvec::SmallVec;

use mpi::ffi;
use mpi::ffi::{MPI_Comm, MPI_Group};
use mpi::topology::Rank;

use crate::check;
use crate::error::{Error, Result};
use crate::mask::class_mask;

mod handle;
mod standard;

pub use self::handle::{CommHandle, RawComm};

/// Maximum number of registered communicators
pub const MAX_COMMS: usize = 32;

class_mask! {
    /// Classification of a registered communicator
    pub struct CommClass {
        /// `MPI_COMM_SELF`
        const SELF = 0, "Self";
        /// `MPI_COMM_NULL` on every process
        const NULL = 1, "Null";
        /// Intra-communicators
        const INTRA = 2, "Intra_Comm";
        /// Inter-communicators
        const INTER = 3, "Inter_Comm";
        /// Cartesian topologies
        const CART = 4, "Cart_Comm";
        /// Graph topologies
        const TOPO = 5, "Topo_Comm";
        /// Processes sharing memory
        const SHARED = 6, "Shared_Comm";
    }
}

/// Rank lists are short for typical test runs.
pub type Mapping = SmallVec<[Rank; 16]>;

/// A registered communicator.
pub struct CommDescriptor {
    name: String,
    class: CommClass,
    handle: CommHandle,
    duplicates: Vec<CommHandle>,
    size: Rank,
    min_size: Rank,
    rank: Rank,
    mapping: Mapping,
    remote_size: Rank,
    remote_mapping: Mapping,
}

impl CommDescriptor {
    /// Describe `handle` and create `threads - 1` private duplicates of it.
    ///
    /// Collective over `world`: every process must describe the same communicators in the same
    /// order, members or not.
    pub fn new(
        name: impl Into<String>,
        handle: CommHandle,
        mut class: CommClass,
        world: MPI_Comm,
        threads: usize,
    ) -> Result<CommDescriptor> {
        let name = name.into();
        let (mut size, mut rank, mut remote_size) = (0, 0, 0);
        let mut mapping = Mapping::new();
        let mut remote_mapping = Mapping::new();

        if !handle.is_null() {
            let raw = handle.as_raw();
            check!(ffi::MPI_Comm_size(raw, &mut size))?;
            check!(ffi::MPI_Comm_rank(raw, &mut rank))?;

            let mut group = unsafe { ffi::RSMPI_GROUP_NULL };
            check!(ffi::MPI_Comm_group(raw, &mut group))?;
            mapping = translate_to_world(group, size, world)?;

            if handle.is_inter() {
                check!(ffi::MPI_Comm_remote_size(raw, &mut remote_size))?;
                let mut remote = unsafe { ffi::RSMPI_GROUP_NULL };
                check!(ffi::MPI_Comm_remote_group(raw, &mut remote))?;
                remote_mapping = translate_to_world(remote, remote_size, world)?;
            }
        }

        // Members of no communicator contribute nothing to the minimum.
        let local = if handle.is_null() { Rank::MAX } else { size };
        let mut min_size: Rank = 0;
        check!(ffi::MPI_Allreduce(
            &local as *const Rank as *const _,
            &mut min_size as *mut Rank as *mut _,
            1,
            ffi::RSMPI_INT32_T,
            ffi::RSMPI_MIN,
            world
        ))?;
        // The class must be the same everywhere, so `Null` only marks a communicator no process
        // is a member of.
        if min_size == Rank::MAX {
            min_size = 0;
            class |= CommClass::NULL;
        }

        let duplicates = (1..threads)
            .map(|_| handle.duplicate())
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(%name, %class, size, min_size, rank, "registered communicator");
        Ok(CommDescriptor {
            name,
            class,
            handle,
            duplicates,
            size,
            min_size,
            rank,
            mapping,
            remote_size,
            remote_mapping,
        })
    }

    /// Describe a communicator without touching MPI, for exercising the selection logic.
    pub fn detached(name: impl Into<String>, class: CommClass, size: Rank) -> CommDescriptor {
        CommDescriptor {
            name: name.into(),
            class,
            handle: CommHandle::Null,
            duplicates: Vec::new(),
            size,
            min_size: size,
            rank: 0,
            mapping: (0..size).collect(),
            remote_size: 0,
            remote_mapping: Mapping::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class(&self) -> CommClass {
        self.class
    }

    /// Number of processes in the local group of this process's communicator
    pub fn size(&self) -> Rank {
        self.size
    }

    /// Smallest local size over all processes, identical everywhere
    pub fn min_size(&self) -> Rank {
        self.min_size
    }

    /// Rank of this process in the local group
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// `MPI_COMM_WORLD` rank of each rank of the local group
    pub fn mapping(&self) -> &[Rank] {
        &self.mapping
    }

    /// Size of the remote group, zero for intra-communicators
    pub fn remote_size(&self) -> Rank {
        self.remote_size
    }

    /// `MPI_COMM_WORLD` rank of each rank of the remote group
    pub fn remote_mapping(&self) -> &[Rank] {
        &self.remote_mapping
    }

    pub fn is_member(&self) -> bool {
        !self.handle.is_null()
    }

    /// The handle thread `thread` works with: the master handle for the main thread (0), the
    /// private duplicate for every worker.
    pub fn handle_for(&self, thread: usize) -> Result<RawComm> {
        if thread == 0 {
            return Ok(self.handle.raw_comm());
        }
        self.duplicates
            .get(thread - 1)
            .map(CommHandle::raw_comm)
            .ok_or_else(|| {
                Error::Harness(format!(
                    "communicator {} has no duplicate for thread {thread}",
                    self.name
                ))
            })
    }
}

fn translate_to_world(mut group: MPI_Group, size: Rank, world: MPI_Comm) -> Result<Mapping> {
    let mut world_group = unsafe { ffi::RSMPI_GROUP_NULL };
    check!(ffi::MPI_Comm_group(world, &mut world_group))?;
    let ranks: Vec<c_int> = (0..size).collect();
    let mut translated = vec![0 as c_int; size as usize];
    let res = check!(ffi::MPI_Group_translate_ranks(
        group,
        size,
        ranks.as_ptr(),
        world_group,
        translated.as_mut_ptr()
    ));
    check!(ffi::MPI_Group_free(&mut group))?;
    check!(ffi::MPI_Group_free(&mut world_group))?;
    res?;
    Ok(translated.into_iter().collect())
}

/// The table of communicators every test is combined with.
#[derive(Default)]
pub struct CommRegistry {
    comms: Vec<CommDescriptor>,
}

impl CommRegistry {
    pub fn new() -> CommRegistry {
        CommRegistry::default()
    }

    /// Build the standard set of communicators from `world`.
    ///
    /// Collective over `world`. Any construction failure is fatal.
    pub fn standard(world: MPI_Comm, threads: usize) -> Result<CommRegistry> {
        standard::build(world, threads)
    }

    /// Append a communicator, returning its id.
    pub fn register(&mut self, descriptor: CommDescriptor) -> Result<usize> {
        if self.comms.len() >= MAX_COMMS {
            return Err(Error::Capacity {
                table: "communicator registry",
                capacity: MAX_COMMS,
            });
        }
        self.comms.push(descriptor);
        Ok(self.comms.len() - 1)
    }

    pub fn count(&self) -> usize {
        self.comms.len()
    }

    pub fn get(&self, id: usize) -> Result<&CommDescriptor> {
        self.comms.get(id).ok_or(Error::InvalidId {
            registry: "communicator",
            id,
            count: self.comms.len(),
        })
    }

    /// See `CommDescriptor::handle_for`
    pub fn handle(&self, id: usize, thread: usize) -> Result<RawComm> {
        self.get(id)?.handle_for(thread)
    }

    pub fn class(&self, id: usize) -> Result<CommClass> {
        self.get(id).map(CommDescriptor::class)
    }

    pub fn name(&self, id: usize) -> Result<&str> {
        self.get(id).map(CommDescriptor::name)
    }

    pub fn size(&self, id: usize) -> Result<Rank> {
        self.get(id).map(CommDescriptor::size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_check_ids() {
        let mut registry = CommRegistry::new();
        let id = registry
            .register(CommDescriptor::detached("MPI_COMM_WORLD", CommClass::INTRA, 4))
            .unwrap();
        assert_eq!(registry.name(id).unwrap(), "MPI_COMM_WORLD");
        assert_eq!(registry.size(id).unwrap(), 4);
        assert_eq!(registry.class(id).unwrap(), CommClass::INTRA);
        assert!(matches!(registry.get(5), Err(Error::InvalidId { id: 5, .. })));
    }

    #[test]
    fn registry_capacity_is_fatal() {
        let mut registry = CommRegistry::new();
        for i in 0..MAX_COMMS {
            registry
                .register(CommDescriptor::detached(format!("c{i}"), CommClass::INTRA, 1))
                .unwrap();
        }
        assert!(matches!(
            registry.register(CommDescriptor::detached("one too many", CommClass::INTRA, 1)),
            Err(Error::Capacity { .. })
        ));
    }

    #[test]
    fn workers_without_duplicates_are_rejected() {
        let descriptor = CommDescriptor::detached("MPI_COMM_SELF", CommClass::SELF, 1);
        assert!(descriptor.handle_for(0).is_ok());
        assert!(matches!(descriptor.handle_for(1), Err(Error::Harness(_))));
    }

    #[test]
    fn detached_mapping_is_identity() {
        let descriptor = CommDescriptor::detached("MPI_COMM_WORLD", CommClass::INTRA, 3);
        assert_eq!(descriptor.mapping(), &[0, 1, 2]);
        assert_eq!(descriptor.remote_size(), 0);
    }
}
