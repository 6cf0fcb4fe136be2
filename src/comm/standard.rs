//! The fixed sequence of communicators every run registers

use std::os::raw::c_int;

use mpi::ffi;
use mpi::ffi::MPI_Comm;

use super::{CommClass, CommDescriptor, CommHandle, CommRegistry};
use crate::check;
use crate::error::Result;

const INTERCOMM_TAG: c_int = 4711;

fn size_and_rank(world: MPI_Comm) -> Result<(c_int, c_int)> {
    let (mut size, mut rank) = (0, 0);
    check!(ffi::MPI_Comm_size(world, &mut size))?;
    check!(ffi::MPI_Comm_rank(world, &mut rank))?;
    Ok((size, rank))
}

fn split(comm: MPI_Comm, color: c_int, key: c_int) -> Result<CommHandle> {
    let mut newcomm = unsafe { ffi::RSMPI_COMM_NULL };
    check!(ffi::MPI_Comm_split(comm, color, key, &mut newcomm))?;
    unsafe { CommHandle::from_raw(newcomm) }
}

/// World with the rank order reversed, built from an explicit group.
fn reversed(world: MPI_Comm, size: c_int) -> Result<CommHandle> {
    let mut group = unsafe { ffi::RSMPI_GROUP_NULL };
    check!(ffi::MPI_Comm_group(world, &mut group))?;
    let ranks: Vec<c_int> = (0..size).rev().collect();
    let mut reversed = unsafe { ffi::RSMPI_GROUP_NULL };
    check!(ffi::MPI_Group_incl(group, size, ranks.as_ptr(), &mut reversed))?;
    let mut newcomm = unsafe { ffi::RSMPI_COMM_NULL };
    let created = check!(ffi::MPI_Comm_create(world, reversed, &mut newcomm));
    check!(ffi::MPI_Group_free(&mut reversed))?;
    check!(ffi::MPI_Group_free(&mut group))?;
    created?;
    unsafe { CommHandle::from_raw(newcomm) }
}

fn cartesian(world: MPI_Comm, size: c_int, ndims: usize) -> Result<CommHandle> {
    let mut dims = vec![0 as c_int; ndims];
    check!(ffi::MPI_Dims_create(size, ndims as c_int, dims.as_mut_ptr()))?;
    let periods = vec![0 as c_int; ndims];
    let mut newcomm = unsafe { ffi::RSMPI_COMM_NULL };
    check!(ffi::MPI_Cart_create(
        world,
        ndims as c_int,
        dims.as_ptr(),
        periods.as_ptr(),
        0,
        &mut newcomm
    ))?;
    unsafe { CommHandle::from_raw(newcomm) }
}

/// Every process is a neighbor of every other process.
fn fully_connected(world: MPI_Comm, size: c_int) -> Result<CommHandle> {
    let index: Vec<c_int> = (1..=size).map(|node| node * (size - 1)).collect();
    let edges: Vec<c_int> = (0..size)
        .flat_map(|node| (0..size).filter(move |&other| other != node))
        .collect();
    let mut newcomm = unsafe { ffi::RSMPI_COMM_NULL };
    check!(ffi::MPI_Graph_create(
        world,
        size,
        index.as_ptr(),
        edges.as_ptr(),
        0,
        &mut newcomm
    ))?;
    unsafe { CommHandle::from_raw(newcomm) }
}

/// Connects the lower and upper half of world. `local` is the halved split, leaders are local
/// rank 0 of either half, i.e. world ranks 0 and `size / 2`.
fn intercomm(local: MPI_Comm, world: MPI_Comm, size: c_int, rank: c_int) -> Result<CommHandle> {
    let remote_leader = if rank < size / 2 { size / 2 } else { 0 };
    let mut newcomm = unsafe { ffi::RSMPI_COMM_NULL };
    check!(ffi::MPI_Intercomm_create(
        local,
        0,
        world,
        remote_leader,
        INTERCOMM_TAG,
        &mut newcomm
    ))?;
    unsafe { CommHandle::from_raw(newcomm) }
}

fn merge(inter: MPI_Comm, high: bool) -> Result<CommHandle> {
    let mut newcomm = unsafe { ffi::RSMPI_COMM_NULL };
    check!(ffi::MPI_Intercomm_merge(inter, high as c_int, &mut newcomm))?;
    unsafe { CommHandle::from_raw(newcomm) }
}

#[cfg(not(msmpi))]
fn shared(world: MPI_Comm, rank: c_int) -> Result<CommHandle> {
    let mut newcomm = unsafe { ffi::RSMPI_COMM_NULL };
    check!(ffi::MPI_Comm_split_type(
        world,
        ffi::RSMPI_COMM_TYPE_SHARED,
        rank,
        ffi::RSMPI_INFO_NULL,
        &mut newcomm
    ))?;
    unsafe { CommHandle::from_raw(newcomm) }
}

pub(super) fn build(world: MPI_Comm, threads: usize) -> Result<CommRegistry> {
    let (size, rank) = size_and_rank(world)?;
    let lower = rank < size / 2;
    let mut registry = CommRegistry::new();
    let mut add = |name: &str, handle: CommHandle, class: CommClass| -> Result<usize> {
        registry.register(CommDescriptor::new(name, handle, class, world, threads)?)
    };

    add("MPI_COMM_WORLD", CommHandle::World, CommClass::INTRA)?;
    add("MPI_COMM_SELF", CommHandle::SelfComm, CommClass::SELF)?;
    add(
        "Duplicated MPI_COMM_WORLD",
        CommHandle::World.duplicate()?,
        CommClass::INTRA,
    )?;
    add("Reversed MPI_COMM_WORLD", reversed(world, size)?, CommClass::INTRA)?;

    let halved = split(world, lower as c_int, rank)?;
    let halved_raw = halved.as_raw();
    add("Halved MPI_COMM_WORLD", halved, CommClass::INTRA)?;

    add(
        "Two-dimensional Cartesian",
        cartesian(world, size, 2)?,
        CommClass::INTRA | CommClass::CART,
    )?;
    add(
        "Three-dimensional Cartesian",
        cartesian(world, size, 3)?,
        CommClass::INTRA | CommClass::CART,
    )?;
    add("Odd/Even split MPI_COMM_WORLD", split(world, rank % 2, rank)?, CommClass::INTRA)?;
    add(
        "Fully-connected Graph",
        fully_connected(world, size)?,
        CommClass::INTRA | CommClass::TOPO,
    )?;

    if size >= 2 {
        let inter = intercomm(halved_raw, world, size, rank)?;
        let inter_raw = inter.as_raw();
        add("Intercomm of halved MPI_COMM_WORLD", inter, CommClass::INTER)?;
        add("Merged intercomm", merge(inter_raw, !lower)?, CommClass::INTRA)?;
    }

    #[cfg(not(msmpi))]
    add(
        "Shared-memory split MPI_COMM_WORLD",
        shared(world, rank)?,
        CommClass::INTRA | CommClass::SHARED,
    )?;

    drop(add);
    tracing::info!(count = registry.count(), "communicator registry ready");
    Ok(registry)
}
