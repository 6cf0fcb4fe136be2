//! Client/server connection through ports
//!
//! The lower half of the communicator opens a port and accepts, the upper half connects. Process
//! managers without name service support often cannot do this, so the test only runs in the
//! `disabled` execution mode.

use std::os::raw::{c_char, c_int, c_void};

use mpi::ffi;

use super::p2p::exchange_with_remote;
use super::{Env, Fixture, TestClass, TestDescriptor, TestRegistry};
use crate::check;
use crate::comm::{CommClass, CommHandle};
use crate::config::Strictness;
use crate::error::Result;

pub(super) fn register(registry: &mut TestRegistry) -> Result<()> {
    registry.register(
        TestDescriptor::new("Connect/Accept", TestClass::DYNAMIC, ConnectAccept::init)
            .comms(CommClass::INTRA)
            .min_size(2)
            .mode(Strictness::Disabled),
    )?;
    Ok(())
}

struct ConnectAccept {
    /// Port name, NUL terminated, identical on every process
    port: Vec<c_char>,
    /// Whether this process opened the port
    owner: bool,
    server: bool,
    half: CommHandle,
    inter: CommHandle,
}

impl ConnectAccept {
    fn init(env: &Env<'_>) -> Result<Box<dyn Fixture>> {
        let (rank, size) = (env.rank(), env.size());
        let server = rank < size / 2;

        let mut half = unsafe { ffi::RSMPI_COMM_NULL };
        check!(ffi::MPI_Comm_split(env.comm_raw(), server as c_int, rank, &mut half))?;
        let half = unsafe { CommHandle::from_raw(half)? };

        let len = ffi::MPI_MAX_PORT_NAME as usize + 1;
        let mut port = vec![0 as c_char; len];
        let owner = rank == 0;
        if owner {
            check!(ffi::MPI_Open_port(ffi::RSMPI_INFO_NULL, port.as_mut_ptr()))?;
        }
        check!(ffi::MPI_Bcast(
            port.as_mut_ptr() as *mut c_void,
            len as c_int,
            ffi::RSMPI_UINT8_T,
            0,
            env.comm_raw()
        ))?;

        Ok(Box::new(ConnectAccept {
            port,
            owner,
            server,
            half,
            inter: CommHandle::Null,
        }))
    }
}

impl Fixture for ConnectAccept {
    fn run(&mut self, env: &Env<'_>) -> Result<usize> {
        let mut inter = unsafe { ffi::RSMPI_COMM_NULL };
        if self.server {
            check!(ffi::MPI_Comm_accept(
                self.port.as_ptr(),
                ffi::RSMPI_INFO_NULL,
                0,
                self.half.as_raw(),
                &mut inter
            ))?;
        } else {
            check!(ffi::MPI_Comm_connect(
                self.port.as_ptr(),
                ffi::RSMPI_INFO_NULL,
                0,
                self.half.as_raw(),
                &mut inter
            ))?;
        }
        self.inter = unsafe { CommHandle::from_raw(inter)? };

        let (mut rank, mut remote_size) = (0, 0);
        check!(ffi::MPI_Comm_rank(self.half.as_raw(), &mut rank))?;
        check!(ffi::MPI_Comm_remote_size(self.inter.as_raw(), &mut remote_size))?;
        if rank >= remote_size {
            return Ok(0);
        }

        let mut send = env.alloc(1);
        send.set_standard_array(rank);
        let mut recv = env.alloc(1);
        exchange_with_remote(env, self.inter.as_raw(), rank, &send, &mut recv)?;
        env.check(&recv, 0, rank)
    }

    fn cleanup(mut self: Box<Self>, _env: &Env<'_>) -> Result<()> {
        // Disconnects the inter-communicator.
        self.inter = CommHandle::Null;
        if self.owner {
            check!(ffi::MPI_Close_port(self.port.as_ptr()))?;
        }
        Ok(())
    }
}
