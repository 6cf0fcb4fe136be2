//! Point-to-point tests
//!
//! All ring variants send `values_num` instances of the selected datatype, filled with the
//! standard pattern of the sender, to the next rank and check what arrives from the previous one.
//! The receive is always posted before the send so the ring cannot deadlock, even on
//! `MPI_COMM_SELF` or with synchronous sends.

use std::os::raw::c_int;

use mpi::ffi;
use mpi::ffi::MPI_Request;

use super::{status, Env, Fixture, TestClass, TestDescriptor, TestRegistry};
use crate::check;
use crate::comm::CommClass;
use crate::datatype::TypedBuffer;
use crate::error::Result;

const RING_TAG: c_int = 100;
const EXCHANGE_TAG: c_int = 200;

pub(super) fn register(registry: &mut TestRegistry) -> Result<()> {
    let ring_comms = CommClass::INTRA | CommClass::SELF;
    registry.register(TestDescriptor::new("Ring", TestClass::P2P, Ring::plain).comms(ring_comms))?;
    registry.register(
        TestDescriptor::new("Ring Isend", TestClass::P2P, Ring::isend).comms(ring_comms),
    )?;
    registry.register(
        TestDescriptor::new("Ring Ssend", TestClass::P2P, Ring::ssend).comms(ring_comms),
    )?;
    registry.register(
        TestDescriptor::new("Ring Sendrecv", TestClass::P2P, Ring::sendrecv).comms(ring_comms),
    )?;
    registry.register(
        TestDescriptor::new("Ring ANY_SOURCE", TestClass::P2P, Ring::any_source)
            .comms(ring_comms)
            .sync(),
    )?;
    registry.register(
        TestDescriptor::new("Probe ANY_SOURCE", TestClass::P2P, Ring::probe)
            .comms(ring_comms)
            .sync(),
    )?;
    registry.register(
        TestDescriptor::new("Intercomm Exchange", TestClass::P2P, Exchange::init)
            .comms(CommClass::INTER),
    )?;
    Ok(())
}

#[derive(Copy, Clone, Debug)]
pub(super) enum Variant {
    /// `MPI_Irecv`, `MPI_Send`, `MPI_Wait`
    Plain,
    /// `MPI_Isend`, `MPI_Recv`, `MPI_Wait`
    Isend,
    /// `MPI_Irecv`, `MPI_Ssend`, `MPI_Wait`
    Ssend,
    /// `MPI_Sendrecv`
    Sendrecv,
    /// `MPI_Irecv` from `MPI_ANY_SOURCE`, the status names the sender
    AnySource,
    /// `MPI_Probe` from `MPI_ANY_SOURCE`, then receive from the probed source
    Probe,
}

pub(super) struct Ring {
    variant: Variant,
    send: TypedBuffer,
    recv: TypedBuffer,
}

impl Ring {
    pub(super) fn with_variant(env: &Env<'_>, variant: Variant) -> Ring {
        let mut send = env.alloc(1);
        send.set_standard_array(env.rank());
        Ring {
            variant,
            send,
            recv: env.alloc(1),
        }
    }

    fn new(env: &Env<'_>, variant: Variant) -> Result<Box<dyn Fixture>> {
        Ok(Box::new(Ring::with_variant(env, variant)))
    }

    fn plain(env: &Env<'_>) -> Result<Box<dyn Fixture>> {
        Ring::new(env, Variant::Plain)
    }

    fn isend(env: &Env<'_>) -> Result<Box<dyn Fixture>> {
        Ring::new(env, Variant::Isend)
    }

    fn ssend(env: &Env<'_>) -> Result<Box<dyn Fixture>> {
        Ring::new(env, Variant::Ssend)
    }

    fn sendrecv(env: &Env<'_>) -> Result<Box<dyn Fixture>> {
        Ring::new(env, Variant::Sendrecv)
    }

    fn any_source(env: &Env<'_>) -> Result<Box<dyn Fixture>> {
        Ring::new(env, Variant::AnySource)
    }

    fn probe(env: &Env<'_>) -> Result<Box<dyn Fixture>> {
        Ring::new(env, Variant::Probe)
    }

    /// Exchange along the ring once, returning the source the status reported.
    pub(super) fn exchange(&mut self, env: &Env<'_>) -> Result<c_int> {
        let (source, dest) = env.ring();
        let (comm, datatype, count) = (env.comm_raw(), env.dtype(), env.count()?);
        let tag = env.tag(RING_TAG);
        let mut request: MPI_Request = unsafe { ffi::RSMPI_REQUEST_NULL };
        let mut status = status();

        match self.variant {
            Variant::Plain | Variant::Ssend | Variant::AnySource => {
                let from = match self.variant {
                    Variant::AnySource => unsafe { ffi::RSMPI_ANY_SOURCE },
                    _ => source,
                };
                check!(ffi::MPI_Irecv(
                    self.recv.as_mut_ptr(),
                    count,
                    datatype,
                    from,
                    tag,
                    comm,
                    &mut request
                ))?;
                if let Variant::Ssend = self.variant {
                    check!(ffi::MPI_Ssend(self.send.as_ptr(), count, datatype, dest, tag, comm))?;
                } else {
                    check!(ffi::MPI_Send(self.send.as_ptr(), count, datatype, dest, tag, comm))?;
                }
                check!(ffi::MPI_Wait(&mut request, &mut status))?;
            }
            Variant::Isend => {
                check!(ffi::MPI_Isend(
                    self.send.as_ptr(),
                    count,
                    datatype,
                    dest,
                    tag,
                    comm,
                    &mut request
                ))?;
                check!(ffi::MPI_Recv(
                    self.recv.as_mut_ptr(),
                    count,
                    datatype,
                    source,
                    tag,
                    comm,
                    &mut status
                ))?;
                let mut send_status = super::status();
                check!(ffi::MPI_Wait(&mut request, &mut send_status))?;
            }
            Variant::Sendrecv => {
                check!(ffi::MPI_Sendrecv(
                    self.send.as_ptr(),
                    count,
                    datatype,
                    dest,
                    tag,
                    self.recv.as_mut_ptr(),
                    count,
                    datatype,
                    source,
                    tag,
                    comm,
                    &mut status
                ))?;
            }
            Variant::Probe => {
                check!(ffi::MPI_Isend(
                    self.send.as_ptr(),
                    count,
                    datatype,
                    dest,
                    tag,
                    comm,
                    &mut request
                ))?;
                let mut probed = super::status();
                check!(ffi::MPI_Probe(ffi::RSMPI_ANY_SOURCE, tag, comm, &mut probed))?;
                check!(ffi::MPI_Recv(
                    self.recv.as_mut_ptr(),
                    count,
                    datatype,
                    probed.MPI_SOURCE,
                    tag,
                    comm,
                    &mut status
                ))?;
                let mut send_status = super::status();
                check!(ffi::MPI_Wait(&mut request, &mut send_status))?;
                if probed.MPI_SOURCE != status.MPI_SOURCE {
                    return Ok(-1);
                }
            }
        }
        Ok(status.MPI_SOURCE)
    }

    /// Check the received block and the source the status reported.
    pub(super) fn verify(&self, env: &Env<'_>, reported: c_int) -> Result<usize> {
        let (source, _) = env.ring();
        let mut errors = env.check(&self.recv, 0, source)?;
        if reported != source {
            env.reporter.full(format_args!(
                "{:?}: status names source {reported}, expected {source}",
                self.variant
            ))?;
            errors += 1;
        }
        Ok(errors)
    }
}

impl Fixture for Ring {
    fn run(&mut self, env: &Env<'_>) -> Result<usize> {
        let reported = self.exchange(env)?;
        self.verify(env, reported)
    }
}

/// Ranks `r` of both groups of an inter-communicator exchange with each other, for every `r`
/// that exists on both sides.
struct Exchange {
    send: TypedBuffer,
    recv: TypedBuffer,
}

impl Exchange {
    fn init(env: &Env<'_>) -> Result<Box<dyn Fixture>> {
        let mut send = env.alloc(1);
        send.set_standard_array(env.rank());
        Ok(Box::new(Exchange {
            send,
            recv: env.alloc(1),
        }))
    }
}

impl Fixture for Exchange {
    fn run(&mut self, env: &Env<'_>) -> Result<usize> {
        let peer = env.rank();
        if peer >= env.comm.remote_size() {
            return Ok(0);
        }
        exchange_with_remote(env, env.comm_raw(), peer, &self.send, &mut self.recv)?;
        env.check(&self.recv, 0, peer)
    }
}

/// Send `send` to and receive `recv` from rank `peer` of the remote group of `inter`.
pub(super) fn exchange_with_remote(
    env: &Env<'_>,
    inter: ffi::MPI_Comm,
    peer: c_int,
    send: &TypedBuffer,
    recv: &mut TypedBuffer,
) -> Result<()> {
    let (datatype, count, tag) = (env.dtype(), env.count()?, env.tag(EXCHANGE_TAG));
    let mut status = status();
    check!(ffi::MPI_Sendrecv(
        send.as_ptr(),
        count,
        datatype,
        peer,
        tag,
        recv.as_mut_ptr(),
        count,
        datatype,
        peer,
        tag,
        inter,
        &mut status
    ))
}
