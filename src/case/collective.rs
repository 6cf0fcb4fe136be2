//! Collective tests on intra-communicators
//!
//! Data movement collectives are checked block by block against the standard pattern of the rank
//! that contributed the block. Reductions use predefined operations and therefore only run on
//! predefined datatypes.

use std::os::raw::c_int;

use mpi::ffi;
use mpi::ffi::MPI_Op;

use super::{Env, Fixture, TestClass, TestDescriptor, TestRegistry};
use crate::check;
use crate::comm::CommClass;
use crate::datatype::{TypeClass, TypedBuffer};
use crate::error::Result;

const ROOT: c_int = 0;

pub(super) fn register(registry: &mut TestRegistry) -> Result<()> {
    let comms = CommClass::INTRA | CommClass::SELF;
    for (name, kind) in [
        ("Barrier", Kind::Barrier),
        ("Bcast", Kind::Bcast),
        ("Gather", Kind::Gather),
        ("Allgather", Kind::Allgather),
        ("Scatter", Kind::Scatter),
        ("Alltoall", Kind::Alltoall),
    ] {
        let mut descriptor = TestDescriptor::new(name, TestClass::COLL, kind).comms(comms);
        if let Kind::Barrier = kind {
            // Payload-free, one type is enough.
            descriptor = descriptor.types(TypeClass::STD_CHAR);
        }
        registry.register(descriptor)?;
    }
    registry.register(
        TestDescriptor::new("Allreduce Sum", TestClass::COLL, Kind::AllreduceSum)
            .comms(comms)
            .types(TypeClass::STD_INT | TypeClass::STD_FLOAT),
    )?;
    registry.register(
        TestDescriptor::new("Allreduce Min", TestClass::COLL, Kind::AllreduceMin)
            .comms(comms)
            .types(TypeClass::PREDEFINED),
    )?;
    registry.register(
        TestDescriptor::new("Reduce Max", TestClass::COLL, Kind::ReduceMax)
            .comms(comms)
            .types(TypeClass::PREDEFINED),
    )?;
    Ok(())
}

#[derive(Copy, Clone, Debug)]
enum Kind {
    Barrier,
    Bcast,
    Gather,
    Allgather,
    Scatter,
    Alltoall,
    AllreduceSum,
    AllreduceMin,
    ReduceMax,
}

impl super::TestCase for Kind {
    fn init(&self, env: &Env<'_>) -> Result<Box<dyn Fixture>> {
        let (rank, size) = (env.rank(), env.size() as usize);
        let kind = *self;
        let (send, recv) = match kind {
            Kind::Barrier => (env.alloc(0), env.alloc(0)),
            Kind::Bcast => {
                let mut buf = env.alloc(1);
                if rank == ROOT {
                    buf.set_standard_array(rank);
                }
                (env.alloc(0), buf)
            }
            Kind::Gather | Kind::Allgather => {
                let mut send = env.alloc(1);
                send.set_standard_array(rank);
                (send, env.alloc(size))
            }
            Kind::Scatter => {
                let mut send = env.alloc(if rank == ROOT { size } else { 0 });
                if rank == ROOT {
                    for block in 0..size {
                        send.set_standard_block(block, env.values_num, block as c_int);
                    }
                }
                (send, env.alloc(1))
            }
            Kind::Alltoall => {
                let mut send = env.alloc(size);
                for block in 0..size {
                    send.set_standard_block(block, env.values_num, rank);
                }
                (send, env.alloc(size))
            }
            Kind::AllreduceSum => {
                let mut send = env.alloc(1);
                send.set_values(|i| reduction_input(rank, i));
                (send, env.alloc(1))
            }
            Kind::AllreduceMin | Kind::ReduceMax => {
                let mut send = env.alloc(1);
                send.set_standard_array(rank);
                (send, env.alloc(1))
            }
        };
        Ok(Box::new(Collective { kind, send, recv }))
    }
}

/// Zero at indices 0 and 1, `rank + i` from 2 on.
fn reduction_input(rank: c_int, i: usize) -> i64 {
    if i < 2 {
        0
    } else {
        rank as i64 + i as i64
    }
}

/// What ranks `0..size` contribute at index `i`.
fn reduction_inputs(size: c_int, i: usize) -> Vec<i64> {
    (0..size).map(|rank| reduction_input(rank, i)).collect()
}

struct Collective {
    kind: Kind,
    send: TypedBuffer,
    recv: TypedBuffer,
}

impl Collective {
    fn reduce(&mut self, env: &Env<'_>, op: MPI_Op, root: Option<c_int>) -> Result<()> {
        let (comm, datatype, count) = (env.comm_raw(), env.dtype(), env.count()?);
        match root {
            Some(root) => check!(ffi::MPI_Reduce(
                self.send.as_ptr(),
                self.recv.as_mut_ptr(),
                count,
                datatype,
                op,
                root,
                comm
            )),
            None => check!(ffi::MPI_Allreduce(
                self.send.as_ptr(),
                self.recv.as_mut_ptr(),
                count,
                datatype,
                op,
                comm
            )),
        }
    }

    fn expect(&self, env: &Env<'_>, fill: impl FnOnce(&mut TypedBuffer)) -> Result<usize> {
        let mut expected = TypedBuffer::with_layout(self.recv.layout().clone(), env.values_num);
        fill(&mut expected);
        self.recv.check_against(&expected, env.reporter)
    }
}

impl Fixture for Collective {
    fn run(&mut self, env: &Env<'_>) -> Result<usize> {
        let (comm, datatype, count) = (env.comm_raw(), env.dtype(), env.count()?);
        let (rank, size) = (env.rank(), env.size());

        match self.kind {
            Kind::Barrier => {
                check!(ffi::MPI_Barrier(comm))?;
                Ok(0)
            }
            Kind::Bcast => {
                check!(ffi::MPI_Bcast(self.recv.as_mut_ptr(), count, datatype, ROOT, comm))?;
                env.check(&self.recv, 0, ROOT)
            }
            Kind::Gather => {
                check!(ffi::MPI_Gather(
                    self.send.as_ptr(),
                    count,
                    datatype,
                    self.recv.as_mut_ptr(),
                    count,
                    datatype,
                    ROOT,
                    comm
                ))?;
                if rank != ROOT {
                    return Ok(0);
                }
                check_blocks(env, &self.recv, size)
            }
            Kind::Allgather => {
                check!(ffi::MPI_Allgather(
                    self.send.as_ptr(),
                    count,
                    datatype,
                    self.recv.as_mut_ptr(),
                    count,
                    datatype,
                    comm
                ))?;
                check_blocks(env, &self.recv, size)
            }
            Kind::Scatter => {
                check!(ffi::MPI_Scatter(
                    self.send.as_ptr(),
                    count,
                    datatype,
                    self.recv.as_mut_ptr(),
                    count,
                    datatype,
                    ROOT,
                    comm
                ))?;
                env.check(&self.recv, 0, rank)
            }
            Kind::Alltoall => {
                check!(ffi::MPI_Alltoall(
                    self.send.as_ptr(),
                    count,
                    datatype,
                    self.recv.as_mut_ptr(),
                    count,
                    datatype,
                    comm
                ))?;
                check_blocks(env, &self.recv, size)
            }
            Kind::AllreduceSum => {
                self.reduce(env, unsafe { ffi::RSMPI_SUM }, None)?;
                self.expect(env, |expected| expected_sums(expected, size))
            }
            Kind::AllreduceMin => {
                self.reduce(env, unsafe { ffi::RSMPI_MIN }, None)?;
                self.expect(env, |expected| expected.set_standard_array(0))
            }
            Kind::ReduceMax => {
                self.reduce(env, unsafe { ffi::RSMPI_MAX }, Some(ROOT))?;
                if rank != ROOT {
                    return Ok(0);
                }
                self.expect(env, |expected| expected.set_standard_array(size - 1))
            }
        }
    }
}

/// `MPI_SUM` of the reduction inputs of `size` ranks, wrapping where the scalar overflows.
fn expected_sums(expected: &mut TypedBuffer, size: c_int) {
    for i in 0..expected.count() {
        expected.set_sum(i, &reduction_inputs(size, i));
    }
}

/// Block `r` holds the standard pattern of rank `r`.
fn check_blocks(env: &Env<'_>, buf: &TypedBuffer, size: c_int) -> Result<usize> {
    let mut errors = 0;
    for block in 0..size {
        errors += env.check(buf, block as usize, block)?;
    }
    Ok(errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::ReportLevel;
    use crate::datatype::{Layout, Scalar, ValueMode};
    use crate::output::Reporter;

    /// What a correct `MPI_SUM` over 16-bit inputs delivers: clamped inputs, wrapping adds.
    fn mpi_sum_i16(size: c_int, n: usize) -> TypedBuffer {
        let mut received = TypedBuffer::with_layout(Layout::scalar(Scalar::Int16), n);
        for i in 0..n {
            let sum = (0..size).fold(0i16, |acc, rank| {
                let input = reduction_input(rank, i).clamp(i16::MIN as i64, i16::MAX as i64);
                acc.wrapping_add(input as i16)
            });
            received.set_value(i, ValueMode::Value, sum as i64);
        }
        received
    }

    fn sum_mismatches(received: &TypedBuffer, scalar: Scalar, size: c_int) -> usize {
        let mut expected = TypedBuffer::with_layout(Layout::scalar(scalar), received.count());
        expected_sums(&mut expected, size);
        received
            .check_against(&expected, &Reporter::silent(ReportLevel::Summary))
            .unwrap()
    }

    #[test]
    fn int16_sums_wrap_like_mpi() {
        for (size, n) in [(4, 1000), (33, 1000), (4, 10_000)] {
            let received = mpi_sum_i16(size, n);
            let mismatches = sum_mismatches(&received, Scalar::Int16, size);
            assert_eq!(mismatches, 0, "{size} ranks, {n} values");
        }
        // the large runs do wrap, so the check above is not vacuous
        let wrapped = mpi_sum_i16(33, 1000);
        assert!((0..1000).any(|i| wrapped.decoded(i).starts_with('-')));
    }

    #[test]
    fn wide_sums_are_exact() {
        let size = 6;
        let mut received = TypedBuffer::with_layout(Layout::scalar(Scalar::Int64), 20);
        for i in 0..20 {
            let direct: i64 = (0..size).map(|rank| reduction_input(rank, i)).sum();
            received.set_value(i, ValueMode::Value, direct);
        }
        assert_eq!(sum_mismatches(&received, Scalar::Int64, size), 0);
        assert_eq!(received.decoded(0), "0");
        // 6 * 19 + 0 + 1 + ... + 5
        assert_eq!(received.decoded(19), "129");
    }

    #[test]
    fn first_two_indices_sum_to_zero() {
        assert_eq!(reduction_inputs(5, 0), vec![0; 5]);
        assert_eq!(reduction_inputs(5, 1), vec![0; 5]);
        assert_eq!(reduction_inputs(3, 4), vec![4, 5, 6]);
    }
}
