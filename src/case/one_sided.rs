//! One-sided communication
//!
//! Windows are created over the whole allocation of a `TypedBuffer` with a displacement unit of
//! one byte, so the target displacement of instance 0 is the buffer's origin offset. That keeps
//! types with a negative lower bound inside the window.

use std::os::raw::c_int;

use mpi::ffi;
use mpi::ffi::{MPI_Group, MPI_Win};
use mpi::Address;

use super::{Env, Fixture, TestClass, TestDescriptor, TestRegistry};
use crate::check;
use crate::comm::CommClass;
use crate::config::Strictness;
use crate::datatype::TypedBuffer;
use crate::error::Result;

pub(super) fn register(registry: &mut TestRegistry) -> Result<()> {
    let comms = CommClass::INTRA | CommClass::SELF;
    registry.register(
        TestDescriptor::new("Put with Fence", TestClass::ONE_SIDED, Rma::put_fence).comms(comms),
    )?;
    registry.register(
        TestDescriptor::new("Get with Fence", TestClass::ONE_SIDED, Rma::get_fence).comms(comms),
    )?;
    registry.register(
        TestDescriptor::new("Put with Post/Start", TestClass::ONE_SIDED, Rma::put_pscw)
            .comms(comms)
            .mode(Strictness::Relaxed),
    )?;
    Ok(())
}

/// An RMA window, freed collectively by `free` or, failing that, on drop.
struct Window {
    raw: Option<MPI_Win>,
}

impl Window {
    fn create(buf: &mut TypedBuffer, env: &Env<'_>) -> Result<Window> {
        let mut raw: MPI_Win = unsafe { std::mem::zeroed() };
        check!(ffi::MPI_Win_create(
            buf.storage_mut_ptr(),
            buf.storage_len() as Address,
            1,
            ffi::RSMPI_INFO_NULL,
            env.comm_raw(),
            &mut raw
        ))?;
        Ok(Window { raw: Some(raw) })
    }

    fn fence(&self) -> Result<()> {
        match self.raw {
            Some(raw) => check!(ffi::MPI_Win_fence(0, raw)),
            None => Ok(()),
        }
    }

    fn as_raw(&self) -> Option<MPI_Win> {
        self.raw
    }

    fn free(&mut self) -> Result<()> {
        if let Some(mut raw) = self.raw.take() {
            check!(ffi::MPI_Win_free(&mut raw))?;
        }
        Ok(())
    }
}

impl Drop for Window {
    fn drop(&mut self) {
        if let Some(mut raw) = self.raw.take() {
            unsafe {
                ffi::MPI_Win_free(&mut raw);
            }
        }
    }
}

#[derive(Copy, Clone, Debug)]
enum Access {
    PutFence,
    GetFence,
    PutPostStart,
}

/// The window is always created over `exposed`; `local` is the origin buffer.
///
/// `window` is declared first so it is freed before the memory it exposes.
struct Rma {
    window: Window,
    access: Access,
    local: TypedBuffer,
    exposed: TypedBuffer,
}

impl Rma {
    fn new(env: &Env<'_>, access: Access) -> Result<Box<dyn Fixture>> {
        let mut local = env.alloc(1);
        let mut exposed = env.alloc(1);
        match access {
            Access::PutFence | Access::PutPostStart => local.set_standard_array(env.rank()),
            Access::GetFence => exposed.set_standard_array(env.rank()),
        }
        let window = Window::create(&mut exposed, env)?;
        Ok(Box::new(Rma {
            window,
            access,
            local,
            exposed,
        }))
    }

    fn put_fence(env: &Env<'_>) -> Result<Box<dyn Fixture>> {
        Rma::new(env, Access::PutFence)
    }

    fn get_fence(env: &Env<'_>) -> Result<Box<dyn Fixture>> {
        Rma::new(env, Access::GetFence)
    }

    fn put_pscw(env: &Env<'_>) -> Result<Box<dyn Fixture>> {
        Rma::new(env, Access::PutPostStart)
    }

    fn put(&self, env: &Env<'_>, win: MPI_Win, target: c_int) -> Result<()> {
        let (datatype, count) = (env.dtype(), env.count()?);
        check!(ffi::MPI_Put(
            self.local.as_ptr(),
            count,
            datatype,
            target,
            self.exposed.origin() as Address,
            count,
            datatype,
            win
        ))
    }
}

/// A group of a single rank of `env`'s communicator.
fn single_group(env: &Env<'_>, rank: c_int) -> Result<MPI_Group> {
    let mut group = unsafe { ffi::RSMPI_GROUP_NULL };
    check!(ffi::MPI_Comm_group(env.comm_raw(), &mut group))?;
    let mut single = unsafe { ffi::RSMPI_GROUP_NULL };
    let created = check!(ffi::MPI_Group_incl(group, 1, &rank, &mut single));
    check!(ffi::MPI_Group_free(&mut group))?;
    created?;
    Ok(single)
}

impl Fixture for Rma {
    fn run(&mut self, env: &Env<'_>) -> Result<usize> {
        let (source, dest) = env.ring();
        let win = match self.window.as_raw() {
            Some(win) => win,
            None => return Ok(0),
        };

        match self.access {
            Access::PutFence => {
                self.window.fence()?;
                self.put(env, win, dest)?;
                self.window.fence()?;
                env.check(&self.exposed, 0, source)
            }
            Access::GetFence => {
                let (datatype, count) = (env.dtype(), env.count()?);
                self.window.fence()?;
                check!(ffi::MPI_Get(
                    self.local.as_mut_ptr(),
                    count,
                    datatype,
                    source,
                    self.exposed.origin() as Address,
                    count,
                    datatype,
                    win
                ))?;
                self.window.fence()?;
                env.check(&self.local, 0, source)
            }
            Access::PutPostStart => {
                let mut origin_group = single_group(env, source)?;
                let mut target_group = single_group(env, dest)?;
                let epochs = (|| -> Result<()> {
                    check!(ffi::MPI_Win_post(origin_group, 0, win))?;
                    check!(ffi::MPI_Win_start(target_group, 0, win))?;
                    self.put(env, win, dest)?;
                    check!(ffi::MPI_Win_complete(win))?;
                    check!(ffi::MPI_Win_wait(win))
                })();
                check!(ffi::MPI_Group_free(&mut origin_group))?;
                check!(ffi::MPI_Group_free(&mut target_group))?;
                epochs?;
                env.check(&self.exposed, 0, source)
            }
        }
    }

    fn cleanup(mut self: Box<Self>, _env: &Env<'_>) -> Result<()> {
        self.window.free()
    }
}
