//! Ownership of communicator handles
//!
//! Predefined communicators are borrowed from the library, everything else the registry creates is
//! released when its handle is dropped.

use std::os::raw::c_int;

use mpi::ffi;
use mpi::ffi::MPI_Comm;

use crate::check;
use crate::error::Result;

/// An owned communicator handle.
pub enum CommHandle {
    /// `MPI_COMM_NULL`, for processes that are not members of a communicator.
    Null,

    /// Built-in communicator `MPI_COMM_SELF`. Exists until `MPI_Finalize` is called.
    SelfComm,

    /// Built-in communicator `MPI_COMM_WORLD`. Exists until `MPI_Finalize` is called.
    World,

    /// An intra-communicator created through splitting, duplication, topology or group
    /// constructors. Freed when dropped.
    User(MPI_Comm),

    /// An inter-communicator. Disconnected when dropped, which also covers communicators
    /// obtained through `MPI_Comm_connect`/`MPI_Comm_accept`.
    Inter(MPI_Comm),
}

impl CommHandle {
    /// Take ownership of a freshly created raw handle.
    ///
    /// # Safety
    /// - `raw` must be `MPI_COMM_NULL` or a live communicator that nothing else frees
    pub unsafe fn from_raw(raw: MPI_Comm) -> Result<CommHandle> {
        if raw == ffi::RSMPI_COMM_NULL {
            return Ok(CommHandle::Null);
        }
        let mut flag: c_int = 0;
        check!(ffi::MPI_Comm_test_inter(raw, &mut flag))?;
        Ok(if flag != 0 {
            CommHandle::Inter(raw)
        } else {
            CommHandle::User(raw)
        })
    }

    pub fn as_raw(&self) -> MPI_Comm {
        match self {
            CommHandle::Null => unsafe { ffi::RSMPI_COMM_NULL },
            CommHandle::SelfComm => unsafe { ffi::RSMPI_COMM_SELF },
            CommHandle::World => unsafe { ffi::RSMPI_COMM_WORLD },
            CommHandle::User(handle) | CommHandle::Inter(handle) => *handle,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CommHandle::Null)
    }

    pub fn is_inter(&self) -> bool {
        matches!(self, CommHandle::Inter(_))
    }

    /// `MPI_Comm_dup`, collective over the communicator. Null stays null.
    pub fn duplicate(&self) -> Result<CommHandle> {
        if self.is_null() {
            return Ok(CommHandle::Null);
        }
        let mut newcomm = unsafe { ffi::RSMPI_COMM_NULL };
        check!(ffi::MPI_Comm_dup(self.as_raw(), &mut newcomm))?;
        unsafe { CommHandle::from_raw(newcomm) }
    }

    /// A copyable view of the raw handle for passing to test bodies.
    pub fn raw_comm(&self) -> RawComm {
        RawComm(self.as_raw())
    }
}

impl Drop for CommHandle {
    fn drop(&mut self) {
        match self {
            // predefined, never freed
            CommHandle::Null | CommHandle::SelfComm | CommHandle::World => {}
            CommHandle::User(handle) => unsafe {
                ffi::MPI_Comm_free(handle);
                debug_assert!(*handle == ffi::RSMPI_COMM_NULL);
            },
            CommHandle::Inter(handle) => unsafe {
                ffi::MPI_Comm_disconnect(handle);
                debug_assert!(*handle == ffi::RSMPI_COMM_NULL);
            },
        }
    }
}

// Communicators are only ever used from the threads of a run initialized with
// `MPI_THREAD_MULTIPLE`, and each worker thread gets its own duplicate.
unsafe impl Send for CommHandle {}
unsafe impl Sync for CommHandle {}

/// A borrowed raw communicator handle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RawComm(pub MPI_Comm);

unsafe impl Send for RawComm {}
unsafe impl Sync for RawComm {}
