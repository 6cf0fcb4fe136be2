//! MPI-IO

use std::ffi::CString;
use std::os::raw::{c_int, c_void};
use std::path::PathBuf;

use mpi::ffi;
use mpi::ffi::{MPI_File, MPI_Offset};

use super::{status, Env, Fixture, TestClass, TestDescriptor, TestRegistry};
use crate::check;
use crate::comm::CommClass;
use crate::datatype::TypedBuffer;
use crate::error::{Error, Result};

pub(super) fn register(registry: &mut TestRegistry) -> Result<()> {
    registry.register(
        TestDescriptor::new("File Write_at/Read_at", TestClass::IO, WriteReadAt::init)
            .comms(CommClass::INTRA | CommClass::SELF),
    )?;
    Ok(())
}

/// Name of the file shared by a communicator whose rank 0 is world rank `owner` with process id
/// `pid`.
///
/// Relative, so it lands in the working directory, which multi-node runs share like the report
/// logfiles.
fn shared_file_name(pid: u32, owner: u32) -> PathBuf {
    PathBuf::from(format!("mpi_conformance_{pid}_{owner}.dat"))
}

/// The file every member of the communicator opens, named after its rank 0.
fn shared_path(env: &Env<'_>) -> Result<CString> {
    let mut world_rank: c_int = 0;
    check!(ffi::MPI_Comm_rank(ffi::RSMPI_COMM_WORLD, &mut world_rank))?;
    let mut owner: [u32; 2] = [std::process::id(), world_rank as u32];
    check!(ffi::MPI_Bcast(
        owner.as_mut_ptr() as *mut c_void,
        2,
        ffi::RSMPI_UINT32_T,
        0,
        env.comm_raw()
    ))?;
    let path = shared_file_name(owner[0], owner[1]);
    CString::new(path.to_string_lossy().into_owned())
        .map_err(|_| Error::Harness(format!("file name {} contains a NUL byte", path.display())))
}

/// Every rank writes its standard block at its own offset, then reads back its ring
/// predecessor's block.
struct WriteReadAt {
    path: CString,
    file: Option<MPI_File>,
    send: TypedBuffer,
    recv: TypedBuffer,
}

impl WriteReadAt {
    fn init(env: &Env<'_>) -> Result<Box<dyn Fixture>> {
        let path = shared_path(env)?;
        let mut file: MPI_File = unsafe { std::mem::zeroed() };
        check!(ffi::MPI_File_open(
            env.comm_raw(),
            path.as_ptr(),
            (ffi::MPI_MODE_CREATE | ffi::MPI_MODE_RDWR) as c_int,
            ffi::RSMPI_INFO_NULL,
            &mut file
        ))?;
        let mut send = env.alloc(1);
        send.set_standard_array(env.rank());
        Ok(Box::new(WriteReadAt {
            path,
            file: Some(file),
            send,
            recv: env.alloc(1),
        }))
    }

    /// Byte offset of the block of `rank`; blocks are stored without holes.
    fn offset(env: &Env<'_>, rank: c_int) -> MPI_Offset {
        (rank as usize * env.values_num * env.datatype.data_size()) as MPI_Offset
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            check!(ffi::MPI_File_close(&mut file))?;
        }
        Ok(())
    }
}

impl Fixture for WriteReadAt {
    fn run(&mut self, env: &Env<'_>) -> Result<usize> {
        let file = match self.file {
            Some(file) => file,
            None => return Ok(0),
        };
        let (source, _) = env.ring();
        let (datatype, count) = (env.dtype(), env.count()?);

        let mut status = status();
        check!(ffi::MPI_File_write_at(
            file,
            WriteReadAt::offset(env, env.rank()),
            self.send.as_ptr(),
            count,
            datatype,
            &mut status
        ))?;
        // sync-barrier-sync makes the writes of all ranks visible to all ranks
        check!(ffi::MPI_File_sync(file))?;
        check!(ffi::MPI_Barrier(env.comm_raw()))?;
        check!(ffi::MPI_File_sync(file))?;

        check!(ffi::MPI_File_read_at(
            file,
            WriteReadAt::offset(env, source),
            self.recv.as_mut_ptr(),
            count,
            datatype,
            &mut status
        ))?;
        env.check(&self.recv, 0, source)
    }

    fn cleanup(mut self: Box<Self>, env: &Env<'_>) -> Result<()> {
        self.close()?;
        check!(ffi::MPI_Barrier(env.comm_raw()))?;
        if env.rank() == 0 {
            check!(ffi::MPI_File_delete(self.path.as_ptr(), ffi::RSMPI_INFO_NULL))?;
        }
        Ok(())
    }
}

impl Drop for WriteReadAt {
    fn drop(&mut self) {
        if let Some(mut file) = self.file.take() {
            unsafe {
                ffi::MPI_File_close(&mut file);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_file_lives_in_the_working_directory() {
        let path = shared_file_name(4242, 3);
        assert!(path.is_relative());
        assert_eq!(path.parent(), Some(std::path::Path::new("")));
        assert_eq!(path.to_str(), Some("mpi_conformance_4242_3.dat"));
    }

    #[test]
    fn owners_on_different_nodes_do_not_collide() {
        assert_ne!(shared_file_name(100, 0), shared_file_name(100, 4));
    }
}
