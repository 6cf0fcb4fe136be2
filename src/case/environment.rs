//! Environmental inquiries and null objects

use std::os::raw::c_int;

use mpi::ffi;
use mpi::topology::Rank;
use mpi::Address;

use super::{status, Env, Fixture, TestClass, TestDescriptor, TestRegistry};
use crate::check;
use crate::comm::CommClass;
use crate::config::Strictness;
use crate::datatype::TypeClass;
use crate::error::Result;

pub(super) fn register(registry: &mut TestRegistry) -> Result<()> {
    registry.register(
        TestDescriptor::new("Get_version", TestClass::ENV, GetVersion::init)
            .comms(CommClass::SELF)
            .types(TypeClass::STD_CHAR)
            .mode(Strictness::Relaxed),
    )?;
    registry.register(
        TestDescriptor::new("Request_Null", TestClass::ENV, RequestNull::init)
            .comms(CommClass::SELF)
            .types(TypeClass::STD_CHAR),
    )?;
    registry.register(
        TestDescriptor::new("Type_extent", TestClass::ENV, TypeExtent::init).comms(CommClass::SELF),
    )?;
    registry.register(
        TestDescriptor::new("Group_translate_ranks", TestClass::ENV, RankMapping::init)
            .types(TypeClass::STD_CHAR),
    )?;
    Ok(())
}

/// The library reports the version of the header it was compiled against.
struct GetVersion;

impl GetVersion {
    fn init(_env: &Env<'_>) -> Result<Box<dyn Fixture>> {
        Ok(Box::new(GetVersion))
    }
}

impl Fixture for GetVersion {
    fn run(&mut self, env: &Env<'_>) -> Result<usize> {
        let (mut version, mut subversion): (c_int, c_int) = (0, 0);
        check!(ffi::MPI_Get_version(&mut version, &mut subversion))?;
        env.reporter.full(format_args!(
            "MPI_Get_version: {version}.{subversion}, header {}.{}",
            ffi::MPI_VERSION,
            ffi::MPI_SUBVERSION
        ))?;
        let header = (ffi::MPI_VERSION as c_int, ffi::MPI_SUBVERSION as c_int);
        Ok(usize::from((version, subversion) != header))
    }
}

/// Waiting on `MPI_REQUEST_NULL` returns at once with an empty status.
struct RequestNull;

impl RequestNull {
    fn init(_env: &Env<'_>) -> Result<Box<dyn Fixture>> {
        Ok(Box::new(RequestNull))
    }
}

impl Fixture for RequestNull {
    fn run(&mut self, _env: &Env<'_>) -> Result<usize> {
        let mut request = unsafe { ffi::RSMPI_REQUEST_NULL };
        let mut status = status();
        check!(ffi::MPI_Wait(&mut request, &mut status))?;

        let mut errors = 0;
        if request != unsafe { ffi::RSMPI_REQUEST_NULL } {
            errors += 1;
        }
        if status.MPI_SOURCE != unsafe { ffi::RSMPI_ANY_SOURCE } {
            errors += 1;
        }
        if status.MPI_TAG != unsafe { ffi::RSMPI_ANY_TAG } {
            errors += 1;
        }
        Ok(errors)
    }
}

/// Bounds and size the library reports match the registered layout.
///
/// Registration already verified this once; the test repeats it for every selected type so a
/// layout regression shows up as a ledger entry rather than only at startup.
struct TypeExtent;

impl TypeExtent {
    fn init(_env: &Env<'_>) -> Result<Box<dyn Fixture>> {
        Ok(Box::new(TypeExtent))
    }
}

impl Fixture for TypeExtent {
    fn run(&mut self, env: &Env<'_>) -> Result<usize> {
        let (mut lb, mut extent): (Address, Address) = (0, 0);
        check!(ffi::MPI_Type_get_extent(env.dtype(), &mut lb, &mut extent))?;
        let mut size: c_int = 0;
        check!(ffi::MPI_Type_size(env.dtype(), &mut size))?;

        let datatype = env.datatype;
        let checks = [
            ("lower bound", datatype.lower_bound() as i64, lb as i64),
            ("extent", datatype.extent() as i64, extent as i64),
            ("size", datatype.data_size() as i64, size as i64),
        ];
        let mut errors = 0;
        for (what, expected, actual) in checks {
            if expected != actual {
                errors += 1;
                env.reporter.full(format_args!(
                    "{}: {what} is {actual}, expected {expected}",
                    datatype.name()
                ))?;
            }
        }
        Ok(errors)
    }
}

/// The world ranks recorded for a communicator's groups at registration are consistent with
/// what this process knows about itself.
struct RankMapping;

impl RankMapping {
    fn init(_env: &Env<'_>) -> Result<Box<dyn Fixture>> {
        Ok(Box::new(RankMapping))
    }
}

impl Fixture for RankMapping {
    fn run(&mut self, env: &Env<'_>) -> Result<usize> {
        let (mut world_rank, mut world_size): (c_int, c_int) = (0, 0);
        check!(ffi::MPI_Comm_rank(ffi::RSMPI_COMM_WORLD, &mut world_rank))?;
        check!(ffi::MPI_Comm_size(ffi::RSMPI_COMM_WORLD, &mut world_size))?;

        let comm = env.comm;
        let problems = mapping_problems(
            Groups {
                rank: comm.rank(),
                local: comm.mapping(),
                remote_size: comm.remote_size(),
                remote: comm.remote_mapping(),
            },
            world_rank,
            world_size,
        );
        for problem in &problems {
            env.reporter.full(format_args!("{}: {problem}", comm.name()))?;
        }
        Ok(problems.len())
    }
}

/// Both groups of a communicator as seen from one member, in world ranks.
struct Groups<'a> {
    rank: Rank,
    local: &'a [Rank],
    remote_size: Rank,
    remote: &'a [Rank],
}

fn mapping_problems(groups: Groups<'_>, world_rank: Rank, world_size: Rank) -> Vec<String> {
    let mut problems = Vec::new();
    match groups.local.get(groups.rank as usize) {
        Some(&mapped) if mapped == world_rank => {}
        mapped => problems.push(format!(
            "local rank {} maps to {mapped:?}, this process is world rank {world_rank}",
            groups.rank
        )),
    }
    if groups.remote.len() != groups.remote_size as usize {
        problems.push(format!(
            "remote group has {} ranks, expected {}",
            groups.remote.len(),
            groups.remote_size
        ));
    }
    let mut seen = vec![false; world_size.max(0) as usize];
    for &mapped in groups.local.iter().chain(groups.remote) {
        match seen.get_mut(mapped as usize) {
            Some(seen) if !*seen => *seen = true,
            Some(_) => problems.push(format!("world rank {mapped} appears twice")),
            None => problems.push(format!("world rank {mapped} is out of range")),
        }
    }
    problems
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intra(rank: Rank, local: &[Rank]) -> Groups<'_> {
        Groups {
            rank,
            local,
            remote_size: 0,
            remote: &[],
        }
    }

    #[test]
    fn reversed_world_is_consistent() {
        let reversed = [3, 2, 1, 0];
        for rank in 0..4 {
            assert!(mapping_problems(intra(rank, &reversed), 3 - rank, 4).is_empty());
        }
    }

    #[test]
    fn wrong_own_rank_is_reported() {
        let problems = mapping_problems(intra(1, &[0, 1, 2]), 2, 3);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("world rank 2"));
        assert_eq!(mapping_problems(intra(5, &[0, 1]), 0, 2).len(), 1);
    }

    #[test]
    fn duplicates_and_out_of_range_ranks_are_reported() {
        assert_eq!(mapping_problems(intra(0, &[0, 0]), 0, 2).len(), 1);
        assert_eq!(mapping_problems(intra(0, &[0, 7]), 0, 2).len(), 1);
        assert_eq!(mapping_problems(intra(0, &[0, -1]), 0, 2).len(), 1);
    }

    #[test]
    fn intercomm_groups_are_disjoint() {
        let halves = Groups {
            rank: 1,
            local: &[2, 3],
            remote_size: 2,
            remote: &[0, 1],
        };
        assert!(mapping_problems(halves, 3, 4).is_empty());

        let overlapping = Groups {
            rank: 0,
            local: &[0, 1],
            remote_size: 2,
            remote: &[1, 2],
        };
        assert_eq!(mapping_problems(overlapping, 0, 4), vec!["world rank 1 appears twice"]);

        let short = Groups {
            rank: 0,
            local: &[0],
            remote_size: 2,
            remote: &[1],
        };
        assert_eq!(mapping_problems(short, 0, 2).len(), 1);
    }
}
