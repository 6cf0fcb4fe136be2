//! Tests calling MPI from every thread of the pool at once
//!
//! Each thread works on its own duplicate of the communicator, so the rings of different threads
//! never see each other's messages.

use super::p2p::{Ring, Variant};
use super::{Env, Fixture, TestClass, TestDescriptor, TestRegistry};
use crate::comm::CommClass;
use crate::error::{Error, Result};

pub(super) fn register(registry: &mut TestRegistry) -> Result<()> {
    let comms = CommClass::INTRA | CommClass::SELF;
    registry.register(
        TestDescriptor::new("Threaded Ring", TestClass::THREADED, ThreadedRing::concurrent)
            .comms(comms),
    )?;
    registry.register(
        TestDescriptor::new("Threaded Ordered Ring", TestClass::THREADED, ThreadedRing::ordered)
            .comms(comms),
    )?;
    Ok(())
}

struct ThreadedRing {
    ring: Ring,
    ordered: bool,
}

impl ThreadedRing {
    fn concurrent(env: &Env<'_>) -> Result<Box<dyn Fixture>> {
        Ok(Box::new(ThreadedRing {
            ring: Ring::with_variant(env, Variant::Isend),
            ordered: false,
        }))
    }

    /// Thread `t` starts its exchange only after thread `t - 1` finished.
    fn ordered(env: &Env<'_>) -> Result<Box<dyn Fixture>> {
        if env.signals.is_none() {
            return Err(Error::Harness("ordered ring needs thread signals".into()));
        }
        Ok(Box::new(ThreadedRing {
            ring: Ring::with_variant(env, Variant::Plain),
            ordered: true,
        }))
    }
}

impl Fixture for ThreadedRing {
    fn run(&mut self, env: &Env<'_>) -> Result<usize> {
        let signals = match (self.ordered, env.signals) {
            (true, Some(signals)) => Some(signals),
            _ => None,
        };
        if let Some(signals) = signals {
            if env.thread > 0 {
                signals.wait(env.thread)?;
            }
        }
        let reported = self.ring.exchange(env);
        // Pass the token on even after a failure, or the next thread blocks forever.
        if let Some(signals) = signals {
            if env.thread + 1 < env.threads {
                signals.send(env.thread + 1)?;
            }
        }
        self.ring.verify(env, reported?)
    }
}
