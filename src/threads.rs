//! The thread harness
//!
//! Threaded tests run their init, run and cleanup phases on every thread of a fixed pool at the
//! same time. The main thread is thread 0 and takes part in every phase; `threads - 1` scoped
//! workers are spawned once per run. A phase is posted to the workers over their command
//! channels, all participants meet at a `Barrier` when done, and the workers report their
//! results back over a shared channel.
//!
//! `Signals` is independent of the phases: tests use it to order work between threads inside a
//! phase.

use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::{Arc, Barrier, Mutex};
use std::thread::{self, Scope};

use crate::case::{Env, Fixture};
use crate::error::{Error, Result};

/// The three phases of a triple.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    Init,
    Run,
    Cleanup,
}

/// What one thread holds for the triple currently assigned to it.
#[derive(Default)]
struct Slot<'a> {
    env: Option<Env<'a>>,
    fixture: Option<Box<dyn Fixture>>,
}

impl<'a> Slot<'a> {
    /// Execute `phase`, returning the mismatch count of `Run`. An empty slot does nothing.
    fn execute(&mut self, phase: Phase) -> Result<usize> {
        let env = match &self.env {
            Some(env) => env,
            None => return Ok(0),
        };
        match phase {
            Phase::Init => {
                self.fixture = Some(env.test.case().init(env)?);
                Ok(0)
            }
            Phase::Run => match &mut self.fixture {
                Some(fixture) => fixture.run(env),
                None => Err(Error::Harness(format!(
                    "thread {}: run before init of {}",
                    env.thread,
                    env.test.name()
                ))),
            },
            Phase::Cleanup => {
                let result = match self.fixture.take() {
                    Some(fixture) => fixture.cleanup(env),
                    None => Ok(()),
                };
                self.env = None;
                result.map(|()| 0)
            }
        }
    }
}

enum Command<'a> {
    Assign(Env<'a>),
    Execute { phase: Phase, barrier: Arc<Barrier> },
}

struct Worker<'a> {
    commands: Sender<Command<'a>>,
    assigned: bool,
}

/// The worker pool of one run.
pub struct ThreadHarness<'a> {
    workers: Vec<Worker<'a>>,
    results: Receiver<(usize, Result<usize>)>,
    main: Slot<'a>,
}

impl<'a> ThreadHarness<'a> {
    /// Spawn `threads - 1` workers into `scope`.
    ///
    /// The workers exit once the harness is dropped, the scope joins them.
    pub fn spawn<'scope>(
        scope: &'scope Scope<'scope, 'a>,
        threads: usize,
    ) -> Result<ThreadHarness<'a>> {
        let (result_tx, results) = mpsc::channel();
        let mut workers = Vec::with_capacity(threads.saturating_sub(1));
        for thread in 1..threads {
            let (commands, command_rx) = mpsc::channel();
            let result_tx = result_tx.clone();
            thread::Builder::new()
                .name(format!("conformance-{thread}"))
                .spawn_scoped(scope, move || worker(thread, command_rx, result_tx))
                .map_err(|source| Error::Spawn { thread, source })?;
            workers.push(Worker {
                commands,
                assigned: false,
            });
        }
        tracing::debug!(threads, "thread harness ready");
        Ok(ThreadHarness {
            workers,
            results,
            main: Slot::default(),
        })
    }

    /// Number of threads including the main thread
    pub fn threads(&self) -> usize {
        self.workers.len() + 1
    }

    /// Assign the triple to every thread; `envs[t]` goes to thread `t`.
    pub fn assign_all(&mut self, envs: Vec<Env<'a>>) -> Result<()> {
        if envs.len() != self.threads() {
            return Err(Error::Harness(format!(
                "{} environments for {} threads",
                envs.len(),
                self.threads()
            )));
        }
        for env in envs {
            self.assign_one(env)?;
        }
        Ok(())
    }

    /// Assign the triple to thread `env.thread` only.
    pub fn assign_one(&mut self, env: Env<'a>) -> Result<()> {
        match env.thread {
            0 => {
                self.main.env = Some(env);
                Ok(())
            }
            thread => {
                let worker = self
                    .workers
                    .get_mut(thread - 1)
                    .ok_or_else(|| Error::Harness(format!("no worker thread {thread}")))?;
                worker
                    .commands
                    .send(Command::Assign(env))
                    .map_err(|_| Error::Harness(format!("worker thread {thread} is gone")))?;
                worker.assigned = true;
                Ok(())
            }
        }
    }

    /// Execute `phase` on every assigned thread, the main thread included.
    ///
    /// Returns the summed mismatch counts. The first error of any thread is returned after all
    /// threads finished the phase.
    pub fn dispatch(&mut self, phase: Phase) -> Result<usize> {
        let active: Vec<usize> = (0..self.workers.len())
            .filter(|&w| self.workers[w].assigned)
            .collect();
        let barrier = Arc::new(Barrier::new(active.len() + 1));
        for &w in &active {
            self.workers[w]
                .commands
                .send(Command::Execute {
                    phase,
                    barrier: Arc::clone(&barrier),
                })
                .map_err(|_| Error::Harness(format!("worker thread {} is gone", w + 1)))?;
        }

        let mut outcome = self.main.execute(phase);
        barrier.wait();

        for _ in &active {
            let (thread, result) = self
                .results
                .recv()
                .map_err(|_| Error::Harness("worker threads are gone".into()))?;
            outcome = match (outcome, result) {
                (Ok(total), Ok(errors)) => Ok(total + errors),
                (Err(e), _) => Err(e),
                (Ok(_), Err(e)) => {
                    tracing::error!(thread, error = %e, ?phase, "worker failed");
                    Err(e)
                }
            };
        }

        if phase == Phase::Cleanup {
            for worker in &mut self.workers {
                worker.assigned = false;
            }
        }
        outcome
    }
}

fn worker<'a>(
    thread: usize,
    commands: Receiver<Command<'a>>,
    results: Sender<(usize, Result<usize>)>,
) {
    let mut slot = Slot::default();
    for command in commands {
        match command {
            Command::Assign(env) => slot.env = Some(env),
            Command::Execute { phase, barrier } => {
                let result = slot.execute(phase);
                barrier.wait();
                if results.send((thread, result)).is_err() {
                    break;
                }
            }
        }
    }
    tracing::trace!(thread, "worker exiting");
}

/// One bounded channel per thread for ordering work between threads.
///
/// A signal is a single token: `send(t)` hands thread `t` a token, blocking while a previous one
/// is still pending, `wait(t)` blocks thread `t` until a token arrives.
pub struct Signals {
    senders: Vec<Mutex<SyncSender<()>>>,
    receivers: Vec<Mutex<Receiver<()>>>,
}

impl Signals {
    pub fn new(threads: usize) -> Signals {
        let (senders, receivers) = (0..threads)
            .map(|_| {
                let (tx, rx) = mpsc::sync_channel(1);
                (Mutex::new(tx), Mutex::new(rx))
            })
            .unzip();
        Signals { senders, receivers }
    }

    pub fn send(&self, to: usize) -> Result<()> {
        let sender = self
            .senders
            .get(to)
            .ok_or_else(|| Error::Harness(format!("no signal for thread {to}")))?;
        // Only thread `to - 1` ever signals `to` in practice, the lock is uncontended.
        let sender = sender.lock().unwrap_or_else(|e| e.into_inner());
        sender
            .send(())
            .map_err(|_| Error::Harness(format!("signal of thread {to} closed")))
    }

    pub fn wait(&self, me: usize) -> Result<()> {
        let receiver = self
            .receivers
            .get(me)
            .ok_or_else(|| Error::Harness(format!("no signal for thread {me}")))?;
        let receiver = receiver.lock().unwrap_or_else(|e| e.into_inner());
        receiver
            .recv()
            .map_err(|_| Error::Harness(format!("signal of thread {me} closed")))
    }

    /// Drop tokens a test sent but nobody consumed.
    pub fn reset(&self) {
        for receiver in &self.receivers {
            let receiver = receiver.lock().unwrap_or_else(|e| e.into_inner());
            while receiver.try_recv().is_ok() {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::TryRecvError;

    #[test]
    fn signals_order_threads() {
        let threads = 4;
        let signals = Signals::new(threads);
        let order = Mutex::new(Vec::new());
        thread::scope(|scope| {
            for t in (0..threads).rev() {
                let (signals, order) = (&signals, &order);
                scope.spawn(move || {
                    if t > 0 {
                        signals.wait(t).unwrap();
                    }
                    order.lock().unwrap().push(t);
                    if t + 1 < threads {
                        signals.send(t + 1).unwrap();
                    }
                });
            }
        });
        assert_eq!(order.into_inner().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn reset_drops_pending_tokens() {
        let signals = Signals::new(2);
        signals.send(1).unwrap();
        signals.reset();
        let receiver = signals.receivers[1].lock().unwrap();
        assert!(matches!(receiver.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn signal_out_of_range_is_an_error() {
        let signals = Signals::new(1);
        assert!(matches!(signals.send(3), Err(Error::Harness(_))));
        assert!(matches!(signals.wait(3), Err(Error::Harness(_))));
    }

    #[test]
    fn idle_harness_dispatches_nothing() {
        thread::scope(|scope| {
            let mut harness = ThreadHarness::spawn(scope, 3).unwrap();
            assert_eq!(harness.threads(), 3);
            for phase in [Phase::Init, Phase::Run, Phase::Cleanup] {
                assert_eq!(harness.dispatch(phase).unwrap(), 0);
            }
        });
    }

    #[test]
    fn wrong_number_of_environments_is_rejected() {
        thread::scope(|scope| {
            let mut harness = ThreadHarness::spawn(scope, 2).unwrap();
            assert!(matches!(harness.assign_all(Vec::new()), Err(Error::Harness(_))));
        });
    }
}
