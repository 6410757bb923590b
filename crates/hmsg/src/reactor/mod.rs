// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The reactor: a single-threaded cooperative event context.
//!
//! All endpoint state machines run on one dedicated worker thread that
//! multiplexes socket readiness (`mio::Poll`), timers, and queued events.
//! Handler invocations are strictly serialized; a handler never blocks and
//! never waits for a sub-machine inline — it issues commands and returns.
//!
//! Reentrancy is resolved by deferral: every event, whether it originates
//! in the poller, a timer, a user thread, or a sub-machine raising from
//! inside a handler, goes through one FIFO queue and is delivered in its
//! own handler invocation.
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                          Reactor                             |
//! |  +--------------------------------------------------------+  |
//! |  |                     mio::Poll                          |  |
//! |  |  - registered sockets (listeners, streams)             |  |
//! |  |  - Waker (commands from user threads)                  |  |
//! |  +--------------------------------------------------------+  |
//! |          |                |                  |               |
//! |          v                v                  v               |
//! |     readiness          timers            commands            |
//! |          +----------------+------------------+               |
//! |                           v                                  |
//! |  +--------------------------------------------------------+  |
//! |  |            FIFO event queue -> Machine::handle         |  |
//! |  +--------------------------------------------------------+  |
//! +--------------------------------------------------------------+
//! ```

pub(crate) mod event;
pub(crate) mod timer;

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use mio::{Events, Interest, Poll, Registry, Token, Waker};

use event::{Event, Machine, MachineId, Readiness, Source, TimerId};
use timer::TimerQueue;

/// Token reserved for the waker.
const WAKER_TOKEN: Token = Token(0);

/// First token handed out to machine registrations.
const FIRST_TOKEN: usize = 1;

/// Maximum readiness events processed per poll.
const MAX_EVENTS: usize = 128;

/// Commands sent to the reactor thread.
enum Command {
    /// Install a machine and queue its Start event.
    Register {
        mid: MachineId,
        machine: Box<dyn Machine>,
    },

    /// Queue an event for a machine.
    Post {
        mid: MachineId,
        src: Source,
        event: Event,
    },

    /// Drop a machine. Legal only once the machine has reached idle.
    Remove { mid: MachineId },

    /// Stop the reactor loop.
    Shutdown,
}

/// One entry in the FIFO event queue.
struct Delivery {
    mid: MachineId,
    src: Source,
    event: Event,
}

// ============================================================================
// Handle
// ============================================================================

/// Cloneable handle for interacting with a running reactor.
///
/// Endpoints are created through this handle (see
/// [`bind`](ReactorHandle::bind) and [`connect`](ReactorHandle::connect)
/// in the endpoint module); resolver worker threads use it to post
/// completions back onto the reactor.
#[derive(Clone)]
pub struct ReactorHandle {
    cmd_tx: Sender<Command>,
    waker: Arc<Waker>,
    next_mid: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
}

impl ReactorHandle {
    /// Whether the reactor thread is still running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Install a machine; its Start event is queued by the reactor.
    pub(crate) fn register_machine(&self, machine: Box<dyn Machine>) -> MachineId {
        let mid = self.next_mid.fetch_add(1, Ordering::Relaxed);
        if self.cmd_tx.send(Command::Register { mid, machine }).is_ok() {
            let _ = self.waker.wake();
        }
        mid
    }

    /// Queue an event for a machine.
    pub(crate) fn post(&self, mid: MachineId, src: Source, event: Event) {
        if self.cmd_tx.send(Command::Post { mid, src, event }).is_ok() {
            let _ = self.waker.wake();
        }
    }

    /// Drop a machine from the reactor.
    pub(crate) fn remove(&self, mid: MachineId) {
        if self.cmd_tx.send(Command::Remove { mid }).is_ok() {
            let _ = self.waker.wake();
        }
    }

    fn shutdown(&self) {
        if self.cmd_tx.send(Command::Shutdown).is_ok() {
            let _ = self.waker.wake();
        }
    }
}

// ============================================================================
// Reactor
// ============================================================================

/// Owner of the reactor thread.
///
/// Dropping the reactor stops the loop and joins the thread. Endpoints
/// should be stopped first; machines still installed at shutdown are
/// dropped without their shutdown sequence.
pub struct Reactor {
    handle: ReactorHandle,
    thread: Option<JoinHandle<()>>,
}

impl Reactor {
    /// Spawn the reactor thread.
    pub fn spawn() -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        let (cmd_tx, cmd_rx) = channel();
        let running = Arc::new(AtomicBool::new(true));

        let handle = ReactorHandle {
            cmd_tx,
            waker,
            next_mid: Arc::new(AtomicU64::new(1)),
            running: running.clone(),
        };

        let inner = Inner {
            poll,
            machines: HashMap::new(),
            tokens: HashMap::new(),
            next_token: FIRST_TOKEN,
            timers: TimerQueue::new(),
            queue: VecDeque::new(),
            cmd_rx,
            running,
            handle: handle.clone(),
        };

        let thread = thread::Builder::new()
            .name("hmsg-reactor".to_string())
            .spawn(move || inner.run())?;

        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    /// Get a cloneable handle to the reactor.
    pub fn handle(&self) -> ReactorHandle {
        self.handle.clone()
    }

    /// Stop the loop and join the thread.
    pub fn shutdown(&mut self) {
        self.handle.shutdown();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("reactor thread panicked");
            }
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// Reactor loop
// ============================================================================

struct Inner {
    poll: Poll,
    machines: HashMap<MachineId, Box<dyn Machine>>,
    tokens: HashMap<Token, (MachineId, Source)>,
    next_token: usize,
    timers: TimerQueue,
    queue: VecDeque<Delivery>,
    cmd_rx: Receiver<Command>,
    running: Arc<AtomicBool>,
    handle: ReactorHandle,
}

impl Inner {
    fn run(mut self) {
        let mut events = Events::with_capacity(MAX_EVENTS);

        while self.running.load(Ordering::Relaxed) {
            let timeout = self
                .timers
                .next_deadline()
                .map(|d| d.saturating_duration_since(Instant::now()));

            if let Err(e) = self.poll.poll(&mut events, timeout) {
                if e.kind() != io::ErrorKind::Interrupted {
                    log::error!("reactor poll failed: {}", e);
                }
                continue;
            }

            self.drain_commands();

            for event in events.iter() {
                if event.token() == WAKER_TOKEN {
                    continue;
                }
                match self.tokens.get(&event.token()) {
                    Some(&(mid, src)) => {
                        let readiness = Readiness {
                            readable: event.is_readable() || event.is_read_closed(),
                            // Connect failures surface as error/hup; fold them
                            // into writability so completion checks run.
                            writable: event.is_writable()
                                || event.is_write_closed()
                                || event.is_error(),
                        };
                        self.queue.push_back(Delivery {
                            mid,
                            src,
                            event: Event::Io(readiness),
                        });
                    }
                    None => {
                        log::trace!("readiness for stale token {:?}", event.token());
                    }
                }
            }

            let now = Instant::now();
            while let Some(t) = self.timers.pop_due(now) {
                self.queue.push_back(Delivery {
                    mid: t.machine,
                    src: t.tag,
                    event: Event::Timer(t.id),
                });
            }

            while let Some(d) = self.queue.pop_front() {
                self.deliver(d);
            }
        }

        if !self.machines.is_empty() {
            log::debug!("reactor shutdown with {} machines installed", self.machines.len());
        }
    }

    fn drain_commands(&mut self) {
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            match cmd {
                Command::Register { mid, machine } => {
                    self.machines.insert(mid, machine);
                    self.queue.push_back(Delivery {
                        mid,
                        src: Source::Action,
                        event: Event::Start,
                    });
                }
                Command::Post { mid, src, event } => {
                    self.queue.push_back(Delivery { mid, src, event });
                }
                Command::Remove { mid } => {
                    if let Some(machine) = self.machines.remove(&mid) {
                        if !machine.is_idle() {
                            log::warn!("machine {} removed before reaching idle", mid);
                        }
                    }
                }
                Command::Shutdown => {
                    self.running.store(false, Ordering::Relaxed);
                }
            }
        }
    }

    fn deliver(&mut self, d: Delivery) {
        let Some(mut machine) = self.machines.remove(&d.mid) else {
            log::trace!("dropping event for removed machine {}", d.mid);
            return;
        };

        {
            let mut ctx = Ctx {
                current: d.mid,
                registry: self.poll.registry(),
                tokens: &mut self.tokens,
                next_token: &mut self.next_token,
                timers: &mut self.timers,
                queue: &mut self.queue,
                handle: &self.handle,
            };
            machine.handle(&mut ctx, d.src, d.event);
        }

        self.machines.insert(d.mid, machine);
    }
}

// ============================================================================
// Ctx
// ============================================================================

/// Per-invocation view of the reactor handed to machine handlers.
///
/// Gives a machine registration, timer, and raise capabilities attributed
/// to itself; the `(machine, source)` pair recorded per token or timer is
/// the weak back-reference used for event delivery.
pub(crate) struct Ctx<'a> {
    current: MachineId,
    registry: &'a Registry,
    tokens: &'a mut HashMap<Token, (MachineId, Source)>,
    next_token: &'a mut usize,
    timers: &'a mut TimerQueue,
    queue: &'a mut VecDeque<Delivery>,
    handle: &'a ReactorHandle,
}

impl Ctx<'_> {
    /// Id of the machine currently being invoked.
    pub fn machine_id(&self) -> MachineId {
        self.current
    }

    /// Register a socket; its readiness is delivered to the current
    /// machine tagged with `tag`.
    pub fn register<S>(&mut self, source: &mut S, tag: Source, interests: Interest) -> io::Result<Token>
    where
        S: mio::event::Source + ?Sized,
    {
        let token = Token(*self.next_token);
        *self.next_token += 1;
        self.registry.register(source, token, interests)?;
        self.tokens.insert(token, (self.current, tag));
        Ok(token)
    }

    /// Change the interests of a registered socket.
    pub fn reregister<S>(&mut self, source: &mut S, token: Token, interests: Interest) -> io::Result<()>
    where
        S: mio::event::Source + ?Sized,
    {
        self.registry.reregister(source, token, interests)
    }

    /// Deregister a socket and forget its token.
    pub fn deregister<S>(&mut self, source: &mut S, token: Token)
    where
        S: mio::event::Source + ?Sized,
    {
        if let Err(e) = self.registry.deregister(source) {
            log::trace!("deregister failed: {}", e);
        }
        self.tokens.remove(&token);
    }

    /// Arm a timer; its fire is delivered to the current machine tagged
    /// with `tag`.
    pub fn set_timer(&mut self, delay: Duration, tag: Source) -> TimerId {
        self.timers.arm(self.current, tag, delay)
    }

    /// Queue an event for the current machine. Delivery happens after the
    /// running handler returns.
    pub fn raise(&mut self, tag: Source, event: Event) {
        self.queue.push_back(Delivery {
            mid: self.current,
            src: tag,
            event,
        });
    }

    /// Handle for posting cross-thread completions back to the reactor.
    pub fn handle(&self) -> ReactorHandle {
        self.handle.clone()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe {
        started: Arc<AtomicBool>,
        stopped: Arc<AtomicBool>,
    }

    impl Machine for Probe {
        fn handle(&mut self, _ctx: &mut Ctx<'_>, _src: Source, event: Event) {
            match event {
                Event::Start => self.started.store(true, Ordering::SeqCst),
                Event::Stop => self.stopped.store(true, Ordering::SeqCst),
                _ => {}
            }
        }

        fn is_idle(&self) -> bool {
            true
        }
    }

    fn wait_for(flag: &AtomicBool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if flag.load(Ordering::SeqCst) {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_register_delivers_start() {
        let mut reactor = Reactor::spawn().unwrap();
        let started = Arc::new(AtomicBool::new(false));
        let stopped = Arc::new(AtomicBool::new(false));

        let handle = reactor.handle();
        let mid = handle.register_machine(Box::new(Probe {
            started: started.clone(),
            stopped: stopped.clone(),
        }));

        assert!(wait_for(&started));
        assert!(!stopped.load(Ordering::SeqCst));

        handle.post(mid, Source::Action, Event::Stop);
        assert!(wait_for(&stopped));

        handle.remove(mid);
        reactor.shutdown();
        assert!(!handle.is_running());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut reactor = Reactor::spawn().unwrap();
        reactor.shutdown();
        reactor.shutdown();
    }
}
