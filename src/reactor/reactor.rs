use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_queue::SegQueue;
use metrics::{counter, gauge};
use mio::{Events, Poll, Registry, Token, Waker};

use crate::handler::EventHandler;
use crate::task::Task;
use crate::timer::{TimerId, TimerWheel};
use crate::worker::WorkerPool;

/// Maximum readiness events taken from the OS per loop iteration.
pub const MAX_EVENTS: usize = 64;

/// Token reserved for the wake-up channel. Real handler tokens are derived
/// from fd values and can never reach this.
const WAKE_TOKEN: Token = Token(usize::MAX);

/// A continuation posted by a worker thread, run on the reactor thread.
type Completion = Box<dyn FnOnce(&mut Reactor) + Send>;

/// State shared with worker threads: the completion inbox and the kernel
/// signal that unblocks the reactor's readiness wait.
struct Inbox {
    completions: SegQueue<Completion>,
    waker: Waker,
}

/// Single-threaded event dispatcher with a cross-thread worker pool.
///
/// The reactor multiplexes read readiness from many handles onto one thread.
/// All handler callbacks, timer callbacks and task continuations run serially
/// on that thread; the registry and the timer wheel are therefore plain data
/// reachable only through `&mut Reactor`, with no locking. Blocking work is
/// fanned out to the pool via [`submit_task`](Self::submit_task) and folded
/// back in through the completion inbox.
pub struct Reactor {
    poll: Poll,
    registry: Registry,
    handlers: HashMap<Token, Arc<dyn EventHandler>>,
    timers: TimerWheel,
    pool: WorkerPool,
    inbox: Arc<Inbox>,
}

impl Reactor {
    /// Creates a reactor backed by `workers` background threads.
    pub fn new(workers: usize) -> io::Result<Self> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN)?;

        Ok(Self {
            poll,
            registry,
            handlers: HashMap::new(),
            timers: TimerWheel::new(),
            pool: WorkerPool::new(workers),
            inbox: Arc::new(Inbox {
                completions: SegQueue::new(),
                waker,
            }),
        })
    }

    /// Adds a handler to the registry and subscribes its handle for
    /// edge-triggered read readiness.
    ///
    /// Fails with [`io::ErrorKind::AlreadyExists`] if a handler is already
    /// registered under the same token.
    pub fn register(&mut self, handler: Arc<dyn EventHandler>) -> io::Result<()> {
        let token = handler.token();
        if self.handlers.contains_key(&token) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("a handler is already registered for {token:?}"),
            ));
        }
        handler.register_source(&self.registry)?;
        self.handlers.insert(token, handler);
        gauge!("reflow_registered_handlers").increment(1.0);
        log::debug!("registered handler {token:?}");
        Ok(())
    }

    /// Removes a handler, unsubscribes its handle and shuts it down.
    ///
    /// Safe to call while the current event batch is being dispatched:
    /// remaining events for the token are skipped by the registry lookup.
    /// Unknown tokens are ignored. The handle itself closes once the last
    /// `Arc` reference (registry or in-flight continuation) is dropped.
    pub fn unregister(&mut self, token: Token) {
        if let Some(handler) = self.handlers.remove(&token) {
            handler.deregister_source(&self.registry);
            gauge!("reflow_registered_handlers").decrement(1.0);
            log::debug!("unregistered handler {token:?}");
        }
    }

    /// Schedules `callback` to run after `delay` on the reactor thread.
    ///
    /// A recurring timer re-arms at `now + delay` after each callback return
    /// (not at the previous deadline plus the interval, which would cause
    /// catch-up storms after a stall).
    pub fn add_timer<F>(&mut self, delay: Duration, recurring: bool, callback: F) -> TimerId
    where
        F: FnMut(&mut Reactor) + Send + 'static,
    {
        let interval = if recurring { delay } else { Duration::ZERO };
        self.timers
            .insert(Instant::now() + delay, interval, Box::new(callback))
    }

    /// Cancels a timer. Returns `true` if the timer will not fire again;
    /// effective no later than the end of the current firing pass.
    pub fn cancel_timer(&mut self, id: TimerId) -> bool {
        self.timers.cancel(id)
    }

    /// Fans `compute` out to a worker thread and runs `continuation` with its
    /// result back on the reactor thread.
    ///
    /// The continuation is pushed onto the completion inbox after `compute`
    /// returns, then the wake-up channel is raised, so it always runs
    /// strictly after the compute stage and exactly once. It receives
    /// `&mut Reactor` and may write to sockets, add timers or submit further
    /// tasks.
    pub fn submit_task<R, C, K>(&self, compute: C, continuation: K)
    where
        R: Send + 'static,
        C: FnOnce() -> R + Send + 'static,
        K: FnOnce(&mut Reactor, R) + Send + 'static,
    {
        let inbox = Arc::clone(&self.inbox);
        self.pool.submit(Task::new(move || {
            let result = compute();
            inbox
                .completions
                .push(Box::new(move |reactor: &mut Reactor| {
                    continuation(reactor, result)
                }));
            if let Err(err) = inbox.waker.wake() {
                log::error!("wake-up signal failed: {err}");
            }
        }));
    }

    /// The event loop. Never returns under normal operation.
    pub fn run(&mut self) {
        let mut events = Events::with_capacity(MAX_EVENTS);
        log::info!(
            "reactor running: {} worker(s), {} events per batch",
            self.pool.size(),
            MAX_EVENTS
        );
        loop {
            self.turn(&mut events);
        }
    }

    /// One loop iteration: wait for readiness (bounded by the next timer
    /// deadline), dispatch the batch, then fire expired timers.
    fn turn(&mut self, events: &mut Events) {
        let timeout = self
            .timers
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()));

        match self.poll.poll(events, timeout) {
            Ok(()) => {
                for event in events.iter() {
                    let token = event.token();

                    if token == WAKE_TOKEN {
                        self.drain_completions();
                        continue;
                    }

                    // An earlier handler in this batch may have unregistered
                    // this token; in-flight events for it are skipped.
                    let Some(handler) = self.handlers.get(&token).map(Arc::clone) else {
                        continue;
                    };

                    if event.is_readable() || event.is_read_closed() {
                        Arc::clone(&handler).on_readable(self);
                    }
                    if event.is_writable() {
                        Arc::clone(&handler).on_writable(self);
                    }
                    if event.is_error() {
                        self.unregister(token);
                    }
                }
            }
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => log::error!("readiness wait failed: {err}"),
        }

        self.fire_expired_timers();
    }

    /// Detaches expired buckets from the wheel and runs their callbacks, so a
    /// callback can never observe itself in the wheel. Recurring timers
    /// re-arm relative to `now` captured once at the start of the pass.
    fn fire_expired_timers(&mut self) {
        if self.timers.is_empty() {
            return;
        }
        let now = Instant::now();
        while let Some(bucket) = self.timers.pop_expired(now) {
            for mut timer in bucket {
                (timer.callback)(self);
                counter!("reflow_timers_fired_total").increment(1);
                if timer.interval.is_zero() {
                    self.timers.complete(timer.id);
                } else {
                    let deadline = now + timer.interval;
                    self.timers.reinsert(deadline, timer);
                }
            }
        }
    }

    /// Runs queued continuations in FIFO order. The inbox is lock-free, so
    /// nothing is held while a continuation executes and continuations are
    /// free to re-enter [`submit_task`](Self::submit_task).
    fn drain_completions(&mut self) {
        let inbox = Arc::clone(&self.inbox);
        let mut drained = 0;
        while let Some(completion) = inbox.completions.pop() {
            completion(self);
            drained += 1;
        }
        if drained > 0 {
            counter!("reflow_completions_run_total").increment(drained);
        }
    }
}
