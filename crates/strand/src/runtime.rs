//! Task table, scheduler, and the runtime facade
//!
//! One `Runtime` value drives one single-threaded cooperative
//! scheduler. Frames live in indexed task slots; a runnable FIFO feeds
//! the tick loop:
//!
//! 1. resume every frame that was runnable at the start of the tick
//! 2. `submit` queued AIO jobs
//! 3. `reap` completions
//! 4. store each result in its waiting slot and mark it runnable
//!
//! `run` returns once no runnable or waiting slots remain. `stop` is a
//! cooperative flag only: long-running frames poll `is_stopping` and
//! drain themselves.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use strand_aio::{self as aio, Backend};
use strand_core::{Caps, CompletionResult, Error, Job, Op, Result, TaskId};

use crate::arch::Context;
use crate::config::{Pooling, RuntimeOptions, Threading};
use crate::frame::{EntryCell, Frame};
use crate::tls;

/// Task slot lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Unused,
    Runnable,
    Waiting,
    Dead,
}

/// Per-frame bookkeeping record.
struct TaskSlot {
    state: SlotState,
    frame: Option<Box<Frame>>,
    /// Written by completion dispatch, taken by the resumed frame
    result: Option<CompletionResult>,
}

impl TaskSlot {
    fn empty() -> Self {
        Self {
            state: SlotState::Unused,
            frame: None,
            result: None,
        }
    }
}

/// Scheduler state: the slot pool and the runnable FIFO.
struct Sched {
    slots: Vec<TaskSlot>,
    /// LIFO free list for cache-friendly slot reuse
    free: Vec<u32>,
    runnable: VecDeque<u32>,
    /// Slots parked on an in-flight AIO job
    waiting: usize,
    /// Runnable + waiting (+ running) slots
    live: usize,
}

impl Sched {
    fn new(initial: usize) -> Self {
        let mut slots = Vec::with_capacity(initial);
        slots.resize_with(initial, TaskSlot::empty);
        Self {
            slots,
            // Reversed so the first allocations pop slot 0 upward.
            free: (0..initial as u32).rev().collect(),
            runnable: VecDeque::new(),
            waiting: 0,
            live: 0,
        }
    }

    fn alloc(&mut self, opts: &RuntimeOptions) -> Result<u32> {
        if let Some(id) = self.free.pop() {
            return Ok(id);
        }
        if opts.pooling == Pooling::Grow && self.slots.len() < opts.size_tasks_max {
            self.slots.push(TaskSlot::empty());
            return Ok((self.slots.len() - 1) as u32);
        }
        Err(Error::QueueFull)
    }
}

/// A cooperative I/O runtime instance.
///
/// The runtime is a value: tests instantiate many, and `auto` threading
/// launches one per pool thread. Every I/O method takes the runtime
/// explicitly; the only thread-local state is the active-frame
/// bookkeeping the context switch needs.
pub struct Runtime {
    opts: RuntimeOptions,
    sched: RefCell<Sched>,
    backend: RefCell<Box<dyn Backend>>,
    /// Cached at construction so the I/O surface can route without
    /// touching the backend cell
    caps: Caps,
    stop: Cell<bool>,
}

impl Runtime {
    pub fn new(opts: RuntimeOptions) -> Result<Runtime> {
        opts.validate()?;
        let backend = aio::create(opts.backend, &opts.aio_config())?;
        let caps = backend.caps();
        log::debug!("runtime backend caps: {:?}", caps);
        Ok(Runtime {
            sched: RefCell::new(Sched::new(opts.size_tasks_initial)),
            backend: RefCell::new(backend),
            caps,
            stop: Cell::new(false),
            opts,
        })
    }

    /// The backend's advertised capability set.
    pub fn caps(&self) -> Caps {
        self.caps
    }

    /// Spawn a frame with `stack_size` usable stack bytes.
    ///
    /// No handle is returned; supervision is via the frame's natural
    /// return. Fails with `QueueFull` when the task pool is exhausted.
    pub fn spawn<F>(&self, stack_size: usize, f: F) -> Result<()>
    where
        F: FnOnce(&Runtime) + 'static,
    {
        let id = self.sched.borrow_mut().alloc(&self.opts)?;
        let cell: EntryCell = Box::new(f);
        match Frame::new(stack_size, cell) {
            Ok(frame) => {
                let mut guard = self.sched.borrow_mut();
                let sched = &mut *guard;
                let slot = &mut sched.slots[id as usize];
                slot.state = SlotState::Runnable;
                slot.frame = Some(Box::new(frame));
                slot.result = None;
                sched.runnable.push_back(id);
                sched.live += 1;
                log::trace!("spawned frame {}", id);
                Ok(())
            }
            Err(e) => {
                self.sched.borrow_mut().free.push(id);
                Err(e)
            }
        }
    }

    /// Spawn `start(rt, data)` as the first frame and run the
    /// scheduler loop until it exits.
    ///
    /// In `auto` threading mode this launches one independent runtime
    /// per pool thread (each gets a clone of `data`); instances share
    /// nothing, and the call returns when every loop has exited.
    pub fn entry<T>(&self, data: T, start: fn(&Runtime, T)) -> Result<()>
    where
        T: Clone + Send + 'static,
    {
        match self.opts.threading {
            Threading::Single => {
                self.spawn(self.opts.size_stack_default, move |rt| start(rt, data))?;
                self.run()
            }
            Threading::Auto => {
                let n = self.opts.effective_pool_threads();
                let mut handles = Vec::with_capacity(n.saturating_sub(1));
                for i in 1..n {
                    let opts = self.opts.clone().threading(Threading::Single);
                    let data = data.clone();
                    let handle = std::thread::Builder::new()
                        .name(format!("strand-{}", i))
                        .spawn(move || -> Result<()> {
                            let rt = Runtime::new(opts)?;
                            rt.entry(data, start)
                        })
                        .map_err(|_| Error::Unexpected(libc::EAGAIN))?;
                    handles.push(handle);
                }

                self.spawn(self.opts.size_stack_default, move |rt| start(rt, data))?;
                let mut first_err = self.run().err();

                for handle in handles {
                    match handle.join() {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => first_err = first_err.or(Some(e)),
                        Err(_) => first_err = first_err.or(Some(Error::Unexpected(libc::EIO))),
                    }
                }
                match first_err {
                    Some(e) => Err(e),
                    None => Ok(()),
                }
            }
        }
    }

    /// Raise the cooperative stop flag.
    pub fn stop(&self) {
        self.stop.set(true);
    }

    /// Whether `stop` has been requested. Accept-loop style frames
    /// poll this to drain themselves.
    pub fn is_stopping(&self) -> bool {
        self.stop.get()
    }

    /// Reschedule the current frame to the back of the runnable FIFO.
    ///
    /// Outside a frame this degrades to an OS-thread yield.
    pub fn yield_now(&self) {
        if !tls::in_frame() {
            std::thread::yield_now();
            return;
        }
        // State stays runnable; the scheduler requeues after the
        // context is safely saved.
        tls::switch_to_scheduler();
    }

    // ── Scheduler loop ──

    fn run(&self) -> Result<()> {
        if !tls::runtime().is_null() {
            // A runtime loop is already driving this thread.
            return Err(Error::Unexpected(libc::EBUSY));
        }
        tls::set_runtime(self as *const Runtime as *const ());
        let result = loop {
            if self.sched.borrow().live == 0 {
                break Ok(());
            }
            if let Err(e) = self.tick() {
                break Err(e);
            }
        };
        tls::clear_runtime();
        result
    }

    /// One scheduler pass: drain runnable, submit, reap, dispatch.
    fn tick(&self) -> Result<()> {
        // (a) Resume every frame runnable at the start of the tick.
        // Frames that yield go to the back and run next tick, so a
        // spinning frame cannot starve submission and reaping.
        let runnable_now = self.sched.borrow().runnable.len();
        for _ in 0..runnable_now {
            let id = match self.sched.borrow_mut().runnable.pop_front() {
                Some(id) => id,
                None => break,
            };
            self.run_once(id);
        }

        // (b) Flush queued jobs to the backend.
        self.backend.borrow_mut().submit()?;

        // (c) Reap completions and (d) wake their slots.
        let mut backend = self.backend.borrow_mut();
        let completions = backend.reap()?;
        let mut guard = self.sched.borrow_mut();
        let sched = &mut *guard;
        for completion in completions {
            let slot = &mut sched.slots[completion.ctx.as_usize()];
            debug_assert_eq!(
                slot.state,
                SlotState::Waiting,
                "completion for non-waiting slot {}",
                completion.ctx
            );
            slot.result = Some(completion.result);
            slot.state = SlotState::Runnable;
            sched.waiting -= 1;
            sched.runnable.push_back(completion.ctx.as_u32());
        }
        Ok(())
    }

    /// Dispatch one runnable frame; returns when it yields, parks, or
    /// completes.
    fn run_once(&self, id: u32) {
        let frame_ptr: *mut Frame = {
            let mut sched = self.sched.borrow_mut();
            let slot = &mut sched.slots[id as usize];
            debug_assert_eq!(slot.state, SlotState::Runnable);
            &mut **slot.frame.as_mut().expect("runnable slot has a frame")
        };

        // The scheduler context lives on this stack for the duration of
        // the excursion into the frame; strictly nested, so the pointer
        // stays valid.
        let mut sched_ctx = Context::zeroed();
        unsafe {
            tls::enter_frame(TaskId::new(id), (*frame_ptr).ctx_ptr(), &mut sched_ctx);
            (*frame_ptr).resume(&mut sched_ctx);
        }
        tls::exit_frame();

        let mut guard = self.sched.borrow_mut();
        let sched = &mut *guard;
        let slot = &mut sched.slots[id as usize];
        match slot.state {
            // Plain yield: back of the FIFO, runs next tick.
            SlotState::Runnable => sched.runnable.push_back(id),
            // Parked on an AIO job; completion dispatch wakes it.
            SlotState::Waiting => {}
            SlotState::Dead => {
                // Frees the stack; the slot is recycled afterwards.
                slot.frame = None;
                slot.result = None;
                slot.state = SlotState::Unused;
                sched.free.push(id);
                sched.live -= 1;
                log::trace!("recycled slot {}", id);
            }
            SlotState::Unused => unreachable!("slot {} unused after resume", id),
        }
    }

    // ── Frame-side operations ──

    /// Submit `op` and park the current frame until its completion
    /// arrives. `QueueFull` from the backend is absorbed by yielding
    /// and retrying, which serializes submissions under backpressure.
    pub(crate) fn io_await(&self, op: Op) -> Result<CompletionResult> {
        let id = tls::current();
        assert!(!id.is_none(), "io_await called outside a frame");

        loop {
            // The backend borrow must end before a potential yield: the
            // scheduler needs the cell back for submit/reap.
            let queued = {
                let mut backend = self.backend.borrow_mut();
                backend.queue(Job::new(id, op.clone()))
            };
            match queued {
                Ok(()) => break,
                Err(Error::QueueFull) => self.yield_now(),
                Err(e) => return Err(e),
            }
        }

        {
            let mut guard = self.sched.borrow_mut();
            let sched = &mut *guard;
            let slot = &mut sched.slots[id.as_usize()];
            debug_assert_eq!(slot.state, SlotState::Runnable);
            slot.state = SlotState::Waiting;
            sched.waiting += 1;
        }
        tls::switch_to_scheduler();

        // Resumed: the dispatcher stored our result before waking us.
        let result = self.sched.borrow_mut().slots[id.as_usize()]
            .result
            .take()
            .expect("resumed waiting frame has a result");
        Ok(result)
    }

    /// Run `op` through the backend when it advertises the capability,
    /// else through the non-blocking syscall + yield fallback.
    pub(crate) fn io_run(&self, op: Op) -> Result<CompletionResult> {
        if self.caps.contains(op.required_cap()) {
            self.io_await(op)
        } else {
            let mut op = op;
            loop {
                if let Some(result) = aio::sys::attempt(&mut op) {
                    return Ok(result);
                }
                self.yield_now();
            }
        }
    }

    /// Called by frame_entry when the entry closure returns. Marks the
    /// slot dead and leaves the frame's stack for the last time.
    pub(crate) fn finish_current(&self) {
        let id = tls::current();
        debug_assert!(!id.is_none());
        self.sched.borrow_mut().slots[id.as_usize()].state = SlotState::Dead;
        log::trace!("frame {} finished", id);
        tls::switch_to_scheduler();
        unreachable!("dead frame was resumed");
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        let live = self.sched.borrow().live;
        if live != 0 {
            log::warn!("runtime dropped with {} live frames", live);
        }
    }
}
