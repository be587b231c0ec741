//! Type-level representation of execution priorities.
//!
//! The motion kernel runs at three priorities: the step-pulse timer ISR, the
//! one-shot software-interrupt timers that run the loader and the segment
//! executor, and thread mode (the mainline loop). Entry points that are only
//! sound from one of those contexts take a zero-sized token proving the
//! caller is there. The driver conjures the tokens when it registers its
//! interrupt handlers; the test harness does the same for its simulated
//! interrupts.

use core::marker::PhantomData;

// Marker type used to cause things to stop being Sync/Send.
type NotSyncOrSend = PhantomData<*mut ()>;

/// Highest priority: the fixed-frequency DDA timer interrupt.
#[derive(Copy, Clone)]
pub struct Step(NotSyncOrSend);

/// The software-interrupt priority shared by the loader and the executor.
/// Never preempts `Step`.
#[derive(Copy, Clone)]
pub struct Swi(NotSyncOrSend);

/// Thread mode, outside any interrupt handler.
#[derive(Copy, Clone)]
pub struct Thread(NotSyncOrSend);

impl Step {
    /// # Safety
    ///
    /// Call only from the step timer ISR (or a context that, like the test
    /// harness, guarantees nothing else is touching the step runtime).
    pub unsafe fn new() -> Self {
        Step(PhantomData)
    }
}

impl Swi {
    /// # Safety
    ///
    /// Call only from the load/exec software-interrupt handlers or an
    /// equivalent serialized context.
    pub unsafe fn new() -> Self {
        Swi(PhantomData)
    }
}

impl Thread {
    /// # Safety
    ///
    /// Call only from thread mode.
    pub unsafe fn new() -> Self {
        Thread(PhantomData)
    }
}
