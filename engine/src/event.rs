//! The engine's event loop.
//!
//! Everything that happens to the printer arrives here as a value:
//! interrupt-line edges (with the status byte the handler read back),
//! door and button edges, timer expirations, temperature readings. The
//! loop is single threaded; one event is dispatched to the engine at a
//! time, so state transitions are atomic with respect to everything else.
//!
//! Timers are deadlines stored in the engine; the loop simply waits on the
//! channel with a timeout of "time until the nearest deadline" and
//! synthesizes the corresponding event when it passes.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use crate::engine::{ImageSink, PrintEngine, StatusSink};
use crate::motor::Transport;

/// External stimuli and timer expirations.
#[derive(Clone, Debug, PartialEq)]
pub enum PrintEvent {
    /// Startup checks finished.
    Initialized,
    DoorOpened,
    DoorClosed,
    /// The controller pulsed the interrupt line; payload is the status
    /// byte read back.
    MotorInterrupt(u8),
    /// A press-wait or pre-exposure delay elapsed.
    DelayEnded,
    ExposureEnded,
    /// The motor watchdog expired before the expected interrupt.
    MotorTimeout,
    /// The tray rotation sensor fired.
    RotationSensed,
    TemperatureRead(f64),
    StartPrint,
    RequestPause,
    Resume,
    Cancel,
    CancelConfirmed,
    Dismiss,
    /// Front-panel request to display the firmware version.
    ShowVersion,
    DismissVersion,
    /// Manufacturing/demo request; terminal until reset.
    EnterDemoMode,
    /// Stops the event loop; used by hosts embedding the engine.
    Shutdown,
}

/// Which engine timer a deadline belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TimerKind {
    Exposure,
    Delay,
    MotorTimeout,
}

/// Deadline-based timers owned by the engine, polled by the loop.
#[derive(Debug, Default)]
pub struct Timers {
    exposure: Option<Instant>,
    delay: Option<Instant>,
    motor_timeout: Option<Instant>,
}

impl Timers {
    pub fn start(&mut self, kind: TimerKind, seconds: f64) {
        // Clamp to a day so a nonsense duration (misconfigured speed of
        // zero, say) cannot panic the Duration conversion.
        let seconds = if seconds.is_finite() { seconds } else { 86_400.0 };
        let deadline = Instant::now() + Duration::from_secs_f64(seconds.clamp(0.0, 86_400.0));
        *self.slot(kind) = Some(deadline);
    }

    pub fn clear(&mut self, kind: TimerKind) {
        *self.slot(kind) = None;
    }

    pub fn clear_all(&mut self) {
        *self = Timers::default();
    }

    /// Seconds left on a running timer.
    pub fn remaining(&self, kind: TimerKind) -> Option<f64> {
        let deadline = match kind {
            TimerKind::Exposure => self.exposure,
            TimerKind::Delay => self.delay,
            TimerKind::MotorTimeout => self.motor_timeout,
        }?;
        Some(
            deadline
                .saturating_duration_since(Instant::now())
                .as_secs_f64(),
        )
    }

    fn slot(&mut self, kind: TimerKind) -> &mut Option<Instant> {
        match kind {
            TimerKind::Exposure => &mut self.exposure,
            TimerKind::Delay => &mut self.delay,
            TimerKind::MotorTimeout => &mut self.motor_timeout,
        }
    }

    /// The nearest armed deadline.
    fn next(&self) -> Option<(TimerKind, Instant)> {
        let candidates = [
            (TimerKind::Exposure, self.exposure),
            (TimerKind::Delay, self.delay),
            (TimerKind::MotorTimeout, self.motor_timeout),
        ];
        candidates
            .iter()
            .filter_map(|&(kind, deadline)| deadline.map(|d| (kind, d)))
            .min_by_key(|&(_, d)| d)
    }

    fn event_for(kind: TimerKind) -> PrintEvent {
        match kind {
            TimerKind::Exposure => PrintEvent::ExposureEnded,
            TimerKind::Delay => PrintEvent::DelayEnded,
            TimerKind::MotorTimeout => PrintEvent::MotorTimeout,
        }
    }
}

pub struct EventLoop {
    rx: Receiver<PrintEvent>,
}

impl EventLoop {
    /// Creates the loop and the sender its event sources use.
    pub fn new() -> (Sender<PrintEvent>, EventLoop) {
        let (tx, rx) = unbounded();
        (tx, EventLoop { rx })
    }

    /// Dispatches events until `Shutdown`.
    pub fn run<T, I, S>(self, engine: &mut PrintEngine<T, I, S>)
    where
        T: Transport,
        I: ImageSink,
        S: StatusSink,
    {
        loop {
            // Fire any deadline that has already passed before waiting.
            let event = match engine.timers().next() {
                Some((kind, deadline)) => {
                    let now = Instant::now();
                    if deadline <= now {
                        engine.timers_mut().clear(kind);
                        Some(Timers::event_for(kind))
                    } else {
                        match self.rx.recv_timeout(deadline - now) {
                            Ok(event) => Some(event),
                            Err(RecvTimeoutError::Timeout) => {
                                engine.timers_mut().clear(kind);
                                Some(Timers::event_for(kind))
                            }
                            Err(RecvTimeoutError::Disconnected) => None,
                        }
                    }
                }
                None => self.rx.recv().ok(),
            };

            match event {
                Some(PrintEvent::Shutdown) | None => return,
                Some(event) => engine.handle(event),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearest_deadline_wins() {
        let mut timers = Timers::default();
        timers.start(TimerKind::Exposure, 5.0);
        timers.start(TimerKind::Delay, 1.0);
        timers.start(TimerKind::MotorTimeout, 30.0);
        assert_eq!(timers.next().unwrap().0, TimerKind::Delay);

        timers.clear(TimerKind::Delay);
        assert_eq!(timers.next().unwrap().0, TimerKind::Exposure);
    }

    #[test]
    fn remaining_counts_down() {
        let mut timers = Timers::default();
        timers.start(TimerKind::Exposure, 2.0);
        let remaining = timers.remaining(TimerKind::Exposure).unwrap();
        assert!(remaining > 1.5 && remaining <= 2.0);
        assert!(timers.remaining(TimerKind::Delay).is_none());
    }

    #[test]
    fn clear_all_disarms_everything() {
        let mut timers = Timers::default();
        timers.start(TimerKind::Exposure, 1.0);
        timers.start(TimerKind::MotorTimeout, 1.0);
        timers.clear_all();
        assert!(timers.next().is_none());
    }
}
