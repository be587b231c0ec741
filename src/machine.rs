//! Controller state machine.
//!
//! The controller's behavior is a flat table over 22 states and 18 events.
//! Rather than a cascade of handler code, the table is data: `transition`
//! maps a `(state, event)` pair to an optional successor state and a short
//! list of named actions for the mainline to carry out. Two rules hold
//! everywhere and are hoisted out of the per-state rows: a reset request
//! drops to `Disabled` and flags the mainline for reinitialization, and an
//! error drops to `Error` with the motor drivers disabled.
//!
//! The batch protocol lives here too. While the controller is `Ready`,
//! motion requests are not executed; they are parked on the event queue and
//! the machine waits in `WaitingForInterruptRequest` for the interrupt
//! request that terminates every motion batch. That request is itself
//! enqueued, one event is popped, and from `ReadyForAction` the queue then
//! drains one action at a time as each motion completes, ending with the
//! interrupt request that pulses the host's interrupt line.

/// Payload carried with a command-derived event: the original action code
/// and parameter.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct EventData {
    pub command: u8,
    pub parameter: i32,
}

/// Everything the state machine can react to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Event {
    EnableRequested,
    DisableRequested,
    ResetRequested,
    ClearRequested,
    PauseRequested,
    ResumeRequested,
    InterruptRequested,
    HomeZAxisRequested,
    HomeRAxisRequested,
    MoveZAxisRequested,
    MoveRAxisRequested,
    SetZAxisSettingRequested,
    SetRAxisSettingRequested,
    /// A limit switch fired during homing.
    AxisLimitReached,
    /// Homing was requested with the axis already at its limit.
    AxisAtLimit,
    /// The planning buffer drained and the last segment finished.
    MotionComplete,
    /// The running block entered its tail section.
    DecelerationStarted,
    ErrorEncountered,
}

/// Machine states. The homing and moving states each carry a small cluster
/// of pause/resume satellites; the `Decelerating…` family distinguishes why
/// a controlled stop is in progress, because what happens at
/// `MotionComplete` differs for each reason.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    Disabled,
    Ready,
    ReadyForAction,
    WaitingForInterruptRequest,
    HomingZAxis,
    HomingZAxisDeceleratingForPause,
    HomingZAxisDeceleratingForResume,
    HomingZAxisPaused,
    HomingRAxis,
    HomingRAxisDeceleratingForPause,
    HomingRAxisDeceleratingForResume,
    HomingRAxisPaused,
    MovingAxis,
    MovingAxisDeceleratingForPause,
    MovingAxisDeceleratingForResume,
    MovingAxisPaused,
    DeceleratingForCompletion,
    DeceleratingForSequencePause,
    DeceleratingForSequenceResume,
    SequencePaused,
    DeceleratingAfterClear,
    Error,
}

/// Side effects the mainline performs when a transition names them, in
/// order.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Action {
    SetResetFlag,
    EnableMotorDrivers,
    DisableMotorDrivers,
    BeginHold,
    EndHold,
    EndMotion,
    EnqueueEvent,
    DequeueEvent,
    ClearEventQueue,
    GenerateInterrupt,
    HomeZAxis,
    HomeRAxis,
    MoveZAxis,
    MoveRAxis,
    SetZAxisSetting,
    SetRAxisSetting,
}

/// One table cell: where to go (if anywhere) and what to do.
#[derive(Copy, Clone, Debug)]
pub struct Transition {
    pub next: Option<State>,
    pub actions: &'static [Action],
}

impl Transition {
    const fn to(next: State, actions: &'static [Action]) -> Self {
        Transition {
            next: Some(next),
            actions,
        }
    }

    const fn stay(actions: &'static [Action]) -> Self {
        Transition {
            next: None,
            actions,
        }
    }
}

/// Event is absorbed with no effect.
const IGNORE: Transition = Transition::stay(&[]);
/// Event is parked on the event queue for dispatch at `ReadyForAction`.
const DEFER: Transition = Transition::stay(&[Action::EnqueueEvent]);

/// Looks up the table cell for `(state, event)`.
///
/// The table is total: every event is meaningful (or deliberately ignored)
/// in every state.
pub fn transition(state: State, event: Event) -> Transition {
    use Action::*;
    use Event::*;
    use State::*;

    // Rows common to all 22 states. An error disables the drivers and
    // pulses the interrupt line so the host reads the status promptly.
    match event {
        ResetRequested => return Transition::to(Disabled, &[SetResetFlag]),
        ErrorEncountered => {
            return Transition::to(Error, &[DisableMotorDrivers, GenerateInterrupt])
        }
        _ => (),
    }

    // The eight events that originate from host commands and are deferred
    // whenever motion is in flight.
    macro_rules! command_events {
        () => {
            InterruptRequested
                | DisableRequested
                | HomeZAxisRequested
                | HomeRAxisRequested
                | MoveZAxisRequested
                | MoveRAxisRequested
                | SetZAxisSettingRequested
                | SetRAxisSettingRequested
        };
    }

    match state {
        Disabled => match event {
            EnableRequested => Transition::to(Ready, &[EnableMotorDrivers]),
            SetZAxisSettingRequested => Transition::stay(&[SetZAxisSetting]),
            SetRAxisSettingRequested => Transition::stay(&[SetRAxisSetting]),
            _ => IGNORE,
        },

        Ready => match event {
            HomeZAxisRequested | HomeRAxisRequested | MoveZAxisRequested
            | MoveRAxisRequested => {
                Transition::to(WaitingForInterruptRequest, &[EnqueueEvent])
            }
            InterruptRequested => Transition::stay(&[GenerateInterrupt, DequeueEvent]),
            DisableRequested => Transition::to(Disabled, &[DisableMotorDrivers]),
            SetZAxisSettingRequested => Transition::stay(&[SetZAxisSetting, DequeueEvent]),
            SetRAxisSettingRequested => Transition::stay(&[SetRAxisSetting, DequeueEvent]),
            _ => IGNORE,
        },

        ReadyForAction => match event {
            HomeZAxisRequested => Transition::to(HomingZAxis, &[HomeZAxis]),
            HomeRAxisRequested => Transition::to(HomingRAxis, &[HomeRAxis]),
            MoveZAxisRequested => Transition::to(MovingAxis, &[MoveZAxis]),
            MoveRAxisRequested => Transition::to(MovingAxis, &[MoveRAxis]),
            InterruptRequested => Transition::to(Ready, &[GenerateInterrupt, DequeueEvent]),
            SetZAxisSettingRequested => Transition::stay(&[SetZAxisSetting, DequeueEvent]),
            SetRAxisSettingRequested => Transition::stay(&[SetRAxisSetting, DequeueEvent]),
            DisableRequested => DEFER,
            _ => IGNORE,
        },

        WaitingForInterruptRequest => match event {
            InterruptRequested => {
                Transition::to(ReadyForAction, &[EnqueueEvent, DequeueEvent])
            }
            DisableRequested | HomeZAxisRequested | HomeRAxisRequested
            | MoveZAxisRequested | MoveRAxisRequested | SetZAxisSettingRequested
            | SetRAxisSettingRequested => DEFER,
            _ => IGNORE,
        },

        HomingZAxis => match event {
            DecelerationStarted => Transition::to(DeceleratingForCompletion, &[]),
            AxisAtLimit => Transition::to(ReadyForAction, &[DequeueEvent]),
            AxisLimitReached => Transition::to(DeceleratingForCompletion, &[BeginHold]),
            PauseRequested => Transition::to(HomingZAxisDeceleratingForPause, &[BeginHold]),
            command_events!() => DEFER,
            _ => IGNORE,
        },

        HomingRAxis => match event {
            DecelerationStarted => Transition::to(DeceleratingForCompletion, &[]),
            AxisAtLimit => Transition::to(ReadyForAction, &[DequeueEvent]),
            AxisLimitReached => Transition::to(DeceleratingForCompletion, &[BeginHold]),
            PauseRequested => Transition::to(HomingRAxisDeceleratingForPause, &[BeginHold]),
            command_events!() => DEFER,
            _ => IGNORE,
        },

        MovingAxis => match event {
            DecelerationStarted => Transition::to(DeceleratingForCompletion, &[]),
            PauseRequested => Transition::to(MovingAxisDeceleratingForPause, &[BeginHold]),
            command_events!() => DEFER,
            _ => IGNORE,
        },

        HomingZAxisDeceleratingForPause => match event {
            ResumeRequested => Transition::to(HomingZAxisDeceleratingForResume, &[]),
            MotionComplete => Transition::to(HomingZAxisPaused, &[]),
            ClearRequested => Transition::to(DeceleratingAfterClear, &[ClearEventQueue]),
            command_events!() => DEFER,
            _ => IGNORE,
        },

        HomingRAxisDeceleratingForPause => match event {
            ResumeRequested => Transition::to(HomingRAxisDeceleratingForResume, &[]),
            MotionComplete => Transition::to(HomingRAxisPaused, &[]),
            ClearRequested => Transition::to(DeceleratingAfterClear, &[ClearEventQueue]),
            command_events!() => DEFER,
            _ => IGNORE,
        },

        MovingAxisDeceleratingForPause => match event {
            ResumeRequested => Transition::to(MovingAxisDeceleratingForResume, &[]),
            MotionComplete => Transition::to(MovingAxisPaused, &[]),
            ClearRequested => Transition::to(DeceleratingAfterClear, &[ClearEventQueue]),
            command_events!() => DEFER,
            _ => IGNORE,
        },

        HomingZAxisDeceleratingForResume => match event {
            MotionComplete => Transition::to(HomingZAxis, &[EndHold]),
            command_events!() => DEFER,
            _ => IGNORE,
        },

        HomingRAxisDeceleratingForResume => match event {
            MotionComplete => Transition::to(HomingRAxis, &[EndHold]),
            command_events!() => DEFER,
            _ => IGNORE,
        },

        MovingAxisDeceleratingForResume => match event {
            MotionComplete => Transition::to(MovingAxis, &[EndHold]),
            command_events!() => DEFER,
            _ => IGNORE,
        },

        HomingZAxisPaused => match event {
            ResumeRequested => Transition::to(HomingZAxis, &[EndHold]),
            ClearRequested => Transition::to(Ready, &[EndMotion, ClearEventQueue]),
            command_events!() => DEFER,
            _ => IGNORE,
        },

        HomingRAxisPaused => match event {
            ResumeRequested => Transition::to(HomingRAxis, &[EndHold]),
            ClearRequested => Transition::to(Ready, &[EndMotion, ClearEventQueue]),
            command_events!() => DEFER,
            _ => IGNORE,
        },

        MovingAxisPaused => match event {
            ResumeRequested => Transition::to(MovingAxis, &[EndHold]),
            ClearRequested => Transition::to(Ready, &[EndMotion, ClearEventQueue]),
            command_events!() => DEFER,
            _ => IGNORE,
        },

        DeceleratingForCompletion => match event {
            MotionComplete => Transition::to(ReadyForAction, &[EndMotion, DequeueEvent]),
            PauseRequested => Transition::to(DeceleratingForSequencePause, &[]),
            command_events!() => DEFER,
            _ => IGNORE,
        },

        DeceleratingForSequencePause => match event {
            ResumeRequested => Transition::to(DeceleratingForSequenceResume, &[]),
            MotionComplete => Transition::to(SequencePaused, &[EndMotion]),
            ClearRequested => Transition::to(DeceleratingAfterClear, &[ClearEventQueue]),
            command_events!() => DEFER,
            _ => IGNORE,
        },

        DeceleratingForSequenceResume => match event {
            MotionComplete => Transition::to(ReadyForAction, &[DequeueEvent]),
            command_events!() => DEFER,
            _ => IGNORE,
        },

        SequencePaused => match event {
            ResumeRequested => Transition::to(ReadyForAction, &[DequeueEvent]),
            ClearRequested => Transition::to(Ready, &[ClearEventQueue]),
            command_events!() => DEFER,
            _ => IGNORE,
        },

        DeceleratingAfterClear => match event {
            MotionComplete => Transition::to(Ready, &[EndMotion, DequeueEvent]),
            command_events!() => DEFER,
            _ => IGNORE,
        },

        Error => IGNORE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [State; 22] = [
        State::Disabled,
        State::Ready,
        State::ReadyForAction,
        State::WaitingForInterruptRequest,
        State::HomingZAxis,
        State::HomingZAxisDeceleratingForPause,
        State::HomingZAxisDeceleratingForResume,
        State::HomingZAxisPaused,
        State::HomingRAxis,
        State::HomingRAxisDeceleratingForPause,
        State::HomingRAxisDeceleratingForResume,
        State::HomingRAxisPaused,
        State::MovingAxis,
        State::MovingAxisDeceleratingForPause,
        State::MovingAxisDeceleratingForResume,
        State::MovingAxisPaused,
        State::DeceleratingForCompletion,
        State::DeceleratingForSequencePause,
        State::DeceleratingForSequenceResume,
        State::SequencePaused,
        State::DeceleratingAfterClear,
        State::Error,
    ];

    const ALL_EVENTS: [Event; 18] = [
        Event::EnableRequested,
        Event::DisableRequested,
        Event::ResetRequested,
        Event::ClearRequested,
        Event::PauseRequested,
        Event::ResumeRequested,
        Event::InterruptRequested,
        Event::HomeZAxisRequested,
        Event::HomeRAxisRequested,
        Event::MoveZAxisRequested,
        Event::MoveRAxisRequested,
        Event::SetZAxisSettingRequested,
        Event::SetRAxisSettingRequested,
        Event::AxisLimitReached,
        Event::AxisAtLimit,
        Event::MotionComplete,
        Event::DecelerationStarted,
        Event::ErrorEncountered,
    ];

    #[test]
    fn reset_reaches_disabled_from_everywhere() {
        for &state in &ALL_STATES {
            let t = transition(state, Event::ResetRequested);
            assert_eq!(t.next, Some(State::Disabled));
            assert_eq!(t.actions, &[Action::SetResetFlag]);
        }
    }

    #[test]
    fn errors_disable_the_drivers_from_everywhere() {
        for &state in &ALL_STATES {
            let t = transition(state, Event::ErrorEncountered);
            assert_eq!(t.next, Some(State::Error));
            assert_eq!(
                t.actions,
                &[Action::DisableMotorDrivers, Action::GenerateInterrupt]
            );
        }
    }

    #[test]
    fn error_state_only_leaves_by_reset() {
        for &event in &ALL_EVENTS {
            let t = transition(State::Error, event);
            match event {
                Event::ResetRequested => assert_eq!(t.next, Some(State::Disabled)),
                Event::ErrorEncountered => assert_eq!(t.next, Some(State::Error)),
                _ => {
                    assert_eq!(t.next, None);
                    assert!(t.actions.is_empty());
                }
            }
        }
    }

    #[test]
    fn motion_states_defer_commands() {
        let motion_states = [
            State::HomingZAxis,
            State::HomingRAxis,
            State::MovingAxis,
            State::DeceleratingForCompletion,
            State::DeceleratingAfterClear,
        ];
        let commands = [
            Event::InterruptRequested,
            Event::DisableRequested,
            Event::HomeZAxisRequested,
            Event::HomeRAxisRequested,
            Event::MoveZAxisRequested,
            Event::MoveRAxisRequested,
            Event::SetZAxisSettingRequested,
            Event::SetRAxisSettingRequested,
        ];
        for &state in &motion_states {
            for &event in &commands {
                let t = transition(state, event);
                assert_eq!(t.next, None, "{:?}/{:?}", state, event);
                assert_eq!(t.actions, &[Action::EnqueueEvent]);
            }
        }
    }

    #[test]
    fn batch_protocol_round_trip() {
        // A move request in Ready parks the request and waits for the
        // interrupt request that terminates the batch.
        let t = transition(State::Ready, Event::MoveZAxisRequested);
        assert_eq!(t.next, Some(State::WaitingForInterruptRequest));
        assert_eq!(t.actions, &[Action::EnqueueEvent]);

        // The interrupt request joins the queue and dispatch begins.
        let t = transition(
            State::WaitingForInterruptRequest,
            Event::InterruptRequested,
        );
        assert_eq!(t.next, Some(State::ReadyForAction));
        assert_eq!(t.actions, &[Action::EnqueueEvent, Action::DequeueEvent]);

        // Dispatching the move starts motion.
        let t = transition(State::ReadyForAction, Event::MoveZAxisRequested);
        assert_eq!(t.next, Some(State::MovingAxis));
        assert_eq!(t.actions, &[Action::MoveZAxis]);

        // When the queue finally yields the interrupt request, the pulse
        // fires and the machine returns to Ready.
        let t = transition(State::ReadyForAction, Event::InterruptRequested);
        assert_eq!(t.next, Some(State::Ready));
        assert_eq!(
            t.actions,
            &[Action::GenerateInterrupt, Action::DequeueEvent]
        );
    }

    #[test]
    fn homing_limit_sequence() {
        let t = transition(State::HomingZAxis, Event::AxisLimitReached);
        assert_eq!(t.next, Some(State::DeceleratingForCompletion));
        assert_eq!(t.actions, &[Action::BeginHold]);

        let t = transition(State::DeceleratingForCompletion, Event::MotionComplete);
        assert_eq!(t.next, Some(State::ReadyForAction));
        assert_eq!(t.actions, &[Action::EndMotion, Action::DequeueEvent]);
    }

    #[test]
    fn pause_resume_satellites() {
        let t = transition(State::MovingAxis, Event::PauseRequested);
        assert_eq!(t.next, Some(State::MovingAxisDeceleratingForPause));
        assert_eq!(t.actions, &[Action::BeginHold]);

        // Resume before the stop finishes takes the resume-decel path.
        let t = transition(
            State::MovingAxisDeceleratingForPause,
            Event::ResumeRequested,
        );
        assert_eq!(t.next, Some(State::MovingAxisDeceleratingForResume));

        // Otherwise the stop completes into the paused state and a resume
        // re-enters motion via EndHold.
        let t = transition(State::MovingAxisDeceleratingForPause, Event::MotionComplete);
        assert_eq!(t.next, Some(State::MovingAxisPaused));
        let t = transition(State::MovingAxisPaused, Event::ResumeRequested);
        assert_eq!(t.next, Some(State::MovingAxis));
        assert_eq!(t.actions, &[Action::EndHold]);
    }

    #[test]
    fn clear_during_pause_decel_waits_for_the_stop() {
        let t = transition(
            State::MovingAxisDeceleratingForPause,
            Event::ClearRequested,
        );
        assert_eq!(t.next, Some(State::DeceleratingAfterClear));
        assert_eq!(t.actions, &[Action::ClearEventQueue]);

        let t = transition(State::DeceleratingAfterClear, Event::MotionComplete);
        assert_eq!(t.next, Some(State::Ready));
        assert_eq!(t.actions, &[Action::EndMotion, Action::DequeueEvent]);
    }

    #[test]
    fn table_is_total() {
        // Every (state, event) pair resolves to a cell; no panics, and any
        // named successor is one of the known states.
        for &state in &ALL_STATES {
            for &event in &ALL_EVENTS {
                let t = transition(state, event);
                if let Some(next) = t.next {
                    assert!(ALL_STATES.contains(&next));
                }
            }
        }
    }
}
