//! Print state machine states.
//!
//! The machine is hierarchical: most states live under the closed-door
//! region, and the layer-building states form the printing-layer composite
//! inside it. Excursions out of the hierarchy (door opened, cancel
//! confirmation) remember the leaf they left and restore it on the way
//! back: deep history, kept explicitly as a stored leaf rather than
//! implied by a framework.

/// Every leaf state the engine can occupy.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PrinterState {
    // Top-level, outside the closed-door region.
    DoorOpen,
    Error,
    ShowingVersion,
    DemoMode,

    // Closed-door region.
    Initializing,
    Homing,
    Home,
    MovingToStartPosition,
    MovingToPause,
    Paused,
    MovingToResume,
    Unjamming,
    Jammed,
    AwaitingCancelation,
    ConfirmCancel,
    GettingFeedback,

    // The printing-layer composite.
    Pressing,
    PressDelay,
    Unpressing,
    PreExposureDelay,
    Exposing,
    Separating,
    Approaching,
}

impl PrinterState {
    /// Whether this leaf is inside the closed-door region, i.e. a door
    /// opening must remember it and excursion states must return to it.
    pub fn in_door_closed(self) -> bool {
        !matches!(
            self,
            PrinterState::DoorOpen
                | PrinterState::Error
                | PrinterState::ShowingVersion
                | PrinterState::DemoMode
        )
    }

    /// Whether this leaf is part of the printing-layer composite.
    pub fn in_printing_layer(self) -> bool {
        matches!(
            self,
            PrinterState::Pressing
                | PrinterState::PressDelay
                | PrinterState::Unpressing
                | PrinterState::PreExposureDelay
                | PrinterState::Exposing
                | PrinterState::Separating
                | PrinterState::Approaching
        )
    }

    /// Whether a print job is underway (so cancel/pause are meaningful).
    pub fn printing(self) -> bool {
        self.in_printing_layer()
            || matches!(
                self,
                PrinterState::MovingToStartPosition
                    | PrinterState::MovingToPause
                    | PrinterState::Paused
                    | PrinterState::MovingToResume
                    | PrinterState::Unjamming
                    | PrinterState::Jammed
            )
    }

    /// The state name reported in status snapshots. Leaves of the
    /// printing-layer composite report the composite's name; the leaf
    /// itself travels in the substate field.
    pub fn name(self) -> &'static str {
        if self.in_printing_layer() {
            return "PrintingLayer";
        }
        match self {
            PrinterState::DoorOpen => "DoorOpen",
            PrinterState::Error => "Error",
            PrinterState::ShowingVersion => "ShowingVersion",
            PrinterState::DemoMode => "DemoMode",
            PrinterState::Initializing => "Initializing",
            PrinterState::Homing => "Homing",
            PrinterState::Home => "Home",
            PrinterState::MovingToStartPosition => "MovingToStartPosition",
            PrinterState::MovingToPause => "MovingToPause",
            PrinterState::Paused => "Paused",
            PrinterState::MovingToResume => "MovingToResume",
            PrinterState::Unjamming => "Unjamming",
            PrinterState::Jammed => "Jammed",
            PrinterState::AwaitingCancelation => "AwaitingCancelation",
            PrinterState::ConfirmCancel => "ConfirmCancel",
            PrinterState::GettingFeedback => "GettingFeedback",
            _ => unreachable!(),
        }
    }

    /// The substate name: the printing-layer leaf, or empty.
    pub fn substate_name(self) -> &'static str {
        match self {
            PrinterState::Pressing => "Pressing",
            PrinterState::PressDelay => "PressDelay",
            PrinterState::Unpressing => "Unpressing",
            PrinterState::PreExposureDelay => "PreExposureDelay",
            PrinterState::Exposing => "Exposing",
            PrinterState::Separating => "Separating",
            PrinterState::Approaching => "Approaching",
            _ => "",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_predicates() {
        assert!(PrinterState::Home.in_door_closed());
        assert!(PrinterState::Exposing.in_door_closed());
        assert!(!PrinterState::DoorOpen.in_door_closed());
        assert!(!PrinterState::Error.in_door_closed());

        assert!(PrinterState::Separating.in_printing_layer());
        assert!(!PrinterState::Paused.in_printing_layer());
        assert!(PrinterState::Paused.printing());
        assert!(!PrinterState::Home.printing());
    }

    #[test]
    fn printing_layer_leaves_report_composite_and_substate() {
        assert_eq!(PrinterState::Exposing.name(), "PrintingLayer");
        assert_eq!(PrinterState::Exposing.substate_name(), "Exposing");
        assert_eq!(PrinterState::Home.name(), "Home");
        assert_eq!(PrinterState::Home.substate_name(), "");
    }
}
