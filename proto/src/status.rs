//! The controller status byte.

/// Status codes reported through the one-byte status register and returned
/// by the controller's fallible internal operations.
///
/// The numeric values are part of the wire contract and must remain stable.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Success = 0,
    Error = 1,
    /// The current operation has more work to do; call again.
    Eagain = 2,
    /// Nothing to do.
    Noop = 3,
    /// The current phase of a multi-phase operation finished.
    Complete = 4,
    SettingCommandUnknown = 5,
    MaxJerkInvalid = 6,
    SpeedInvalid = 7,
    MicrosteppingInvalid = 8,
    UnitsPerRevInvalid = 9,
    StepAngleInvalid = 10,
    PlannerBufferFull = 11,
    CommandBufferFull = 12,
    EventQueueFull = 13,
    CommandUnknown = 14,
    StateMachineError = 15,
    MoveLengthTooSmall = 16,
    MoveTimeTooSmall = 17,
    /// The planned block was too short to execute and was dropped. Not an
    /// error; the shortfall is made up by the next move.
    BlockSkipped = 18,
    InternalError = 19,
}

impl Status {
    /// Decodes a raw status byte. Values outside the defined set come back
    /// as `None` so the host can flag a corrupted read.
    pub fn from_byte(byte: u8) -> Option<Status> {
        use Status::*;
        Some(match byte {
            0 => Success,
            1 => Error,
            2 => Eagain,
            3 => Noop,
            4 => Complete,
            5 => SettingCommandUnknown,
            6 => MaxJerkInvalid,
            7 => SpeedInvalid,
            8 => MicrosteppingInvalid,
            9 => UnitsPerRevInvalid,
            10 => StepAngleInvalid,
            11 => PlannerBufferFull,
            12 => CommandBufferFull,
            13 => EventQueueFull,
            14 => CommandUnknown,
            15 => StateMachineError,
            16 => MoveLengthTooSmall,
            17 => MoveTimeTooSmall,
            18 => BlockSkipped,
            19 => InternalError,
            _ => return None,
        })
    }

    /// Whether the host should treat this status as an error when it reads
    /// it back after an interrupt.
    ///
    /// `BlockSkipped` and the flow-control codes report normal progress.
    pub fn is_error(self) -> bool {
        !matches!(
            self,
            Status::Success
                | Status::Eagain
                | Status::Noop
                | Status::Complete
                | Status::BlockSkipped
        )
    }
}

impl From<Status> for u8 {
    fn from(status: Status) -> u8 {
        status as u8
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_are_stable() {
        assert_eq!(Status::Success as u8, 0);
        assert_eq!(Status::PlannerBufferFull as u8, 11);
        assert_eq!(Status::StateMachineError as u8, 15);
        assert_eq!(Status::InternalError as u8, 19);
    }

    #[test]
    fn round_trip_every_value() {
        for byte in 0..=19u8 {
            let status = Status::from_byte(byte).unwrap();
            assert_eq!(u8::from(status), byte);
        }
        assert_eq!(Status::from_byte(20), None);
        assert_eq!(Status::from_byte(0xFF), None);
    }

    #[test]
    fn error_classification() {
        assert!(!Status::Success.is_error());
        assert!(!Status::BlockSkipped.is_error());
        assert!(Status::CommandBufferFull.is_error());
        assert!(Status::StateMachineError.is_error());
    }
}
