use crate::{OneWireStatus, UnknownCode};

/// Result of a 1-Wire reset pulse.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetResult {
    /// No device answered with a presence pulse.
    NoPresence = 0,
    /// At least one device answered with a presence pulse.
    Presence = 1,
    /// A presence pulse was seen, with an alarming device signaling on the bus.
    Alarm = 2,
    /// The bus is shorted.
    Short = 3,
}

impl OneWireStatus for ResetResult {
    fn presence(&self) -> bool {
        matches!(self, Self::Presence | Self::Alarm)
    }

    fn shortcircuit(&self) -> bool {
        *self == Self::Short
    }

    fn alarm(&self) -> bool {
        *self == Self::Alarm
    }
}

/// 1-Wire communication speed.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusSpeed {
    /// Standard speed, ~16 kbps.
    #[default]
    Regular = 0,
    /// Standard speed with relaxed timing for long lines.
    Flex = 1,
    /// Overdrive speed, ~142 kbps.
    Overdrive = 2,
    /// Hyperdrive speed.
    Hyperdrive = 3,
}

/// Electrical level of the 1-Wire line.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerLevel {
    /// Normal communication level.
    #[default]
    Normal = 0,
    /// Strong pull-up delivering power to parasitically powered devices.
    PowerDelivery = 1,
    /// Line held low.
    Break = 2,
    /// 12V program pulse.
    Program = 3,
}

/// When a level change takes effect.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeCondition {
    /// Immediately.
    Now = 0,
    /// After the next bit is transferred.
    AfterBit = 1,
    /// After the next byte is transferred.
    AfterByte = 2,
}

/// Duration of power delivery or of a program pulse.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerDuration {
    /// 0.5 seconds.
    HalfSecond = 0,
    /// 1 second.
    OneSecond = 1,
    /// 2 seconds.
    TwoSeconds = 2,
    /// 4 seconds.
    FourSeconds = 3,
    /// Until the device signals completion.
    SmartDone = 4,
    /// Until explicitly returned to normal.
    Infinite = 5,
    /// Until the current draw drops.
    CurrentDetect = 6,
    /// Standard EPROM programming pulse (480µs).
    Eprom = 7,
}

macro_rules! code_conversions {
    ($ty:ident { $($variant:ident),+ $(,)? }) => {
        impl From<$ty> for i32 {
            fn from(value: $ty) -> Self {
                value as u8 as i32
            }
        }

        impl TryFrom<i32> for $ty {
            type Error = UnknownCode;

            fn try_from(code: i32) -> Result<Self, Self::Error> {
                [$($ty::$variant),+]
                    .into_iter()
                    .find(|v| *v as u8 as i32 == code)
                    .ok_or(UnknownCode(code))
            }
        }
    };
}

code_conversions!(ResetResult { NoPresence, Presence, Alarm, Short });
code_conversions!(BusSpeed { Regular, Flex, Overdrive, Hyperdrive });
code_conversions!(PowerLevel { Normal, PowerDelivery, Break, Program });
code_conversions!(ChangeCondition { Now, AfterBit, AfterByte });
code_conversions!(PowerDuration {
    HalfSecond,
    OneSecond,
    TwoSeconds,
    FourSeconds,
    SmartDone,
    Infinite,
    CurrentDetect,
    Eprom,
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        assert_eq!(BusSpeed::try_from(2), Ok(BusSpeed::Overdrive));
        assert_eq!(i32::from(PowerDuration::Eprom), 7);
        assert_eq!(ResetResult::try_from(4), Err(UnknownCode(4)));
    }

    #[test]
    fn reset_result_status() {
        assert!(ResetResult::Alarm.presence());
        assert!(ResetResult::Alarm.alarm());
        assert!(!ResetResult::Short.presence());
        assert!(ResetResult::Short.shortcircuit());
        assert_eq!(ResetResult::NoPresence.result(), ResetResult::NoPresence);
    }
}
