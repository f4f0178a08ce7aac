//! Framing of the network adapter protocol.
//!
//! Integers are big-endian, booleans one byte, strings a `u16` byte length followed by
//! UTF-8. Every request is a command byte and its arguments; every reply starts with a
//! status byte, [`RET_SUCCESS`] followed by the results or [`RET_FAILURE`] followed by a
//! message.

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use onewire_bus::Crc16;

use crate::{PortError, PortResult};

/// Protocol version announced by the host.
pub const PROTOCOL_VERSION: i32 = 1;
/// TCP port hosts listen on unless told otherwise.
pub const DEFAULT_PORT: u16 = 6161;
/// Shared secret used when none is configured.
pub const DEFAULT_SECRET: &str = "Adapter Secret Default";
/// Status byte of a successful reply.
pub const RET_SUCCESS: u8 = 0xff;
/// Status byte of a failed reply.
pub const RET_FAILURE: u8 = 0xf0;
/// Length of the authentication challenge.
pub const CHALLENGE_LEN: usize = 8;
/// Longest block a single `GetBlock` or `DataBlock` request may carry.
pub const MAX_BLOCK_LEN: usize = 64 * 1024;
/// Longest family list a `TargetFamily` or `ExcludeFamily` request may carry.
pub const MAX_FAMILIES: usize = 256;

macro_rules! commands {
    ($($name:ident = $code:literal),+ $(,)?) => {
        /// Requests a client can send.
        #[repr(u8)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum Command {
            $(
                #[allow(missing_docs)]
                $name = $code,
            )+
        }

        impl TryFrom<u8> for Command {
            type Error = u8;

            fn try_from(code: u8) -> Result<Self, u8> {
                match code {
                    $($code => Ok(Self::$name),)+
                    other => Err(other),
                }
            }
        }
    };
}

commands! {
    Close = 0x08,
    Ping = 0x09,
    Reset = 0x10,
    PutBit = 0x11,
    PutByte = 0x12,
    GetBit = 0x13,
    GetByte = 0x14,
    GetBlock = 0x15,
    DataBlock = 0x16,
    SetPowerDuration = 0x17,
    StartPowerDelivery = 0x18,
    SetProgramPulseDuration = 0x19,
    StartProgramPulse = 0x1a,
    StartBreak = 0x1b,
    SetPowerNormal = 0x1c,
    SetSpeed = 0x1d,
    GetSpeed = 0x1e,
    BeginExclusive = 0x1f,
    EndExclusive = 0x20,
    FindFirstDevice = 0x21,
    FindNextDevice = 0x22,
    GetAddress = 0x23,
    SetSearchOnlyAlarming = 0x24,
    SetNoResetSearch = 0x25,
    SetSearchAllDevices = 0x26,
    TargetAllFamilies = 0x27,
    TargetFamily = 0x28,
    ExcludeFamily = 0x29,
    CanBreak = 0x2a,
    CanDeliverPower = 0x2b,
    CanDeliverSmartPower = 0x2c,
    CanFlex = 0x2d,
    CanHyperdrive = 0x2e,
    CanOverdrive = 0x2f,
    CanProgram = 0x30,
}

/// Answer to an authentication challenge: the CRC16 of the secret, continued over the challenge.
pub fn auth_response(secret: &str, challenge: &[u8; CHALLENGE_LEN]) -> i32 {
    let crc = Crc16::compute(secret.as_bytes(), 0);
    Crc16::compute(challenge, crc) as i32
}

pub(crate) fn read_bool<R: Read>(r: &mut R) -> io::Result<bool> {
    Ok(r.read_u8()? != 0)
}

pub(crate) fn write_bool<W: Write>(w: &mut W, value: bool) -> io::Result<()> {
    w.write_u8(value as u8)
}

pub(crate) fn read_i32<R: Read>(r: &mut R) -> io::Result<i32> {
    r.read_i32::<BigEndian>()
}

pub(crate) fn write_i32<W: Write>(w: &mut W, value: i32) -> io::Result<()> {
    w.write_i32::<BigEndian>(value)
}

/// Read a block length, rejecting negative values.
pub(crate) fn read_len<R: Read>(r: &mut R) -> io::Result<usize> {
    let len = read_i32(r)?;
    usize::try_from(len)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, format!("negative length {len}")))
}

/// Refuse a `len` above `max` before anything is allocated for it.
pub(crate) fn check_len(len: usize, max: usize) -> PortResult<usize> {
    if len > max {
        return Err(PortError::capability(format!("{len} bytes exceed the limit of {max}")));
    }
    Ok(len)
}

pub(crate) fn write_len<W: Write>(w: &mut W, len: usize) -> io::Result<()> {
    let len = i32::try_from(len)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "block too long"))?;
    write_i32(w, len)
}

pub(crate) fn read_string<R: Read>(r: &mut R) -> io::Result<String> {
    let len = r.read_u16::<BigEndian>()? as usize;
    let mut buf = vec![0; len];
    r.read_exact(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

pub(crate) fn write_string<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    let mut end = s.len().min(u16::MAX as usize);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    w.write_u16::<BigEndian>(end as u16)?;
    w.write_all(&s.as_bytes()[..end])
}

/// Read a reply status byte, turning a failure reply into [`PortError::Remote`].
pub(crate) fn read_status<R: Read>(r: &mut R) -> PortResult<()> {
    match r.read_u8()? {
        RET_SUCCESS => Ok(()),
        RET_FAILURE => Err(PortError::Remote(read_string(r)?)),
        other => Err(PortError::Protocol(format!("unexpected status byte {other:#04x}"))),
    }
}

pub(crate) fn write_failure<W: Write>(w: &mut W, message: &str) -> io::Result<()> {
    w.write_u8(RET_FAILURE)?;
    write_string(w, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn lengths_are_capped() {
        assert_eq!(check_len(MAX_BLOCK_LEN, MAX_BLOCK_LEN).unwrap(), MAX_BLOCK_LEN);
        let err = check_len(MAX_BLOCK_LEN + 1, MAX_BLOCK_LEN).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Capability);
    }

    #[test]
    fn command_codes() {
        assert_eq!(Command::try_from(0x08), Ok(Command::Close));
        assert_eq!(Command::try_from(0x30), Ok(Command::CanProgram));
        assert_eq!(Command::DataBlock as u8, 0x16);
        assert_eq!(Command::try_from(0x31), Err(0x31));
        assert_eq!(Command::try_from(0x00), Err(0x00));
    }

    #[test]
    fn auth_response_depends_on_secret_and_challenge() {
        let challenge = [1, 2, 3, 4, 5, 6, 7, 8];
        let answer = auth_response(DEFAULT_SECRET, &challenge);
        assert_eq!(answer, auth_response(DEFAULT_SECRET, &challenge));
        assert!((0..=0xffff).contains(&answer));
        assert_ne!(answer, auth_response("other", &challenge));
        assert_ne!(answer, auth_response(DEFAULT_SECRET, &[0; 8]));
    }

    #[test]
    fn strings_are_length_prefixed() {
        let mut buf = Vec::new();
        write_string(&mut buf, "no device").unwrap();
        assert_eq!(&buf[..2], &[0, 9]);
        assert_eq!(read_string(&mut Cursor::new(buf)).unwrap(), "no device");
    }

    #[test]
    fn failure_status_carries_message() {
        let mut buf = Vec::new();
        write_failure(&mut buf, "adapter not present").unwrap();
        match read_status(&mut Cursor::new(buf)) {
            Err(PortError::Remote(msg)) => assert_eq!(msg, "adapter not present"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(read_status(&mut Cursor::new([RET_SUCCESS])).is_ok());
        assert!(matches!(
            read_status(&mut Cursor::new([0x42])),
            Err(PortError::Protocol(_))
        ));
    }

    #[test]
    fn negative_lengths_rejected() {
        let mut buf = Vec::new();
        write_i32(&mut buf, -1).unwrap();
        assert!(read_len(&mut Cursor::new(buf)).is_err());
    }
}
