use std::io::{self, BufReader, BufWriter, Read, Write};
use std::net::TcpStream;

use byteorder::{ReadBytesExt, WriteBytesExt};
use log::{debug, info, warn};
use onewire_bus::{BusSpeed, ChangeCondition, DeviceAddress, PowerDuration, ResetResult};
use parking_lot::Mutex;

use super::wire::{
    CHALLENGE_LEN, Command, DEFAULT_PORT, DEFAULT_SECRET, MAX_BLOCK_LEN, MAX_FAMILIES,
    PROTOCOL_VERSION, RET_FAILURE, RET_SUCCESS, auth_response, check_len, read_bool, read_i32,
    read_status, write_bool, write_i32, write_len,
};
use crate::{Capabilities, ExclusiveGate, PortAdapter, PortError, PortResult};

type Reader = BufReader<TcpStream>;
type Writer = BufWriter<TcpStream>;

/// Where a port name points: `host[:port[:secret]]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Endpoint {
    pub host: String,
    pub port: u16,
    pub secret: Option<String>,
}

impl Endpoint {
    pub fn parse(name: &str, default_port: u16) -> PortResult<Self> {
        let mut parts = name.splitn(3, ':');
        let host = parts.next().unwrap_or_default();
        if host.is_empty() {
            return Err(PortError::Transport(format!("no host in port name {name:?}")));
        }
        let port = match parts.next() {
            None | Some("") => default_port,
            Some(port) => port
                .parse()
                .map_err(|_| PortError::Transport(format!("bad TCP port in port name {name:?}")))?,
        };
        Ok(Self {
            host: host.to_owned(),
            port,
            secret: parts.next().map(str::to_owned),
        })
    }
}

struct Connection {
    name: String,
    reader: Reader,
    writer: Writer,
}

impl Connection {
    fn open(name: &str, endpoint: &Endpoint, secret: &str) -> PortResult<Self> {
        let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port))?;
        stream.set_nodelay(true)?;
        let mut conn = Self {
            name: name.to_owned(),
            reader: BufReader::new(stream.try_clone()?),
            writer: BufWriter::new(stream),
        };
        conn.handshake(secret)?;
        Ok(conn)
    }

    fn handshake(&mut self, secret: &str) -> PortResult<()> {
        let version = read_i32(&mut self.reader)?;
        if version != PROTOCOL_VERSION {
            self.writer.write_u8(RET_FAILURE)?;
            self.writer.flush()?;
            return Err(PortError::Protocol(format!(
                "host speaks protocol version {version}, expected {PROTOCOL_VERSION}"
            )));
        }
        self.writer.write_u8(RET_SUCCESS)?;
        self.writer.flush()?;

        let mut challenge = [0u8; CHALLENGE_LEN];
        self.reader.read_exact(&mut challenge)?;
        write_i32(&mut self.writer, auth_response(secret, &challenge))?;
        self.writer.flush()?;
        match read_status(&mut self.reader) {
            Err(PortError::Remote(message)) => Err(PortError::Authentication(message)),
            other => other,
        }
    }

    fn exchange<T>(
        &mut self,
        command: Command,
        args: impl FnOnce(&mut Writer) -> io::Result<()>,
        results: impl FnOnce(&mut Reader) -> io::Result<T>,
    ) -> PortResult<T> {
        self.writer.write_u8(command as u8)?;
        args(&mut self.writer)?;
        self.writer.flush()?;
        read_status(&mut self.reader)?;
        Ok(results(&mut self.reader)?)
    }

    fn close(mut self) {
        let sent = self
            .writer
            .write_u8(Command::Close as u8)
            .and_then(|()| self.writer.flush());
        if let Err(e) = sent {
            debug!("Closing {} uncleanly: {e}", self.name);
        }
    }
}

fn no_args(_: &mut Writer) -> io::Result<()> {
    Ok(())
}

fn no_results(_: &mut Reader) -> io::Result<()> {
    Ok(())
}

/// Client side of a network adapter.
///
/// Port names have the form `host[:port[:secret]]`; the TCP port defaults to
/// [`DEFAULT_PORT`] and the secret to the one the adapter was built with.
pub struct NetAdapter {
    gate: ExclusiveGate,
    secret: String,
    default_port: u16,
    connection: Mutex<Option<(Connection, Endpoint)>>,
}

impl Default for NetAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl NetAdapter {
    /// A client with the default secret and TCP port. No port is selected yet.
    pub fn new() -> Self {
        Self {
            gate: ExclusiveGate::new(),
            secret: DEFAULT_SECRET.to_owned(),
            default_port: DEFAULT_PORT,
            connection: Mutex::new(None),
        }
    }

    /// Secret used when the port name does not carry one.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = secret.into();
        self
    }

    /// TCP port used when the port name does not carry one.
    pub fn with_port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }

    /// Check that the host is still answering.
    pub fn ping(&self) -> PortResult<()> {
        self.call(Command::Ping, no_args, no_results)
    }

    /// Send one request without taking the local gate.
    ///
    /// When the reply is garbled the stream cannot be trusted any more, so the
    /// connection is reopened before the error is returned.
    fn request<T>(
        &self,
        command: Command,
        args: impl FnOnce(&mut Writer) -> io::Result<()>,
        results: impl FnOnce(&mut Reader) -> io::Result<T>,
    ) -> PortResult<T> {
        let mut slot = self.connection.lock();
        let (conn, _) = slot.as_mut().ok_or(PortError::PortNotSelected)?;
        let outcome = conn.exchange(command, args, results);
        if let Err(PortError::Protocol(reason)) = &outcome {
            warn!("Reconnecting after {reason}");
            if let Some((conn, endpoint)) = slot.take() {
                let secret = endpoint.secret.as_deref().unwrap_or(&self.secret);
                match Connection::open(&conn.name, &endpoint, secret) {
                    Ok(fresh) => *slot = Some((fresh, endpoint)),
                    Err(e) => warn!("Reconnecting to {} failed: {e}", conn.name),
                }
            }
        }
        outcome
    }

    fn call<T>(
        &self,
        command: Command,
        args: impl FnOnce(&mut Writer) -> io::Result<()>,
        results: impl FnOnce(&mut Reader) -> io::Result<T>,
    ) -> PortResult<T> {
        let _guard = self.gate.acquire();
        self.request(command, args, results)
    }

    fn call_bool(&self, command: Command) -> PortResult<bool> {
        self.call(command, no_args, read_bool)
    }

    fn call_families(&self, command: Command, families: &[u8]) -> PortResult<()> {
        check_len(families.len(), MAX_FAMILIES)?;
        self.call(
            command,
            |w| {
                write_len(w, families.len())?;
                w.write_all(families)
            },
            no_results,
        )
    }
}

impl Drop for NetAdapter {
    fn drop(&mut self) {
        if let Some((conn, _)) = self.connection.get_mut().take() {
            conn.close();
        }
    }
}

impl PortAdapter for NetAdapter {
    fn adapter_name(&self) -> &str {
        "NetAdapter"
    }

    fn port_type_description(&self) -> &str {
        "network 'host:port:secret'"
    }

    fn select_port(&self, name: &str) -> PortResult<bool> {
        let _guard = self.gate.acquire();
        let mut slot = self.connection.lock();
        if matches!(slot.as_ref(), Some((conn, _)) if conn.name == name) {
            return Ok(true);
        }
        if let Some((conn, _)) = slot.take() {
            conn.close();
        }
        let endpoint = Endpoint::parse(name, self.default_port)?;
        let secret = endpoint.secret.as_deref().unwrap_or(&self.secret);
        let conn = Connection::open(name, &endpoint, secret)?;
        info!("Connected to {}:{}", endpoint.host, endpoint.port);
        *slot = Some((conn, endpoint));
        Ok(true)
    }

    fn free_port(&self) -> PortResult<()> {
        let _guard = self.gate.acquire();
        if let Some((conn, _)) = self.connection.lock().take() {
            conn.close();
        }
        Ok(())
    }

    fn port_name(&self) -> PortResult<String> {
        self.connection
            .lock()
            .as_ref()
            .map(|(conn, _)| conn.name.clone())
            .ok_or(PortError::PortNotSelected)
    }

    fn adapter_detected(&self) -> PortResult<bool> {
        Ok(self.connection.lock().is_some())
    }

    fn adapter_version(&self) -> PortResult<String> {
        Ok(format!("NetAdapter, protocol version {PROTOCOL_VERSION}"))
    }

    fn capabilities(&self) -> PortResult<Capabilities> {
        Ok(Capabilities {
            overdrive: self.call_bool(Command::CanOverdrive)?,
            hyperdrive: self.call_bool(Command::CanHyperdrive)?,
            flex: self.call_bool(Command::CanFlex)?,
            program: self.call_bool(Command::CanProgram)?,
            power_delivery: self.call_bool(Command::CanDeliverPower)?,
            smart_power: self.call_bool(Command::CanDeliverSmartPower)?,
            line_break: self.call_bool(Command::CanBreak)?,
        })
    }

    fn begin_exclusive(&self, blocking: bool) -> PortResult<bool> {
        if !self.gate.begin(blocking) {
            return Ok(false);
        }
        match self.request(Command::BeginExclusive, |w| write_bool(w, blocking), read_bool) {
            Ok(true) => Ok(true),
            refused => {
                self.gate.end();
                refused
            }
        }
    }

    fn end_exclusive(&self) {
        if self.gate.end() {
            if let Err(e) = self.request(Command::EndExclusive, no_args, no_results) {
                debug!("Releasing the remote adapter failed: {e}");
            }
        }
    }

    fn holds_exclusive(&self) -> bool {
        self.gate.held_by_current()
    }

    fn set_search_only_alarming(&self) -> PortResult<()> {
        self.call(Command::SetSearchOnlyAlarming, no_args, no_results)
    }

    fn set_no_reset_search(&self) -> PortResult<()> {
        self.call(Command::SetNoResetSearch, no_args, no_results)
    }

    fn set_search_all_devices(&self) -> PortResult<()> {
        self.call(Command::SetSearchAllDevices, no_args, no_results)
    }

    fn target_all_families(&self) -> PortResult<()> {
        self.call(Command::TargetAllFamilies, no_args, no_results)
    }

    fn target_family(&self, families: &[u8]) -> PortResult<()> {
        self.call_families(Command::TargetFamily, families)
    }

    fn exclude_family(&self, families: &[u8]) -> PortResult<()> {
        self.call_families(Command::ExcludeFamily, families)
    }

    fn find_first_device(&self) -> PortResult<bool> {
        self.call_bool(Command::FindFirstDevice)
    }

    fn find_next_device(&self) -> PortResult<bool> {
        self.call_bool(Command::FindNextDevice)
    }

    fn address(&self) -> PortResult<DeviceAddress> {
        self.call(Command::GetAddress, no_args, |r| {
            let mut rom = [0u8; 8];
            r.read_exact(&mut rom)?;
            Ok(DeviceAddress::new(rom))
        })
    }

    fn reset(&self) -> PortResult<ResetResult> {
        let code = self.call(Command::Reset, no_args, read_i32)?;
        Ok(ResetResult::try_from(code)?)
    }

    fn put_bit(&self, bit: bool) -> PortResult<()> {
        self.call(Command::PutBit, |w| write_bool(w, bit), no_results)
    }

    fn get_bit(&self) -> PortResult<bool> {
        self.call_bool(Command::GetBit)
    }

    fn put_byte(&self, byte: u8) -> PortResult<()> {
        self.call(Command::PutByte, |w| w.write_u8(byte), no_results)
    }

    fn get_byte(&self) -> PortResult<u8> {
        self.call(Command::GetByte, no_args, |r| r.read_u8())
    }

    fn get_block(&self, len: usize) -> PortResult<Vec<u8>> {
        check_len(len, MAX_BLOCK_LEN)?;
        self.call(
            Command::GetBlock,
            |w| write_len(w, len),
            |r| {
                let mut block = vec![0; len];
                r.read_exact(&mut block)?;
                Ok(block)
            },
        )
    }

    fn data_block(&self, block: &mut [u8]) -> PortResult<()> {
        check_len(block.len(), MAX_BLOCK_LEN)?;
        let request = block.to_vec();
        self.call(
            Command::DataBlock,
            |w| {
                write_len(w, request.len())?;
                w.write_all(&request)
            },
            |r| r.read_exact(block),
        )
    }

    fn set_power_duration(&self, duration: PowerDuration) -> PortResult<()> {
        self.call(Command::SetPowerDuration, |w| write_i32(w, duration.into()), no_results)
    }

    fn start_power_delivery(&self, condition: ChangeCondition) -> PortResult<bool> {
        self.call(Command::StartPowerDelivery, |w| write_i32(w, condition.into()), read_bool)
    }

    fn set_program_pulse_duration(&self, duration: PowerDuration) -> PortResult<()> {
        self.call(Command::SetProgramPulseDuration, |w| write_i32(w, duration.into()), no_results)
    }

    fn start_program_pulse(&self, condition: ChangeCondition) -> PortResult<bool> {
        self.call(Command::StartProgramPulse, |w| write_i32(w, condition.into()), read_bool)
    }

    fn start_break(&self) -> PortResult<()> {
        self.call(Command::StartBreak, no_args, no_results)
    }

    fn set_power_normal(&self) -> PortResult<()> {
        self.call(Command::SetPowerNormal, no_args, no_results)
    }

    fn set_speed(&self, speed: BusSpeed) -> PortResult<()> {
        self.call(Command::SetSpeed, |w| write_i32(w, speed.into()), no_results)
    }

    fn speed(&self) -> PortResult<BusSpeed> {
        let code = self.call(Command::GetSpeed, no_args, read_i32)?;
        Ok(BusSpeed::try_from(code)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_names() {
        assert_eq!(
            Endpoint::parse("gateway", DEFAULT_PORT).unwrap(),
            Endpoint { host: "gateway".into(), port: 6161, secret: None }
        );
        assert_eq!(
            Endpoint::parse("10.0.0.2:7000", DEFAULT_PORT).unwrap(),
            Endpoint { host: "10.0.0.2".into(), port: 7000, secret: None }
        );
        assert_eq!(
            Endpoint::parse("gateway::s3cret:with:colons", 6000).unwrap(),
            Endpoint {
                host: "gateway".into(),
                port: 6000,
                secret: Some("s3cret:with:colons".into())
            }
        );
        assert!(Endpoint::parse("gateway:http", DEFAULT_PORT).is_err());
        assert!(Endpoint::parse(":6161", DEFAULT_PORT).is_err());
    }

    #[test]
    fn unselected_adapter_refuses_requests() {
        let adapter = NetAdapter::new();
        assert!(matches!(adapter.reset(), Err(PortError::PortNotSelected)));
        assert!(!adapter.adapter_detected().unwrap());
        assert!(matches!(adapter.port_name(), Err(PortError::PortNotSelected)));
    }

    #[test]
    fn oversized_requests_stay_local() {
        let adapter = NetAdapter::new();
        let kind = |result: PortResult<()>| result.unwrap_err().kind();
        assert_eq!(
            adapter.get_block(MAX_BLOCK_LEN + 1).unwrap_err().kind(),
            crate::ErrorKind::Capability
        );
        assert_eq!(
            kind(adapter.data_block(&mut vec![0xff; MAX_BLOCK_LEN + 1])),
            crate::ErrorKind::Capability
        );
        assert_eq!(kind(adapter.target_family(&[0x28; MAX_FAMILIES + 1])), crate::ErrorKind::Capability);
        // within the limits the request goes out and finds no connection
        assert!(matches!(adapter.get_block(MAX_BLOCK_LEN), Err(PortError::PortNotSelected)));
    }
}
