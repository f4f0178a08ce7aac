use std::io::{self, BufReader, BufWriter, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use byteorder::{ReadBytesExt, WriteBytesExt};
use log::{debug, info, trace, warn};
use onewire_bus::{BusSpeed, ChangeCondition, PowerDuration};
use rand::Rng;

use super::wire::{
    CHALLENGE_LEN, Command, DEFAULT_SECRET, MAX_BLOCK_LEN, MAX_FAMILIES, PROTOCOL_VERSION,
    RET_SUCCESS, auth_response, check_len, read_bool, read_i32, read_len, write_bool,
    write_failure, write_i32,
};
use crate::{PortAdapter, PortError, PortResult};

enum Reply {
    Done,
    Bool(bool),
    Int(i32),
    Byte(u8),
    Bytes(Vec<u8>),
}

impl Reply {
    fn write_to<W: Write>(self, w: &mut W) -> io::Result<()> {
        match self {
            Self::Done => Ok(()),
            Self::Bool(value) => write_bool(w, value),
            Self::Int(value) => write_i32(w, value),
            Self::Byte(value) => w.write_u8(value),
            Self::Bytes(bytes) => w.write_all(&bytes),
        }
    }
}

/// Serves a [`PortAdapter`] to [`NetAdapter`](super::NetAdapter) clients over TCP.
///
/// Each client authenticates with the shared secret, then drives the adapter one
/// request at a time. By default every client gets its own thread; clients compete for
/// the adapter through its exclusive ownership like local threads do.
pub struct NetAdapterHost<A: ?Sized> {
    adapter: Arc<A>,
    listener: TcpListener,
    secret: Arc<str>,
    multithreaded: bool,
    stopped: Arc<AtomicBool>,
}

/// Stops a running [`NetAdapterHost`] from another thread.
#[derive(Debug, Clone)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
    addr: SocketAddr,
}

impl StopHandle {
    /// Make the host return from [`run`](NetAdapterHost::run) after its current client.
    ///
    /// Clients already being served on their own threads are not interrupted.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        // wake the accept loop
        if let Err(e) = TcpStream::connect(self.addr) {
            debug!("Waking the host failed: {e}");
        }
    }
}

impl<A: PortAdapter + ?Sized + 'static> NetAdapterHost<A> {
    /// Listen on `addr` for clients of `adapter`.
    pub fn bind(adapter: Arc<A>, addr: impl ToSocketAddrs) -> PortResult<Self> {
        Ok(Self {
            adapter,
            listener: TcpListener::bind(addr)?,
            secret: DEFAULT_SECRET.into(),
            multithreaded: true,
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Shared secret clients must prove they know.
    pub fn with_secret(mut self, secret: &str) -> Self {
        self.secret = secret.into();
        self
    }

    /// Serve one client at a time on the thread calling [`run`](Self::run).
    pub fn single_threaded(mut self) -> Self {
        self.multithreaded = false;
        self
    }

    /// Address the host listens on.
    pub fn local_addr(&self) -> PortResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// A handle that stops [`run`](Self::run).
    pub fn stop_handle(&self) -> PortResult<StopHandle> {
        let mut addr = self.local_addr()?;
        if addr.ip().is_unspecified() {
            addr.set_ip(match addr.ip() {
                IpAddr::V4(_) => Ipv4Addr::LOCALHOST.into(),
                IpAddr::V6(_) => Ipv6Addr::LOCALHOST.into(),
            });
        }
        Ok(StopHandle { stopped: Arc::clone(&self.stopped), addr })
    }

    /// Accept and serve clients until stopped.
    pub fn run(&self) -> PortResult<()> {
        info!(
            "Serving {} on {}",
            self.adapter.adapter_name(),
            self.local_addr()?
        );
        for stream in self.listener.incoming() {
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Accepting a client failed: {e}");
                    continue;
                }
            };
            if self.multithreaded {
                let adapter = Arc::clone(&self.adapter);
                let secret = Arc::clone(&self.secret);
                thread::spawn(move || serve_client(&*adapter, stream, &secret));
            } else {
                serve_client(&*self.adapter, stream, &self.secret);
            }
        }
        info!("Host stopped");
        Ok(())
    }
}

fn serve_client<A: PortAdapter + ?Sized>(adapter: &A, stream: TcpStream, secret: &str) {
    let peer = stream
        .peer_addr()
        .map_or_else(|_| "unknown peer".to_owned(), |addr| addr.to_string());
    match serve_session(adapter, stream, secret) {
        Ok(()) => info!("Client {peer} disconnected"),
        Err(e) => warn!("Client {peer} dropped: {e}"),
    }
}

fn serve_session<A: PortAdapter + ?Sized>(
    adapter: &A,
    stream: TcpStream,
    secret: &str,
) -> PortResult<()> {
    stream.set_nodelay(true)?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream);
    authenticate(&mut reader, &mut writer, secret)?;
    debug!("Client authenticated");

    let result = serve_requests(adapter, &mut reader, &mut writer);
    adapter.end_exclusive();
    result
}

fn authenticate<R: Read, W: Write>(r: &mut R, w: &mut W, secret: &str) -> PortResult<()> {
    write_i32(w, PROTOCOL_VERSION)?;
    w.flush()?;
    if r.read_u8()? != RET_SUCCESS {
        return Err(PortError::Authentication("client refused the protocol version".into()));
    }

    let mut challenge = [0u8; CHALLENGE_LEN];
    rand::rng().fill(&mut challenge);
    w.write_all(&challenge)?;
    w.flush()?;

    if read_i32(r)? != auth_response(secret, &challenge) {
        write_failure(w, "Client Authentication Failed")?;
        w.flush()?;
        return Err(PortError::Authentication("client does not know the secret".into()));
    }
    w.write_u8(RET_SUCCESS)?;
    w.flush()?;
    Ok(())
}

fn serve_requests<A, R, W>(adapter: &A, r: &mut R, w: &mut W) -> PortResult<()>
where
    A: PortAdapter + ?Sized,
    R: Read,
    W: Write,
{
    loop {
        let code = match r.read_u8() {
            Ok(code) => code,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let command = match Command::try_from(code) {
            Ok(Command::Close) => return Ok(()),
            Ok(command) => command,
            Err(code) => {
                warn!("Unknown command {code:#04x}");
                write_failure(w, &format!("unknown command {code:#04x}"))?;
                w.flush()?;
                continue;
            }
        };
        trace!("{command:?}");
        match dispatch(adapter, command, r)? {
            Ok(reply) => {
                w.write_u8(RET_SUCCESS)?;
                reply.write_to(w)?;
            }
            Err(e) => {
                debug!("{command:?} failed: {e}");
                write_failure(w, &e.to_string())?;
            }
        }
        w.flush()?;
    }
}

/// Read the arguments of `command` and run it on the adapter.
///
/// Socket errors end the session; adapter errors are reported to the client. A length
/// over its limit is refused before its payload is read.
fn dispatch<A, R>(adapter: &A, command: Command, r: &mut R) -> io::Result<PortResult<Reply>>
where
    A: PortAdapter + ?Sized,
    R: Read,
{
    let done = |()| Reply::Done;
    Ok(match command {
        Command::Close | Command::Ping => Ok(Reply::Done),
        Command::Reset => adapter.reset().map(|result| Reply::Int(result.into())),
        Command::PutBit => {
            let bit = read_bool(r)?;
            adapter.put_bit(bit).map(done)
        }
        Command::PutByte => {
            let byte = r.read_u8()?;
            adapter.put_byte(byte).map(done)
        }
        Command::GetBit => adapter.get_bit().map(Reply::Bool),
        Command::GetByte => adapter.get_byte().map(Reply::Byte),
        Command::GetBlock => check_len(read_len(r)?, MAX_BLOCK_LEN)
            .and_then(|len| adapter.get_block(len))
            .map(Reply::Bytes),
        Command::DataBlock => match check_len(read_len(r)?, MAX_BLOCK_LEN) {
            Ok(len) => {
                let mut block = vec![0; len];
                r.read_exact(&mut block)?;
                adapter.data_block(&mut block).map(|()| Reply::Bytes(block))
            }
            Err(e) => Err(e),
        },
        Command::SetPowerDuration => {
            let code = read_i32(r)?;
            PowerDuration::try_from(code)
                .map_err(PortError::from)
                .and_then(|duration| adapter.set_power_duration(duration))
                .map(done)
        }
        Command::StartPowerDelivery => {
            let code = read_i32(r)?;
            ChangeCondition::try_from(code)
                .map_err(PortError::from)
                .and_then(|condition| adapter.start_power_delivery(condition))
                .map(Reply::Bool)
        }
        Command::SetProgramPulseDuration => {
            let code = read_i32(r)?;
            PowerDuration::try_from(code)
                .map_err(PortError::from)
                .and_then(|duration| adapter.set_program_pulse_duration(duration))
                .map(done)
        }
        Command::StartProgramPulse => {
            let code = read_i32(r)?;
            ChangeCondition::try_from(code)
                .map_err(PortError::from)
                .and_then(|condition| adapter.start_program_pulse(condition))
                .map(Reply::Bool)
        }
        Command::StartBreak => adapter.start_break().map(done),
        Command::SetPowerNormal => adapter.set_power_normal().map(done),
        Command::SetSpeed => {
            let code = read_i32(r)?;
            BusSpeed::try_from(code)
                .map_err(PortError::from)
                .and_then(|speed| adapter.set_speed(speed))
                .map(done)
        }
        Command::GetSpeed => adapter.speed().map(|speed| Reply::Int(speed.into())),
        Command::BeginExclusive => {
            let blocking = read_bool(r)?;
            adapter.begin_exclusive(blocking).map(Reply::Bool)
        }
        Command::EndExclusive => {
            adapter.end_exclusive();
            Ok(Reply::Done)
        }
        Command::FindFirstDevice => adapter.find_first_device().map(Reply::Bool),
        Command::FindNextDevice => adapter.find_next_device().map(Reply::Bool),
        Command::GetAddress => adapter
            .address()
            .map(|address| Reply::Bytes(address.as_bytes().to_vec())),
        Command::SetSearchOnlyAlarming => adapter.set_search_only_alarming().map(done),
        Command::SetNoResetSearch => adapter.set_no_reset_search().map(done),
        Command::SetSearchAllDevices => adapter.set_search_all_devices().map(done),
        Command::TargetAllFamilies => adapter.target_all_families().map(done),
        Command::TargetFamily | Command::ExcludeFamily => {
            let len = match check_len(read_len(r)?, MAX_FAMILIES) {
                Ok(len) => len,
                Err(e) => return Ok(Err(e)),
            };
            let mut families = vec![0; len];
            r.read_exact(&mut families)?;
            if command == Command::TargetFamily {
                adapter.target_family(&families).map(done)
            } else {
                adapter.exclude_family(&families).map(done)
            }
        }
        Command::CanBreak => adapter.capabilities().map(|c| Reply::Bool(c.line_break)),
        Command::CanDeliverPower => adapter.capabilities().map(|c| Reply::Bool(c.power_delivery)),
        Command::CanDeliverSmartPower => {
            adapter.capabilities().map(|c| Reply::Bool(c.smart_power))
        }
        Command::CanFlex => adapter.capabilities().map(|c| Reply::Bool(c.flex)),
        Command::CanHyperdrive => adapter.capabilities().map(|c| Reply::Bool(c.hyperdrive)),
        Command::CanOverdrive => adapter.capabilities().map(|c| Reply::Bool(c.overdrive)),
        Command::CanProgram => adapter.capabilities().map(|c| Reply::Bool(c.program)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NullAdapter;
    use crate::net::wire::{RET_FAILURE, read_status};
    use std::io::Cursor;

    fn exchange(adapter: &NullAdapter, request: &[u8]) -> Vec<u8> {
        let mut reply = Vec::new();
        serve_requests(adapter, &mut Cursor::new(request), &mut reply).unwrap();
        reply
    }

    #[test]
    fn unknown_command_gets_failure_reply() {
        let reply = exchange(&NullAdapter::new(), &[0x7f, Command::Ping as u8]);
        assert_eq!(reply[0], RET_FAILURE);
        let mut cursor = Cursor::new(reply);
        assert!(read_status(&mut cursor).is_err());
        assert!(read_status(&mut cursor).is_ok());
    }

    #[test]
    fn close_ends_session() {
        let reply = exchange(&NullAdapter::new(), &[Command::Close as u8, Command::Ping as u8]);
        assert!(reply.is_empty());
    }

    #[test]
    fn adapter_errors_become_failure_replies() {
        // speed code 9 does not exist
        let reply = exchange(&NullAdapter::new(), &[Command::SetSpeed as u8, 0, 0, 0, 9]);
        assert_eq!(reply[0], RET_FAILURE);
    }

    #[test]
    fn oversized_lengths_are_refused() {
        let mut request = vec![Command::DataBlock as u8];
        request.extend_from_slice(&i32::MAX.to_be_bytes());
        request.push(Command::GetBlock as u8);
        request.extend_from_slice(&(MAX_BLOCK_LEN as i32 + 1).to_be_bytes());
        request.push(Command::TargetFamily as u8);
        request.extend_from_slice(&(MAX_FAMILIES as i32 + 1).to_be_bytes());
        request.push(Command::Ping as u8);

        let mut cursor = Cursor::new(exchange(&NullAdapter::new(), &request));
        for _ in 0..3 {
            assert!(matches!(read_status(&mut cursor), Err(PortError::Remote(_))));
        }
        read_status(&mut cursor).unwrap();
        assert_eq!(cursor.position() as usize, cursor.get_ref().len());
    }

    #[test]
    fn data_block_echoes_through_adapter() {
        let reply = exchange(
            &NullAdapter::new(),
            &[Command::DataBlock as u8, 0, 0, 0, 3, 0xff, 0x55, 0xff],
        );
        assert_eq!(reply, vec![RET_SUCCESS, 0xff, 0x55, 0xff]);
    }

    #[test]
    fn wrong_secret_is_refused() {
        let mut client = Vec::new();
        client.push(RET_SUCCESS);
        client.extend_from_slice(&0x1234_5678i32.to_be_bytes());
        let mut reply = Vec::new();
        let result = authenticate(&mut Cursor::new(client), &mut reply, DEFAULT_SECRET);
        assert!(matches!(result, Err(PortError::Authentication(_))));
        assert_eq!(&reply[..4], &PROTOCOL_VERSION.to_be_bytes());
        assert_eq!(reply[4 + CHALLENGE_LEN], RET_FAILURE);
    }
}
