use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use ds2480::{ByteFraming, Ds2480Builder};
use log::{error, info};
use onewire_port::net::wire::DEFAULT_SECRET;
use onewire_port::{NetAdapter, NetAdapterHost, PortAdapter, PortError, PortResult, SerialAdapter};

mod transport;

use transport::SerialPortTransport;

/// Enumerate the devices on a 1-Wire bus, or share the bus over the network
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Serial port the DS2480 adapter is attached to (e.g., /dev/ttyUSB0)
    #[arg(short, long, required_unless_present = "net", conflicts_with = "net")]
    port: Option<String>,
    /// Remote adapter to use instead, as host[:port[:secret]]
    #[arg(short, long)]
    net: Option<String>,
    /// Fastest baud rate to stream at
    #[arg(long, default_value_t = 115_200)]
    max_baud: u32,
    /// Send bytes as eight bit commands instead of in data mode
    #[arg(long)]
    bit_slots: bool,
    /// Only report these families (hex, comma separated)
    #[arg(short, long, value_delimiter = ',', value_parser = parse_family)]
    family: Vec<u8>,
    /// Never report these families (hex, comma separated)
    #[arg(short = 'x', long, value_delimiter = ',', value_parser = parse_family)]
    exclude: Vec<u8>,
    /// Only report alarming devices
    #[arg(short, long)]
    alarm: bool,
    /// Serve the adapter on this address (e.g., 0.0.0.0:6161) instead of enumerating
    #[arg(long, requires = "port")]
    serve: Option<String>,
    /// Shared secret of the network adapter
    #[arg(long, default_value = DEFAULT_SECRET)]
    secret: String,
}

fn parse_family(s: &str) -> Result<u8, String> {
    let digits = s.trim_start_matches("0x");
    u8::from_str_radix(digits, 16).map_err(|e| format!("bad family code {s:?}: {e}"))
}

fn main() -> ExitCode {
    // Initialize the logger
    env_logger::init();
    // Parse command line arguments
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> PortResult<()> {
    if let Some(name) = &args.net {
        let adapter = NetAdapter::new().with_secret(args.secret.as_str());
        adapter.select_port(name)?;
        return enumerate(&adapter, args);
    }

    let port = args.port.as_deref().ok_or(PortError::PortNotSelected)?;
    let framing = if args.bit_slots {
        ByteFraming::BitSlots
    } else {
        ByteFraming::DataMode
    };
    let builder = Ds2480Builder::default()
        .with_max_baud(args.max_baud)
        .with_byte_framing(framing);
    let adapter = SerialAdapter::with_builder(builder, SerialPortTransport::new(), linux_embedded_hal::Delay);
    adapter.select_port(port)?;
    if !adapter.adapter_detected()? {
        return Err(PortError::AdapterNotPresent);
    }
    info!("{} on {port}", adapter.adapter_version()?);

    if let Some(listen) = &args.serve {
        let host = NetAdapterHost::bind(Arc::new(adapter), listen.as_str())?
            .with_secret(&args.secret);
        return host.run();
    }
    enumerate(&adapter, args)
}

fn enumerate(adapter: &dyn PortAdapter, args: &Args) -> PortResult<()> {
    if !args.family.is_empty() {
        adapter.target_family(&args.family)?;
    }
    if !args.exclude.is_empty() {
        adapter.exclude_family(&args.exclude)?;
    }
    if args.alarm {
        adapter.set_search_only_alarming()?;
    }
    let devices = adapter.all_device_addresses()?;
    info!("Found {} devices", devices.len());
    for address in devices {
        println!("{address}");
    }
    Ok(())
}
