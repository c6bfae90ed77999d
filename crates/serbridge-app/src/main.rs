use anyhow::{Context, Result};
use clap::Parser;
use serbridge_core::bridge::DEFAULT_TCP_PORT;
use serbridge_core::serial_source::{DEFAULT_BAUD_RATE, DEFAULT_PORT};
use serbridge_core::{list_ports, Bridge, BridgeConfig, BridgeError, SerialConfig, SessionEnd, Shutdown};
use std::io::{self, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};

/// Forward newline-terminated lines from a serial port to one TCP client.
#[derive(Parser)]
#[command(name = "serbridge")]
#[command(version)]
#[command(about = "Forward lines from a serial port to a single TCP client")]
struct Cli {
    /// Serial port to read from (e.g. COM3, /dev/ttyUSB0)
    #[arg(short, long, default_value = DEFAULT_PORT)]
    port: String,

    /// Baud rate, must match the device
    #[arg(short, long, default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,

    /// Address the TCP listener binds to
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    bind: IpAddr,

    /// TCP port the client connects to
    #[arg(long, default_value_t = DEFAULT_TCP_PORT)]
    tcp_port: u16,

    /// Print the available serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Exit without waiting for Enter
    #[arg(long)]
    no_pause: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if cli.list_ports {
        print_ports();
        return Ok(());
    }

    println!("--- Serial to TCP bridge ---");

    let cfg = BridgeConfig {
        serial: SerialConfig {
            port_name: cli.port.clone(),
            baud_rate: cli.baud,
            ..Default::default()
        },
        listen_addr: SocketAddr::new(cli.bind, cli.tcp_port),
        ..Default::default()
    };

    let mut bridge = match Bridge::open(&cfg) {
        Ok(bridge) => bridge,
        Err(BridgeError::SerialOpen { port, source }) => {
            println!("ERROR: cannot open serial port {port}.");
            println!("   Details: {source}");
            wait_for_enter(cli.no_pause);
            process::exit(1);
        }
        Err(e) => return Err(e).context("failed to start bridge"),
    };
    println!("Serial port {} opened.", cfg.serial.port_name);

    println!("Waiting for a client on {}...", bridge.local_addr());
    let peer = bridge.accept().context("failed to accept client")?;
    println!("Client connected from {peer}");

    // Installed only once a client is connected: an interrupt while waiting
    // in accept() terminates the process directly.
    let (trigger, mut shutdown) = Shutdown::channel();
    let stopping = AtomicBool::new(false);
    if let Err(e) = ctrlc::set_handler(move || {
        if stopping.swap(true, Ordering::SeqCst) {
            process::exit(130);
        }
        trigger.trigger();
    }) {
        log::warn!("failed to install Ctrl-C handler: {e}");
    }

    let outcome = bridge.run(&mut shutdown, &mut io::stdout());
    match outcome {
        Ok(SessionEnd::ClientDisconnected) => println!("Client disconnected."),
        Ok(SessionEnd::Interrupted) => println!("Stopped manually."),
        Err(_) => {}
    }
    println!("Server and serial port closed.");
    wait_for_enter(cli.no_pause);

    outcome.context("bridge session failed")?;
    Ok(())
}

fn print_ports() {
    let ports = list_ports();
    if ports.is_empty() {
        println!("No serial ports found.");
        return;
    }
    for p in ports {
        match (p.vid, p.pid) {
            (Some(vid), Some(pid)) => println!("{} ({:04X}:{:04X}) {}", p.port_name, vid, pid, p.port_type),
            _ => println!("{} {}", p.port_name, p.port_type),
        }
    }
}

fn wait_for_enter(skip: bool) {
    if skip {
        return;
    }
    print!("Press Enter to exit...");
    let _ = io::stdout().flush();
    let mut line = String::new();
    let _ = io::stdin().read_line(&mut line);
}
