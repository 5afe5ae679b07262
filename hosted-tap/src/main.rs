// Copyright (C) 2019-2020  Pierre Krieger
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Runs the stack on a TAP interface of the host.
//!
//! The interface must exist beforehand, or the program must be allowed to create it. For
//! example:
//!
//! ```sh
//! sudo ip tuntap add mode tap user $USER name coopnet-0
//! sudo ip addr add 192.168.0.1/24 dev coopnet-0
//! sudo ip link set coopnet-0 up
//! ```

use coopnet_stack::{Config, DhcpState, DnsError, NetStack, TcpError, TcpHandle, TcpState};
use std::{
    io,
    net::Ipv4Addr,
    process, thread,
    time::{Duration, Instant},
};
use structopt::StructOpt;

mod tap;

/// Maximum time spent waiting for a DHCP lease.
const DHCP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, StructOpt)]
#[structopt(name = "coopnet-tap", about = "Runs the coopnet stack on a TAP interface.")]
struct CliOptions {
    /// Name of the TAP interface.
    #[structopt(long, default_value = "coopnet-0")]
    interface: String,

    /// MAC address of the stack, as six hexadecimal bytes separated with colons. Random if
    /// not specified.
    #[structopt(long, parse(try_from_str = parse_mac))]
    mac: Option<[u8; 6]>,

    /// Address of the stack. Ignored if a DHCP lease is acquired.
    #[structopt(long, default_value = "192.168.0.123")]
    ip: Ipv4Addr,

    /// Mask of the local subnet.
    #[structopt(long, default_value = "255.255.255.0")]
    netmask: Ipv4Addr,

    /// Router for destinations outside of the local subnet.
    #[structopt(long, default_value = "192.168.0.1")]
    gateway: Ipv4Addr,

    /// DNS server.
    #[structopt(long)]
    dns: Option<Ipv4Addr>,

    /// Acquire a lease through DHCP before running the command.
    #[structopt(long)]
    dhcp: bool,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Acquires a DHCP lease and prints it.
    Dhcp,
    /// Resolves a name and prints its IPv4 address.
    Resolve { name: String },
    /// Runs a TCP echo server.
    Echo {
        #[structopt(default_value = "7")]
        port: u16,
    },
}

#[derive(Debug, thiserror::Error)]
enum Error {
    #[error("Failed to open TAP interface: {0}")]
    Tap(#[from] io::Error),
    #[error("Link failed to initialize")]
    LinkDown,
    #[error("No DHCP lease after {0:?}")]
    DhcpTimeout(Duration),
    #[error("{0}")]
    Dns(#[from] DnsError),
    #[error("{0}")]
    Tcp(#[from] TcpError),
}

type Stack = NetStack<tap::TapDevice, tap::SystemClock>;

fn main() {
    env_logger::init();
    let cli_opts = CliOptions::from_args();
    if let Err(err) = run(cli_opts) {
        eprintln!("{}", err);
        process::exit(1);
    }
}

fn run(cli_opts: CliOptions) -> Result<(), Error> {
    let device = tap::TapDevice::new(&cli_opts.interface)?;
    log::info!("Opened TAP interface {}", device.name());

    let mac_address = cli_opts.mac.unwrap_or_else(|| {
        let mut mac: [u8; 6] = rand::random();
        // Unicast and locally administered.
        mac[0] = (mac[0] & !0x1) | 0x2;
        mac
    });

    let dhcp = cli_opts.dhcp || matches!(cli_opts.command, Command::Dhcp);
    let config = Config {
        mac_address,
        ip: cli_opts.ip,
        netmask: cli_opts.netmask,
        gateway: cli_opts.gateway,
        dns_server: cli_opts.dns.unwrap_or(Ipv4Addr::UNSPECIFIED),
        dhcp,
        ..Config::default()
    };

    let mut stack = NetStack::new(device, tap::SystemClock::default(), config);
    if !stack.init() {
        return Err(Error::LinkDown);
    }
    if dhcp {
        wait_for_lease(&mut stack)?;
    }

    match cli_opts.command {
        Command::Dhcp => {
            let config = stack.config();
            println!("address: {}/{}", config.ip, config.netmask);
            println!("gateway: {}", config.gateway);
            println!("dns: {}", config.dns_server);
            Ok(())
        }
        Command::Resolve { name } => {
            let addr = stack.dns_resolve(&name)?;
            println!("{}", addr);
            Ok(())
        }
        Command::Echo { port } => echo(&mut stack, port),
    }
}

fn wait_for_lease(stack: &mut Stack) -> Result<(), Error> {
    let start = Instant::now();
    while stack.dhcp_state() != Some(DhcpState::Bound) {
        if start.elapsed() >= DHCP_TIMEOUT {
            return Err(Error::DhcpTimeout(DHCP_TIMEOUT));
        }
        poll_burst(stack);
    }
    Ok(())
}

/// Polls a few times, then yields to the host.
fn poll_burst(stack: &mut Stack) {
    for _ in 0..16 {
        stack.poll();
    }
    thread::sleep(Duration::from_millis(1));
}

/// Connection accepted by the echo server, plus the bytes not yet written back.
struct EchoClient {
    handle: TcpHandle,
    pending: Vec<u8>,
    closing: bool,
}

fn echo(stack: &mut Stack, port: u16) -> Result<(), Error> {
    let mut listener = stack.tcp_listener(port)?;
    log::info!("Echo server listening on {}:{}", stack.config().ip, port);

    let mut clients = Vec::<EchoClient>::new();
    let mut buf = [0; 1024];

    loop {
        poll_burst(stack);

        if let Some(handle) = stack.tcp_accept(&mut listener) {
            log::info!("Accepted connection from {:?}", stack.tcp_remote(handle));
            clients.push(EchoClient {
                handle,
                pending: Vec::new(),
                closing: false,
            });
        }

        for client in &mut clients {
            if client.pending.is_empty() {
                match stack.tcp_read(client.handle, &mut buf) {
                    Ok(n) => client.pending.extend_from_slice(&buf[..n]),
                    // Connection reset. Removed below.
                    Err(_) => continue,
                }
            }
            if !client.pending.is_empty() {
                match stack.tcp_write(client.handle, &client.pending) {
                    Ok(n) => {
                        client.pending.drain(..n);
                    }
                    Err(err) => {
                        log::debug!("Dropping echoed bytes: {}", err);
                        client.pending.clear();
                    }
                }
            }
            if !client.closing && client.pending.is_empty() && stack.tcp_is_eof(client.handle) {
                client.closing = true;
                if let Err(err) = stack.tcp_close(client.handle) {
                    log::debug!("Failed to close connection: {}", err);
                }
            }
        }

        clients.retain(|c| {
            let closed = stack.tcp_state(c.handle) == TcpState::Closed;
            if closed {
                log::info!("Connection closed");
            }
            !closed
        });
    }
}

fn parse_mac(s: &str) -> Result<[u8; 6], String> {
    let mut mac = [0; 6];
    let mut bytes = s.split(':');
    for byte in &mut mac {
        let part = bytes.next().ok_or_else(|| format!("Too few bytes in {:?}", s))?;
        *byte = u8::from_str_radix(part, 16).map_err(|err| format!("{:?}: {}", part, err))?;
    }
    if bytes.next().is_some() {
        return Err(format!("Too many bytes in {:?}", s));
    }
    Ok(mac)
}

#[cfg(test)]
mod tests {
    use super::parse_mac;

    #[test]
    fn mac_parsing() {
        assert_eq!(parse_mac("02:00:00:00:00:01"), Ok([2, 0, 0, 0, 0, 1]));
        assert_eq!(parse_mac("de:ad:BE:EF:00:ff"), Ok([0xde, 0xad, 0xbe, 0xef, 0, 0xff]));
        assert!(parse_mac("02:00:00:00:00").is_err());
        assert!(parse_mac("02:00:00:00:00:01:02").is_err());
        assert!(parse_mac("02:00:00:00:00:zz").is_err());
    }
}
