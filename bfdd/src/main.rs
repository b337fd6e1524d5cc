//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![warn(rust_2018_idioms)]

use std::net::{IpAddr, ToSocketAddrs};

use bfdd_core::master::{Config, Master};
use bfdd_core::socket::AddressFamily;
use clap::{App, Arg};
use tracing::{error, info};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::prelude::*;

fn init_tracing(level: &str) {
    let level: tracing::Level = level.parse().expect("invalid log level");
    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

// Resolves a host argument into an IP address of the requested family.
fn resolve(
    host: &str,
    family: Option<AddressFamily>,
) -> Result<IpAddr, std::io::Error> {
    (host, 0u16)
        .to_socket_addrs()?
        .map(|sockaddr| sockaddr.ip())
        .find(|addr| match family {
            None => true,
            Some(AddressFamily::Ipv4) => addr.is_ipv4(),
            Some(AddressFamily::Ipv6) => addr.is_ipv6(),
        })
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no address of the requested family for {host}"),
            )
        })
}

fn parse_arg<T: std::str::FromStr>(name: &str, value: &str) -> T {
    value.parse().unwrap_or_else(|_| {
        eprintln!("invalid value for {name}: {value}");
        std::process::exit(1);
    })
}

// ===== main =====

fn main() {
    // Parse command-line parameters.
    let matches = App::new("bfdd")
        .version(clap::crate_version!())
        .about("Maintain BFD sessions with one or more remote systems")
        .arg(
            Arg::with_name("local")
                .required(true)
                .help("Local IP address or hostname"),
        )
        .arg(
            Arg::with_name("remote")
                .required(true)
                .multiple(true)
                .help("Remote IP address or hostname"),
        )
        .arg(
            Arg::with_name("ipv4")
                .short("4")
                .long("ipv4")
                .conflicts_with("ipv6")
                .help("Force IPv4 connectivity"),
        )
        .arg(
            Arg::with_name("ipv6")
                .short("6")
                .long("ipv6")
                .help("Force IPv6 connectivity"),
        )
        .arg(
            Arg::with_name("rx-interval")
                .short("r")
                .long("rx-interval")
                .value_name("ms")
                .default_value("1000")
                .help("Required minimum Rx interval (ms)"),
        )
        .arg(
            Arg::with_name("tx-interval")
                .short("t")
                .long("tx-interval")
                .value_name("ms")
                .default_value("1000")
                .help("Desired minimum Tx interval (ms)"),
        )
        .arg(
            Arg::with_name("detect-mult")
                .short("m")
                .long("detect-mult")
                .value_name("N")
                .default_value("3")
                .help("Detection multiplier"),
        )
        .arg(
            Arg::with_name("passive")
                .short("p")
                .long("passive")
                .help("Take a passive role in session initialization"),
        )
        .arg(
            Arg::with_name("log-level")
                .short("l")
                .long("log-level")
                .value_name("level")
                .default_value("info")
                .possible_values(&["error", "warn", "info", "debug", "trace"])
                .help("Logging level"),
        )
        .get_matches();

    // Initialize tracing.
    init_tracing(matches.value_of("log-level").unwrap());

    // Resolve the local address first; all remotes must then share its
    // address family.
    let family = if matches.is_present("ipv4") {
        Some(AddressFamily::Ipv4)
    } else if matches.is_present("ipv6") {
        Some(AddressFamily::Ipv6)
    } else {
        None
    };
    let local = match resolve(matches.value_of("local").unwrap(), family) {
        Ok(addr) => addr,
        Err(error) => {
            error!(%error, "failed to resolve local address");
            std::process::exit(1);
        }
    };
    let family = Some(AddressFamily::of(&local));
    let mut peers = Vec::new();
    for remote in matches.values_of("remote").unwrap() {
        match resolve(remote, family) {
            Ok(addr) => peers.push(addr),
            Err(error) => {
                error!(host = remote, %error, "failed to resolve remote address");
                std::process::exit(1);
            }
        }
    }

    // Interval arguments are taken in milliseconds and stored internally in
    // microseconds.
    let rx_interval: u32 =
        parse_arg("rx-interval", matches.value_of("rx-interval").unwrap());
    let tx_interval: u32 =
        parse_arg("tx-interval", matches.value_of("tx-interval").unwrap());
    let local_multiplier: u8 =
        parse_arg("detect-mult", matches.value_of("detect-mult").unwrap());

    let config = Config {
        local,
        peers,
        passive: matches.is_present("passive"),
        local_multiplier,
        min_tx: tx_interval.saturating_mul(1000),
        min_rx: rx_interval.saturating_mul(1000),
    };

    // All session state is owned by the master task, so a single-threaded
    // runtime is all the daemon needs.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to create async runtime");
    runtime.block_on(async {
        let (tx, rx) = Master::channels();
        let master = match Master::new(config, tx) {
            Ok(master) => master,
            Err(error) => {
                error.log();
                std::process::exit(1);
            }
        };

        info!("BFD daemon fully configured");
        master.run(rx).await;
    });
}
