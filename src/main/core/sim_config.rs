use std::collections::{BTreeMap, HashSet};
use std::hash::{Hash, Hasher};
use std::net::{Ipv4Addr, SocketAddrV4};

use anyhow::Context;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::core::configuration::{
    time_option, ConfigOptions, Flatten, HostName, HostOptions, TransferOptions,
};
use crate::core::support::simulation_time::SimulationTime;
use crate::host::host::{HostId, HostParameters};
use crate::utility::units;

/// The first address given to hosts that don't have one configured.
const FIRST_ASSIGNED_IP: Ipv4Addr = Ipv4Addr::new(11, 0, 0, 1);

/// The simulation configuration after processing the configuration options.
#[derive(Debug)]
pub struct SimConfig {
    pub stop_time: SimulationTime,

    // constant latency between any two distinct hosts
    pub latency: SimulationTime,

    // hosts in order of their ids
    pub hosts: Vec<HostParameters>,

    pub transfers: Vec<TransferInfo>,
}

/// A bulk transfer after resolving the host names.
#[derive(Debug, Clone)]
pub struct TransferInfo {
    pub client: HostId,
    pub server: HostId,
    pub server_addr: SocketAddrV4,
    pub size: u64,
    pub start_time: SimulationTime,
}

impl SimConfig {
    pub fn new(config: &ConfigOptions) -> anyhow::Result<Self> {
        // Xoshiro256PlusPlus is not ideal when a seed with many zeros is used, but
        // 'seed_from_u64()' uses SplitMix64 to derive the actual seed, so we are okay here
        let mut random = Xoshiro256PlusPlus::seed_from_u64(config.seed());

        // this should be the same for all hosts
        let randomness_for_seed_calc: u64 = random.gen();

        let loopback_latency = config.loopback_latency().map_err(anyhow::Error::msg)?;

        // build the host list
        let mut hosts = vec![];
        for (id, (name, host_options)) in config.hosts.iter().enumerate() {
            let id = HostId::from(u32::try_from(id).context("Too many hosts")?);
            let host = build_host(
                id,
                name,
                host_options,
                randomness_for_seed_calc,
                loopback_latency,
            )
            .with_context(|| format!("Failed to configure host '{name}'"))?;
            hosts.push(host);
        }

        assign_ips(&mut hosts, &config.hosts)?;

        let transfers = config
            .transfers
            .iter()
            .enumerate()
            .map(|(i, transfer)| {
                build_transfer(transfer, &config.hosts, &hosts)
                    .with_context(|| format!("Failed to configure transfer {i}"))
            })
            .collect::<anyhow::Result<_>>()?;

        Ok(Self {
            stop_time: config.stop_time().map_err(anyhow::Error::msg)?,
            latency: config.latency().map_err(anyhow::Error::msg)?,
            hosts,
            transfers,
        })
    }
}

/// For a host entry in the configuration options, build the parameters of the host.
fn build_host(
    id: HostId,
    hostname: &HostName,
    host: &HostOptions,
    randomness_for_seed_calc: u64,
    loopback_latency: SimulationTime,
) -> anyhow::Result<HostParameters> {
    let options = &host.host_options;

    // hostname hash is used as part of the host's seed
    let hostname_hash = {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        hostname.as_str().hash(&mut hasher);
        hasher.finish()
    };

    let frequency = options
        .cpu_frequency
        .context("The CPU frequency is not set")?
        .as_khz()
        .map_err(anyhow::Error::msg)?;
    if frequency == 0 {
        anyhow::bail!("The CPU frequency must be at least 1 KHz");
    }

    let raw_frequency = options
        .cpu_raw_frequency
        .flatten()
        .map(|x| x.as_khz())
        .transpose()
        .map_err(anyhow::Error::msg)?;

    let cpu_precision =
        time_option("cpu_precision", options.cpu_precision.flatten()).map_err(anyhow::Error::msg)?;
    if cpu_precision == Some(SimulationTime::ZERO) {
        anyhow::bail!("The CPU precision must be positive, or null");
    }

    let bytes = |name: &str,
                 value: Option<units::Bytes<units::SiPrefixUpper>>|
     -> anyhow::Result<usize> {
        value
            .with_context(|| format!("'{name}' is not set"))?
            .as_bytes()
            .map_err(anyhow::Error::msg)
            .and_then(|x| usize::try_from(x).context("Value is too large"))
            .with_context(|| format!("Invalid '{name}'"))
    };

    let mut tcp_config = tcp::TcpConfig::default();
    tcp_config.send_buffer_size(bytes("socket_send_buffer", options.socket_send_buffer)?);
    tcp_config.recv_buffer_size(bytes("socket_recv_buffer", options.socket_recv_buffer)?);

    let chunk_capacity = bytes("socket_chunk_capacity", options.socket_chunk_capacity)?;
    if chunk_capacity == 0 {
        anyhow::bail!("The socket chunk capacity must be positive");
    }
    tcp_config.chunk_capacity(chunk_capacity);

    let mut params = HostParameters::new(id, hostname.to_string(), Ipv4Addr::UNSPECIFIED);

    params.seed = randomness_for_seed_calc ^ hostname_hash;
    params.cpu_frequency_khz = frequency;
    params.cpu_raw_frequency_khz = raw_frequency;
    params.cpu_threshold = time_option("cpu_threshold", options.cpu_threshold.flatten())
        .map_err(anyhow::Error::msg)?;
    params.cpu_precision = cpu_precision;
    params.packet_cpu_cost = time_option("packet_cpu_cost", options.packet_cpu_cost)
        .map_err(anyhow::Error::msg)?
        .unwrap_or(SimulationTime::ZERO);
    params.loopback_latency = loopback_latency;
    params.tcp_config = tcp_config;
    params.tcp_backlog_max = options
        .tcp_backlog_max
        .context("'tcp_backlog_max' is not set")?;
    params.log_level = options
        .log_level
        .flatten()
        .map(|x| log::Level::from(x).to_level_filter());

    Ok(params)
}

/// Give each host its configured IP address, and give hosts without one the next free address
/// starting from 11.0.0.1.
fn assign_ips(
    hosts: &mut [HostParameters],
    options: &BTreeMap<HostName, HostOptions>,
) -> anyhow::Result<()> {
    let mut used = HashSet::new();

    // first register hosts that have a specific IP address
    for (host, (name, options)) in hosts.iter_mut().zip(options) {
        let Some(ip) = options.ip_addr else {
            continue;
        };

        if ip.is_unspecified() || ip.is_loopback() || ip.is_broadcast() || ip.is_multicast() {
            anyhow::bail!("Host '{name}' can't use the address {ip}");
        }
        if !used.insert(ip) {
            anyhow::bail!("The IP address {ip} of host '{name}' is already in use");
        }

        host.ip_addr = ip;
    }

    // then register remaining hosts
    let mut next = u32::from(FIRST_ASSIGNED_IP);
    for host in hosts.iter_mut().filter(|x| x.ip_addr.is_unspecified()) {
        while used.contains(&Ipv4Addr::from(next)) {
            next += 1;
        }

        let ip = Ipv4Addr::from(next);
        used.insert(ip);
        host.ip_addr = ip;
    }

    Ok(())
}

fn build_transfer(
    transfer: &TransferOptions,
    options: &BTreeMap<HostName, HostOptions>,
    hosts: &[HostParameters],
) -> anyhow::Result<TransferInfo> {
    // the hosts are in the same order as the options
    let find = |name: &HostName| {
        options
            .keys()
            .position(|x| x == name)
            .map(|i| &hosts[i])
            .with_context(|| format!("No host named '{name}'"))
    };

    let client = find(&transfer.client)?;
    let server = find(&transfer.server)?;

    if transfer.port == 0 {
        anyhow::bail!("The server port must not be 0");
    }

    Ok(TransferInfo {
        client: client.id,
        server: server.id,
        server_addr: SocketAddrV4::new(server.ip_addr, transfer.port),
        size: transfer.size.as_bytes().map_err(anyhow::Error::msg)?,
        start_time: transfer.start_time.as_simtime().map_err(anyhow::Error::msg)?,
    })
}
