use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use clap::{error::ErrorKind, CommandFactory, Parser, Subcommand};
use concentrator::{Concentrator, Config, NetworkConfig, Subnet};
use ipnet::Ipv4Net;
use tracing::metadata::LevelFilter;

#[derive(Debug, Parser)]
#[command(
    name = "concentratorctl",
    about = "drive a single tenant concentrator: classify physical links, rebuild topology from the kernel, and add or remove remote subnets."
)]
struct Opt {
    #[clap(long, help = "tenant this concentrator belongs to")]
    tenant_id: String,
    #[clap(long, help = "this concentrator's own id")]
    concentrator_id: String,
    #[clap(
        long = "management-cidr",
        help = "CIDR a physical link's address must fall in to count as management. repeat for multiple. omit to auto-detect from the single qualifying physical link."
    )]
    management_cidr: Vec<Ipv4Net>,
    #[clap(
        long = "compute-cidr",
        help = "CIDR a physical link's address must fall in to count as compute. repeat for multiple. omit to auto-detect."
    )]
    compute_cidr: Vec<Ipv4Net>,
    #[clap(long = "public-ip", help = "public address this host advertises. repeat for multiple.")]
    public_ip: Vec<Ipv4Addr>,
    #[clap(
        long,
        default_value = "6s",
        help = "how long to wait for a concurrent reservation's kernel call to finish"
    )]
    api_timeout: humantime::Duration,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Classify physical links and rebuild the topology store from the kernel.
    Init,
    /// Rebuild the topology store from the kernel without reclassifying.
    Rebuild,
    /// Ensure a bridge for a subnet and a tunnel to a remote host exist.
    Add {
        #[clap(long)]
        subnet: Ipv4Net,
        #[clap(long)]
        subnet_key: i64,
        #[clap(long)]
        remote: Ipv4Addr,
    },
    /// Remove the tunnel to a remote host for a subnet, if it exists.
    Del {
        #[clap(long)]
        subnet: Ipv4Net,
        #[clap(long)]
        subnet_key: i64,
        #[clap(long)]
        remote: Ipv4Addr,
    },
    /// Tear down every bridge, DHCP daemon and tunnel this concentrator owns.
    Shutdown,
}

fn main() {
    let opts = Opt::parse();
    let mut cmd = Opt::command();

    if let Err(e) = tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(
                tracing_subscriber::EnvFilter::builder()
                    .with_default_directive(LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
            .finish(),
    ) {
        cmd.error(
            ErrorKind::Io,
            format!("failed to set global default subscriber: {:?}", e),
        )
        .exit();
    }

    let mut network = NetworkConfig::new().with_public_ips(opts.public_ip.clone());
    if !opts.management_cidr.is_empty() {
        network = network.with_management_cidrs(opts.management_cidr.clone());
    }
    if !opts.compute_cidr.is_empty() {
        network = network.with_compute_cidrs(opts.compute_cidr.clone());
    }
    let config = Config::new(opts.tenant_id.clone(), opts.concentrator_id.clone())
        .with_network(network)
        .with_api_timeout(Duration::from(opts.api_timeout));

    let mut concentrator = Concentrator::new(config);
    if let Err(e) = concentrator.init() {
        cmd.error(ErrorKind::Io, format!("init: {:?}", e)).exit();
    }
    let concentrator = Arc::new(concentrator);

    let shutdown_handle = concentrator.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        tracing::info!("received interrupt, shutting down");
        if let Err(e) = shutdown_handle.shutdown() {
            tracing::error!("shutdown on interrupt: {:?}", e);
        }
        std::process::exit(130);
    }) {
        cmd.error(
            ErrorKind::Io,
            format!("failed to set interrupt handler: {:?}", e),
        )
        .exit();
    }

    let result = match opts.command {
        Command::Init => Ok(()),
        Command::Rebuild => concentrator.rebuild_topology(),
        Command::Add {
            subnet,
            subnet_key,
            remote,
        } => concentrator
            .add_remote_subnet(Subnet::new(subnet), subnet_key, remote)
            .map(|name| {
                if !name.is_empty() {
                    tracing::info!("created bridge {}", name);
                }
            }),
        Command::Del {
            subnet,
            subnet_key,
            remote,
        } => concentrator.del_remote_subnet(Subnet::new(subnet), subnet_key, remote),
        Command::Shutdown => concentrator.shutdown(),
    };

    if let Err(e) = result {
        cmd.error(ErrorKind::Io, format!("{:?}", e)).exit();
    }
}
