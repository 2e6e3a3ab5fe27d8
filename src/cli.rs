use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::lifecycle::StartOpts;

#[derive(Parser, Debug)]
#[command(
    name = "devbox",
    version,
    about = "Local development VM on VirtualBox"
)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download the VM image without starting anything
    Download,

    /// Create, boot or resume the VM
    Start(StartArgs),

    /// Shut the VM down
    Stop,

    /// Save the VM state to disk
    Suspend,

    /// Bring a suspended or paused VM back
    Resume,

    /// Show the VM state
    Status {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove every devbox VM
    Destroy,

    /// Trust the VM's certificate authority on this host
    Trust,

    /// Collect guest logs for a bug report
    Debug,

    /// Open a shell in the VM
    Ssh {
        /// Arguments passed to ssh
        #[arg(last = true)]
        args: Vec<String>,
    },
}

#[derive(Args, Debug, Default)]
pub struct StartArgs {
    /// Number of virtual CPUs
    #[arg(long)]
    pub cpus: Option<u32>,

    /// Guest memory in MB
    #[arg(long)]
    pub memory: Option<u64>,

    /// Boot this OVA file instead of the downloaded image
    #[arg(long, value_name = "PATH")]
    pub image: Option<PathBuf>,

    /// Pin the guest address (e.g. 192.168.22.11)
    #[arg(long)]
    pub ip: Option<String>,

    /// Pin the guest domain (e.g. local2.devbox.io)
    #[arg(long)]
    pub domain: Option<String>,

    /// Services the provisioner should bring up
    #[arg(long)]
    pub services: Option<String>,

    /// Boot without provisioning
    #[arg(long, conflicts_with = "provision")]
    pub no_provision: bool,

    /// Only re-provision a running VM
    #[arg(long)]
    pub provision: bool,
}

impl From<StartArgs> for StartOpts {
    fn from(args: StartArgs) -> Self {
        StartOpts {
            memory_mb: args.memory,
            cpus: args.cpus,
            image_path: args.image,
            ip: args.ip,
            domain: args.domain,
            services: args.services,
            no_provision: args.no_provision,
            provision_only: args.provision,
        }
    }
}
