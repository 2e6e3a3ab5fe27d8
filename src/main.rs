use std::sync::Arc;

use clap::Parser;

use devbox::backend;
use devbox::cli::{Cli, Command};
use devbox::commands;
use devbox::config::{self, SystemConfig};
use devbox::download::Downloader;
use devbox::download::http::HttpImageSource;
use devbox::download::local_fs::LocalFs;
use devbox::error::DevboxError;
use devbox::lifecycle::{Machine, StartOpts};
use devbox::logging;
use devbox::network::HostNetwork;
use devbox::paths;
use devbox::ssh::SystemSsh;
use devbox::system::HostSystem;
use devbox::trust::SystemTrustStore;
use devbox::ui::TerminalUi;

fn build_machine(config: SystemConfig) -> Machine {
    let ssh = SystemSsh::new(config.config.ssh.user.clone());
    let trust = SystemTrustStore::new(paths::ca_cert_path(&config.home));
    Machine {
        config: Arc::new(config),
        driver: Arc::new(backend::create_driver()),
        ssh: Arc::new(ssh),
        network: Arc::new(HostNetwork),
        fs: Arc::new(LocalFs),
        host: Arc::new(HostSystem),
        trust: Arc::new(trust),
        ui: Arc::new(TerminalUi),
    }
}

fn build_downloader(config: &SystemConfig) -> Result<Downloader, DevboxError> {
    let source = HttpImageSource::new(
        config.config.image.url.clone(),
        config.image_token(),
        std::time::Duration::from_secs(config.config.download.connect_timeout_s),
        std::time::Duration::from_secs(config.config.download.idle_timeout_s),
    )?;
    Ok(Downloader::new(Arc::new(LocalFs), Arc::new(source)))
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    let file_handle = logging::init(cli.verbose);

    let home = paths::home_dir();
    let sys_config = config::load_config(&home)?;

    let log_path = paths::logs_dir(&home).join(logging::LOG_FILE);
    if let Err(e) = file_handle.set_file(&log_path) {
        tracing::warn!(path = %log_path.display(), error = %e, "file logging disabled");
    }
    tracing::debug!(command = ?cli.command, home = %home.display(), "devbox invoked");

    let downloader = build_downloader(&sys_config)?;
    let machine = build_machine(sys_config);

    match cli.command {
        Command::Download => commands::download(&machine, &downloader).await?,
        Command::Start(args) => {
            let opts = StartOpts::from(args);
            commands::start(&machine, &downloader, &opts).await?
        }
        Command::Stop => commands::stop(&machine).await?,
        Command::Suspend => commands::suspend(&machine).await?,
        Command::Resume => commands::resume(&machine).await?,
        Command::Status { json } => {
            let report = commands::status(&machine).await?;
            println!("{}", commands::render_status(&report, json)?);
        }
        Command::Destroy => commands::destroy(&machine).await?,
        Command::Trust => commands::trust(&machine).await?,
        Command::Debug => commands::debug(&machine).await?,
        Command::Ssh { args } => {
            let code = commands::ssh(&machine, &args).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
    }

    Ok(())
}
