//! droidhost CLI and session daemon.

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;

use droidhost::config;
use droidhost::container::{ContainerRuntime, DEFAULT_LXC_PATH};
use droidhost::ipc::client::SessionClient;
use droidhost::ipc::session_socket_path;
use droidhost::session::SessionManager;
use droidhost::watchers::location;

#[derive(Parser)]
#[command(name = "droidhost", version, about = "Containerized Android runtime host")]
struct Cli {
    /// Path to the host configuration file.
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Session lifecycle.
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },
    /// App management against the running session.
    App {
        #[command(subcommand)]
        command: AppCommand,
    },
    /// Read or write guest properties.
    Prop {
        #[command(subcommand)]
        command: PropCommand,
    },
    /// Container state control.
    Container {
        #[command(subcommand)]
        command: ContainerCommand,
    },
    /// Internal: GNSS fix forwarder spawned by the session daemon.
    #[command(hide = true)]
    LocationTracker,
}

#[derive(Subcommand)]
enum SessionCommand {
    /// Start the session daemon in the foreground.
    Start,
    /// Stop the running session.
    Stop,
    /// Show session state.
    Status,
}

#[derive(Subcommand)]
enum AppCommand {
    /// List installed apps.
    List,
    /// Install an apk from a host path.
    Install { path: PathBuf },
    /// Uninstall a package.
    Remove { package: String },
    /// Launch an app.
    Launch { package: String },
    /// Fire an intent inside the guest.
    Intent { action: String, uri: String },
}

#[derive(Subcommand)]
enum PropCommand {
    Get { key: String },
    Set { key: String, value: String },
}

#[derive(Subcommand)]
enum ContainerCommand {
    Status,
    Freeze,
    Unfreeze,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(cli.log_level.clone()),
    )
    .init();

    let config = config::load(&cli.config);
    let client = SessionClient::new(session_socket_path());

    match cli.command {
        Command::Session { command } => match command {
            SessionCommand::Start => SessionManager::new(config).run().await,
            SessionCommand::Stop => SessionManager::new(config).stop().await,
            SessionCommand::Status => {
                match client.get_session().await {
                    Ok(session) => {
                        println!("state:        {}", session.state);
                        println!("lcd density:  {}", session.lcd_density);
                        println!("display size: {}", session.display_size);
                    }
                    Err(_) => println!("state:        STOPPED"),
                }
                Ok(())
            }
        },
        Command::App { command } => match command {
            AppCommand::List => {
                let apps = client.get_apps_info().await?;
                for app in apps {
                    println!("{}\t{}\t{}", app.package_name, app.version_name, app.name);
                }
                Ok(())
            }
            AppCommand::Install { path } => {
                let path = std::path::absolute(&path)?;
                client.install_app(&path).await?;
                info!("installed {}", path.display());
                Ok(())
            }
            AppCommand::Remove { package } => client.remove_app(&package).await,
            AppCommand::Launch { package } => client.launch_app(&package).await,
            AppCommand::Intent { action, uri } => client.launch_intent(&action, &uri).await,
        },
        Command::Prop { command } => match command {
            PropCommand::Get { key } => {
                println!("{}", client.getprop(&key).await?);
                Ok(())
            }
            PropCommand::Set { key, value } => client.setprop(&key, &value).await,
        },
        Command::Container { command } => {
            let container =
                ContainerRuntime::new(config.container_name.clone(), DEFAULT_LXC_PATH);
            match command {
                ContainerCommand::Status => {
                    println!("{}", container.status().await?);
                    Ok(())
                }
                ContainerCommand::Freeze => Ok(container.freeze().await?),
                ContainerCommand::Unfreeze => Ok(container.unfreeze().await?),
            }
        }
        Command::LocationTracker => location::tracker_main(&config).await,
    }
}
