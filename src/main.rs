#[cfg(target_os = "windows")]
mod single_instance;

use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use futures::executor::block_on_stream;

use frp_desktop::{
    ControlPlane, Paths, Role,
    config::{Configuration, ProxyEntry, codec},
    process_log::{LogLevel, ProcessEvent},
    release::{CancelToken, InstallProgress, ReleaseCatalogEntry, host_arch, host_platform},
};

#[derive(Parser)]
#[command(name = "frp-desktop", version, about = "Manage frps/frpc configuration, processes and releases")]
struct Cli {
    /// Application data root (defaults to $FRP_DESKTOP_HOME or the user config directory).
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Inspect or replace a role's configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Manage the [[proxies]] blocks of frpc.toml.
    Proxy {
        #[command(subcommand)]
        action: ProxyAction,
    },
    /// Run frps or frpc in the foreground and stream its output.
    Run { role: Role },
    /// List releases published upstream.
    Releases {
        /// Include prereleases.
        #[arg(long)]
        all: bool,
    },
    /// Download and select a release (latest stable when no tag is given).
    Install { tag: Option<String> },
    /// List installed versions, optionally selecting one.
    Versions {
        #[arg(long = "use", value_name = "TAG")]
        select: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the file as stored, with secrets masked.
    Show {
        role: Role,
        #[arg(long)]
        reveal: bool,
    },
    /// Print the decoded configuration as JSON.
    Get { role: Role },
    /// Replace the configuration with the contents of a TOML file.
    SetFile { role: Role, path: PathBuf },
}

#[derive(Subcommand)]
enum ProxyAction {
    List,
    Get { name: String },
    /// Add a proxy described by a TOML file holding a single table.
    Add { path: PathBuf },
    /// Replace the proxy called `name` with the one described in `path`.
    Update { name: String, path: PathBuf },
    Remove { name: String },
}

fn main() -> anyhow::Result<ExitCode> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("frp_desktop=info"),
    )
    .init();

    let cli = Cli::parse();

    log::info!(
        "frp-desktop v{} starting (RUST_LOG={})",
        env!("CARGO_PKG_VERSION"),
        std::env::var("RUST_LOG").unwrap_or_else(|_| "<default: info>".into()),
    );

    #[cfg(target_os = "windows")]
    let _instance_guard = match single_instance::acquire() {
        Some(guard) => guard,
        None => {
            log::error!("another frp-desktop instance is already running");
            return Ok(ExitCode::FAILURE);
        }
    };

    let paths = cli.home.map(Paths::new).unwrap_or_else(Paths::from_environment);
    let control = ControlPlane::new(paths)?;

    match cli.command {
        Command::Config { action } => config_command(&control, action)?,
        Command::Proxy { action } => proxy_command(&control, action)?,
        Command::Run { role } => return run(&control, role),
        Command::Releases { all } => {
            for entry in control.list_remote_releases()? {
                if entry.prerelease && !all {
                    continue;
                }
                let available = entry.asset_for(host_platform(), &host_arch()).is_some();
                println!(
                    "{:<10} {}{}{}",
                    entry.tag,
                    entry.published_at.format("%Y-%m-%d"),
                    if entry.prerelease { " prerelease" } else { "" },
                    if available { "" } else { " (no asset for this host)" },
                );
            }
        }
        Command::Install { tag } => install(&control, tag)?,
        Command::Versions { select } => {
            if let Some(version) = select {
                control.set_current_version(&version)?;
            }
            let versions = control.versions();
            for version in &versions.all {
                let marker = if versions.current.as_ref() == Some(version) { "*" } else { " " };
                println!("{marker} {version}");
            }
            let status = control.check_current_version();
            match status.version {
                Some(version) => println!(
                    "current: {version} (frps: {}, frpc: {})",
                    if status.has_server { "yes" } else { "missing" },
                    if status.has_client { "yes" } else { "missing" },
                ),
                None => println!("current: none"),
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn config_command(control: &ControlPlane, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show { role, reveal } => {
            let text = control.read_raw_config(role);
            let text = if reveal { text } else { codec::redact_secrets(&text) };
            print!("{text}");
        }
        ConfigAction::Get { role } => {
            let configuration = control.read_config(role);
            let json = match &configuration {
                Configuration::Server(config) => serde_json::to_string_pretty(config)?,
                Configuration::Client(config) => serde_json::to_string_pretty(config)?,
            };
            println!("{json}");
        }
        ConfigAction::SetFile { role, path } => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let configuration = match role {
                Role::Server => Configuration::Server(codec::decode(&text)?),
                Role::Client => Configuration::Client(codec::decode(&text)?),
            };
            control.save_config(&configuration)?;
            println!("saved {}", control.config_path(role).display());
        }
    }
    Ok(())
}

fn read_proxy(path: &Path) -> anyhow::Result<ProxyEntry> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let entry: ProxyEntry = codec::decode(&text)
        .with_context(|| format!("{} is not a proxy definition", path.display()))?;
    Ok(entry)
}

fn proxy_command(control: &ControlPlane, action: ProxyAction) -> anyhow::Result<()> {
    match action {
        ProxyAction::List => {
            for entry in control.list_proxies()? {
                let endpoint = entry.endpoint().unwrap_or_default();
                println!("{:<24} {:<7} {endpoint}", entry.name, entry.kind);
            }
        }
        ProxyAction::Get { name } => match control.get_proxy(&name)? {
            Some(entry) => println!("{}", serde_json::to_string_pretty(&entry)?),
            None => bail!("no proxy named '{name}'"),
        },
        ProxyAction::Add { path } => {
            let entry = read_proxy(&path)?;
            control.add_proxy(&entry)?;
            println!("added {}", entry.name);
        }
        ProxyAction::Update { name, path } => {
            let entry = read_proxy(&path)?;
            control.update_proxy(&name, &entry)?;
            println!("updated {name}");
        }
        ProxyAction::Remove { name } => {
            control.delete_proxy(&name)?;
            println!("removed {name}");
        }
    }
    Ok(())
}

fn run(control: &ControlPlane, role: Role) -> anyhow::Result<ExitCode> {
    control.ensure_config(role)?;
    let events = control.subscribe(role);
    control.start(role)?;

    for event in block_on_stream(events) {
        match event {
            ProcessEvent::Log(line) => match line.level {
                LogLevel::Info => println!("{}", line.message),
                LogLevel::Error => eprintln!("{}", line.message),
            },
            ProcessEvent::Status(status) if !status.running => {
                log::info!("[cmd] {} stopped ({:?})", role.label(), status.code);
                let code = status.code.unwrap_or(0);
                return Ok(if code == 0 {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::from(u8::try_from(code).unwrap_or(1))
                });
            }
            ProcessEvent::Status(_) => {}
        }
    }
    control.shutdown();
    Ok(ExitCode::SUCCESS)
}

fn install(control: &ControlPlane, tag: Option<String>) -> anyhow::Result<()> {
    let releases = control.list_remote_releases()?;
    let entry: ReleaseCatalogEntry = match &tag {
        Some(tag) => releases
            .into_iter()
            .find(|entry| entry.tag == *tag || entry.tag.trim_start_matches('v') == tag.trim_start_matches('v'))
            .with_context(|| format!("release {tag} not found"))?,
        None => releases
            .into_iter()
            .find(|entry| !entry.prerelease)
            .context("no stable release published")?,
    };

    let mut last_percent = None;
    let version = control.install(
        &entry,
        &mut |progress| {
            let (phase, fraction) = match progress {
                InstallProgress::Download(fraction) => ("download", fraction),
                InstallProgress::Extract(fraction) => ("extract", fraction),
            };
            let percent = (fraction * 100.0).round() as u32;
            if last_percent != Some((phase, percent)) {
                last_percent = Some((phase, percent));
                eprint!("\r{phase}: {percent:>3}%");
            }
        },
        &CancelToken::new(),
    )?;
    eprintln!();
    println!("installed {version}");
    Ok(())
}
