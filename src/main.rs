//! reMarkable setup CLI
//!
//! Makes the tablet reachable over SSH without a password, then installs a
//! font and a custom sleep screen and reboots it.
//!
//! # Usage
//!
//! ```bash
//! # Everything: passwordless SSH, push assets, reboot
//! remarkable-setup run
//!
//! # Only set up passwordless SSH and the `reMarkable` host alias
//! remarkable-setup bootstrap
//!
//! # Only push assets (uses the alias if it is configured)
//! remarkable-setup push --assets ./assets
//!
//! # Show what is configured and whether the tablet is reachable
//! remarkable-setup status
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use remarkable_setup::config::{AssetPaths, DeviceTarget, SshPaths};
use remarkable_setup::preflight::{require_host_tools, PreflightChecker};
use remarkable_setup::process::SystemRunner;
use remarkable_setup::publish::{check_assets, publish, PublishReport};
use remarkable_setup::ssh::Connection;
use remarkable_setup::Bootstrap;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "remarkable-setup")]
#[command(author, version, about = "Passwordless SSH and asset push for the reMarkable", long_about = None)]
struct Cli {
    /// SSH directory holding keys, known_hosts and config
    #[arg(long, global = true, env = "REMARKABLE_SSH_DIR")]
    ssh_dir: Option<PathBuf>,

    /// Directory containing the font and sleep screen image
    #[arg(long, global = true, env = "REMARKABLE_ASSETS", default_value = "assets")]
    assets: PathBuf,

    /// Enable debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set up passwordless SSH, push assets and reboot
    Run,

    /// Set up passwordless SSH and the host alias only
    Bootstrap,

    /// Push assets and reboot (no key setup)
    Push,

    /// Show local SSH state and preflight checks
    Status,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = run(cli);

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let target = DeviceTarget::remarkable();
    let ssh_paths = match &cli.ssh_dir {
        Some(dir) => SshPaths::new(dir)?,
        None => SshPaths::from_home()?,
    };
    let assets = AssetPaths::new(&cli.assets);

    match cli.command {
        Commands::Run => cmd_run(&target, &ssh_paths, &assets),
        Commands::Bootstrap => cmd_bootstrap(&target, &ssh_paths),
        Commands::Push => cmd_push(&target, &ssh_paths, &assets),
        Commands::Status => cmd_status(&target, &ssh_paths, &assets),
    }
}

fn cmd_run(target: &DeviceTarget, ssh_paths: &SshPaths, assets: &AssetPaths) -> Result<()> {
    require_host_tools()?;
    // Fail on missing assets before any key or config is touched
    check_assets(assets)?;

    println!("=== Passwordless SSH ===\n");
    let runner = SystemRunner;
    let bootstrap = Bootstrap::new(&runner, target, ssh_paths);
    bootstrap.ensure_passwordless()?;

    println!("\n=== Assets ===\n");
    let report = publish(&runner, &bootstrap.connection(), assets)?;
    print_publish_summary(&report);

    Ok(())
}

fn cmd_bootstrap(target: &DeviceTarget, ssh_paths: &SshPaths) -> Result<()> {
    require_host_tools()?;

    let runner = SystemRunner;
    let report = Bootstrap::new(&runner, target, ssh_paths).ensure_passwordless()?;

    println!("\n=== Bootstrap Complete ===");
    println!("  Key:   {}", report.key.private.display());
    println!("  Login: ssh {}", target.alias);
    Ok(())
}

fn cmd_push(target: &DeviceTarget, ssh_paths: &SshPaths, assets: &AssetPaths) -> Result<()> {
    require_host_tools()?;

    let runner = SystemRunner;
    let conn = Connection::resolve(&runner, target, ssh_paths);
    let report = publish(&runner, &conn, assets)?;
    print_publish_summary(&report);
    Ok(())
}

fn cmd_status(target: &DeviceTarget, ssh_paths: &SshPaths, assets: &AssetPaths) -> Result<()> {
    println!("reMarkable Setup Status");
    println!("=======================");
    println!();
    println!("Target:");
    println!("  Address:  {}", target.address);
    println!("  Alias:    {}", target.alias);
    println!("  User:     {}", target.username);
    println!();
    println!("Paths:");
    println!("  SSH dir:  {}", ssh_paths.ssh_dir.display());
    println!("  Config:   {}", ssh_paths.config.display());
    println!("  Font:     {}", assets.font.display());
    println!("  Image:    {}", assets.image.display());
    println!();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let report = runtime.block_on(PreflightChecker::new(target, ssh_paths, assets).run_all())?;
    report.print_summary();

    if !report.is_ok() {
        bail!("{} preflight check(s) failed", report.errors().len());
    }
    Ok(())
}

fn print_publish_summary(report: &PublishReport) {
    println!("\n=== Push Complete ===");
    for path in &report.copied {
        println!("  Copied:  {}", path);
    }
    for path in &report.skipped {
        println!("  Skipped: {} (already present)", path);
    }
    if !report.warnings.is_empty() {
        println!("  {} warning(s), see above", report.warnings.len());
    }
    println!("\nThe tablet is rebooting.");
}
