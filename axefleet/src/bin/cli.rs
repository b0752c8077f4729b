//! Command-line interface for axefleet.
//!
//! This binary talks to a running axefleetd over its HTTP API.

use std::env;
use std::net::Ipv4Addr;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use axefleet::api_client::{
    self,
    types::{DeviceStatus, FleetOverview},
};
use axefleet::types::format_difficulty;

const USAGE: &str = "\
Usage: axefleet-cli <command> [args]

Commands:
  status                 Show fleet totals
  devices                List registered devices
  add <ip>               Register a device
  remove <ip>            Forget a device
  rename <ip> <name>     Set a device label (empty name clears it)
  restart <ip>           Reboot a device
  scan [prefix]          Scan a /24 for miners, e.g. 192.168.1

Environment:
  AXEFLEET_API_URL    API base URL (default: http://127.0.0.1:7786)";

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{USAGE}");
        std::process::exit(1);
    };
    let rest = &args[1..];

    match command.as_str() {
        "status" => cmd_status().await?,
        "devices" => cmd_devices().await?,
        "add" => cmd_add(arg(rest, 0, "ip")?).await?,
        "remove" => cmd_remove(address(arg(rest, 0, "ip")?)?).await?,
        "rename" => {
            let ip = address(arg(rest, 0, "ip")?)?;
            let name = rest.get(1..).unwrap_or_default().join(" ");
            cmd_rename(ip, &name).await?
        }
        "restart" => cmd_restart(address(arg(rest, 0, "ip")?)?).await?,
        "scan" => cmd_scan(rest.first().map(String::as_str)).await?,
        _ => {
            eprintln!("Unknown command: {}", command);
            eprintln!("Run without arguments to see usage.");
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Build an API client, honoring AXEFLEET_API_URL if set.
fn make_client() -> api_client::Client {
    match env::var("AXEFLEET_API_URL") {
        Ok(url) => api_client::Client::with_base_url(url),
        Err(_) => api_client::Client::new(),
    }
}

fn arg<'a>(args: &'a [String], index: usize, name: &str) -> Result<&'a str> {
    match args.get(index) {
        Some(value) => Ok(value),
        None => bail!("missing <{name}> argument"),
    }
}

fn address(input: &str) -> Result<Ipv4Addr> {
    input
        .trim()
        .parse()
        .with_context(|| format!("{input:?} is not an IPv4 address"))
}

/// Hashrate in GH/s, switching to TH/s from 1000 GH/s.
fn format_hash_rate(ghs: f64) -> String {
    if ghs >= 1000.0 {
        format!("{:.2} TH/s", ghs / 1000.0)
    } else {
        format!("{:.1} GH/s", ghs)
    }
}

fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = seconds % 86_400 / 3600;
    let minutes = seconds % 3600 / 60;
    if days > 0 {
        format!("{days}d {hours}h")
    } else {
        format!("{hours}h {minutes}m")
    }
}

/// Print fleet totals.
async fn cmd_status() -> Result<()> {
    let fleet: FleetOverview = make_client().fleet().await?;
    let summary = &fleet.summary;

    println!(
        "Hashrate:   {} ({})",
        format_hash_rate(fleet.hash_rate),
        fleet.hash_rate_source
    );
    println!("Power:      {:.1} W", summary.total_power);
    println!("Efficiency: {:.2} J/TH", summary.efficiency);
    println!("Devices:    {}/{} online", summary.active_count, summary.total_count);
    println!(
        "Shares:     {} accepted, {} rejected",
        summary.shares_accepted, summary.shares_rejected
    );
    if summary.active_count > 0 {
        println!("Max temp:   {:.1} °C", summary.max_temperature_c);
    }

    if let Some(pool) = &fleet.pool {
        let stats = &pool.stats;
        println!("Pool:       {} {}", stats.pool.name, stats.pool.version);
        println!("  Miners:   {}", stats.stats.active_miners);
        println!("  Blocks:   {}", stats.stats.blocks_found);
    }

    Ok(())
}

fn print_device(device: &DeviceStatus) {
    if !device.is_active {
        println!("  {:<15}  {:<20}  offline", device.address, device.label());
        return;
    }
    println!(
        "  {:<15}  {:<20}  {:>12}  {:>6.1} W  {:>5.1} °C  up {:<8}  best {:<8}  {} {}",
        device.address,
        device.label(),
        format_hash_rate(device.hash_rate),
        device.power_w,
        device.temperature_c,
        format_uptime(device.uptime_seconds),
        format_difficulty(device.best_diff),
        device.model,
        device.firmware_version,
    );
}

/// List registered devices.
async fn cmd_devices() -> Result<()> {
    let devices = make_client().devices().await?;
    if devices.is_empty() {
        println!("No devices registered.");
        return Ok(());
    }
    for device in &devices {
        print_device(device);
    }
    Ok(())
}

async fn cmd_add(input: &str) -> Result<()> {
    match make_client().add_device(input).await? {
        Some(device) if device.is_active => {
            println!("Added {} ({})", device.address, device.model);
        }
        Some(device) => {
            println!("Added {} (not responding yet)", device.address);
        }
        None => println!("{} is already registered", input.trim()),
    }
    Ok(())
}

async fn cmd_remove(ip: Ipv4Addr) -> Result<()> {
    make_client().remove_device(ip).await?;
    println!("Removed {ip}");
    Ok(())
}

async fn cmd_rename(ip: Ipv4Addr, name: &str) -> Result<()> {
    let device = make_client().rename_device(ip, name).await?;
    match device.display_name {
        Some(name) => println!("{ip} is now {name:?}"),
        None => println!("Cleared label for {ip}"),
    }
    Ok(())
}

async fn cmd_restart(ip: Ipv4Addr) -> Result<()> {
    make_client().restart_device(ip).await?;
    println!("Restart sent to {ip}");
    Ok(())
}

/// Start a scan and follow its progress until it finishes.
async fn cmd_scan(prefix: Option<&str>) -> Result<()> {
    let client = make_client();
    let started = client.start_scan(prefix).await?;
    println!(
        "Scanning {}.0/24 ({} hosts)",
        started.prefix.as_deref().unwrap_or("?"),
        started.total
    );

    let mut last_percent = None;
    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let progress = client.scan_progress().await?;
        if last_percent != Some(progress.percent) {
            println!("  {:>3}%  {} found", progress.percent, progress.found);
            last_percent = Some(progress.percent);
        }
        if !progress.running && progress.scanned > 0 {
            println!("Scan complete: {} miner(s) found", progress.found);
            break;
        }
    }

    Ok(())
}
