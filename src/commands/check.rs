//! Check command implementation.

use std::path::Path;

use tango_server_exporter::config::{validate_effective_config, Config};
use tango_server_exporter::process::{ProcFsTable, ProcessTable};
use tango_server_exporter::registry::source_from_config;
use tango_server_exporter::system;

/// Validates system requirements; exits with status 1 when a check fails.
pub async fn command_check(
    proc: bool,
    registry: bool,
    all: bool,
    config: &Config,
) -> anyhow::Result<()> {
    println!("TANGO Server Exporter - System Check");
    println!("====================================");

    let mut all_ok = true;

    if proc || all {
        println!("\nChecking /proc filesystem...");
        if Path::new("/proc").exists() {
            println!("   [ok] /proc filesystem accessible");
            match ProcFsTable::new("/proc", Some(5)).and_then(|t| t.enumerate()) {
                Ok(handles) if !handles.is_empty() => {
                    println!("   [ok] Can read {} process entries", handles.len());
                }
                Ok(_) => {
                    println!("   [FAIL] Cannot read any process entries from /proc");
                    all_ok = false;
                }
                Err(e) => {
                    println!("   [FAIL] {}", e);
                    all_ok = false;
                }
            }
        } else {
            println!("   [FAIL] /proc filesystem not found");
            all_ok = false;
        }

        println!(
            "   [ok] Clock ticks: {}/s, page size: {} bytes",
            system::clock_ticks_per_second(),
            system::page_size()
        );
        match system::get_cpu_core_count() {
            Ok(cores) => println!(
                "   [ok] {} CPU cores (tango_server_cpu_percent ranges up to {})",
                cores,
                cores * 100
            ),
            Err(e) => {
                println!("   [FAIL] CPU core count unavailable: {}", e);
                all_ok = false;
            }
        }
        match system::read_boot_time() {
            Ok(btime) => println!("   [ok] Boot time: {}", btime),
            Err(e) => {
                println!("   [FAIL] Boot time unavailable: {}", e);
                all_ok = false;
            }
        }
    }

    if registry || all {
        println!("\nChecking registry...");
        match source_from_config(config) {
            Ok(source) => match source.fetch().await {
                Ok(servers) => println!(
                    "   [ok] {} declared {} servers",
                    source.describe(),
                    servers.len()
                ),
                Err(e) => {
                    println!("   [FAIL] {}: {}", source.describe(), e);
                    all_ok = false;
                }
            },
            Err(e) => {
                println!("   [FAIL] {}", e);
                all_ok = false;
            }
        }
    }

    println!("\nChecking configuration...");
    match validate_effective_config(config) {
        Ok(()) => println!("   [ok] Configuration is valid"),
        Err(e) => {
            println!("   [FAIL] Configuration invalid: {}", e);
            all_ok = false;
        }
    }

    println!("\nSummary:");
    if all_ok {
        println!("   All checks passed - system is ready");
        Ok(())
    } else {
        println!("   Some checks failed - please review the output above");
        std::process::exit(1);
    }
}
