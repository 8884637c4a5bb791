//! Check command implementation.
//!
//! Runs the configured commands once each and reports whether their output
//! is usable, without starting the monitor.

use anyhow::Result;
use netrate::config::validate_effective_config;
use netrate::resolver::parse_listing;
use netrate::sampler::{Session, SessionSettings};
use netrate::{Config, Source};
use std::path::Path;

pub async fn command_check(config: &Config) -> Result<()> {
    println!("🔍 netrate - System Check");
    println!("=========================");

    let mut all_ok = true;

    println!("\n⚙️  Checking configuration...");
    match validate_effective_config(config) {
        Ok(_) => println!("   ✅ Configuration is valid"),
        Err(e) => {
            println!("   ❌ Configuration invalid: {}", e);
            all_ok = false;
        }
    }

    if config.test_data_file.is_none() {
        println!("\n📁 Checking external commands...");
        for program in [config.accounting_program(), config.listing_program()] {
            if Path::new(program).exists() {
                println!("   ✅ {} found", program);
            } else {
                println!("   ❌ {} not found", program);
                all_ok = false;
            }
        }
    }

    let source = match Source::from_config(config) {
        Ok(source) => source,
        Err(e) => {
            println!("   ❌ Cannot set up data source: {:#}", e);
            std::process::exit(1);
        }
    };

    println!("\n📊 Sampling once from {}...", source.describe());
    match source.sample().await {
        Ok(chunks) => {
            let mut session = Session::new(SessionSettings::from_config(config));
            let report = session.process(&chunks);
            match report.desync {
                Some(cause) => {
                    println!("   ❌ Output not usable: {}", cause);
                    all_ok = false;
                }
                None => println!(
                    "   ✅ {} process lines parsed, {} dropped",
                    report.applied, report.dropped
                ),
            }
        }
        Err(e) => {
            println!("   ❌ Accounting command failed: {}", e);
            all_ok = false;
        }
    }

    println!("\n🔎 Checking process listing...");
    let probe = match &source {
        Source::Replay(replay) => replay.data().processes.first().map(|p| p.pid),
        Source::Command(_) => Some(std::process::id()),
    };
    if let Some(pid) = probe {
        match source.list(&[pid]).await {
            Ok(output) => match parse_listing(&output, config.listing_path_column()).get(&pid) {
                Some(identifier) => println!("   ✅ pid {} resolves to {}", pid, identifier),
                None => {
                    println!("   ❌ pid {} missing from listing output", pid);
                    all_ok = false;
                }
            },
            Err(e) => {
                println!("   ❌ Listing command failed: {}", e);
                all_ok = false;
            }
        }
    }

    println!("\n📋 Summary:");
    if all_ok {
        println!("   ✅ All checks passed - system is ready");
        Ok(())
    } else {
        println!("   ❌ Some checks failed - please review warnings");
        std::process::exit(1);
    }
}
