use std::io;
use std::process::Command;

use clap::CommandFactory;
use clap_complete::{generate, Shell};
use colored::Colorize;

use tripwire::browser::ensure_script;
use tripwire::cli::{Cli, CompletionShell};
use tripwire::config::{Config, FetchMode};
use tripwire::db::Database;
use tripwire::error::{Result, TripwireError};
use tripwire::fetch::{check_stealth, StealthStatus};
use tripwire::registry::Registry;

/// Check installation and configuration
pub fn cmd_doctor() -> Result<()> {
    println!("\ntripwire doctor\n");

    println!("  tripwire binary: v{}", env!("CARGO_PKG_VERSION"));

    let config = match Config::load() {
        Ok(config) => {
            if let Ok(path) = Config::config_path() {
                let state = if path.exists() { "loaded" } else { "defaults" };
                println!("  Config: {} ({})", path.display(), state);
            }
            config
        }
        Err(e) => {
            println!("  Config: {} - {}", "ERROR".red(), e);
            Config::default()
        }
    };
    println!("  Fetch mode: {:?}", config.engine.fetch_mode);

    // Node.js
    let node = Command::new(&config.stealth.node_binary).arg("--version").output();
    match node {
        Ok(o) if o.status.success() => {
            let v = String::from_utf8_lossy(&o.stdout);
            println!("  Node.js: {}", v.trim());
        }
        _ => println!("  Node.js: NOT INSTALLED"),
    }

    let stealth = check_stealth(&config.stealth.node_binary);
    match stealth {
        StealthStatus::Ready => println!("  Stealth browser: ready"),
        ref other => {
            let label = match other {
                StealthStatus::NodeMissing => "Node.js required",
                StealthStatus::PlaywrightMissing => "Playwright not installed",
                _ => "Chromium not installed",
            };
            println!("  Stealth browser: {} ({})", label, other.install_instructions());
        }
    }
    if config.engine.fetch_mode == FetchMode::Stealth && !stealth.is_ready() {
        println!("    {}: fetch_mode is stealth; run `tripwire enable-stealth`", "Warning".yellow());
    }

    match Database::open() {
        Ok(db) => {
            let targets = db.list_targets()?;
            let enabled = targets.iter().filter(|t| t.enabled).count();
            println!("  Database: OK ({} target(s), {} enabled, {} log entries)", targets.len(), enabled, db.count_logs()?);
            match db.channel_config()? {
                Some(c) => println!("  Telegram: configured (token {})", c.masked_token()),
                None => println!("  Telegram: not configured (`tripwire notify set`)"),
            }
        }
        Err(e) => println!("  Database: {} - {}", "ERROR".red(), e),
    }

    println!();
    Ok(())
}

/// Install Playwright and Chromium into the data directory
pub fn cmd_enable_stealth() -> Result<()> {
    println!("\nSetting up the stealth browser...\n");

    let config = Config::load()?;
    if check_stealth(&config.stealth.node_binary) == StealthStatus::NodeMissing {
        println!("  Node.js is required for stealth fetching.");
        println!("  Install from: https://nodejs.org/");
        return Ok(());
    }

    let data_dir = Config::data_dir()?;
    std::fs::create_dir_all(&data_dir)?;

    let node_modules = data_dir.join("node_modules").join("playwright");
    if !node_modules.exists() {
        let package_json = data_dir.join("package.json");
        if !package_json.exists() {
            println!("  Initializing JavaScript environment...");
            let output = Command::new("npm")
                .args(["init", "-y"])
                .current_dir(&data_dir)
                .output()?;

            if !output.status.success() {
                return Err(TripwireError::BrowserError("Failed to initialize npm".into()));
            }
        }

        println!("  Installing Playwright...");
        let status = Command::new("npm")
            .args(["install", "playwright"])
            .current_dir(&data_dir)
            .status()?;

        if !status.success() {
            return Err(TripwireError::BrowserError("Failed to install Playwright".into()));
        }
    } else {
        println!("  Playwright package is installed.");
    }

    if !check_stealth(&config.stealth.node_binary).is_ready() {
        println!("  Installing Chromium browser (~280MB)...");
        let status = Command::new("npx")
            .args(["playwright", "install", "chromium"])
            .current_dir(&data_dir)
            .status()?;

        if !status.success() {
            return Err(TripwireError::BrowserError("Failed to install Chromium".into()));
        }
    } else {
        println!("  Chromium browser is installed.");
    }

    let script = ensure_script(&data_dir)?;
    println!("  Sidecar script: {}", script.display());

    println!("\n  Stealth fetching is ready.");
    println!("  Enable it with `fetch_mode = \"stealth\"` under [engine], or `tripwire run --mode stealth`.\n");
    Ok(())
}

/// Generate shell completions
pub fn cmd_completions(shell: CompletionShell) -> Result<()> {
    let mut cmd = Cli::command();
    let shell = match shell {
        CompletionShell::Bash => Shell::Bash,
        CompletionShell::Zsh => Shell::Zsh,
        CompletionShell::Fish => Shell::Fish,
        CompletionShell::Powershell => Shell::PowerShell,
    };
    generate(shell, &mut cmd, "tripwire", &mut io::stdout());
    Ok(())
}
