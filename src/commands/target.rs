use colored::Colorize;
use inquire::Confirm;

use tripwire::cli::ExtractionArg;
use tripwire::db::Database;
use tripwire::error::{Result, TripwireError};
use tripwire::model::{Extraction, Target};
use tripwire::normalize::truncate_chars;
use tripwire::registry::Registry;

use crate::utils::{extract_domain, format_interval, parse_interval_str, validate_url};

fn extraction_from_arg(arg: ExtractionArg) -> Extraction {
    match arg {
        ExtractionArg::Document => Extraction::Document,
        ExtractionArg::Feed => Extraction::feed(),
    }
}

fn extraction_label(extraction: &Extraction) -> &'static str {
    match extraction {
        Extraction::Document => "document",
        Extraction::Feed { .. } => "feed",
    }
}

/// Register a new target
pub fn cmd_target_add(
    url: String,
    name: Option<String>,
    interval: String,
    feed: bool,
    disabled: bool,
) -> Result<()> {
    let url = validate_url(&url)?;
    let interval_secs = parse_interval_str(&interval)?;
    let name = match name {
        Some(n) if !n.trim().is_empty() => n.trim().to_string(),
        _ => extract_domain(&url).ok_or_else(|| {
            TripwireError::ConfigError("Could not derive a name from the URL, pass --name".into())
        })?,
    };

    let mut target = Target::new(name, url);
    target.interval_secs = interval_secs;
    target.enabled = !disabled;
    if feed {
        target.extraction = Extraction::feed();
    }

    let db = Database::open()?;
    db.insert_target(&target)?;

    println!("\n{} Registered target: {}", "✓".green(), target.name.bold());
    println!("  URL:        {}", target.url);
    println!("  Extraction: {}", extraction_label(&target.extraction));
    println!("  Interval:   {} (nominal)", format_interval(target.interval_secs));
    if disabled {
        println!("  Status:     {}", "disabled".yellow());
    }
    println!("\nArm a keyword with: tripwire rule add \"{}\" <keyword>\n", target.name);
    Ok(())
}

/// List all targets
pub fn cmd_target_list(verbose: bool, json: bool) -> Result<()> {
    let db = Database::open()?;
    let targets = db.list_targets()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&targets)?);
        return Ok(());
    }

    if targets.is_empty() {
        println!("No targets registered. Run `tripwire target add <url>` to create one.");
        return Ok(());
    }

    let use_color = atty::is(atty::Stream::Stdout);

    println!("\nTargets:\n");

    if verbose {
        for target in &targets {
            let rules = db.list_rules(&target.id)?;
            let status = match (target.enabled, use_color) {
                (true, true) => "enabled".green().to_string(),
                (true, false) => "enabled".to_string(),
                (false, true) => "disabled".yellow().to_string(),
                (false, false) => "disabled".to_string(),
            };

            println!("  {} ({})", target.name.bold(), &target.id.to_string()[..8]);
            println!("    URL:        {}", target.url);
            println!("    Status:     {}, nominal every {}", status, format_interval(target.interval_secs));
            println!("    Extraction: {}", extraction_label(&target.extraction));
            println!("    Rules:      {}", rules.len());
            println!();
        }
    } else {
        let longest = targets.iter().map(|t| t.name.chars().count()).max().unwrap_or(20);
        let max_name_len = longest.min(30);
        // room for the "..." of cut names
        let name_width = if longest > max_name_len { max_name_len + 3 } else { max_name_len };

        for target in &targets {
            let rules = db.list_rules(&target.id)?;
            let indicator = match (target.enabled, use_color) {
                (true, true) => "●".green().to_string(),
                (true, false) => "[on] ".to_string(),
                (false, true) => "○".yellow().to_string(),
                (false, false) => "[off]".to_string(),
            };
            let feed_badge = match (target.extraction.is_feed(), use_color) {
                (true, true) => " FEED".magenta().to_string(),
                (true, false) => " [FEED]".to_string(),
                (false, _) => String::new(),
            };

            println!(
                "  {} {:<width$}  {} rule(s)  {}{}",
                indicator,
                truncate_chars(&target.name, max_name_len),
                rules.len(),
                truncate_chars(&target.url, 50),
                feed_badge,
                width = name_width,
            );
        }
        println!();
    }

    Ok(())
}

/// Show one target with its armed rules
pub fn cmd_target_show(id_or_name: &str, json: bool) -> Result<()> {
    let db = Database::open()?;
    let target = db.require_target(id_or_name)?;
    let rules = db.list_rules(&target.id)?;

    if json {
        let value = serde_json::json!({
            "target": target,
            "rules": rules,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("\n{}", target.name.bold());
    println!("  ID:         {}", target.id);
    println!("  URL:        {}", target.url);
    println!("  Enabled:    {}", if target.enabled { "yes" } else { "no" });
    println!("  Interval:   {} (nominal)", format_interval(target.interval_secs));
    println!("  Extraction: {}", extraction_label(&target.extraction));
    if let Extraction::Feed { strategies, id_attributes, limit } = &target.extraction {
        for s in strategies {
            println!("    - {} -> {}", s.container, s.text.join(", "));
        }
        println!("    id attributes: {}", id_attributes.join(", "));
        println!("    first {} records", limit);
    }
    println!("  Created:    {}", target.created_at.format("%Y-%m-%d %H:%M:%S UTC"));

    if rules.is_empty() {
        println!("\n  No rules armed.");
    } else {
        println!("\n  Rules:");
        for rule in &rules {
            println!("    {} {} ({})", &rule.id.to_string()[..8], rule.keyword.cyan(), rule.mode.as_str());
        }
    }

    let logs = db.recent_logs(Some(&target.id), 5)?;
    if !logs.is_empty() {
        println!("\n  Recent log:");
        for entry in &logs {
            let mark = if entry.found { "✓".green() } else { "·".dimmed() };
            println!("    {} {} {}", mark, entry.created_at.format("%Y-%m-%d %H:%M"), entry.message);
        }
    }
    println!();
    Ok(())
}

/// Edit a target
pub fn cmd_target_edit(
    id_or_name: &str,
    name: Option<String>,
    url: Option<String>,
    interval: Option<String>,
    extraction: Option<ExtractionArg>,
) -> Result<()> {
    let db = Database::open()?;
    let mut target = db.require_target(id_or_name)?;
    let mut changes = Vec::new();

    if let Some(name) = name {
        changes.push(format!("name: {} -> {}", target.name, name));
        target.name = name;
    }
    if let Some(url) = url {
        let url = validate_url(&url)?;
        changes.push(format!("url: {}", url));
        target.url = url;
    }
    if let Some(interval) = interval {
        target.interval_secs = parse_interval_str(&interval)?;
        changes.push(format!("interval: {}", format_interval(target.interval_secs)));
    }
    if let Some(arg) = extraction {
        target.extraction = extraction_from_arg(arg);
        changes.push(format!("extraction: {}", extraction_label(&target.extraction)));
    }

    if changes.is_empty() {
        println!("Nothing to change. See `tripwire target edit --help`.");
        return Ok(());
    }

    db.update_target(&target)?;
    println!("Updated {}:", target.name.bold());
    for change in changes {
        println!("  {}", change);
    }
    Ok(())
}

/// Enable or disable a target
pub fn cmd_target_set_enabled(id_or_name: &str, enabled: bool) -> Result<()> {
    let db = Database::open()?;
    let target = db.require_target(id_or_name)?;
    db.set_target_enabled(&target.id, enabled)?;
    if enabled {
        println!("Enabled: {}", target.name);
    } else {
        println!("Disabled: {}", target.name);
    }
    Ok(())
}

/// Delete a target and everything attached to it
pub fn cmd_target_delete(id_or_name: &str, skip_confirm: bool) -> Result<()> {
    let db = Database::open()?;
    let target = db.require_target(id_or_name)?;

    if !skip_confirm {
        let confirm = Confirm::new(&format!("Delete target '{}' with its rules and log?", target.name))
            .with_default(false)
            .prompt()
            .map_err(|e| TripwireError::ConfigError(e.to_string()))?;

        if !confirm {
            println!("Cancelled.");
            return Ok(());
        }
    }

    db.delete_target(&target.id)?;
    println!("Deleted target: {}", target.name);
    Ok(())
}
