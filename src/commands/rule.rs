use std::collections::HashMap;

use colored::Colorize;

use tripwire::db::Database;
use tripwire::error::{Result, TripwireError};
use tripwire::model::{KeywordRule, MatchMode};
use tripwire::registry::Registry;

/// Arm keywords on a target
pub fn cmd_rule_add(id_or_name: &str, keywords: Vec<String>, exact: bool) -> Result<()> {
    let db = Database::open()?;
    let target = db.require_target(id_or_name)?;
    let mode = if exact { MatchMode::Exact } else { MatchMode::Fuzzy };

    let mut added = 0;
    for keyword in keywords {
        let keyword = keyword.trim().to_string();
        if keyword.is_empty() {
            continue;
        }
        let rule = KeywordRule::new(target.id, keyword, mode);
        db.insert_rule(&rule)?;
        println!("{} Armed \"{}\" ({}) on {}", "✓".green(), rule.keyword, mode.as_str(), target.name.bold());
        added += 1;
    }

    if added == 0 {
        return Err(TripwireError::ConfigError("No non-empty keywords given".into()));
    }
    if !target.enabled {
        println!(
            "{}: target is disabled. Enable it with `tripwire target enable \"{}\"`",
            "Note".yellow(),
            target.name
        );
    }
    Ok(())
}

/// List armed rules for one target or all targets
pub fn cmd_rule_list(target: Option<String>, json: bool) -> Result<()> {
    let db = Database::open()?;

    let rules = match target {
        Some(ref id_or_name) => {
            let target = db.require_target(id_or_name)?;
            db.list_rules(&target.id)?
        }
        None => db.list_all_rules()?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&rules)?);
        return Ok(());
    }

    if rules.is_empty() {
        println!("No rules armed.");
        return Ok(());
    }

    let names: HashMap<_, _> = db
        .list_targets()?
        .into_iter()
        .map(|t| (t.id, t.name))
        .collect();

    println!("\nRules:\n");
    for rule in &rules {
        let target_name = names.get(&rule.target_id).map(String::as_str).unwrap_or("?");
        println!(
            "  {}  {:<24} {:<6} {}",
            &rule.id.to_string()[..8],
            rule.keyword.cyan(),
            rule.mode.as_str(),
            target_name,
        );
    }
    println!();
    Ok(())
}

/// Disarm a rule by ID or keyword
pub fn cmd_rule_delete(id_or_name: &str, rule: &str) -> Result<()> {
    let db = Database::open()?;
    let target = db.require_target(id_or_name)?;

    let found = match db.find_rule(&target.id, rule)? {
        Some(found) => found,
        // Accept an ID prefix as shown by `rule list`
        None => db
            .list_rules(&target.id)?
            .into_iter()
            .find(|r| r.id.to_string().starts_with(rule))
            .ok_or_else(|| TripwireError::RuleNotFound(rule.to_string()))?,
    };

    db.delete_rule(&found.id)?;
    println!("Disarmed \"{}\" on {}", found.keyword, target.name);
    Ok(())
}
