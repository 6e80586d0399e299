use std::collections::HashMap;

use colored::Colorize;

use tripwire::db::Database;
use tripwire::error::Result;

/// Show recent audit log entries
pub fn cmd_logs(target: Option<String>, limit: usize, json: bool) -> Result<()> {
    let db = Database::open()?;

    let target_id = match target {
        Some(ref id_or_name) => Some(db.require_target(id_or_name)?.id),
        None => None,
    };
    let logs = db.recent_logs(target_id.as_ref(), limit)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&logs)?);
        return Ok(());
    }

    if logs.is_empty() {
        println!("No log entries yet. Run `tripwire run` to sweep once.");
        return Ok(());
    }

    let names: HashMap<_, _> = db
        .list_targets()?
        .into_iter()
        .map(|t| (t.id, t.name))
        .collect();

    for entry in &logs {
        let when = entry.created_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S");
        let name = names.get(&entry.target_id).map(String::as_str).unwrap_or("?");
        if entry.found {
            println!("{} {} {} {}", when, "MATCH".green().bold(), name.bold(), entry.message);
        } else {
            println!("{} {} {} {}", when, "     ".normal(), name, entry.message.dimmed());
        }
    }
    Ok(())
}
