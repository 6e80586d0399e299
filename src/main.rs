//! tripwire - keyword tripwires for web pages

use clap::Parser;

use tripwire::cli::{Cli, Commands, NotifyCommands, RuleCommands, TargetCommands};
use tripwire::config::{Config, LoggingConfig};
use tripwire::error::Result;
use tripwire::logging;

mod commands;
mod utils;

fn main() {
    let cli = Cli::parse();

    let logging_config = Config::load()
        .map(|c| c.logging)
        .unwrap_or_else(|_| LoggingConfig::default());
    let _log_guard = match logging::init(&logging_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Warning: logging disabled: {}", e);
            None
        }
    };

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        if let Some(hint) = e.hint() {
            eprintln!("\n{}", hint);
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        // Target management
        Commands::Target(TargetCommands::Add { url, name, interval, feed, disabled }) => {
            commands::cmd_target_add(url, name, interval, feed, disabled)
        }
        Commands::Target(TargetCommands::List { verbose, json }) => commands::cmd_target_list(verbose, json),
        Commands::Target(TargetCommands::Show { target, json }) => commands::cmd_target_show(&target, json),
        Commands::Target(TargetCommands::Edit { target, name, url, interval, extraction }) => {
            commands::cmd_target_edit(&target, name, url, interval, extraction)
        }
        Commands::Target(TargetCommands::Enable { target }) => commands::cmd_target_set_enabled(&target, true),
        Commands::Target(TargetCommands::Disable { target }) => commands::cmd_target_set_enabled(&target, false),
        Commands::Target(TargetCommands::Delete { target, yes }) => commands::cmd_target_delete(&target, yes),

        // Rules
        Commands::Rule(RuleCommands::Add { target, keywords, exact }) => {
            commands::cmd_rule_add(&target, keywords, exact)
        }
        Commands::Rule(RuleCommands::List { target, json }) => commands::cmd_rule_list(target, json),
        Commands::Rule(RuleCommands::Delete { target, rule }) => commands::cmd_rule_delete(&target, &rule),

        Commands::Logs { target, limit, json } => commands::cmd_logs(target, limit, json),

        // Notification channel
        Commands::Notify(NotifyCommands::Set { token, chat_id, proxy }) => {
            commands::cmd_notify_set(token, chat_id, proxy)
        }
        Commands::Notify(NotifyCommands::Show) => commands::cmd_notify_show(),
        Commands::Notify(NotifyCommands::Test) => commands::cmd_notify_test(),
        Commands::Notify(NotifyCommands::Clear) => commands::cmd_notify_clear(),

        // Engine
        Commands::Run { mode, json } => commands::cmd_run(mode, json),
        Commands::Daemon { mode } => commands::cmd_daemon(mode),

        // Miscellaneous
        Commands::Doctor => commands::cmd_doctor(),
        Commands::EnableStealth => commands::cmd_enable_stealth(),
        Commands::Completions { shell } => commands::cmd_completions(shell),
    }
}
