use chrono::Local;
use colored::Colorize;
use inquire::{Password, PasswordDisplayMode, Text};

use tripwire::db::Database;
use tripwire::error::{Result, TripwireError};
use tripwire::model::ChannelConfig;
use tripwire::notify::{format_match_message, MatchNotice, Notifier, ProxyKind, TelegramNotifier};
use tripwire::registry::Registry;

fn prompt_err(e: inquire::InquireError) -> TripwireError {
    TripwireError::ConfigError(e.to_string())
}

/// Set the Telegram channel, prompting for anything not given as a flag
pub fn cmd_notify_set(token: Option<String>, chat_id: Option<String>, proxy: Option<String>) -> Result<()> {
    let interactive = token.is_none() || chat_id.is_none();
    if interactive && !atty::is(atty::Stream::Stdin) {
        return Err(TripwireError::ConfigError(
            "Pass --token and --chat-id when not running in a terminal".into(),
        ));
    }

    let bot_token = match token {
        Some(t) => t,
        None => Password::new("Bot token:")
            .with_display_mode(PasswordDisplayMode::Masked)
            .without_confirmation()
            .with_help_message("From @BotFather, e.g. 123456789:ABC...")
            .prompt()
            .map_err(prompt_err)?,
    };
    let chat_id = match chat_id {
        Some(c) => c,
        None => Text::new("Chat ID:")
            .with_help_message("Message @userinfobot to find yours")
            .prompt()
            .map_err(prompt_err)?,
    };
    let proxy_url = match proxy {
        Some(p) => Some(p),
        None if interactive => {
            let p = Text::new("Proxy URL (optional):")
                .with_help_message("http://, socks5://... leave empty for a direct connection")
                .prompt()
                .map_err(prompt_err)?;
            Some(p)
        }
        None => None,
    }
    .map(|p| p.trim().to_string())
    .filter(|p| !p.is_empty());

    if bot_token.trim().is_empty() || chat_id.trim().is_empty() {
        return Err(TripwireError::ConfigError("Bot token and chat ID are required".into()));
    }
    if let Some(ref p) = proxy_url {
        if ProxyKind::from_url(p).is_none() {
            return Err(TripwireError::ConfigError(format!(
                "Unsupported proxy URL '{}'. Use http, https, socks4, socks4a, socks5 or socks5h",
                p
            )));
        }
    }

    let config = ChannelConfig {
        bot_token: bot_token.trim().to_string(),
        chat_id: chat_id.trim().to_string(),
        proxy_url,
    };

    let db = Database::open()?;
    db.set_channel_config(&config)?;

    println!("\n{} Telegram channel saved (token {})", "✓".green(), config.masked_token());
    println!("Test it with: tripwire notify test\n");
    Ok(())
}

/// Show the channel configuration with the token masked
pub fn cmd_notify_show() -> Result<()> {
    let db = Database::open()?;

    println!("\nNotification Settings\n");

    match db.channel_config()? {
        Some(config) => {
            println!("  Channel: Telegram");
            println!("  Token:   {}", config.masked_token());
            println!("  Chat ID: {}", config.chat_id);
            match config.proxy_url.as_deref().and_then(|p| ProxyKind::from_url(p).map(|k| (p, k))) {
                Some((p, kind)) => println!("  Proxy:   {} ({:?})", p, kind),
                None => println!("  Proxy:   none"),
            }
        }
        None => {
            println!("  No notification channel configured.");
            println!("  Run `tripwire notify set` to configure one.");
        }
    }
    println!();
    Ok(())
}

/// Check the bot token, then send a sample match message
pub fn cmd_notify_test() -> Result<()> {
    let db = Database::open()?;
    let Some(config) = db.channel_config()? else {
        println!("\nNo notification channel configured.");
        println!("Run `tripwire notify set` to configure one.");
        return Ok(());
    };

    let notifier = TelegramNotifier::new(&config);

    println!("\nChecking bot token...");
    let username = notifier.test_connection()?;
    println!("  Connected as @{}", username);

    println!("Sending test message...");
    let message = format_match_message(&MatchNotice {
        target_name: "Test target",
        url: "https://example.com",
        keyword: "test",
        matched_at: Local::now(),
        excerpt: Some("This is a test notification from tripwire."),
    });

    if notifier.send(&message) {
        println!("  {} Test message sent.", "✓".green());
        Ok(())
    } else {
        Err(TripwireError::DispatchError("Telegram did not accept the test message".into()))
    }
}

/// Remove the channel configuration
pub fn cmd_notify_clear() -> Result<()> {
    let db = Database::open()?;
    db.clear_channel_config()?;
    println!("Notification channel removed. Matches will be logged but not sent.");
    Ok(())
}
