use clap::{Parser, Subcommand, ValueEnum};

use crate::config::FetchMode;

/// Shell types for completion generation
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    Powershell,
}

/// Fetch mode override for a single invocation
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ModeArg {
    /// Plain HTTP, targets fetched concurrently
    Plain,
    /// Headless browser with anti-fingerprinting, one target at a time
    Stealth,
}

impl From<ModeArg> for FetchMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Plain => FetchMode::Plain,
            ModeArg::Stealth => FetchMode::Stealth,
        }
    }
}

/// How a target's page is turned into match text
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ExtractionArg {
    /// Match against the whole page
    Document,
    /// Split the page into posts and match each new post once
    Feed,
}

#[derive(Parser)]
#[command(name = "tripwire")]
#[command(author, version, about = "Keyword tripwires for web pages: fetch, match once, notify once", long_about = None)]
#[command(after_help = r#"Examples:
  tripwire target add https://example.com/news --name news     Register a page
  tripwire rule add news "price drop"                          Arm a keyword
  tripwire notify set --token 123:ABC --chat-id 42             Configure Telegram
  tripwire run                                                 Sweep once
  tripwire daemon                                              Sweep every tick

Quick Start:
  1. tripwire target add https://example.com --name example
  2. tripwire rule add example "sold out" --exact
  3. tripwire notify set
  4. tripwire daemon
"#)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage monitored pages
    #[command(subcommand, after_help = r#"Examples:
  tripwire target add https://shop.example/item --name item
  tripwire target add https://m.weibo.cn/u/123 --name feed --feed
  tripwire target list -v
  tripwire target edit item --url https://shop.example/item2
  tripwire target disable item
  tripwire target delete item -y
"#)]
    Target(TargetCommands),

    /// Manage keyword rules (each rule fires once and is then removed)
    #[command(subcommand, after_help = r#"Examples:
  tripwire rule add item restock "back in stock"
  tripwire rule add item cat --exact       Whole word only
  tripwire rule list item
  tripwire rule delete item restock
"#)]
    Rule(RuleCommands),

    /// Show the audit log
    #[command(after_help = r#"Examples:
  tripwire logs                   Last 50 entries
  tripwire logs --target item     Entries for one target
  tripwire logs -n 200 --json     JSON output for scripting
"#)]
    Logs {
        /// Only show entries for this target (name or ID)
        #[arg(long, short = 't')]
        target: Option<String>,

        /// Number of entries to show
        #[arg(long, short = 'n', default_value = "50")]
        limit: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Configure the Telegram notification channel
    #[command(subcommand)]
    Notify(NotifyCommands),

    /// Run one sweep over all enabled targets
    Run {
        /// Override the configured fetch mode
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// Output the sweep report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Sweep on a fixed tick until interrupted
    Daemon {
        /// Override the configured fetch mode
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
    },

    /// Check installation and configuration
    Doctor,

    /// Install Playwright and Chromium for stealth fetching
    EnableStealth,

    /// Generate shell completions
    #[command(after_help = r#"Examples:
  tripwire completions bash >> ~/.bashrc
  tripwire completions zsh >> ~/.zshrc
  tripwire completions fish > ~/.config/fish/completions/tripwire.fish
"#)]
    Completions {
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Subcommand)]
pub enum TargetCommands {
    /// Register a page to monitor
    Add {
        /// Page URL
        url: String,

        /// Display name (defaults to the host name)
        #[arg(long)]
        name: Option<String>,

        /// Nominal check interval (e.g., 30s, 5m, 2h)
        #[arg(long, default_value = "5m")]
        interval: String,

        /// Treat the page as a feed of posts
        #[arg(long)]
        feed: bool,

        /// Register without enabling
        #[arg(long)]
        disabled: bool,
    },

    /// List targets
    List {
        /// Show all details
        #[arg(short, long)]
        verbose: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one target with its armed rules
    Show {
        /// Target name or ID
        target: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Change a target
    Edit {
        /// Target name or ID
        target: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        url: Option<String>,

        /// Nominal check interval (e.g., 30s, 5m, 2h)
        #[arg(long)]
        interval: Option<String>,

        #[arg(long, value_enum)]
        extraction: Option<ExtractionArg>,
    },

    /// Include a target in sweeps
    Enable {
        /// Target name or ID
        target: String,
    },

    /// Exclude a target from sweeps
    Disable {
        /// Target name or ID
        target: String,
    },

    /// Delete a target with its rules and log entries
    Delete {
        /// Target name or ID
        target: String,

        /// Skip confirmation
        #[arg(short = 'y', long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
pub enum RuleCommands {
    /// Arm one or more keywords on a target
    Add {
        /// Target name or ID
        target: String,

        /// Keywords to watch for
        #[arg(required = true)]
        keywords: Vec<String>,

        /// Match whole words only (default is substring)
        #[arg(long)]
        exact: bool,
    },

    /// List armed rules
    List {
        /// Target name or ID (all targets when omitted)
        target: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Disarm a rule
    Delete {
        /// Target name or ID
        target: String,

        /// Rule ID or keyword
        rule: String,
    },
}

#[derive(Subcommand)]
pub enum NotifyCommands {
    /// Set the Telegram bot token, chat and optional proxy (prompts for missing values)
    Set {
        /// Bot token from @BotFather
        #[arg(long)]
        token: Option<String>,

        /// Chat ID to deliver to
        #[arg(long)]
        chat_id: Option<String>,

        /// Proxy URL (http://, https://, socks4://, socks5://, socks5h://)
        #[arg(long)]
        proxy: Option<String>,
    },

    /// Show the channel configuration (token masked)
    Show,

    /// Check the bot token and send a test message
    Test,

    /// Remove the channel configuration
    Clear,
}
