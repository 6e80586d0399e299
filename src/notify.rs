use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::{info, warn};

use crate::error::{Result, TripwireError};
use crate::model::ChannelConfig;
use crate::normalize::truncate_chars;

/// Telegram request timeout
const TELEGRAM_TIMEOUT_SECS: u64 = 30;

/// Longest record excerpt included in a notification
const EXCERPT_MAX_CHARS: usize = 500;

/// Delivers one message. Returns false on any failure; never retries.
pub trait Notifier: Send + Sync {
    fn send(&self, message: &str) -> bool;
}

/// Builds the notifier for a sweep from the channel config read at sweep start
pub trait NotifierFactory: Send + Sync {
    fn build(&self, config: &ChannelConfig) -> Box<dyn Notifier>;
}

impl<F> NotifierFactory for F
where
    F: Fn(&ChannelConfig) -> Box<dyn Notifier> + Send + Sync,
{
    fn build(&self, config: &ChannelConfig) -> Box<dyn Notifier> {
        self(config)
    }
}

/// Proxy family, chosen by URL scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyKind {
    /// HTTP CONNECT proxy (`http://`, `https://`)
    Forward,
    /// SOCKS proxy (`socks4://`, `socks4a://`, `socks5://`, `socks5h://`)
    Socks,
}

impl ProxyKind {
    /// None for an unparsable URL or an unsupported scheme
    pub fn from_url(proxy_url: &str) -> Option<Self> {
        let parsed = url::Url::parse(proxy_url).ok()?;
        match parsed.scheme() {
            "http" | "https" => Some(ProxyKind::Forward),
            "socks4" | "socks4a" | "socks5" | "socks5h" => Some(ProxyKind::Socks),
            _ => None,
        }
    }
}

/// Build a ureq proxy, mapping `socks5h` onto the SOCKS5 connector
fn build_proxy(proxy_url: &str) -> Result<ureq::Proxy> {
    let kind = ProxyKind::from_url(proxy_url)
        .ok_or_else(|| TripwireError::DispatchError(format!("Unsupported proxy URL: {}", proxy_url)))?;

    let normalized = match proxy_url.strip_prefix("socks5h://") {
        Some(rest) => format!("socks5://{}", rest),
        None => proxy_url.to_string(),
    };
    let proxy = ureq::Proxy::new(&normalized)
        .map_err(|e| TripwireError::DispatchError(format!("Invalid {:?} proxy: {}", kind, e)))?;
    Ok(proxy)
}

/// Proxy URL with any credentials stripped, for logs
fn redact_proxy(proxy_url: &str) -> String {
    match proxy_url.rsplit_once('@') {
        Some((head, host)) => {
            let scheme = head.split("://").next().unwrap_or("proxy");
            format!("{}://{}", scheme, host)
        }
        None => proxy_url.to_string(),
    }
}

/// Telegram Bot API sender
pub struct TelegramNotifier {
    bot_token: String,
    chat_id: String,
    /// Err holds why the transport could not be built
    agent: std::result::Result<ureq::Agent, String>,
}

impl TelegramNotifier {
    pub fn new(config: &ChannelConfig) -> Self {
        Self::with_timeout(config, Duration::from_secs(TELEGRAM_TIMEOUT_SECS))
    }

    pub fn with_timeout(config: &ChannelConfig, timeout: Duration) -> Self {
        Self {
            bot_token: config.bot_token.clone(),
            chat_id: config.chat_id.clone(),
            agent: build_agent(config.proxy_url.as_deref(), timeout).map_err(|e| e.to_string()),
        }
    }

    /// Factory used by the sweep engine
    pub fn boxed(config: &ChannelConfig) -> Box<dyn Notifier> {
        Box::new(Self::new(config))
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{}", self.bot_token, method)
    }

    fn agent(&self) -> Result<&ureq::Agent> {
        self.agent
            .as_ref()
            .map_err(|e| TripwireError::DispatchError(e.clone()))
    }

    fn post_message(&self, message: &str) -> Result<()> {
        let payload = serde_json::json!({
            "chat_id": self.chat_id,
            "text": message,
            "parse_mode": "HTML",
        });

        self.agent()?
            .post(&self.api_url("sendMessage"))
            .header("Content-Type", "application/json")
            .send_json(&payload)?;
        Ok(())
    }

    /// Call getMe and return the bot's username
    pub fn test_connection(&self) -> Result<String> {
        let response = self.agent()?.get(&self.api_url("getMe")).call()?;
        let body: serde_json::Value = response.into_body().read_json()?;

        if body["ok"].as_bool() != Some(true) {
            return Err(TripwireError::DispatchError(
                body["description"].as_str().unwrap_or("getMe failed").to_string(),
            ));
        }
        Ok(body["result"]["username"].as_str().unwrap_or("unknown").to_string())
    }
}

fn build_agent(proxy_url: Option<&str>, timeout: Duration) -> Result<ureq::Agent> {
    let mut builder = ureq::Agent::config_builder().timeout_global(Some(timeout));
    if let Some(proxy_url) = proxy_url.filter(|p| !p.trim().is_empty()) {
        let proxy = build_proxy(proxy_url)?;
        info!(proxy = %redact_proxy(proxy_url), "telegram via proxy");
        builder = builder.proxy(Some(proxy));
    }
    Ok(builder.build().into())
}

impl Notifier for TelegramNotifier {
    fn send(&self, message: &str) -> bool {
        match self.post_message(message) {
            Ok(()) => {
                info!("telegram message sent");
                true
            }
            Err(TripwireError::HttpError(ureq::Error::StatusCode(code))) => {
                warn!(status = code, "telegram rejected message");
                false
            }
            Err(e) => {
                warn!(error = %e, "telegram send failed");
                false
            }
        }
    }
}

/// Escape text for Telegram's HTML parse mode
pub fn html_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// What a match notification reports
#[derive(Debug, Clone)]
pub struct MatchNotice<'a> {
    pub target_name: &'a str,
    pub url: &'a str,
    pub keyword: &'a str,
    pub matched_at: DateTime<Local>,
    /// Text of the matching feed record, if any
    pub excerpt: Option<&'a str>,
}

/// Build the HTML notification body
pub fn format_match_message(notice: &MatchNotice) -> String {
    let mut message = format!(
        "🔔 <b>Keyword alert</b>\n\n\
         📌 <b>Target:</b> {}\n\
         🔗 <b>URL:</b> {}\n\
         🔑 <b>Keyword:</b> {}\n\
         ⏰ <b>Time:</b> {}\n\n",
        html_escape(notice.target_name),
        html_escape(notice.url),
        html_escape(notice.keyword),
        notice.matched_at.format("%Y-%m-%d %H:%M:%S"),
    );

    if let Some(excerpt) = notice.excerpt {
        message.push_str(&format!(
            "📝 <b>Post:</b>\n{}\n\n",
            html_escape(&truncate_chars(excerpt, EXCERPT_MAX_CHARS))
        ));
    }

    message.push_str("⚠️ This keyword has been removed and will not fire again.");
    message
}
