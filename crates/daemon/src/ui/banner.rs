//! Startup banner printed to the terminal.

const RULE_WIDTH: usize = 72;

/// Where the capability token came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenOrigin {
    Generated,
    Configured,
}

impl TokenOrigin {
    fn label(self) -> &'static str {
        match self {
            TokenOrigin::Generated => "auto-generated",
            TokenOrigin::Configured => "user-specified",
        }
    }
}

/// Everything shown at startup.
#[derive(Debug, Clone)]
pub struct Banner {
    pub root: String,
    pub url: String,
    pub token_origin: TokenOrigin,
    pub ttl_minutes: u64,
    pub idle_minutes: u64,
    pub access_log: Option<String>,
    /// `None` when every address is allowed.
    pub allow_list: Option<String>,
    pub read_only: bool,
    /// Pre-rendered QR code, if enabled.
    pub qr: Option<String>,
}

fn minutes(value: u64) -> String {
    if value == 0 {
        "disabled".to_string()
    } else {
        format!("{value} minutes")
    }
}

impl Banner {
    pub fn render(&self) -> String {
        let rule = "=".repeat(RULE_WIDTH);
        let mut lines = vec![
            String::new(),
            format!("  LanShare v{}", env!("CARGO_PKG_VERSION")),
            rule.clone(),
            format!("  Root:     {}", self.root),
            format!("  URL:      {}", self.url),
            format!("  Token:    {}", self.token_origin.label()),
            format!("  TTL:      {}", minutes(self.ttl_minutes)),
            format!("  Idle:     {}", minutes(self.idle_minutes)),
        ];
        if let Some(log) = &self.access_log {
            lines.push(format!("  Log:      {log}"));
        }
        if let Some(allow) = &self.allow_list {
            lines.push(format!("  IP Allow: {allow}"));
        }
        if self.read_only {
            lines.push("  Mode:     READ ONLY (uploads disabled)".to_string());
        }
        lines.push(rule);

        let mut out = lines.join("\n");
        out.push('\n');
        if let Some(qr) = &self.qr {
            out.push_str(qr);
        }
        out.push_str("  Press Ctrl+C to stop.\n");
        out
    }
}
