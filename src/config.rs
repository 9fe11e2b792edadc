use std::time::Duration;

pub const DEFAULT_PER_PAGE: u32 = 10;
pub const DEFAULT_REFRESH_DELAY: Duration = Duration::from_millis(100);
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

/// Views that get reloaded when a session closes with changes.
/// `*` matches one path segment, `{subject}` the session's subject id.
pub const DEFAULT_REFRESHABLE_VIEWS: &[&str] = &["/", "/feed", "/explore", "/profile/*", "/posts/{subject}"];

fn usize_env(name: &str, default: usize) -> usize { std::env::var(name).ok().and_then(|v| v.trim().parse().ok()).unwrap_or(default) }
fn bool_env(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

/// Per-session knobs.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub per_page: u32,
    pub refresh_delay: Duration,
    pub always_refresh: bool,
    pub refreshable_views: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            per_page: DEFAULT_PER_PAGE,
            refresh_delay: DEFAULT_REFRESH_DELAY,
            always_refresh: false,
            refreshable_views: DEFAULT_REFRESHABLE_VIEWS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let refreshable_views = match std::env::var("QUILL_REFRESHABLE_VIEWS") {
            Ok(v) => v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect(),
            Err(_) => d.refreshable_views,
        };
        Self {
            per_page: (usize_env("QUILL_PER_PAGE", d.per_page as usize) as u32).max(1),
            refresh_delay: Duration::from_millis(usize_env("QUILL_REFRESH_DELAY_MS", d.refresh_delay.as_millis() as usize) as u64),
            always_refresh: bool_env("QUILL_ALWAYS_REFRESH", d.always_refresh),
            refreshable_views,
        }
    }
}

/// Where the comment backend lives.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub cache_ttl: Duration,
}

impl ApiConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into().trim_end_matches('/').to_string(), token: None, cache_ttl: DEFAULT_CACHE_TTL }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let base = std::env::var("QUILL_API_BASE")
            .map_err(|_| anyhow::anyhow!("QUILL_API_BASE must be set (comment backend base URL)"))?;
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            anyhow::bail!("QUILL_API_BASE must be an http(s) URL, got '{base}'");
        }
        let mut cfg = Self::new(base);
        cfg.token = std::env::var("QUILL_API_TOKEN").ok().filter(|t| !t.trim().is_empty());
        cfg.cache_ttl = Duration::from_secs(usize_env("QUILL_CACHE_TTL_SECS", DEFAULT_CACHE_TTL.as_secs() as usize) as u64);
        Ok(cfg)
    }
}
