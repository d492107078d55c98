use anyhow::Result;
use std::collections::HashMap;

/// Full dispatch configuration loaded from environment / .env file.
/// Built at orchestrator entry, discarded at exit.
#[derive(Debug, Clone)]
pub struct Config {
    // Repository under automation
    pub owner: String,
    pub repo: String,

    // Identities
    pub bot_username: String,
    pub reviewer_username: String,

    // Tokens
    pub github_token: String,
    /// Separate identity for submitting reviews; falls back to the bot
    /// token when unset.
    pub reviewer_token: String,

    // Upstream endpoints
    pub api_base: String,

    // Project board
    pub project_number: u64,

    // Lifecycle tuning
    pub max_retries: u32,

    // Agent
    pub claude_bin: String,
    pub model: String,
    pub agent_timeout_s: u64,

    // Execution
    pub dry_run: bool,
}

fn parse_dotenv() -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Ok(contents) = std::fs::read_to_string(".env") else {
        return map;
    };
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            map.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    map
}

fn get(key: &str, dotenv: &HashMap<String, String>) -> Option<String> {
    std::env::var(key).ok().or_else(|| dotenv.get(key).cloned())
}

fn get_str(key: &str, dotenv: &HashMap<String, String>, default: &str) -> String {
    get(key, dotenv).unwrap_or_else(|| default.to_string())
}

fn get_bool(key: &str, dotenv: &HashMap<String, String>, default: bool) -> bool {
    match get(key, dotenv).as_deref() {
        Some("true") | Some("1") => true,
        Some("false") | Some("0") => false,
        Some(_) => default,
        None => default,
    }
}

fn get_u32(key: &str, dotenv: &HashMap<String, String>, default: u32) -> u32 {
    get(key, dotenv)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn get_u64(key: &str, dotenv: &HashMap<String, String>, default: u64) -> u64 {
    get(key, dotenv)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let dotenv = parse_dotenv();

        // GITHUB_REPOSITORY arrives as "owner/repo" in CI.
        let repository = get_str("GITHUB_REPOSITORY", &dotenv, "");
        let (owner, repo) = repository
            .split_once('/')
            .map(|(o, r)| (o.to_string(), r.to_string()))
            .unwrap_or_else(|| {
                (
                    get_str("NOPO_OWNER", &dotenv, ""),
                    get_str("NOPO_REPO", &dotenv, ""),
                )
            });

        let github_token = get_str("GITHUB_TOKEN", &dotenv, "");
        Ok(Self {
            owner,
            repo,
            bot_username: get_str("NOPO_BOT_USERNAME", &dotenv, "nopo-bot"),
            reviewer_username: get_str("NOPO_REVIEWER_USERNAME", &dotenv, "nopo-reviewer"),
            reviewer_token: get_str("NOPO_REVIEWER_TOKEN", &dotenv, &github_token),
            github_token,
            api_base: get_str("GITHUB_API_URL", &dotenv, "https://api.github.com"),
            project_number: get_u64("NOPO_PROJECT_NUMBER", &dotenv, 1),
            max_retries: get_u32("NOPO_MAX_RETRIES", &dotenv, 5),
            claude_bin: get_str("NOPO_CLAUDE_BIN", &dotenv, "claude"),
            model: get_str("NOPO_MODEL", &dotenv, ""),
            agent_timeout_s: get_u64("NOPO_AGENT_TIMEOUT_S", &dotenv, 300),
            dry_run: get_bool("NOPO_DRY_RUN", &dotenv, false),
        })
    }

    pub fn router(&self) -> crate::router::RouterConfig {
        crate::router::RouterConfig {
            bot_username: self.bot_username.clone(),
            reviewer_username: self.reviewer_username.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            owner: String::new(),
            repo: String::new(),
            bot_username: "nopo-bot".into(),
            reviewer_username: "nopo-reviewer".into(),
            github_token: String::new(),
            reviewer_token: String::new(),
            api_base: "https://api.github.com".into(),
            project_number: 1,
            max_retries: 5,
            claude_bin: "claude".into(),
            model: String::new(),
            agent_timeout_s: 300,
            dry_run: false,
        }
    }
}
