use anyhow::{bail, Context, Result};
use faceknn_core::search::DEFAULT_LEAF_SIZE;
use faceknn_core::{check_distance_threshold, SearchStrategy, DEFAULT_DISTANCE_THRESHOLD};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// CLI configuration: defaults, then an optional TOML file, then
/// `FACEKNN_*` environment variables. Command-line flags override last.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Where the trained index is written and read.
    pub model_path: PathBuf,
    /// Nearest-neighbor distance above which a face is "unknown".
    pub distance_threshold: f64,
    /// Search structure: `ball_tree`, `kd_tree`, `brute` or `auto`.
    pub search: String,
    pub leaf_size: usize,
    /// External embedding command and its arguments.
    pub provider_command: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_path: data_dir().join("index.json"),
            distance_threshold: DEFAULT_DISTANCE_THRESHOLD,
            search: "ball_tree".to_string(),
            leaf_size: DEFAULT_LEAF_SIZE,
            provider_command: vec!["faceknn-embed".to_string()],
        }
    }
}

impl Config {
    /// Load configuration from the config file (if any) and the process
    /// environment.
    pub fn load() -> Result<Self> {
        let mut config = match config_file_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        check_distance_threshold(config.distance_threshold)
            .with_context(|| format!("invalid distance_threshold in {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Apply `FACEKNN_*` overrides. Unparseable or out-of-range numbers keep
    /// the prior value.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(path) = var("FACEKNN_MODEL_PATH") {
            self.model_path = PathBuf::from(path);
        }
        if let Some(raw) = var("FACEKNN_DISTANCE_THRESHOLD") {
            match raw.parse::<f64>().map(check_distance_threshold) {
                Ok(Ok(t)) => self.distance_threshold = t,
                _ => tracing::warn!(value = %raw, "ignoring invalid FACEKNN_DISTANCE_THRESHOLD"),
            }
        }
        if let Some(search) = var("FACEKNN_SEARCH") {
            self.search = search;
        }
        if let Some(n) = var("FACEKNN_LEAF_SIZE").and_then(|v| v.parse().ok()) {
            self.leaf_size = n;
        }
        if let Some(cmd) = var("FACEKNN_PROVIDER_CMD") {
            let argv: Vec<String> = cmd.split_whitespace().map(str::to_string).collect();
            if !argv.is_empty() {
                self.provider_command = argv;
            }
        }
    }

    pub fn search_strategy(&self) -> Result<SearchStrategy> {
        parse_search(&self.search, self.leaf_size)
    }
}

/// Map a search name to a strategy. This is the only place strategy names
/// exist as strings.
pub fn parse_search(name: &str, leaf_size: usize) -> Result<SearchStrategy> {
    if leaf_size == 0 {
        bail!("leaf size must be at least 1");
    }
    match name {
        "brute" | "brute_force" => Ok(SearchStrategy::BruteForce),
        "kd_tree" => Ok(SearchStrategy::KdTree { leaf_size }),
        "ball_tree" | "auto" => Ok(SearchStrategy::BallTree { leaf_size }),
        other => bail!("unknown search strategy {other:?} (expected brute, kd_tree, ball_tree or auto)"),
    }
}

fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("FACEKNN_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".config")))
        .ok()?;
    Some(base.join("faceknn").join("config.toml"))
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("faceknn")
}
