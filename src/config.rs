use anyhow::Result;
use clap::Parser;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "bibliodesk")]
#[command(about = "Runs the bibliodesk library service", long_about = None)]
pub struct Cli {
    #[arg(short = 'c', long = "config")]
    pub config_path: Option<String>,

    /// Overrides `app.port` from the config file.
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,
}

pub fn default_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".bibliodesk")
}

pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.yaml")
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct App {
    database: String,
    port: u16,
}

impl Default for App {
    fn default() -> Self {
        App {
            database: "library.db".to_string(),
            port: 8080,
        }
    }
}

impl App {
    pub fn get_db(&self) -> &str {
        &self.database
    }

    pub fn get_port(&self) -> u16 {
        self.port
    }

    pub fn set_port(&mut self, port: u16) {
        self.port = port;
    }
}

/// Lending rules applied by `/borrow`.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct LoanPolicy {
    pub max_outstanding: u32,
    pub loan_months: u32,
}

impl Default for LoanPolicy {
    fn default() -> Self {
        LoanPolicy {
            max_outstanding: 5,
            loan_months: 2,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Config {
    pub app: App,
    pub loans: LoanPolicy,
}

impl Config {
    pub fn new(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!(path = ?path, "config file not found, using defaults");
            return Ok(Config::default());
        }
        let yaml_str = fs::read_to_string(path)?;
        Config::parse(&yaml_str)
    }

    pub fn parse(yaml_str: &str) -> Result<Config> {
        let yaml_with_env = Config::substitute_env_vars(yaml_str);
        let config: Config = serde_yaml::from_str(&yaml_with_env)?;
        Ok(config)
    }

    /// Resolves the database file against `data_dir` unless it is absolute.
    pub fn database_path(&self, data_dir: &Path) -> PathBuf {
        let db = Path::new(self.app.get_db());
        if db.is_absolute() {
            db.to_path_buf()
        } else {
            data_dir.join(db)
        }
    }

    fn substitute_env_vars(yaml_str: &str) -> String {
        let mut result = String::with_capacity(yaml_str.len());
        let mut rest = yaml_str;

        while let Some(start) = rest.find("${") {
            let Some(len) = rest[start..].find('}') else {
                break;
            };
            result.push_str(&rest[..start]);

            let expr = &rest[start + 2..start + len];
            // ${VAR:-default}
            let value = match expr.split_once(":-") {
                Some((name, default)) => env::var(name).unwrap_or_else(|_| default.to_string()),
                None => env::var(expr).unwrap_or_else(|_| {
                    tracing::warn!("environment variable '{}' not found", expr);
                    String::new()
                }),
            };
            result.push_str(&value);
            rest = &rest[start + len + 1..];
        }

        result.push_str(rest);
        result
    }
}
