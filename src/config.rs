//! Run configuration and the on-disk directory layout.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

pub const DEFAULT_PAGE_SIZE: usize = 500;

/// Settings read from `~/.config/rxiv-trends/config.toml` (or a path given
/// with `--config`). Every key is optional; CLI flags override file values.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    pub figshare_token: Option<String>,
    pub page_size: Option<usize>,
    /// Oldest day fetched by the bioRxiv walk, `YYYY-MM-DD`.
    pub biorxiv_stop: Option<String>,
}

impl Config {
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => {
                let raw = fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("cannot read {}: {e}", path.display()))
                })?;
                Self::parse(&raw, path)
            }
            None => {
                let path = default_path();
                match fs::read_to_string(&path) {
                    Ok(raw) => Self::parse(&raw, &path),
                    // A missing default config just means defaults.
                    Err(_) => Ok(Self::default()),
                }
            }
        }
    }

    fn parse(raw: &str, path: &Path) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Resolve the figshare token: CLI flag first, then the config file.
    pub fn figshare_token(&self, cli: Option<String>) -> Result<String> {
        cli.or_else(|| self.figshare_token.clone()).ok_or_else(|| {
            Error::Config(
                "no figshare token: pass --token or set figshare_token in the config file"
                    .to_string(),
            )
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size.unwrap_or(DEFAULT_PAGE_SIZE)
    }
}

fn default_path() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(".config")
        .join("rxiv-trends")
        .join("config.toml")
}

/// Cache and output layout under the run's data directory. Computed once per
/// run from the CLI `datadir` and passed into each component; never mutated.
#[derive(Debug, Clone)]
pub struct Dirs {
    datadir: PathBuf,
}

impl Dirs {
    pub fn new(datadir: PathBuf) -> Self {
        Self { datadir }
    }

    /// Per-institution figshare caches live under here.
    pub fn figshare_root(&self) -> PathBuf {
        self.datadir.join("figshare")
    }

    pub fn biorxiv_root(&self) -> PathBuf {
        self.datadir.join("biorxiv")
    }

    /// One JSON file per calendar day, `metadata/{year}/{month}/{date}.json`.
    pub fn biorxiv_metadata(&self) -> PathBuf {
        self.biorxiv_root().join("metadata")
    }

    /// One JSON file per article DOI.
    pub fn biorxiv_articles(&self) -> PathBuf {
        self.biorxiv_root().join("articles")
    }
}
