//! Layered configuration for a tome library.
//!
//! Values are resolved in this order, later layers overriding earlier ones:
//!
//! 1. Built-in defaults, with paths under the platform's data and cache
//!    directories.
//! 2. An optional config file. The format is chosen by its extension: TOML,
//!    YAML (`.yaml`/`.yml`) or JSON.
//! 3. Environment variables prefixed `TOME_`. Nested keys are separated by a
//!    double underscore, e.g. `TOME_CONVERTER__WORKERS=8`.
//!
//! ```toml
//! root = "/srv/books"
//! output_template = "{{ authors_short|escape }}/{{ title|escape }}.{{ ext }}"
//! default_regexps = ["series", "author-title"]
//! durability = "normal"
//!
//! [regexps]
//! series = '^(?P<author>.+?) - \[(?P<series>[^\]]+)\] - (?P<title>.+)\.[^.]+$'
//!
//! [converter]
//! workers = 2
//! timeout = 300
//! ```

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tome_catalog::{Durability, PathGenerator};
use tome_extract::{EpubParser, MobiParser, RegexpParser};

pub const ENV_PREFIX: &str = "TOME_";

const DEFAULT_TEMPLATE: &str = "{{ authors_short|escape }}/{{ title|escape }}.{{ ext }}";
const DEFAULT_REGEXP_NAME: &str = "author-title";
/// `Author One & Author Two - Title (tag) (tag).ext`
const DEFAULT_REGEXP: &str = r"^(?P<author>.+?) - (?P<title>.+)\.[^.]+$";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Library directory every catalogued file lives under.
    pub root: PathBuf,
    /// SQLite catalog file.
    pub database: PathBuf,
    /// Directory converted EPUBs are cached in.
    pub cache: PathBuf,
    /// Filename template, see [`PathGenerator`].
    pub output_template: String,
    /// Named filename patterns for the regexp parser.
    pub regexps: BTreeMap<String, String>,
    /// Names from `regexps` to use, in priority order.
    pub default_regexps: Vec<String>,
    /// Metadata parsers to try, in priority order.
    pub metadata_parsers: Vec<String>,
    pub durability: Durability,
    pub converter: ConverterConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConverterConfig {
    /// Looked up on the `PATH` as `ebook-convert` when unset.
    pub program: Option<PathBuf>,
    /// Arguments placed before the input and output paths.
    pub args: Vec<String>,
    pub workers: usize,
    /// Seconds before a single conversion is killed. Unlimited when unset.
    pub timeout: Option<u64>,
}
impl ConverterConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }
}
impl Default for ConverterConfig {
    fn default() -> Self {
        Self { program: None, args: Vec::new(), workers: 4, timeout: None }
    }
}

impl Default for Config {
    fn default() -> Self {
        let (data, cache) = match ProjectDirs::from("org", "tome", "tome") {
            Some(dirs) => (dirs.data_dir().to_path_buf(), dirs.cache_dir().to_path_buf()),
            None => (PathBuf::from(".tome"), PathBuf::from(".tome/cache")),
        };
        Self {
            root: data.join("books"),
            database: data.join("books.db"),
            cache: cache.join("converted"),
            output_template: DEFAULT_TEMPLATE.to_string(),
            regexps: BTreeMap::from([(DEFAULT_REGEXP_NAME.to_string(), DEFAULT_REGEXP.to_string())]),
            default_regexps: vec![DEFAULT_REGEXP_NAME.to_string()],
            metadata_parsers: [RegexpParser::NAME, EpubParser::NAME, MobiParser::NAME].map(String::from).to_vec(),
            durability: Durability::default(),
            converter: ConverterConfig::default(),
        }
    }
}

impl Config {
    /// Loads and validates the configuration, optionally reading `file`.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let config: Self = Self::figment(file)?.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        tracing::debug!(root = %config.root.display(), database = %config.database.display(), "Configuration loaded");
        Ok(config)
    }

    /// The layered sources, without extracting or validating anything.
    pub fn figment(file: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(file) = file {
            let extension = file.extension().and_then(|e| e.to_str()).unwrap_or_default().to_ascii_lowercase();
            figment = match extension.as_str() {
                "toml" => figment.merge(Toml::file_exact(file)),
                "yaml" | "yml" => figment.merge(Yaml::file_exact(file)),
                "json" => figment.merge(Json::file_exact(file)),
                _ => exn::bail!(ErrorKind::UnsupportedFormat(file.display().to_string())),
            };
            // Missing files are silently empty to figment.
            if !file.is_file() {
                tracing::error!(file = %file.display(), "Configuration file not found");
                exn::bail!(ErrorKind::Load);
            }
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Regexps named in `default_regexps`, in that order.
    pub fn default_regexps(&self) -> Result<Vec<(&str, &str)>> {
        self.default_regexps
            .iter()
            .map(|name| match self.regexps.get(name) {
                Some(pattern) => Ok((name.as_str(), pattern.as_str())),
                None => exn::bail!(ErrorKind::Invalid(format!("regexp \"{name}\" is not defined"))),
            })
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        let regexps = self.default_regexps()?;
        let known = [RegexpParser::NAME, EpubParser::NAME, MobiParser::NAME];
        if let Some(unknown) = self.metadata_parsers.iter().find(|p| !known.contains(&p.as_str())) {
            exn::bail!(ErrorKind::Invalid(format!("unknown metadata parser \"{unknown}\"")));
        }
        if self.metadata_parsers.is_empty() {
            exn::bail!(ErrorKind::Invalid("no metadata parsers configured".to_string()));
        }
        if regexps.is_empty() && self.metadata_parsers.iter().any(|p| p == RegexpParser::NAME) {
            tracing::warn!("The regexp parser is enabled but no default regexps are configured");
        }
        RegexpParser::new(regexps).or_raise(|| ErrorKind::Invalid("malformed regexp".to_string()))?;
        if self.converter.workers == 0 {
            exn::bail!(ErrorKind::Invalid("converter.workers must be at least 1".to_string()));
        }
        self.output_template
            .parse::<PathGenerator>()
            .or_raise(|| ErrorKind::Invalid("output_template does not compile".to_string()))?;
        Ok(())
    }
}
