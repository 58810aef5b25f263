//! Configuration types and loading.
//!
//! Settings are merged from, in increasing precedence: built-in defaults, the
//! YAML config file, environment variables and command line flags.

use std::{
    collections::BTreeMap,
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use clap::Parser;
use figment::{
    providers::{Env, Format as _, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_with::{serde_as, DurationSecondsWithFrac};

use crate::{
    error::{NowPlayingError, Result},
    APP_NAME,
};

/// Port the OAuth callback listener binds to by default.
pub const DEFAULT_PORT: u16 = 18080;
/// Emoji used for the Typetalk status when none is configured.
pub const DEFAULT_STATUS_EMOJI: &str = ":musical_note:";

/// Environment variables parsed as typed values (matched case-insensitively).
const TYPED_ENV_KEYS: &[&str] = &["debug", "port", "topics", "poll_interval"];

/// Environment variables taken verbatim, so `00123` stays `00123`.
const STRING_ENV_KEYS: &[&str] = &[
    "typetalk_client_id",
    "typetalk_client_secret",
    "typetalk_space_key",
    "spotify_client_id",
    "spotify_client_secret",
    "status_emoji",
];

/// Command line flags.
///
/// Flags that were not given are left out when serialized, so they never
/// mask values coming from the environment or the config file.
#[derive(Debug, Default, Parser, Serialize)]
#[command(name = APP_NAME, version, about = "Post the Spotify track you are playing to Typetalk")]
pub struct Cli {
    /// Debug mode
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub debug: bool,

    /// Config file path
    #[arg(short, long, value_name = "PATH")]
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Typetalk client id [TYPETALK_CLIENT_ID]
    #[arg(long = "typetalk_client_id")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typetalk_client_id: Option<String>,

    /// Typetalk client secret [TYPETALK_CLIENT_SECRET]
    #[arg(long = "typetalk_client_secret")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typetalk_client_secret: Option<String>,

    /// Typetalk space key [TYPETALK_SPACE_KEY]
    #[arg(long = "typetalk_space_key")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typetalk_space_key: Option<String>,

    /// Spotify client id [SPOTIFY_CLIENT_ID]
    #[arg(long = "spotify_client_id")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spotify_client_id: Option<String>,

    /// Spotify client secret [SPOTIFY_CLIENT_SECRET]
    #[arg(long = "spotify_client_secret")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spotify_client_secret: Option<String>,

    /// Typetalk status emoji [STATUS_EMOJI] (default ":musical_note:")
    #[arg(long = "status_emoji")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_emoji: Option<String>,

    /// Port number for OAuth [PORT] (default 18080)
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Topic ID to post, repeatable [TOPICS]
    #[arg(long = "topic", value_name = "ID", value_delimiter = ',')]
    #[serde(rename = "topics", skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<u64>,
}

/// Main application configuration.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Enables debug logging.
    pub debug: bool,
    /// File the YAML layer was read from.
    #[serde(skip)]
    pub config_file: PathBuf,
    /// Typetalk application client ID.
    #[serde(deserialize_with = "string_from_scalar")]
    pub typetalk_client_id: String,
    /// Typetalk application client secret.
    #[serde(deserialize_with = "string_from_scalar")]
    pub typetalk_client_secret: String,
    /// Space the user status is saved in.
    #[serde(deserialize_with = "string_from_scalar")]
    pub typetalk_space_key: String,
    /// Spotify application client ID.
    #[serde(deserialize_with = "string_from_scalar")]
    pub spotify_client_id: String,
    /// Spotify application client secret.
    #[serde(deserialize_with = "string_from_scalar")]
    pub spotify_client_secret: String,
    /// Emoji for the user status and topic posts.
    #[serde(deserialize_with = "string_from_scalar")]
    pub status_emoji: String,
    /// Local port of the OAuth callback listener.
    pub port: u16,
    /// Topics every track change is posted to.
    pub topics: Vec<u64>,
    /// Interval between Spotify polls.
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            config_file: PathBuf::new(),
            typetalk_client_id: String::new(),
            typetalk_client_secret: String::new(),
            typetalk_space_key: String::new(),
            spotify_client_id: String::new(),
            spotify_client_secret: String::new(),
            status_emoji: DEFAULT_STATUS_EMOJI.to_string(),
            port: DEFAULT_PORT,
            topics: Vec::new(),
            poll_interval: default_poll_interval(),
        }
    }
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

/// Accept a bare number or boolean where a string is expected (`space_key: 12345`).
fn string_from_scalar<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Text(String),
        Unsigned(u64),
        Signed(i64),
        Float(f64),
        Bool(bool),
    }

    Ok(match Scalar::deserialize(deserializer)? {
        Scalar::Text(text) => text,
        Scalar::Unsigned(n) => n.to_string(),
        Scalar::Signed(n) => n.to_string(),
        Scalar::Float(n) => n.to_string(),
        Scalar::Bool(b) => b.to_string(),
    })
}

/// Environment layer for the string settings, skipping figment's value parsing.
fn string_env() -> Serialized<BTreeMap<String, String>> {
    let values = Env::raw()
        .only(STRING_ENV_KEYS)
        .iter()
        .map(|(key, value)| (key.as_str().to_string(), value))
        .collect();
    Serialized::globals(values)
}

impl Config {
    /// Load configuration for the given flags.
    ///
    /// Without `--config`, the default file inside `config_dir` is used and
    /// created empty when missing.
    pub fn load(cli: &Cli, config_dir: &Path) -> Result<Self> {
        let config_file = match &cli.config {
            Some(path) => path.clone(),
            None => default_config_file(config_dir)?,
        };

        // An empty file contributes nothing, and is not valid YAML for a map.
        let has_content = !fs::read_to_string(&config_file)?.trim().is_empty();
        let file_layer = has_content.then_some(config_file.as_path());

        let mut config = Self::figment(file_layer, cli)
            .extract::<Config>()
            .map_err(Box::new)?;
        config.config_file = config_file;
        config.validate()?;
        Ok(config)
    }

    /// Build the layered figment without extracting it.
    pub fn figment(config_file: Option<&Path>, cli: &Cli) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = config_file {
            figment = figment.merge(Yaml::file(path));
        }
        figment
            .merge(Env::raw().only(TYPED_ENV_KEYS))
            .merge(string_env())
            .merge(Serialized::globals(cli))
    }

    /// OAuth redirect URI served by the callback listener.
    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}/{}", self.port, APP_NAME)
    }

    fn validate(&self) -> Result<()> {
        let required = [
            ("typetalk_client_id", &self.typetalk_client_id),
            ("typetalk_client_secret", &self.typetalk_client_secret),
            ("typetalk_space_key", &self.typetalk_space_key),
            ("spotify_client_id", &self.spotify_client_id),
            ("spotify_client_secret", &self.spotify_client_secret),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(NowPlayingError::MissingSetting(key));
            }
        }
        Ok(())
    }
}

/// Per-user directory holding the config file and the token cache.
///
/// `$XDG_CONFIG_HOME/<app>` when set, otherwise `~/.<app>`.
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or(NowPlayingError::HomeDirNotFound)?;
    Ok(resolve_config_dir(std::env::var_os("XDG_CONFIG_HOME"), &home))
}

fn resolve_config_dir(xdg_config_home: Option<OsString>, home: &Path) -> PathBuf {
    match xdg_config_home {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir).join(APP_NAME),
        _ => home.join(format!(".{APP_NAME}")),
    }
}

/// Create the config directory (owner-only) if it does not exist.
pub fn ensure_config_dir(dir: &Path) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt as _;
        builder.mode(0o700);
    }
    builder.create(dir)?;
    Ok(())
}

/// `config.yaml` if present, else `config.yml`, which is created empty when missing.
pub fn default_config_file(dir: &Path) -> Result<PathBuf> {
    let yaml = dir.join("config.yaml");
    if yaml.exists() {
        return Ok(yaml);
    }
    let yml = dir.join("config.yml");
    if !yml.exists() {
        fs::File::create(&yml)?;
    }
    Ok(yml)
}
