//! Layered configuration for the filegate binary.
//!
//! Sources, lowest precedence first:
//!
//! 1. compiled defaults ([`Config::default`]),
//! 2. a configuration file (TOML, YAML or JSON, picked by extension),
//! 3. `FILEGATE_*` environment variables, with `__` separating nested keys
//!    (`FILEGATE_IO_CACHE__ENABLE_MEM=true`).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
pub use filegate_iocache::IoCacheConfig;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "FILEGATE_";
const CONFIG_FILE_NAME: &str = "filegate.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listen address handed to protocol front ends
    pub bind: String,
    /// SQLite database holding file, part and directory metadata
    pub db_file: PathBuf,
    /// Registered backend kind (`mem`, `localfile`, `chat-service`, `s3`)
    pub bot_kind: String,
    /// Parameters for the chosen backend, interpreted by its factory
    pub bot_config: Value,
    /// Byte rotation applied to every blob; reduced modulo 256
    pub rotate_stream: i64,
    pub io_cache: IoCacheConfig,
    /// Default `tracing` filter directive when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        let dirs = project_dirs();
        let data_dir = dirs.as_ref().map(|d| d.data_dir().to_path_buf()).unwrap_or_default();
        let cache_dir = dirs.as_ref().map(|d| d.cache_dir().to_path_buf()).unwrap_or_default();
        Self {
            bind: "127.0.0.1:9901".to_string(),
            db_file: data_dir.join("filegate.db"),
            bot_kind: "mem".to_string(),
            bot_config: Value::Object(Map::new()),
            rotate_stream: 0,
            io_cache: IoCacheConfig { file_cache_dir: cache_dir.join("io"), ..IoCacheConfig::default() },
            log_level: "info".to_string(),
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "filegate")
}

/// Where [`Config::load`] looks when no file is given.
pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

impl Config {
    /// Load and validate the configuration.
    ///
    /// An explicit `path` must exist. Without one, the default location is
    /// used if a file is present there.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) if !path.is_file() => exn::bail!(ErrorKind::NotFound(path.to_path_buf())),
            Some(path) => Some(path.to_path_buf()),
            None => default_config_path().filter(|path| path.is_file()),
        };
        let config = Self::from_figment(Self::figment(file.as_deref())?)?;
        tracing::debug!(file = ?file, bot_kind = %config.bot_kind, "Loaded configuration");
        Ok(config)
    }

    /// The layered sources, before extraction.
    pub fn figment(file: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(file) = file {
            let ext = file.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
            figment = match ext.as_deref() {
                Some("toml") => figment.merge(Toml::file(file)),
                Some("yaml" | "yml") => figment.merge(Yaml::file(file)),
                Some("json") => figment.merge(Json::file(file)),
                _ => exn::bail!(ErrorKind::UnsupportedFormat(file.to_path_buf())),
            };
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().or_raise(|| ErrorKind::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bot_kind.trim().is_empty() {
            exn::bail!(ErrorKind::Invalid("bot_kind must not be empty".to_string()));
        }
        let cache = &self.io_cache;
        if cache.enable_mem && cache.mem_key_count == 0 {
            exn::bail!(ErrorKind::Invalid("io_cache.mem_key_count must be positive".to_string()));
        }
        if cache.enable_file && cache.file_key_count == 0 {
            exn::bail!(ErrorKind::Invalid("io_cache.file_key_count must be positive".to_string()));
        }
        if cache.enable_file && cache.file_cache_dir.as_os_str().is_empty() {
            exn::bail!(ErrorKind::Invalid("io_cache.file_cache_dir is required".to_string()));
        }
        Ok(())
    }

    /// Rotation delta actually applied to blob bytes.
    pub fn rotation(&self) -> u8 {
        self.rotate_stream.rem_euclid(256) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;

    fn load_in(jail: &Jail, file: Option<&str>) -> std::result::Result<Config, String> {
        let path = file.map(|name| jail.directory().join(name));
        Config::figment(path.as_deref()).and_then(Config::from_figment).map_err(|e| e.to_string())
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bind, "127.0.0.1:9901");
        assert_eq!(config.bot_kind, "mem");
        assert_eq!(config.bot_config, Value::Object(Map::new()));
        assert_eq!(config.rotation(), 0);
        assert!(config.db_file.ends_with("filegate.db"));
        assert!(config.io_cache.file_cache_dir.ends_with("io"));
        assert!(!config.io_cache.enable_mem);
        assert_eq!(config.io_cache.mem_key_size_limit, 4096);
        config.validate().unwrap();
    }

    #[rstest]
    #[case(0, 0)]
    #[case(77, 77)]
    #[case(256, 0)]
    #[case(300, 44)]
    #[case(-1, 255)]
    fn test_rotation(#[case] rotate_stream: i64, #[case] expected: u8) {
        let config = Config { rotate_stream, ..Config::default() };
        assert_eq!(config.rotation(), expected);
    }

    #[test]
    fn test_toml_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "filegate.toml",
                r#"
                    bot_kind = "localfile"
                    rotate_stream = 77

                    [bot_config]
                    root = "/srv/blobs"
                    max_file_size = 1024

                    [io_cache]
                    enable_mem = true
                "#,
            )?;
            let config = load_in(jail, Some("filegate.toml"))?;
            assert_eq!(config.bot_kind, "localfile");
            assert_eq!(config.rotation(), 77);
            assert_eq!(config.bot_config["root"], "/srv/blobs");
            assert_eq!(config.bot_config["max_file_size"], 1024);
            assert!(config.io_cache.enable_mem);
            assert_eq!(config.io_cache.mem_key_count, 1000);
            assert_eq!(config.bind, "127.0.0.1:9901");
            Ok(())
        });
    }

    #[rstest]
    #[case::yaml("filegate.yaml", "bot_kind: s3\nlog_level: debug\n")]
    #[case::yml("filegate.yml", "bot_kind: s3\nlog_level: debug\n")]
    #[case::json("filegate.json", r#"{"bot_kind": "s3", "log_level": "debug"}"#)]
    fn test_other_formats(#[case] name: &str, #[case] contents: &str) {
        Jail::expect_with(|jail| {
            jail.create_file(name, contents)?;
            let config = load_in(jail, Some(name))?;
            assert_eq!(config.bot_kind, "s3");
            assert_eq!(config.log_level, "debug");
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("filegate.toml", "bot_kind = \"localfile\"\nbind = \"0.0.0.0:1\"\n")?;
            jail.set_env("FILEGATE_BIND", "0.0.0.0:2");
            jail.set_env("FILEGATE_IO_CACHE__ENABLE_FILE", "true");
            jail.set_env("FILEGATE_IO_CACHE__FILE_KEY_COUNT", "5");
            jail.set_env("FILEGATE_BOT_CONFIG__ROOT", "/data");
            let config = load_in(jail, Some("filegate.toml"))?;
            assert_eq!(config.bot_kind, "localfile");
            assert_eq!(config.bind, "0.0.0.0:2");
            assert!(config.io_cache.enable_file);
            assert_eq!(config.io_cache.file_key_count, 5);
            assert_eq!(config.bot_config["root"], "/data");
            Ok(())
        });
    }

    #[test]
    fn test_unsupported_extension() {
        let err = Config::figment(Some(Path::new("filegate.ini"))).err().unwrap();
        assert!(matches!(&*err, ErrorKind::UnsupportedFormat(_)));
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = Config::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[test]
    fn test_malformed_value() {
        Jail::expect_with(|jail| {
            jail.create_file("filegate.toml", "rotate_stream = \"lots\"\n")?;
            let path = jail.directory().join("filegate.toml");
            let err = Config::figment(Some(path.as_path())).and_then(Config::from_figment).unwrap_err();
            assert!(matches!(&*err, ErrorKind::Parse));
            Ok(())
        });
    }

    #[rstest]
    #[case::empty_kind(Config { bot_kind: " ".to_string(), ..Config::default() })]
    #[case::no_mem_keys(Config {
        io_cache: IoCacheConfig { enable_mem: true, mem_key_count: 0, ..IoCacheConfig::default() },
        ..Config::default()
    })]
    #[case::no_file_keys(Config {
        io_cache: IoCacheConfig {
            enable_file: true,
            file_key_count: 0,
            file_cache_dir: "/tmp/io".into(),
            ..IoCacheConfig::default()
        },
        ..Config::default()
    })]
    #[case::no_cache_dir(Config {
        io_cache: IoCacheConfig { enable_file: true, file_cache_dir: PathBuf::new(), ..IoCacheConfig::default() },
        ..Config::default()
    })]
    fn test_validation(#[case] config: Config) {
        let err = config.validate().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(_)));
    }

    #[test]
    fn test_disabled_tier_ignores_counts() {
        let config = Config {
            io_cache: IoCacheConfig { mem_key_count: 0, file_key_count: 0, ..IoCacheConfig::default() },
            ..Config::default()
        };
        config.validate().unwrap();
    }
}
