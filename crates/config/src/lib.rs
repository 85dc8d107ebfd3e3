//! Layered configuration for ossdav.
//!
//! Sources are merged in order, later sources winning:
//!
//! 1. built-in defaults,
//! 2. `config.{toml,yaml,json}` in the platform config directory,
//! 3. an explicit configuration file,
//! 4. environment variables prefixed with `OSSDAV_`, nested keys split on
//!    `__` (`OSSDAV_MOUNT__BUCKET=photos`).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "OSSDAV_";
const STATE_FILE: &str = "mount-state.json";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "ossdav")
}

/// Bucket to mount and the credentials to reach it.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    pub region: String,
    pub bucket: String,
    /// Custom endpoint for S3-compatible services. When unset, `oss-*`
    /// regions resolve to their public Alibaba Cloud endpoint.
    pub endpoint: Option<String>,
    /// Key prefix acting as the mount root.
    pub prefix: Option<String>,
    pub key_id: String,
    pub key_secret: String,
}
impl fmt::Debug for MountConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountConfig")
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("endpoint", &self.endpoint)
            .field("prefix", &self.prefix)
            .field("key_id", &self.key_id)
            .field("key_secret", &"<redacted>")
            .finish()
    }
}
impl MountConfig {
    /// Configured prefix, with an empty one treated as unset.
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref().map(|p| p.trim_end_matches('/')).filter(|p| !p.is_empty())
    }

    /// Endpoint to send requests to, if the SDK shouldn't pick one.
    pub fn endpoint_url(&self) -> Option<String> {
        match &self.endpoint {
            Some(endpoint) => Some(endpoint.clone()),
            None if self.region.starts_with("oss-") => Some(format!("https://{}.aliyuncs.com", self.region)),
            None => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mount: MountConfig,
    /// Refuse every mutation at the object store.
    pub read_only: bool,
    /// Treat deleting a path with nothing under it as not-found.
    pub strict_delete: bool,
    /// Mount state file. Defaults to the platform data directory.
    pub state: Option<PathBuf>,
}

impl Config {
    /// Load from the default sources plus an optional explicit file.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut loader = Loader::new();
        if let Some(file) = file {
            loader = loader.with_file(file);
        }
        loader.load()
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| exn::Exn::from(ErrorKind::Invalid(message.to_string()));
        if self.mount.region.trim().is_empty() {
            return Err(invalid("mount.region must be set"));
        }
        if self.mount.bucket.trim().is_empty() {
            return Err(invalid("mount.bucket must be set"));
        }
        if self.mount.key_id.is_empty() || self.mount.key_secret.is_empty() {
            return Err(invalid("mount.key_id and mount.key_secret must be set"));
        }
        if self.mount.endpoint.as_deref().is_some_and(|e| e.trim().is_empty()) {
            return Err(invalid("mount.endpoint must not be empty when set"));
        }
        if let Some(prefix) = self.mount.prefix() {
            ossdav_storage::validate_key(prefix)
                .or_raise(|| ErrorKind::Invalid(format!("mount.prefix {prefix:?} is not a usable key prefix")))?;
        }
        Ok(())
    }

    /// Where the mount state lives, if anywhere.
    pub fn state_path(&self) -> Option<PathBuf> {
        self.state.clone().or_else(|| project_dirs().map(|dirs| dirs.data_dir().join(STATE_FILE)))
    }
}

/// Builder over the configuration sources.
#[derive(Debug, Clone)]
pub struct Loader {
    config_dir: Option<PathBuf>,
    file: Option<PathBuf>,
    env_prefix: String,
}
impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

impl Loader {
    pub fn new() -> Self {
        Self {
            config_dir: project_dirs().map(|dirs| dirs.config_dir().to_path_buf()),
            file: None,
            env_prefix: ENV_PREFIX.to_string(),
        }
    }

    /// Look for `config.{toml,yaml,json}` in `dir` instead of the platform
    /// config directory.
    pub fn with_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = Some(dir.into());
        self
    }

    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// The merged provider stack, before extraction.
    pub fn figment(&self) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(dir) = &self.config_dir {
            tracing::debug!(dir = %dir.display(), "Looking for configuration files");
            figment = figment
                .merge(Toml::file(dir.join("config.toml")))
                .merge(Yaml::file(dir.join("config.yaml")))
                .merge(Json::file(dir.join("config.json")));
        }
        if let Some(file) = &self.file {
            // Files from the config directory are optional; this one isn't.
            if !file.is_file() {
                exn::bail!(ErrorKind::Invalid(format!("configuration file {} does not exist", file.display())));
            }
            figment = match file.extension().and_then(OsStr::to_str) {
                Some("yaml" | "yml") => figment.merge(Yaml::file(file)),
                Some("json") => figment.merge(Json::file(file)),
                _ => figment.merge(Toml::file(file)),
            };
        }
        Ok(figment.merge(Env::prefixed(&self.env_prefix).split("__")))
    }

    /// Merge, extract and validate.
    pub fn load(&self) -> Result<Config> {
        let config: Config = self.figment()?.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        tracing::debug!(bucket = %config.mount.bucket, read_only = config.read_only, "Configuration loaded");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;
    use tempfile::TempDir;

    const PREFIX: &str = "OSSDAV_CONFIG_TEST_";

    fn valid() -> Config {
        Config {
            mount: MountConfig {
                region: "oss-cn-hangzhou".to_string(),
                bucket: "photos".to_string(),
                key_id: "id".to_string(),
                key_secret: "secret".to_string(),
                ..MountConfig::default()
            },
            ..Config::default()
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(valid().validate().is_ok());
    }

    #[rstest]
    #[case::no_region(|c: &mut Config| c.mount.region.clear())]
    #[case::blank_bucket(|c: &mut Config| c.mount.bucket = "  ".to_string())]
    #[case::no_secret(|c: &mut Config| c.mount.key_secret.clear())]
    #[case::empty_endpoint(|c: &mut Config| c.mount.endpoint = Some(String::new()))]
    #[case::escaping_prefix(|c: &mut Config| c.mount.prefix = Some("../other".to_string()))]
    #[case::double_slash_prefix(|c: &mut Config| c.mount.prefix = Some("a//b".to_string()))]
    fn test_invalid_config(#[case] breaks: fn(&mut Config)) {
        let mut config = valid();
        breaks(&mut config);
        let err = config.validate().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(_)));
    }

    #[rstest]
    #[case(None, None)]
    #[case(Some(""), None)]
    #[case(Some("/"), None)]
    #[case(Some("team/"), Some("team"))]
    #[case(Some("team/shared"), Some("team/shared"))]
    fn test_prefix_normalization(#[case] prefix: Option<&str>, #[case] expected: Option<&str>) {
        let mount = MountConfig { prefix: prefix.map(str::to_string), ..MountConfig::default() };
        assert_eq!(mount.prefix(), expected);
    }

    #[rstest]
    #[case("oss-cn-hangzhou", None, Some("https://oss-cn-hangzhou.aliyuncs.com"))]
    #[case("oss-cn-hangzhou", Some("http://localhost:9000"), Some("http://localhost:9000"))]
    #[case("eu-west-1", None, None)]
    fn test_endpoint_url(#[case] region: &str, #[case] endpoint: Option<&str>, #[case] expected: Option<&str>) {
        let mount =
            MountConfig { region: region.to_string(), endpoint: endpoint.map(str::to_string), ..MountConfig::default() };
        assert_eq!(mount.endpoint_url().as_deref(), expected);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let debug = format!("{:?}", valid());
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("\"secret\""));
    }

    #[test]
    fn test_explicit_state_path_wins() {
        let config = Config { state: Some(PathBuf::from("/tmp/state.json")), ..valid() };
        assert_eq!(config.state_path(), Some(PathBuf::from("/tmp/state.json")));
    }

    #[test]
    fn test_missing_explicit_file() {
        let dir = TempDir::new().unwrap();
        let loader = Loader::new().with_config_dir(dir.path()).with_file(dir.path().join("absent.toml"));
        let err = loader.load().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(_)));
    }

    #[test]
    fn test_missing_bucket_fails_validation() {
        let dir = TempDir::new().unwrap();
        let err = Loader::new().with_config_dir(dir.path()).with_env_prefix(PREFIX).load().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(_)));
    }

    #[test]
    fn test_layers_merge_in_order() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                read_only = true

                [mount]
                region = "oss-cn-hangzhou"
                bucket = "from-config-dir"
                key_id = "id"
                key_secret = "secret"
                "#,
            )?;
            jail.create_file("override.yaml", "mount:\n  bucket: from-explicit-file\n  prefix: team/\n")?;
            jail.set_env("OSSDAV_CONFIG_TEST_MOUNT__KEY_SECRET", "from-env");
            jail.set_env("OSSDAV_CONFIG_TEST_STRICT_DELETE", "true");

            let config = Loader::new()
                .with_config_dir(jail.directory())
                .with_file(jail.directory().join("override.yaml"))
                .with_env_prefix(PREFIX)
                .load()
                .unwrap();
            assert_eq!(config.mount.region, "oss-cn-hangzhou");
            assert_eq!(config.mount.bucket, "from-explicit-file");
            assert_eq!(config.mount.prefix(), Some("team"));
            assert_eq!(config.mount.key_secret, "from-env");
            assert!(config.read_only);
            assert!(config.strict_delete);
            assert_eq!(config.state, None);
            Ok(())
        });
    }

    #[test]
    fn test_json_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "mount.json",
                r#"{"mount":{"region":"r","bucket":"b","key_id":"i","key_secret":"s","endpoint":"http://localhost:9000"},"state":"state.json"}"#,
            )?;
            let config = Loader::new()
                .with_config_dir(jail.directory().join("nothing-here"))
                .with_file(jail.directory().join("mount.json"))
                .with_env_prefix(PREFIX)
                .load()
                .unwrap();
            assert_eq!(config.mount.endpoint.as_deref(), Some("http://localhost:9000"));
            assert_eq!(config.state_path(), Some(PathBuf::from("state.json")));
            Ok(())
        });
    }

    #[test]
    fn test_malformed_file_is_load_error() {
        Jail::expect_with(|jail| {
            jail.create_file("broken.toml", "[mount\nbucket = ")?;
            let err = Loader::new()
                .with_config_dir(jail.directory().join("nothing-here"))
                .with_file(jail.directory().join("broken.toml"))
                .with_env_prefix(PREFIX)
                .load()
                .unwrap_err();
            assert!(matches!(&*err, ErrorKind::Load));
            Ok(())
        });
    }
}
