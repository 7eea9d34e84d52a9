use std::path::{Path, PathBuf};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{
    Error, Result,
    env_subst::substitute_env,
    schema::BeaconConfig,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["beacon.toml", "beacon.yaml", "beacon.yml", "beacon.json"];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<BeaconConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            Error::Read {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// A loaded config together with the file it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: BeaconConfig,
    pub path: Option<PathBuf>,
}

/// Load config from `explicit` when given, otherwise from standard locations.
///
/// Search order:
/// 1. `./beacon.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/beacon/beacon.{toml,yaml,yml,json}` (user-global)
///
/// Falls back to `BeaconConfig::default()` when no file exists. Environment
/// overrides are applied last in every case. A file that exists but fails to
/// parse is an error, not a silent fallback.
pub fn discover_and_load(explicit: Option<&Path>) -> Result<LoadedConfig> {
    let path = match explicit {
        Some(p) => Some(p.to_path_buf()),
        None => find_config_file(),
    };

    let mut config = match &path {
        Some(p) => {
            debug!(path = %p.display(), "loading config");
            load_config(p)?
        },
        None => {
            debug!("no config file found, using defaults");
            BeaconConfig::default()
        },
    };

    apply_env_overrides(&mut config);
    Ok(LoadedConfig { config, path })
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let config_dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| config_dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/beacon/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "beacon").map(|d| d.config_dir().to_path_buf())
}

/// Overlay well-known environment variables onto `config`.
pub fn apply_env_overrides(config: &mut BeaconConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

fn apply_env_overrides_with(config: &mut BeaconConfig, lookup: impl Fn(&str) -> Option<String>) {
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(key) = get("VAPID_PUBLIC_KEY").or_else(|| get("NEXT_PUBLIC_VAPID_PUBLIC_KEY")) {
        config.push.vapid_public_key = Some(key.trim_end_matches('=').to_string());
    }
    if let Some(key) = get("VAPID_PRIVATE_KEY") {
        config.push.vapid_private_key = Some(Secret::new(key.trim_end_matches('=').to_string()));
    }
    if let Some(subject) = get("VAPID_SUBJECT") {
        config.push.subject = subject;
    }
    if let Some(token) = get("TELEGRAM_BOT_TOKEN") {
        config.telegram.token = Some(Secret::new(token));
    }
    if let Some(url) = get("BEACON_DATABASE_URL") {
        config.database.url = url;
    }
    if let Some(raw) = get("PUSH_POLL_INTERVAL") {
        match raw.parse::<u64>() {
            Ok(secs) if secs > 0 => config.daemon.poll_interval_secs = secs,
            _ => warn!(value = %raw, "ignoring invalid PUSH_POLL_INTERVAL"),
        }
    }
}

fn parse_config(raw: &str, path: &Path) -> Result<BeaconConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        other => Err(Error::UnsupportedFormat {
            extension: other.to_string(),
        }),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, secrecy::ExposeSecret, std::io::Write};

    #[test]
    fn loads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("beacon.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "[daemon]\npoll_interval_secs = 7\n[push]\nconcurrency = 3").unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.daemon.poll_interval_secs, 7);
        assert_eq!(cfg.push.concurrency, 3);
        assert_eq!(cfg.push.ttl_secs, 86_400);
    }

    #[test]
    fn loads_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("beacon.yaml");
        std::fs::write(&path, "telegram:\n  mode: both\n  batch_limit: 50\n").unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.telegram.mode, crate::IngestMode::Both);
        assert_eq!(cfg.telegram.batch_limit, 50);
    }

    #[test]
    fn explicit_missing_path_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover_and_load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("beacon.toml");
        std::fs::write(&path, "[daemon\npoll_interval_secs = ").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("beacon.ini");
        std::fs::write(&path, "x=1").unwrap();
        assert!(matches!(
            load_config(&path).unwrap_err(),
            Error::UnsupportedFormat { .. }
        ));
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = BeaconConfig::default();
        let lookup = |name: &str| match name {
            "NEXT_PUBLIC_VAPID_PUBLIC_KEY" => Some("BPUB==".to_string()),
            "VAPID_PRIVATE_KEY" => Some("priv".to_string()),
            "TELEGRAM_BOT_TOKEN" => Some("123:ABC".to_string()),
            "PUSH_POLL_INTERVAL" => Some("12".to_string()),
            "VAPID_SUBJECT" => Some("   ".to_string()),
            _ => None,
        };
        apply_env_overrides_with(&mut cfg, lookup);

        assert_eq!(cfg.push.vapid_public_key.as_deref(), Some("BPUB"));
        assert_eq!(
            cfg.push.vapid_private_key.as_ref().unwrap().expose_secret(),
            "priv"
        );
        assert_eq!(
            cfg.telegram.token.as_ref().unwrap().expose_secret(),
            "123:ABC"
        );
        assert_eq!(cfg.daemon.poll_interval_secs, 12);
        // blank values are ignored
        assert_eq!(cfg.push.subject, "mailto:admin@example.com");
    }

    #[test]
    fn invalid_interval_is_ignored() {
        let mut cfg = BeaconConfig::default();
        apply_env_overrides_with(&mut cfg, |name| {
            (name == "PUSH_POLL_INTERVAL").then(|| "soon".to_string())
        });
        assert_eq!(cfg.daemon.poll_interval_secs, 30);
    }
}
