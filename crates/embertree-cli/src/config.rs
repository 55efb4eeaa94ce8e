//! Configuration file support
//!
//! `embertree serve` reads an optional TOML file:
//!
//! ```toml
//! listen = "0.0.0.0:9000"
//! name = "Studio A router"
//! tree = "trees/studio-a.json"
//! max_sessions = 32
//! ```
//!
//! Values given on the command line take precedence.

use anyhow::{bail, Context, Result};
use embertree_core::DEFAULT_PORT;
use embertree_server::ServerConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_HOST: &str = "0.0.0.0";

/// Contents of a configuration file
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Listen address, `host:port`
    pub listen: Option<String>,
    pub name: Option<String>,
    /// Tree description; relative paths resolve against the file's directory
    pub tree: Option<PathBuf>,
    pub max_sessions: Option<usize>,
    pub max_frame_size: Option<usize>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config = Self::parse(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))?;

        if let (Some(tree), Some(dir)) = (&config.tree, path.parent()) {
            if tree.is_relative() {
                config.tree = Some(dir.join(tree));
            }
        }
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

/// `serve` options given on the command line
#[derive(Debug, Clone, Default)]
pub struct ServeOverrides {
    pub tree: Option<PathBuf>,
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub name: Option<String>,
    pub max_sessions: Option<usize>,
}

/// Effective settings for `serve`
#[derive(Debug, Clone)]
pub struct ServeSettings {
    pub listen: String,
    pub tree: Option<PathBuf>,
    pub server: ServerConfig,
}

impl ServeSettings {
    pub fn resolve(file: FileConfig, overrides: ServeOverrides) -> Result<Self> {
        let (mut host, mut port) = match &file.listen {
            Some(listen) => split_listen(listen)?,
            None => (DEFAULT_HOST.to_string(), DEFAULT_PORT),
        };
        if let Some(bind) = overrides.bind {
            host = bind;
        }
        if let Some(p) = overrides.port {
            port = p;
        }

        let mut server = ServerConfig::default();
        if let Some(name) = overrides.name.or(file.name) {
            server.name = name;
        }
        if let Some(max) = overrides.max_sessions.or(file.max_sessions) {
            server.max_sessions = max;
        }
        if let Some(size) = file.max_frame_size {
            server.max_frame_size = size;
        }

        Ok(Self {
            listen: format!("{}:{}", host, port),
            tree: overrides.tree.or(file.tree),
            server,
        })
    }
}

fn split_listen(listen: &str) -> Result<(String, u16)> {
    let Some((host, port)) = listen.rsplit_once(':') else {
        bail!("listen address '{}' has no port", listen);
    };
    let port = port
        .parse()
        .with_context(|| format!("invalid port in listen address '{}'", listen))?;
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = ServeSettings::resolve(FileConfig::default(), ServeOverrides::default()).unwrap();
        assert_eq!(settings.listen, "0.0.0.0:9000");
        assert!(settings.tree.is_none());
        assert_eq!(settings.server.max_sessions, ServerConfig::default().max_sessions);
    }

    #[test]
    fn test_command_line_wins() {
        let file = FileConfig::parse(
            r#"
            listen = "127.0.0.1:9100"
            name = "Studio A"
            tree = "a.json"
            max_sessions = 8
            "#,
        )
        .unwrap();
        let overrides = ServeOverrides {
            port: Some(9200),
            max_sessions: Some(2),
            ..Default::default()
        };

        let settings = ServeSettings::resolve(file, overrides).unwrap();
        assert_eq!(settings.listen, "127.0.0.1:9200");
        assert_eq!(settings.server.name, "Studio A");
        assert_eq!(settings.server.max_sessions, 2);
        assert_eq!(settings.tree, Some(PathBuf::from("a.json")));
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(FileConfig::parse("colour = \"red\"").is_err());
        let file = FileConfig {
            listen: Some("localhost".to_string()),
            ..Default::default()
        };
        assert!(ServeSettings::resolve(file, ServeOverrides::default()).is_err());
    }

    #[test]
    fn test_tree_path_relative_to_file() {
        let dir = std::env::temp_dir().join(format!("embertree-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("embertree.toml");
        std::fs::write(&path, "tree = \"trees/main.json\"\n").unwrap();

        let config = FileConfig::load(&path).unwrap();
        assert_eq!(config.tree, Some(dir.join("trees/main.json")));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
