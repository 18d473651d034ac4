//! Configuration file management for stoker.
//!
//! Provides a TOML-based config file at `~/.config/stoker/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use stoker_core::EngineConfig;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    pub engine: EngineSection,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EngineSection {
    /// Path to the engine binary.
    pub binary: PathBuf,
    /// Root of the engine's build tree.
    pub root_path: PathBuf,
    #[serde(default = "default_architecture")]
    pub architecture: String,
    #[serde(default = "default_ready_pattern")]
    pub ready_pattern: String,
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    #[serde(default = "default_clear_output_on_run")]
    pub clear_output_on_run: bool,
    #[serde(default = "default_clean_command")]
    pub clean_command: Vec<String>,
}

fn default_architecture() -> String {
    "x64".to_string()
}

fn default_ready_pattern() -> String {
    EngineConfig::DEFAULT_READY_PATTERN.to_string()
}

fn default_response_timeout_ms() -> u64 {
    EngineConfig::DEFAULT_RESPONSE_TIMEOUT.as_millis() as u64
}

fn default_clear_output_on_run() -> bool {
    true
}

fn default_clean_command() -> Vec<String> {
    vec!["make".to_string(), "clean".to_string()]
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the stoker config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/stoker` or `~/.config/stoker`.
/// We intentionally ignore the platform-specific `dirs::config_dir()`
/// (which returns `~/Library/Application Support` on macOS).
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("stoker");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("stoker")
}

/// Return the path to the stoker config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct StokerConfig {
    pub engine: EngineConfig,
}

impl StokerConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - Binary: `cli_binary` > `STOKER_ENGINE_BIN` env > config file > error
    /// - Root: `cli_root` > `STOKER_ENGINE_ROOT` env > config file > error
    /// - Architecture: `cli_arch` > `STOKER_ENGINE_ARCH` env > config file > `x64`
    /// - Watch/clean policies come from the config file when present,
    ///   otherwise the core defaults.
    pub fn resolve(
        cli_binary: Option<&Path>,
        cli_root: Option<&Path>,
        cli_arch: Option<&str>,
    ) -> Result<Self> {
        let file_config = load_config().ok();

        let binary = if let Some(binary) = cli_binary {
            binary.to_path_buf()
        } else if let Ok(binary) = std::env::var("STOKER_ENGINE_BIN") {
            PathBuf::from(binary)
        } else if let Some(ref cfg) = file_config {
            cfg.engine.binary.clone()
        } else {
            bail!(
                "engine binary not configured; pass --engine, set STOKER_ENGINE_BIN, or run `stoker init`"
            );
        };

        let root_path = if let Some(root) = cli_root {
            root.to_path_buf()
        } else if let Ok(root) = std::env::var("STOKER_ENGINE_ROOT") {
            PathBuf::from(root)
        } else if let Some(ref cfg) = file_config {
            cfg.engine.root_path.clone()
        } else {
            bail!(
                "engine root not configured; pass --root, set STOKER_ENGINE_ROOT, or run `stoker init`"
            );
        };

        let architecture = if let Some(arch) = cli_arch {
            arch.to_string()
        } else if let Ok(arch) = std::env::var("STOKER_ENGINE_ARCH") {
            arch
        } else if let Some(ref cfg) = file_config {
            cfg.engine.architecture.clone()
        } else {
            default_architecture()
        };

        let mut engine = EngineConfig::new(binary, root_path, architecture);
        if let Some(cfg) = file_config {
            engine = engine
                .with_ready_pattern(cfg.engine.ready_pattern)
                .with_response_timeout(Duration::from_millis(cfg.engine.response_timeout_ms))
                .with_clear_output_on_run(cfg.engine.clear_output_on_run)
                .with_clean_command(cfg.engine.clean_command);
        }

        Ok(Self { engine })
    }
}

/// Execute the `stoker init` command: write a config file for later runs.
pub fn cmd_init(binary: &Path, root: &Path, arch: &str, force: bool) -> Result<()> {
    let path = config_path();
    if path.exists() && !force {
        bail!(
            "config file already exists at {}; pass --force to overwrite",
            path.display()
        );
    }

    let config = ConfigFile {
        engine: EngineSection {
            binary: binary.to_path_buf(),
            root_path: root.to_path_buf(),
            architecture: arch.to_string(),
            ready_pattern: default_ready_pattern(),
            response_timeout_ms: default_response_timeout_ms(),
            clear_output_on_run: default_clear_output_on_run(),
            clean_command: default_clean_command(),
        },
    };
    save_config(&config)?;
    println!("Wrote {}", path.display());
    Ok(())
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
