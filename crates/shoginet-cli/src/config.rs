//! Loads the INI config file, merges CLI overrides on top of it, and
//! produces a validated [`Settings`].

use std::path::{Path, PathBuf};

use ini::Ini;
use shoginet_core::{EngineOptions, Settings};

use crate::cli::Cli;

const APP_DIR: &str = "shoginet";
const CONFIG_FILE: &str = "config.ini";

const DEFAULT_ENDPOINT: &str = "https://shoginet.example.org/";
const DEFAULT_STD_ENGINE_CMD: &str = "YaneuraOu-by-gcc";
const DEFAULT_VARIANT_ENGINE_CMD: &str = "fairy-stockfish";
const DEFAULT_THREADS: u32 = 4;
const DEFAULT_MEMORY_MIB: u32 = 2048;

fn xdg_config_home() -> PathBuf {
    if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME") {
        let dir = PathBuf::from(dir);
        if !dir.as_os_str().is_empty() {
            return dir;
        }
    }
    std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")).unwrap_or_else(|| PathBuf::from("."))
}

/// Default config file path: `$XDG_CONFIG_HOME/shoginet/config.ini`.
pub fn default_config_path() -> PathBuf {
    xdg_config_home().join(APP_DIR).join(CONFIG_FILE)
}

fn load_ini(path: &Path) -> anyhow::Result<Option<Ini>> {
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(Ini::load_from_file(path)?))
}

fn section_options(ini: &Ini, section: &str) -> EngineOptions {
    let mut options = EngineOptions::new();
    if let Some(props) = ini.section(Some(section)) {
        for (key, value) in props.iter() {
            options.insert(key.to_string(), value.to_string());
        }
    }
    options
}

/// Builds [`Settings`] from the INI file at `cli.config` (or the default
/// XDG path, if unset and present) with `cli`'s flags overriding any key
/// the file also sets. Does not call [`Settings::validate`] — the caller
/// does that and maps the resulting [`shoginet_core::ConfigError`] to the
/// configuration exit code.
pub fn build_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let path = cli.config.clone().unwrap_or_else(default_config_path);
    let ini = load_ini(&path)?;
    let default_section = ini.as_ref().and_then(|ini| ini.section(None::<String>));
    let get = |key: &str| default_section.and_then(|s| s.get(key)).map(str::to_string);

    let engine_std_options = ini.as_ref().map(|ini| section_options(ini, "EngineStd")).unwrap_or_default();
    let engine_variant_options = ini.as_ref().map(|ini| section_options(ini, "EngineVariant")).unwrap_or_default();

    Ok(Settings {
        engine_dir: cli.engine_dir.clone().or_else(|| get("EngineDir").map(PathBuf::from)),
        std_engine_cmd: cli
            .std_engine_cmd
            .clone()
            .or_else(|| get("StdEngineCmd"))
            .unwrap_or_else(|| DEFAULT_STD_ENGINE_CMD.to_string()),
        variant_engine_cmd: cli
            .variant_engine_cmd
            .clone()
            .or_else(|| get("VariantEngineCmd"))
            .unwrap_or_else(|| DEFAULT_VARIANT_ENGINE_CMD.to_string()),
        key: cli.key.clone().or_else(|| get("Key")).unwrap_or_default(),
        cores: cli.cores,
        threads: cli.threads.or_else(|| get("Threads").and_then(|v| v.parse().ok())).unwrap_or(DEFAULT_THREADS),
        memory: cli.memory.or_else(|| get("Memory").and_then(|v| v.parse().ok())).unwrap_or(DEFAULT_MEMORY_MIB),
        endpoint: cli.endpoint.clone().or_else(|| get("Endpoint")).unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
        fixed_backoff: cli.fixed_backoff || get("FixedBackoff").is_some_and(|v| v == "true"),
        engine_std_options,
        engine_variant_options,
    })
}
