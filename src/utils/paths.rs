use std::path::{Path, PathBuf};

pub const CONFIG_DIR_ENV: &str = "INFRA_MCP_CONFIG_DIR";
pub const CONFIG_FILE_NAME: &str = "config.yaml";

fn normalize_env_path(value: Option<&str>, home: Option<&Path>) -> Option<PathBuf> {
    let trimmed = value?.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lowered = trimmed.to_lowercase();
    if lowered == "undefined" || lowered == "null" {
        return None;
    }
    Some(expand_home_path(trimmed, home))
}

pub fn expand_home_path(path: impl AsRef<Path>, home: Option<&Path>) -> PathBuf {
    let path = path.as_ref();
    if let (Some(str_path), Some(home)) = (path.to_str(), home) {
        if let Some(rest) = str_path.strip_prefix("~/") {
            return home.join(rest);
        }
        if str_path == "~" {
            return home.to_path_buf();
        }
    }
    path.to_path_buf()
}

/// Directory holding `config.yaml` for one product.
///
/// Explicit override first, then `INFRA_MCP_CONFIG_DIR`, then
/// `$XDG_CONFIG_HOME/<product>-mcp`, then `~/.config/<product>-mcp`.
pub fn resolve_config_dir(
    product: &str,
    explicit: Option<&Path>,
    env: &dyn Fn(&str) -> Option<String>,
) -> Option<PathBuf> {
    let home = env("HOME").map(PathBuf::from);
    if let Some(path) = explicit {
        return Some(expand_home_path(path, home.as_deref()));
    }
    if let Some(path) = normalize_env_path(env(CONFIG_DIR_ENV).as_deref(), home.as_deref()) {
        return Some(path);
    }
    let dir_name = format!("{}-mcp", product);
    if let Some(path) = normalize_env_path(env("XDG_CONFIG_HOME").as_deref(), home.as_deref()) {
        return Some(path.join(dir_name));
    }
    home.map(|home| home.join(".config").join(dir_name))
}

pub fn resolve_config_file(
    product: &str,
    explicit: Option<&Path>,
    env: &dyn Fn(&str) -> Option<String>,
) -> Option<PathBuf> {
    resolve_config_dir(product, explicit, env).map(|dir| dir.join(CONFIG_FILE_NAME))
}
