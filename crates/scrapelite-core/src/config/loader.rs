//! Environment variable loading.
//!
//! Keeps fallback chains in one place so business code never repeats
//! `or_else` ladders over `std::env::var`.

use std::env;
use std::path::Path;

/// Load `.env` from the current directory into the process environment
/// (existing variables are never overridden). Runs once per process.
pub fn load_dotenv() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let dir = env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from("."));
        load_dotenv_from_dir(&dir);
    });
}

/// Load `<dir>/.env` into the process environment without overriding.
///
/// Must run before worker threads start.
pub fn load_dotenv_from_dir(dir: &Path) {
    let Ok(content) = std::fs::read_to_string(dir.join(".env")) else {
        return;
    };
    for line in content.lines() {
        if let Some((key, value)) = parse_dotenv_line(line) {
            if env::var(key).is_err() {
                #[allow(unsafe_code)]
                unsafe {
                    env::set_var(key, value);
                }
            }
        }
    }
}

/// Parse one `.env` line into `(key, value)`. Comments, blank lines and
/// lines without `=` yield `None`.
fn parse_dotenv_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").unwrap_or(line);
    let eq_pos = line.find('=')?;
    let key = line[..eq_pos].trim();
    let mut value = line[eq_pos + 1..].trim();
    // Strip inline comment (# not inside quotes)
    if let Some(hash_pos) = value.find('#') {
        let before_hash = value[..hash_pos].trim_end();
        if !before_hash.contains('"') && !before_hash.contains('\'') {
            value = before_hash;
        }
    }
    if value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')))
    {
        value = &value[1..value.len() - 1];
    }
    if key.is_empty() {
        None
    } else {
        Some((key, value))
    }
}

/// Read the primary variable or the first set alias; empty values fall back to `default`.
pub fn env_or<F>(primary: &str, aliases: &[&str], default: F) -> String
where
    F: FnOnce() -> String,
{
    env::var(primary)
        .ok()
        .or_else(|| aliases.iter().find_map(|a| env::var(a).ok()))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(default)
}

/// Read the primary variable or an alias; empty values count as unset.
pub fn env_optional(primary: &str, aliases: &[&str]) -> Option<String> {
    env::var(primary)
        .ok()
        .or_else(|| aliases.iter().find_map(|a| env::var(a).ok()))
        .and_then(|s| {
            let s = s.trim().to_string();
            if s.is_empty() {
                None
            } else {
                Some(s)
            }
        })
}

/// Boolean variable: 0/false/no/off are false, anything else true.
pub fn env_bool(primary: &str, aliases: &[&str], default: bool) -> bool {
    let v = env::var(primary)
        .ok()
        .or_else(|| aliases.iter().find_map(|a| env::var(a).ok()));
    match v.as_deref() {
        Some(s) => !matches!(
            s.trim().to_lowercase().as_str(),
            "0" | "false" | "no" | "off"
        ),
        None => default,
    }
}

/// Unsigned integer variable; unparseable values are ignored with a warning.
pub fn env_u64(primary: &str, aliases: &[&str], default: u64) -> u64 {
    match env_optional(primary, aliases) {
        Some(raw) => raw.parse::<u64>().unwrap_or_else(|_| {
            tracing::warn!(key = primary, value = %raw, "Invalid integer, using default {}", default);
            default
        }),
        None => default,
    }
}
