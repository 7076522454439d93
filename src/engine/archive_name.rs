// src/engine/archive_name.rs

//! Archive name templates.
//!
//! Supported placeholders:
//! - `{hostname}`: the configured or detected host name
//! - `{now}` / `{utcnow}`: current UTC time as `%Y-%m-%dT%H:%M:%S`
//! - `{now:<strftime>}` / `{utcnow:<strftime>}`: current UTC time, custom format
//!
//! Unknown placeholders are left untouched so borg can expand its own
//! (`{user}`, `{fqdn}`, ...).

use std::sync::LazyLock;

use anyhow::{Result, bail};
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};
use regex::{Captures, Regex};

pub const DEFAULT_ARCHIVE_NAME_PATTERN: &str = "{hostname}-{now}";
pub const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{(?P<name>[A-Za-z_]+)(?::(?P<format>[^}]*))?\}")
        .expect("placeholder regex is valid")
});

/// Expand `pattern` for a run starting at `now` on `hostname`.
pub fn render_archive_name(pattern: &str, hostname: &str, now: DateTime<Utc>) -> Result<String> {
    for caps in PLACEHOLDER.captures_iter(pattern) {
        if let ("now" | "utcnow", Some(format)) = (&caps["name"], caps.name("format")) {
            validate_time_format(format.as_str())?;
        }
    }

    let rendered = PLACEHOLDER.replace_all(pattern, |caps: &Captures<'_>| {
        let name = &caps["name"];
        let format = caps
            .name("format")
            .map_or(DEFAULT_TIME_FORMAT, |m| m.as_str());
        match name {
            "hostname" if caps.name("format").is_none() => hostname.to_string(),
            "now" | "utcnow" => now.format(format).to_string(),
            _ => caps[0].to_string(),
        }
    });

    let name = rendered.trim().to_string();
    if name.is_empty() {
        bail!("archive name pattern '{pattern}' renders to an empty name");
    }
    if name.contains('/') {
        bail!("archive name '{name}' must not contain '/'");
    }
    Ok(name)
}

/// `chrono` panics when formatting with an invalid specifier, so reject
/// those up front.
fn validate_time_format(format: &str) -> Result<()> {
    if format.is_empty() {
        bail!("empty time format in archive name pattern");
    }
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        bail!("invalid time format '{format}' in archive name pattern");
    }
    Ok(())
}
