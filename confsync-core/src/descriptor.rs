//! Template resource descriptors — one TOML file per managed destination.
//!
//! ```toml
//! [template]
//! src = "nginx.conf.tmpl"
//! dest = "/etc/nginx/nginx.conf"
//! prefix = "/app"
//! keys = ["/upstreams", "/listen_port"]
//! mode = "0644"
//! check_cmd = "nginx -t -c {{ src }}"
//! reload_cmd = "nginx -s reload"
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{io_err, ConfigError};

/// On-disk descriptor layout: a single `[template]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateResourceConfig {
    pub template: TemplateDescriptor,
}

/// Declarative description of one managed configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateDescriptor {
    /// Template filename, relative to the template directory.
    pub src: String,
    /// Absolute destination path.
    pub dest: PathBuf,
    /// Keys to pull, relative to `prefix`.
    #[serde(default)]
    pub keys: Vec<String>,
    /// Backend key prefix. A leading `/` is forced when the resource is built.
    #[serde(default)]
    pub prefix: String,
    /// Destination file mode (octal, hex, or decimal). Absent or empty
    /// inherits the existing destination's mode, falling back to `0644`.
    #[serde(default)]
    pub mode: Option<String>,
    /// Destination owner uid; absent inherits the effective uid.
    #[serde(default)]
    pub uid: Option<u32>,
    /// Destination owner gid; absent inherits the effective gid.
    #[serde(default)]
    pub gid: Option<u32>,
    /// Validation command run against the staged file before the swap.
    /// `{{ src }}` expands to the stage path.
    #[serde(default)]
    pub check_cmd: Option<String>,
    /// Command run after the destination has been updated.
    #[serde(default)]
    pub reload_cmd: Option<String>,
}

impl TemplateResourceConfig {
    /// Load and validate a descriptor from `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        tracing::debug!(path = %path.display(), "loading template resource");
        let contents = std::fs::read_to_string(path).map_err(|err| io_err(path, err))?;
        let mut config: TemplateResourceConfig =
            toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        if config.template.src.is_empty() {
            return Err(ConfigError::EmptySrc {
                path: path.to_path_buf(),
            });
        }
        // An explicitly empty mode means "inherit", same as an absent one.
        if config.template.mode.as_deref() == Some("") {
            config.template.mode = None;
        }
        Ok(config)
    }
}

/// Parse a file mode: `0x`-prefixed hex, `0`/`0o`-prefixed octal,
/// decimal otherwise.
pub fn parse_file_mode(mode: &str) -> Result<u32, ConfigError> {
    let parsed = if let Some(hex) = mode.strip_prefix("0x").or_else(|| mode.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else if let Some(octal) = mode.strip_prefix("0o").or_else(|| mode.strip_prefix("0O")) {
        u32::from_str_radix(octal, 8)
    } else if mode.len() > 1 && mode.starts_with('0') {
        u32::from_str_radix(&mode[1..], 8)
    } else {
        mode.parse::<u32>()
    };
    parsed.map_err(|_| ConfigError::InvalidMode(mode.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
