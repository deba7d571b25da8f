//! Server configuration.
//!
//! Configuration is loaded from a line-oriented `key=value` file; `#`
//! starts a comment and blank lines are skipped. Duplicate and unknown
//! keys are rejected so a typo cannot silently fall back to a default.
//!
//! The interesting part is the `sizes` key: a comma-separated list of size
//! specs that is evaluated lazily against each uploaded image's width. A
//! spec is either a single fixed width (`123`), or a descending sequence
//! starting at the original width and shrinking by a fixed pixel amount
//! (`123:10px`) or a percentage of the current width (`123:10%`), stopping
//! before the value drops below the spec's minimum.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Wildcard key in the format map, merged into every lookup.
pub const ALL_FORMATS_KEY: &str = "*";

const DEFAULT_UPLOAD_LIMIT: u64 = 20 * 1024 * 1024;

/// How a dynamic size spec shrinks from one width to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Subtract a fixed number of pixels.
    Pixels(u32),
    /// Subtract `ceil(width * pct / 100)` of the current width.
    Percent(u32),
}

/// A single size spec: a fixed width, or a descending sequence down to a
/// minimum width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeSpec {
    min_width: u32,
    step: Option<Step>,
}

impl SizeSpec {
    /// Parse one spec: `123`, `123:10px` or `123:10%`.
    pub fn parse(s: &str) -> Result<Self, String> {
        let Some((width, step)) = s.split_once(':') else {
            let min_width = parse_u32(s)?;
            return Ok(Self {
                min_width,
                step: None,
            });
        };

        let min_width = parse_u32(width)?;
        let step = if let Some(pct) = step.strip_suffix('%') {
            let pct = parse_u32(pct)?;
            if pct == 0 {
                return Err(format!("decrement must be greater than 0: {s}"));
            }
            if pct >= 100 {
                return Err(format!("percentual decrement must be smaller than 100: {s}"));
            }
            Step::Percent(pct)
        } else if let Some(px) = step.strip_suffix("px") {
            let px = parse_u32(px)?;
            if px == 0 {
                return Err(format!("decrement must be greater than 0: {s}"));
            }
            Step::Pixels(px)
        } else {
            return Err(format!("expected 'px' or '%' after decrement: {s}"));
        };

        Ok(Self {
            min_width,
            step: Some(step),
        })
    }

    /// Add every width this spec produces for `original_width` to `out`.
    fn collect(&self, original_width: u32, out: &mut BTreeSet<u32>) {
        let Some(step) = self.step else {
            out.insert(self.min_width);
            return;
        };

        let mut width = original_width;
        while width >= self.min_width {
            out.insert(width);
            let decrement = match step {
                Step::Pixels(px) => px,
                Step::Percent(pct) => div_round_up(u64::from(width) * u64::from(pct), 100) as u32,
            };
            if decrement > width {
                break;
            }
            width -= decrement;
        }
    }
}

/// The full set of configured size specs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SizeSpecs(Vec<SizeSpec>);

impl SizeSpecs {
    /// Parse a comma-separated list of specs.
    pub fn parse(s: &str) -> Result<Self, String> {
        let specs = s
            .split(',')
            .map(SizeSpec::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(specs))
    }

    /// Evaluate all specs against a concrete original width.
    ///
    /// The result is the sorted union of every spec's widths.
    pub fn evaluate(&self, original_width: u32) -> BTreeSet<u32> {
        let mut out = BTreeSet::new();
        for spec in &self.0 {
            spec.collect(original_width, &mut out);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Parse a byte count with a mandatory `B`/`k`/`K`/`M`/`G` suffix
/// (1024-based).
pub fn parse_bytes(s: &str) -> Result<u64, String> {
    let Some(suffix) = s.chars().last() else {
        return Err("empty byte value".to_string());
    };
    if suffix.is_ascii_digit() {
        return Err(format!(
            "missing byte value suffix (use 'B' to mark individual bytes): {s}"
        ));
    }

    let digits = &s[..s.len() - suffix.len_utf8()];
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("failed to parse byte value: {s}"))?;

    let multiplier: u64 = match suffix {
        'B' => 1,
        'k' | 'K' => 1024,
        'M' => 1024 * 1024,
        'G' => 1024 * 1024 * 1024,
        _ => return Err(format!("invalid byte value suffix: {s}")),
    };
    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("byte value out of range: {s}"))
}

/// Backend selection plus its backend-specific settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOptions {
    Fs {
        data_dir: PathBuf,
        temp_dir: PathBuf,
    },
}

/// Parsed and validated server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_host: String,
    pub listen_port: u16,

    pub processing_timeout_secs: u64,
    pub socket_kill_timeout_secs: u64,

    pub thread_pool_size: Option<usize>,

    pub upload_limit_bytes: u64,

    pub sizes: SizeSpecs,

    /// Output formats per input format; see [`Config::output_formats`].
    pub formats: HashMap<String, Vec<String>>,

    /// Pre-joined `Bearer <token>` header value; `None` means open access.
    pub auth_header: Option<String>,

    pub storage: StorageOptions,
}

impl Config {
    /// Load and validate the configuration file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse a configuration from its file contents.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut draft = Draft::default();
        let mut seen = HashSet::new();

        for raw_line in content.lines() {
            let line = strip_comment(raw_line);
            if line.is_empty() {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| ConfigError::InvalidLine {
                    line: line.to_string(),
                })?;
            if !seen.insert(key.to_string()) {
                return Err(ConfigError::DuplicateKey {
                    key: key.to_string(),
                });
            }
            draft.apply(key, value)?;
        }

        draft.finish()
    }

    /// Worker count: the configured value, or host parallelism + 1.
    pub fn thread_pool_size(&self) -> usize {
        self.thread_pool_size.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                + 1
        })
    }

    /// Evaluate the configured size specs against an original image width.
    pub fn target_widths(&self, original_width: u32) -> BTreeSet<u32> {
        self.sizes.evaluate(original_width)
    }

    /// Output formats for one input format: the exact entry merged with the
    /// wildcard entry, deduplicated and sorted.
    pub fn output_formats(&self, input_format: &str) -> Vec<String> {
        let mut merged = BTreeSet::new();
        for key in [input_format, ALL_FORMATS_KEY] {
            if let Some(formats) = self.formats.get(key) {
                merged.extend(formats.iter().cloned());
            }
        }
        merged.into_iter().collect()
    }
}

/// Accumulates keys during parsing; [`Draft::finish`] validates the whole.
#[derive(Default)]
struct Draft {
    listen_host: Option<String>,
    listen_port: Option<u16>,
    processing_timeout_secs: Option<u64>,
    socket_kill_timeout_secs: Option<u64>,
    thread_pool_size: Option<usize>,
    upload_limit_bytes: Option<u64>,
    sizes: Option<SizeSpecs>,
    formats: HashMap<String, Vec<String>>,
    auth_header: Option<String>,
    storage_type: Option<String>,
    storage_data_dir: Option<PathBuf>,
    storage_temp_dir: Option<PathBuf>,
}

impl Draft {
    fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "listen_host" => self.listen_host = Some(value.to_string()),
            "listen_port" => {
                self.listen_port =
                    Some(value.parse().map_err(|_| {
                        ConfigError::value(key, format!("invalid port: {value}"))
                    })?)
            }
            "processing_timeout_secs" => {
                self.processing_timeout_secs = Some(parse_number(key, value)?)
            }
            "socket_kill_timeout_secs" => {
                self.socket_kill_timeout_secs = Some(parse_number(key, value)?)
            }
            "thread_pool_size" => self.thread_pool_size = Some(parse_number(key, value)?),
            "upload_limit" => {
                self.upload_limit_bytes =
                    Some(parse_bytes(value).map_err(|e| ConfigError::value(key, e))?)
            }
            "auth_token" => {
                if !value.is_empty() {
                    self.auth_header = Some(format!("Bearer {value}"));
                }
            }
            "sizes" => {
                self.sizes = Some(SizeSpecs::parse(value).map_err(|e| ConfigError::value(key, e))?)
            }
            "storage.type" => {
                if value != "fs" {
                    return Err(ConfigError::value(key, format!("unknown storage type: {value}")));
                }
                self.storage_type = Some(value.to_string());
            }
            _ if key.starts_with("storage.") => {
                if self.storage_type.is_none() {
                    return Err(ConfigError::value(
                        key,
                        "storage.type not specified (it must come before other storage.* keys)",
                    ));
                }
                match &key["storage.".len()..] {
                    "data_dir" => self.storage_data_dir = Some(PathBuf::from(value)),
                    "temp_dir" => self.storage_temp_dir = Some(PathBuf::from(value)),
                    other => {
                        return Err(ConfigError::value(
                            key,
                            format!("unknown storage config key: {other}"),
                        ))
                    }
                }
            }
            _ if key.starts_with("formats.") => {
                let input = &key["formats.".len()..];
                let formats: Vec<String> = value
                    .split(',')
                    .filter(|f| !f.is_empty())
                    .map(str::to_string)
                    .collect();
                if formats.is_empty() {
                    return Err(ConfigError::value(key, "no formats specified"));
                }
                for format in &formats {
                    let encodable = image::ImageFormat::from_extension(format)
                        .is_some_and(|f| f.writing_enabled());
                    if !encodable {
                        return Err(ConfigError::value(
                            key,
                            format!("unsupported output format: {format}"),
                        ));
                    }
                }
                self.formats.insert(input.to_string(), formats);
            }
            _ => {
                return Err(ConfigError::UnknownKey {
                    key: key.to_string(),
                })
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<Config, ConfigError> {
        let sizes = self
            .sizes
            .ok_or_else(|| ConfigError::Validation("no sizes specified".into()))?;
        if self.formats.is_empty() {
            return Err(ConfigError::Validation("no formats specified".into()));
        }

        let storage = match self.storage_type.as_deref() {
            Some("fs") => StorageOptions::Fs {
                data_dir: self.storage_data_dir.ok_or_else(|| {
                    ConfigError::Validation("storage.data_dir not specified".into())
                })?,
                temp_dir: self.storage_temp_dir.ok_or_else(|| {
                    ConfigError::Validation("storage.temp_dir not specified".into())
                })?,
            },
            _ => return Err(ConfigError::Validation("no storage type specified".into())),
        };

        let processing_timeout_secs = self.processing_timeout_secs.unwrap_or(8);
        let socket_kill_timeout_secs = self.socket_kill_timeout_secs.unwrap_or(10);
        if processing_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "processing_timeout_secs must be greater than 0".into(),
            ));
        }
        if socket_kill_timeout_secs <= processing_timeout_secs {
            return Err(ConfigError::Validation(
                "socket_kill_timeout_secs must be greater than processing_timeout_secs".into(),
            ));
        }

        if self.auth_header.is_none() {
            tracing::warn!("no auth_token specified, server will be open for uploads to anyone");
        }

        Ok(Config {
            listen_host: self.listen_host.unwrap_or_else(|| "127.0.0.1".to_string()),
            listen_port: self.listen_port.unwrap_or(8000),
            processing_timeout_secs,
            socket_kill_timeout_secs,
            thread_pool_size: self.thread_pool_size,
            upload_limit_bytes: self.upload_limit_bytes.unwrap_or(DEFAULT_UPLOAD_LIMIT),
            sizes,
            formats: self.formats,
            auth_header: self.auth_header,
            storage,
        })
    }
}

/// Cut the line at the first `#` and drop trailing spaces.
fn strip_comment(line: &str) -> &str {
    let end = line.find('#').unwrap_or(line.len());
    line[..end].trim_end_matches(' ')
}

fn parse_u32(s: &str) -> Result<u32, String> {
    s.parse().map_err(|_| format!("invalid number: {s:?}"))
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::value(key, format!("invalid number: {value}")))
}

fn div_round_up(a: u64, b: u64) -> u64 {
    (a + b - 1) / b
}
