//! Pointer text format
//!
//! ```text
//! version https://git-lfs.github.com/spec/v1
//! oid sha256:7f83b1657ff1fc53b92dc18148a1d65dfc2d4b1fa3d677284addd200126d9069
//! size 12
//! type file
//! url https://host/x.bin
//!
//! ```
//!
//! `version` is always first; the remaining keys appear in strictly
//! increasing order and the block ends with a blank line. Only the keys
//! below are recognized.

use crate::error::{LfxError, LfxResult};
use crate::hash::Hash;
use crate::pointer::{is_relative_hint, ExpansionKind, Info, Metadata, Pointer};
use std::path::Path;

/// Prefix of the `version` value; the format version follows it
pub const SPEC_URI_BASE: &str = "https://git-lfs.github.com/spec/v";

const OID_PREFIX: &str = "sha256:";
const KNOWN_KEYS: &[&str] = &["args", "hint", "oid", "size", "type", "url"];

/// The `type` line of a pointer file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PointerType {
    Simple,
    Curl,
    File,
    Zip,
    Exe,
    Nuget,
    Archive,
}

impl PointerType {
    fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "simple" => Self::Simple,
            "curl" => Self::Curl,
            "file" => Self::File,
            "zip" => Self::Zip,
            "exe" => Self::Exe,
            "nuget" => Self::Nuget,
            "archive" => Self::Archive,
            _ => return None,
        })
    }

    fn of(pointer: &Pointer) -> Self {
        if pointer.is_simple() {
            return Self::Simple;
        }
        match pointer.kind {
            ExpansionKind::File => Self::File,
            ExpansionKind::Zip if pointer.hint.is_some() => Self::Archive,
            ExpansionKind::Zip => Self::Zip,
            ExpansionKind::SelfExtractingExe => Self::Exe,
            ExpansionKind::Nuget => Self::Nuget,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Curl => "curl",
            Self::File => "file",
            Self::Zip => "zip",
            Self::Exe => "exe",
            Self::Nuget => "nuget",
            Self::Archive => "archive",
        }
    }

    fn kind(&self) -> ExpansionKind {
        match self {
            Self::Simple | Self::Curl | Self::File => ExpansionKind::File,
            Self::Zip | Self::Archive => ExpansionKind::Zip,
            Self::Exe => ExpansionKind::SelfExtractingExe,
            Self::Nuget => ExpansionKind::Nuget,
        }
    }
}

/// Serialize an info in canonical pointer text form
pub fn serialize_pointer(info: &Info) -> String {
    let pointer = &info.pointer;
    let mut out = format!("version {}{}\n", SPEC_URI_BASE, pointer.version);

    // Keys in byte order: args, hint, oid, size, type, url
    if let Some(args) = &pointer.args {
        out.push_str(&format!("args {}\n", args));
    }
    if let Some(hint) = &pointer.hint {
        out.push_str(&format!("hint {}\n", hint));
    }
    if let Some(meta) = &info.metadata {
        out.push_str(&format!("oid {}{}\n", OID_PREFIX, meta.archive_id));
        out.push_str(&format!("size {}\n", meta.compressed_size));
    }
    let pointer_type = PointerType::of(pointer);
    if pointer_type != PointerType::Simple {
        out.push_str(&format!("type {}\n", pointer_type.as_str()));
    }
    if let Some(url) = &pointer.url {
        out.push_str(&format!("url {}\n", url));
    }
    out.push('\n');
    out
}

/// Parse pointer text into an info
pub fn parse_pointer(text: &str) -> LfxResult<Info> {
    let err = |line: usize, reason: String| LfxError::PointerParse { line, reason };

    let mut lines = text.split('\n').enumerate().map(|(i, l)| (i + 1, l));

    let (first_number, first) = lines
        .by_ref()
        .find(|(_, l)| !l.is_empty())
        .ok_or_else(|| err(1, "empty pointer".to_string()))?;
    let (key, value) =
        split_line(first).ok_or_else(|| err(first_number, "expected 'key value'".into()))?;
    if key != "version" {
        return Err(err(
            first_number,
            format!("first key must be 'version', found '{}'", key),
        ));
    }
    let version = value
        .strip_prefix(SPEC_URI_BASE)
        .and_then(|v| v.parse::<u32>().ok())
        .ok_or_else(|| err(first_number, format!("unsupported version '{}'", value)))?;

    let mut fields = Fields::default();
    let mut previous: Option<&str> = None;
    let mut terminated = false;

    for (number, line) in lines.by_ref() {
        if line.is_empty() {
            terminated = true;
            break;
        }
        let (key, value) =
            split_line(line).ok_or_else(|| err(number, "expected 'key value'".into()))?;
        if let Some(prev) = previous {
            if key <= prev {
                return Err(err(
                    number,
                    format!("key '{}' must sort after '{}'", key, prev),
                ));
            }
        }
        if !KNOWN_KEYS.contains(&key) {
            return Err(err(number, format!("unknown key '{}'", key)));
        }
        previous = Some(key);
        fields.set(key, value, number)?;
    }

    // The blank line must itself be newline-terminated and end the text
    match (terminated, lines.next(), lines.next()) {
        (true, Some((_, "")), None) => {}
        (false, _, _) | (true, None, _) => {
            return Err(err(0, "missing trailing blank line".to_string()));
        }
        (true, Some((number, _)), _) => {
            return Err(err(number, "content after terminating blank line".to_string()));
        }
    }

    fields.into_info(version)
}

/// Read and parse a pointer file from disk
pub async fn read_pointer_file(path: &Path) -> LfxResult<Info> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| LfxError::io(format!("reading pointer {}", path.display()), e))?;
    parse_pointer(&text)
}

fn split_line(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(' ')?;
    if key.is_empty() || value.is_empty() {
        return None;
    }
    Some((key, value))
}

#[derive(Default)]
struct Fields {
    args: Option<String>,
    hint: Option<String>,
    oid: Option<Hash>,
    size: Option<u64>,
    pointer_type: Option<PointerType>,
    url: Option<String>,
}

impl Fields {
    fn set(&mut self, key: &str, value: &str, line: usize) -> LfxResult<()> {
        let err = |reason: String| LfxError::PointerParse { line, reason };
        match key {
            "args" => self.args = Some(value.to_string()),
            "hint" => {
                if !is_relative_hint(value) {
                    return Err(err(format!("hint '{}' must be a relative path inside the content", value)));
                }
                self.hint = Some(value.to_string());
            }
            "oid" => {
                let hex = value
                    .strip_prefix(OID_PREFIX)
                    .ok_or_else(|| err(format!("oid must start with '{}'", OID_PREFIX)))?;
                if hex.bytes().any(|b| b.is_ascii_uppercase()) {
                    return Err(err("oid must be lowercase hex".to_string()));
                }
                self.oid = Some(hex.parse().map_err(|e: LfxError| err(e.to_string()))?);
            }
            "size" => {
                self.size = Some(
                    value
                        .parse()
                        .map_err(|_| err(format!("invalid size '{}'", value)))?,
                );
            }
            "type" => {
                self.pointer_type = Some(
                    PointerType::parse(value)
                        .ok_or_else(|| err(format!("unknown type '{}'", value)))?,
                );
            }
            "url" => self.url = Some(value.to_string()),
            _ => return Err(err(format!("unknown key '{}'", key))),
        }
        Ok(())
    }

    fn into_info(self, version: u32) -> LfxResult<Info> {
        let err = |reason: &str| LfxError::PointerParse {
            line: 0,
            reason: reason.to_string(),
        };
        let pointer_type = self.pointer_type.unwrap_or(PointerType::Simple);

        let metadata = match (self.oid, self.size) {
            (Some(oid), Some(size)) => Some(Metadata::new(oid, size)),
            (None, None) => None,
            _ => return Err(err("'oid' and 'size' must appear together")),
        };

        match pointer_type {
            PointerType::Simple => {
                if self.url.is_some() {
                    return Err(err("simple pointers carry no url"));
                }
                if metadata.is_none() {
                    return Err(err("simple pointers require 'oid' and 'size'"));
                }
            }
            _ if self.url.is_none() => return Err(err("missing 'url'")),
            _ => {}
        }
        if (pointer_type == PointerType::Exe) != self.args.is_some() {
            return Err(err("'args' is required for, and only allowed with, type exe"));
        }
        if (pointer_type == PointerType::Archive) != self.hint.is_some() {
            return Err(err("'hint' is required for, and only allowed with, type archive"));
        }

        let pointer = Pointer {
            kind: pointer_type.kind(),
            url: self.url,
            version,
            args: self.args,
            hint: self.hint,
        };
        Ok(Info { pointer, metadata })
    }
}
