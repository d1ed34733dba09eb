//! WAL segment name grammar and the arithmetic used to order, decode, and
//! reassemble names. This is the shared substrate every other module in the
//! crate builds its range/timeline reasoning on top of.

use crate::error::{Error, Result};

/// Length of a WAL segment's logical name: three 8-hex fields.
pub const SEGMENT_NAME_LEN: usize = 24;

const HEX_FIELD_LEN: usize = 8;

/// Compression suffixes a WAL's storage key may carry in addition to its
/// logical name. Order matters only for readability; detection checks all.
pub const COMPRESSION_SUFFIXES: &[&str] = &[".gz", ".bz2", ".snappy", ".zst"];

/// What, if anything, follows the 24-hex segment name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentSuffix {
    /// A plain, fully archived segment.
    None,
    /// Still being streamed; `.partial`.
    Partial,
    /// A backup-boundary marker; `.{8hex}.backup`. The inner value is the
    /// 8-hex marker itself (not semantically used beyond round-tripping).
    Backup(u32),
}

/// A parsed WAL archive entry: either a regular segment (optionally
/// `.partial` or a `.NNNNNNNN.backup` marker) or a timeline history file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WalEntryName {
    Segment {
        timeline: u32,
        log: u32,
        segment: u32,
        suffix: SegmentSuffix,
    },
    /// `{8hex timeline}.history`.
    History { timeline: u32 },
}

impl WalEntryName {
    /// The 24-hex segment prefix, if this entry has one. History files have
    /// none (their own name is only 8 hex characters).
    pub fn segment_prefix(&self) -> Option<String> {
        match self {
            WalEntryName::Segment {
                timeline,
                log,
                segment,
                ..
            } => Some(format_segment_name(*timeline, *log, *segment)),
            WalEntryName::History { .. } => None,
        }
    }

    pub fn timeline(&self) -> u32 {
        match self {
            WalEntryName::Segment { timeline, .. } => *timeline,
            WalEntryName::History { timeline } => *timeline,
        }
    }

    pub fn is_history(&self) -> bool {
        matches!(self, WalEntryName::History { .. })
    }

    pub fn is_partial(&self) -> bool {
        matches!(
            self,
            WalEntryName::Segment {
                suffix: SegmentSuffix::Partial,
                ..
            }
        )
    }

    pub fn is_backup_marker(&self) -> bool {
        matches!(
            self,
            WalEntryName::Segment {
                suffix: SegmentSuffix::Backup(_),
                ..
            }
        )
    }
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit())
}

fn parse_hex_field(s: &str) -> Result<u32> {
    if s.len() != HEX_FIELD_LEN || !is_hex(s) {
        return Err(Error::BadWalName(s.to_string()));
    }
    u32::from_str_radix(s, 16).map_err(|_| Error::BadWalName(s.to_string()))
}

/// Formats a (timeline, log, segment) triple back into its 24-hex name.
pub fn format_segment_name(timeline: u32, log: u32, segment: u32) -> String {
    format!("{timeline:08X}{log:08X}{segment:08X}")
}

/// Decodes the 24-hex segment prefix of a WAL name into (timeline, log,
/// segment), ignoring any trailing suffix. The input must be at least 24
/// characters; only the first 24 are consulted.
pub fn decode_segment_name(name: &str) -> Result<(u32, u32, u32)> {
    if name.len() < SEGMENT_NAME_LEN {
        return Err(Error::BadWalName(name.to_string()));
    }
    let prefix = &name[..SEGMENT_NAME_LEN];
    if !is_hex(prefix) {
        return Err(Error::BadWalName(name.to_string()));
    }
    let timeline = parse_hex_field(&prefix[0..8])?;
    let log = parse_hex_field(&prefix[8..16])?;
    let segment = parse_hex_field(&prefix[16..24])?;
    Ok((timeline, log, segment))
}

/// Decodes a `{timeline}{log}` 16-hex hash-dir component (the prefix
/// directory used by `listWalPrefixes`) into (timeline, log).
pub fn decode_hash_dir(s: &str) -> Result<(u32, u32)> {
    if s.len() != 16 || !is_hex(s) {
        return Err(Error::BadWalName(s.to_string()));
    }
    let timeline = parse_hex_field(&s[0..8])?;
    let log = parse_hex_field(&s[8..16])?;
    Ok((timeline, log))
}

/// Parses a full WAL archive entry name (history file, or segment with an
/// optional suffix). The logical name only — any compression suffix must be
/// stripped by the caller first (see [`strip_compression_suffix`]).
pub fn parse(name: &str) -> Result<WalEntryName> {
    if let Some(tli_part) = name.strip_suffix(".history") {
        let timeline = parse_hex_field(tli_part)?;
        return Ok(WalEntryName::History { timeline });
    }

    if let Some(prefix) = name.strip_suffix(".partial") {
        let (timeline, log, segment) = decode_segment_name(prefix)?;
        if prefix.len() != SEGMENT_NAME_LEN {
            return Err(Error::BadWalName(name.to_string()));
        }
        return Ok(WalEntryName::Segment {
            timeline,
            log,
            segment,
            suffix: SegmentSuffix::Partial,
        });
    }

    if let Some(prefix) = name.strip_suffix(".backup") {
        // prefix is "{24hex}.{8hex}"
        if prefix.len() != SEGMENT_NAME_LEN + 1 + HEX_FIELD_LEN {
            return Err(Error::BadWalName(name.to_string()));
        }
        let (segment_part, marker_part) = prefix.split_at(SEGMENT_NAME_LEN);
        let marker_part = marker_part
            .strip_prefix('.')
            .ok_or_else(|| Error::BadWalName(name.to_string()))?;
        let (timeline, log, segment) = decode_segment_name(segment_part)?;
        let marker = parse_hex_field(marker_part)?;
        return Ok(WalEntryName::Segment {
            timeline,
            log,
            segment,
            suffix: SegmentSuffix::Backup(marker),
        });
    }

    if name.len() != SEGMENT_NAME_LEN {
        return Err(Error::BadWalName(name.to_string()));
    }
    let (timeline, log, segment) = decode_segment_name(name)?;
    Ok(WalEntryName::Segment {
        timeline,
        log,
        segment,
        suffix: SegmentSuffix::None,
    })
}

pub fn is_history_file(name: &str) -> bool {
    name.ends_with(".history")
}

pub fn is_partial_file(name: &str) -> bool {
    name.ends_with(".partial")
}

pub fn is_backup_file(name: &str) -> bool {
    if !name.ends_with(".backup") {
        return false;
    }
    parse(name).map(|n| n.is_backup_marker()).unwrap_or(false)
}

/// Strips a known compression suffix from a storage key, returning the
/// logical WAL name. A key with no recognized suffix is returned unchanged.
pub fn strip_compression_suffix(storage_key: &str) -> &str {
    for suffix in COMPRESSION_SUFFIXES {
        if let Some(stripped) = storage_key.strip_suffix(suffix) {
            return stripped;
        }
    }
    storage_key
}

/// Truncates a WAL name to its 24-char segment prefix for range
/// comparisons, per §4.6.6: `.NNNNNNNN.backup` markers compare by their
/// segment prefix, not their full name.
pub fn range_check_name(name: &str) -> &str {
    if name.len() >= SEGMENT_NAME_LEN && is_backup_file(name) {
        &name[..SEGMENT_NAME_LEN]
    } else {
        name
    }
}
