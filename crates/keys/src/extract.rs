//! Record extraction from the addon's saved-variables file.
//!
//! The file is Lua table text, not a format any serializer understands, so
//! extraction is a line scanner: a line consisting of a lone `{` opens a
//! candidate block, and the block runs until the brace depth returns to zero.
//! Only `["key"] = value` assignments at the block's own top level are read;
//! anything nested deeper belongs to sub-tables and is ignored.
//!
//! A block becomes an [`Entry`] only when it carries every required field.
//! Incomplete blocks are dropped without error.

use std::collections::HashMap;

use keywatch_config::Region;
use tracing::debug;

use crate::dungeons::DungeonCatalog;
use crate::schema::{Entry, SourceChannel};
use crate::timestamp;

pub const FIELD_UNIT: &str = "unit";
pub const FIELD_KEY_LEVEL: &str = "key_level";
pub const FIELD_DUNGEON_ID: &str = "dungeon_id";
pub const FIELD_TIME_STAMP: &str = "time_stamp";
pub const FIELD_WEEK: &str = "week";
pub const FIELD_GUILD: &str = "guild";

#[derive(Debug, Clone, Copy)]
pub struct ExtractOptions {
    /// Week assumed for records without a `week` field.
    pub default_week: u64,
    pub region: Region,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            default_week: 419,
            region: Region::Eu,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Str(String),
    Int(u64),
    /// Anything else: tables, booleans, floats, negative numbers.
    Other(String),
}

/// Top-level fields of one brace-delimited candidate record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawBlock {
    /// 1-based line of the opening brace.
    pub line: usize,
    pub fields: HashMap<String, FieldValue>,
}

impl RawBlock {
    pub fn str_field(&self, name: &str) -> Option<&str> {
        match self.fields.get(name) {
            Some(FieldValue::Str(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn int_field(&self, name: &str) -> Option<u64> {
        match self.fields.get(name) {
            Some(FieldValue::Int(value)) => Some(*value),
            _ => None,
        }
    }

    /// Names of the required fields this block lacks, in contract order.
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.str_field(FIELD_UNIT).is_none_or(str::is_empty) {
            missing.push(FIELD_UNIT);
        }
        for name in [FIELD_KEY_LEVEL, FIELD_DUNGEON_ID, FIELD_TIME_STAMP] {
            if self.int_field(name).is_none() {
                missing.push(name);
            }
        }
        missing
    }
}

/// Result of one extraction pass.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub entries: Vec<Entry>,
    /// Candidate blocks dropped for missing required fields.
    pub skipped: usize,
}

pub fn extract_entries(text: &str, options: &ExtractOptions, catalog: &DungeonCatalog) -> Extraction {
    let mut extraction = Extraction::default();
    for block in scan_blocks(text) {
        match block_to_entry(&block, options, catalog) {
            Some(entry) => extraction.entries.push(entry),
            None => {
                debug!(
                    line = block.line,
                    missing = ?block.missing_required(),
                    "skipping candidate block without required fields"
                );
                extraction.skipped += 1;
            }
        }
    }
    extraction
}

/// Gate a block on the required-field contract and build the entry.
pub fn block_to_entry(
    block: &RawBlock,
    options: &ExtractOptions,
    catalog: &DungeonCatalog,
) -> Option<Entry> {
    let unit = block.str_field(FIELD_UNIT).filter(|u| !u.is_empty())?;
    let key_level = u32::try_from(block.int_field(FIELD_KEY_LEVEL)?).ok()?;
    let dungeon_id = u32::try_from(block.int_field(FIELD_DUNGEON_ID)?).ok()?;
    let raw_timestamp = block.int_field(FIELD_TIME_STAMP)?;
    let week = block.int_field(FIELD_WEEK).unwrap_or(options.default_week);

    let source_channel = match block.str_field(FIELD_GUILD) {
        Some(guild) if !guild.is_empty() => SourceChannel::Guild,
        _ => SourceChannel::Friends,
    };

    Some(Entry {
        character_name: unit.to_string(),
        key_level,
        dungeon_id,
        dungeon_name: catalog.name(dungeon_id),
        raw_timestamp,
        week,
        resolved_timestamp: timestamp::resolve(raw_timestamp, week, options.region),
        source_channel,
    })
}

/// Split text into candidate blocks.  Surrounding content that never opens a
/// block on a line of its own is skipped.  A block left open at end of input
/// is still returned with whatever fields it collected.
pub fn scan_blocks(text: &str) -> Vec<RawBlock> {
    let lines: Vec<&str> = text.lines().collect();
    let mut blocks = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        if lines[i].trim() != "{" {
            i += 1;
            continue;
        }

        let mut block = RawBlock {
            line: i + 1,
            fields: HashMap::new(),
        };
        let mut depth: i64 = 1;
        let mut j = i + 1;
        while j < lines.len() && depth > 0 {
            let line = lines[j].trim();
            if depth == 1 {
                if let Some((name, value)) = parse_field(line) {
                    block.fields.entry(name).or_insert(value);
                }
            }
            depth += brace_delta(line);
            j += 1;
        }

        blocks.push(block);
        i = j;
    }

    blocks
}

/// Net brace depth change of a line, ignoring braces inside string literals.
fn brace_delta(line: &str) -> i64 {
    let mut delta = 0;
    let mut in_string = false;
    let mut escaped = false;
    for ch in line.chars() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => delta += 1,
            '}' => delta -= 1,
            _ => {}
        }
    }
    delta
}

/// Parse one `["name"] = value,` assignment.  Numeric keys (`[1] = ...`) and
/// any other syntax return `None`.
pub fn parse_field(line: &str) -> Option<(String, FieldValue)> {
    let rest = line.trim().strip_prefix("[\"")?;
    let name_end = rest.find("\"]")?;
    let name = &rest[..name_end];
    let value = rest[name_end + 2..].trim_start().strip_prefix('=')?.trim();

    if let Some(quoted) = value.strip_prefix('"') {
        return Some((name.to_string(), FieldValue::Str(read_string(quoted)?)));
    }

    let bare = value
        .split("--")
        .next()
        .unwrap_or_default()
        .trim()
        .trim_end_matches(',')
        .trim();
    let parsed = match bare.parse::<u64>() {
        Ok(number) => FieldValue::Int(number),
        Err(_) => FieldValue::Other(bare.to_string()),
    };
    Some((name.to_string(), parsed))
}

/// Read a Lua string body up to its closing quote, unescaping `\"` and `\\`.
fn read_string(body: &str) -> Option<String> {
    let mut out = String::new();
    let mut chars = body.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '"' => return Some(out),
            '\\' => out.push(chars.next()?),
            _ => out.push(ch),
        }
    }
    None
}
