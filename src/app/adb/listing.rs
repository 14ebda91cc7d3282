//! Directory listings in the two shapes the device can produce: `ls -l -p`
//! output and `|`-delimited `stat -c` records.
//!
//! Both parsers drop lines they cannot read instead of failing the listing.

use chrono::{Local, TimeZone};

use crate::app::models::{FileEntry, ListingFormat};

/// Top-level names that make a symlink target count as a directory. The device
/// does not say whether a link points at a directory, so this is a guess and a
/// plain file whose path contains one of these names is misclassified.
const DIRECTORY_HINTS: [&str; 12] = [
    "bin", "etc", "lib", "usr", "var", "opt", "home", "mnt", "media", "data", "system", "storage",
];

const STAT_MIN_FIELDS: usize = 8;
const MODE_STRING_LEN: usize = 10;

pub fn parse_listing(format: ListingFormat, lines: &[String]) -> Vec<FileEntry> {
    match format {
        ListingFormat::LongListing => parse_long_listing(lines),
        ListingFormat::StatRecords => parse_stat_records(lines),
    }
}

pub fn parse_long_listing(lines: &[String]) -> Vec<FileEntry> {
    let entries = lines
        .iter()
        .filter_map(|line| parse_long_listing_line(line))
        .collect();
    sort_entries(entries)
}

pub fn parse_stat_records(lines: &[String]) -> Vec<FileEntry> {
    let entries = lines
        .iter()
        .filter_map(|line| parse_stat_line(line))
        .collect();
    sort_entries(entries)
}

pub fn looks_like_directory(target: &str) -> bool {
    target.ends_with('/') || DIRECTORY_HINTS.iter().any(|hint| target.contains(hint))
}

/// Binary units, at most two decimals: `1536` is `1.5 KB`.
pub fn format_size(bytes: u64) -> String {
    let kilo = bytes as f64 / 1024.0;
    let mega = kilo / 1024.0;
    let giga = mega / 1024.0;
    if giga >= 1.0 {
        format!("{} GB", trim_decimals(giga))
    } else if mega >= 1.0 {
        format!("{} MB", trim_decimals(mega))
    } else if kilo >= 1.0 {
        format!("{} KB", trim_decimals(kilo))
    } else {
        format!("{bytes} B")
    }
}

fn trim_decimals(value: f64) -> String {
    let text = format!("{value:.2}");
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn parse_long_listing_line(line: &str) -> Option<FileEntry> {
    if !matches!(line.chars().next(), Some('d' | 'l' | '-')) {
        return None;
    }
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let permissions = *tokens.first()?;
    // Shell errors such as `ls: ...` also start with `l`.
    if permissions.len() < MODE_STRING_LEN {
        return None;
    }
    if permissions.contains('?') {
        return parse_unstatable_line(permissions, &tokens);
    }
    if tokens.len() < 8 {
        return None;
    }

    let mut is_dir = permissions.starts_with('d');
    let size = tokens[4].parse::<u64>().unwrap_or(0);
    let modified_at = format!("{} {}", tokens[5].replace('-', "/"), tokens[6]);
    let mut name = tokens[7];
    let mut symlink_target = None;

    if permissions.starts_with('l') {
        // Link targets may contain spaces, so the tokens cannot be trusted here.
        if let Some((head, target)) = line.split_once(" -> ") {
            name = head.rsplit(char::is_whitespace).next().unwrap_or(name);
            let target = target.trim().to_string();
            is_dir = looks_like_directory(&target);
            symlink_target = Some(target);
        }
    }

    let name = strip_separator(name, is_dir);
    if name.is_empty() {
        return None;
    }
    Some(FileEntry {
        is_dir,
        name,
        size: if is_dir { String::new() } else { format_size(size) },
        modified_at,
        symlink_target,
        permissions: permissions.to_string(),
    })
}

/// `ls` prints `?` in place of fields it could not stat (dangling links), so
/// only the name and the link target are usable.
fn parse_unstatable_line(permissions: &str, tokens: &[&str]) -> Option<FileEntry> {
    if tokens.len() < 2 {
        return None;
    }
    let is_link = permissions.starts_with('l');
    let (name, target) = match tokens.iter().position(|token| *token == "->") {
        Some(arrow) if arrow > 1 => {
            let target = tokens
                .get(arrow + 1..)
                .and_then(|rest| rest.last())
                .map(|target| target.to_string());
            (tokens[arrow - 1], target)
        }
        _ => (*tokens.last()?, None),
    };
    let symlink_target = target.filter(|_| is_link);
    let is_dir = permissions.starts_with('d')
        || symlink_target
            .as_deref()
            .map(looks_like_directory)
            .unwrap_or(false);

    let name = strip_separator(name, is_dir);
    if name.is_empty() {
        return None;
    }
    Some(FileEntry {
        is_dir,
        name,
        size: String::new(),
        modified_at: String::new(),
        symlink_target,
        permissions: permissions.to_string(),
    })
}

/// Fields: type|permissions|links|owner|group|size|mtime|name[|link info]
fn parse_stat_line(line: &str) -> Option<FileEntry> {
    let fields: Vec<&str> = line.split('|').collect();
    if fields.len() < STAT_MIN_FIELDS {
        return None;
    }

    let kind = fields[0].trim().to_lowercase();
    let permissions = fields[1].trim();
    let is_link = kind.contains("symbolic link") || permissions.starts_with('l');
    let mut is_dir = kind.contains("directory");

    let name = fields[7]
        .trim()
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string();
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }

    let symlink_target = if is_link && permissions.starts_with('l') && fields.len() > STAT_MIN_FIELDS {
        parse_link_info(&fields[STAT_MIN_FIELDS..].join("|"))
    } else {
        None
    };
    if is_link && !is_dir {
        is_dir = symlink_target
            .as_deref()
            .map(looks_like_directory)
            .unwrap_or(false);
    }

    let size = fields[5].trim().parse::<u64>().unwrap_or(0);
    Some(FileEntry {
        is_dir,
        name,
        size: if is_dir { String::new() } else { format_size(size) },
        modified_at: format_epoch(fields[6].trim()),
        symlink_target,
        permissions: permissions.to_string(),
    })
}

/// `'name' -> 'target'` as printed by `stat -c %N`.
fn parse_link_info(info: &str) -> Option<String> {
    let (_, target) = info.split_once(" -> ")?;
    let target = target.trim().trim_matches(['\'', '"', '`']);
    if target.is_empty() {
        None
    } else {
        Some(target.to_string())
    }
}

/// Epoch seconds to local `yyyy/MM/dd HH:mm:ss`, or the raw token when it does not parse.
fn format_epoch(raw: &str) -> String {
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| Local.timestamp_opt(secs, 0).single())
        .map(|time| time.format("%Y/%m/%d %H:%M:%S").to_string())
        .unwrap_or_else(|| raw.to_string())
}

fn strip_separator(name: &str, is_dir: bool) -> String {
    if is_dir {
        name.trim_end_matches('/').to_string()
    } else {
        name.to_string()
    }
}

/// Directories first, then by extension (full name when there is none).
/// The sort is stable, so ties keep listing order.
fn sort_entries(mut entries: Vec<FileEntry>) -> Vec<FileEntry> {
    entries.sort_by(|a, b| {
        b.is_dir
            .cmp(&a.is_dir)
            .then_with(|| sort_key(&a.name).cmp(sort_key(&b.name)))
    });
    entries
}

fn sort_key(name: &str) -> &str {
    match name.rfind('.') {
        Some(index) => &name[index + 1..],
        None => name,
    }
}
