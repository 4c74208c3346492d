//! Drive link parsing.

use std::sync::LazyLock;

use regex::Regex;

/// File link shapes, tried in order.
static FILE_ID_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        // https://drive.google.com/file/d/<id>/view
        Regex::new(r"/d/([a-zA-Z0-9_-]+)").unwrap(),
        // https://drive.google.com/open?id=<id>, .../uc?export=download&id=<id>
        Regex::new(r"[?&]id=([a-zA-Z0-9_-]+)").unwrap(),
    ]
});

static FOLDER_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/folders/([a-zA-Z0-9_-]+)").unwrap());

/// Extract a Drive file ID from a share link.
///
/// Recognizes `/d/<id>` paths and `id=<id>` query parameters. Anything else
/// yields `None`.
pub fn extract_origin_id(link: &str) -> Option<String> {
    let link = link.trim();
    FILE_ID_PATTERNS
        .iter()
        .find_map(|re| re.captures(link))
        .map(|c| c[1].to_string())
}

/// Accept either a folder ID or a folder URL and return the ID.
pub fn normalize_folder_id(folder: &str) -> String {
    let folder = folder.trim();
    FOLDER_ID_PATTERN
        .captures(folder)
        .map(|c| c[1].to_string())
        .unwrap_or_else(|| folder.to_string())
}

/// Read a link list: one link per line, blank lines and `#` comments ignored.
pub fn parse_link_list(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
