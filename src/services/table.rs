/// Extractor for contiguous blocks of pipe-delimited lines.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableExtract {
    pub rows: Vec<Vec<String>>,
    /// Index of the first line after the table (or `lines.len()`).
    pub next_index: usize,
}

/// True when the line begins and ends with `|` after trimming.
pub fn is_pipe_wrapped(line: &str) -> bool {
    let t = line.trim();
    t.len() >= 2 && t.starts_with('|') && t.ends_with('|')
}

/// Separator rows look like `|---|---|` or `|:--:|`. Only the segment up
/// to the second pipe is inspected, matching how these rows are emitted
/// in practice.
pub fn is_separator_row(line: &str) -> bool {
    let t = line.trim();
    let rest = match t.strip_prefix('|') {
        Some(rest) => rest,
        None => return false,
    };
    let end = match rest.find('|') {
        Some(end) => end,
        None => return false,
    };
    let segment = &rest[..end];
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_whitespace() || c == '-' || c == ':')
}

/// Split a pipe row into trimmed cells, dropping the empty fragments the
/// leading and trailing pipes produce. Returns `None` when no non-empty
/// cell remains.
pub fn parse_row(line: &str) -> Option<Vec<String>> {
    let cells: Vec<String> = line
        .trim()
        .split('|')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect();
    if cells.is_empty() {
        None
    } else {
        Some(cells)
    }
}

/// Consume a table starting at `lines[start]`, which the caller has
/// already identified as a pipe row. Separator rows are discarded, both
/// the conventional one under the header and any stray mid-table ones.
/// Stops at the first line that is not pipe-wrapped.
pub fn extract_table(lines: &[&str], start: usize) -> TableExtract {
    let mut rows = Vec::new();
    let mut index = start;

    if index < lines.len() {
        if let Some(cells) = parse_row(lines[index]) {
            rows.push(cells);
        }
        index += 1;
    }

    // Conventional header separator directly after row 0.
    if index < lines.len() && is_separator_row(lines[index]) {
        index += 1;
    }

    while index < lines.len() && is_pipe_wrapped(lines[index]) {
        if !is_separator_row(lines[index]) {
            if let Some(cells) = parse_row(lines[index]) {
                rows.push(cells);
            }
        }
        index += 1;
    }

    TableExtract {
        rows,
        next_index: index,
    }
}
