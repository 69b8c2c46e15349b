use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::models::{ListBlock, ListKind, ParagraphPart, Section};
use crate::services::table::{extract_table, parse_row};

/// Segment raw assistant text into renderable sections.
///
/// Single forward pass over trimmed lines with one line of lookahead for
/// tables. Lines are classified in this exact precedence order, which is
/// the single source of truth: table row > title > numbered item >
/// bullet item > blank > plain text. Deterministic; no external state.
///
/// Never returns nothing for non-empty input: when no structure is
/// recognized at all, the entire trimmed input becomes one paragraph.
pub fn segment(input: &str) -> Vec<Section> {
    let lines: Vec<&str> = input.lines().map(str::trim).collect();

    let mut ctx = SegmentContext::new();
    let mut index = 0;

    while index < lines.len() {
        let line = lines[index];

        if is_table_row(line) {
            ctx.flush_list();
            ctx.flush_paragraph();
            let extract = extract_table(&lines, index);
            if !extract.rows.is_empty() {
                ctx.sections.push(Section::Table(extract.rows));
            }
            ctx.blank_run = 0;
            index = extract.next_index;
            continue;
        }

        if let Some(title) = title_text(line) {
            ctx.flush_list();
            ctx.flush_paragraph();
            ctx.sections.push(Section::Title(title));
            ctx.blank_run = 0;
        } else if let Some(item) = numbered_item(line) {
            ctx.push_item(ListKind::Numbered, item);
            ctx.blank_run = 0;
        } else if let Some(item) = bullet_item(line) {
            ctx.push_item(ListKind::Bullet, item);
            ctx.blank_run = 0;
        } else if line.is_empty() {
            ctx.blank_run += 1;
            if ctx.blank_run >= 2 {
                ctx.flush_list();
                ctx.flush_paragraph();
                ctx.blank_run = 0;
            }
        } else {
            ctx.flush_list();
            ctx.paragraph.push(ParagraphPart::Text(line.to_string()));
            ctx.blank_run = 0;
        }

        index += 1;
    }

    ctx.finish(input)
}

struct SegmentContext {
    sections: Vec<Section>,
    // Paragraph parts accumulated since the last section boundary
    paragraph: Vec<ParagraphPart>,
    // Open list, folded into the paragraph when the kind switches or
    // any boundary is hit
    list: Option<ListBlock>,
    blank_run: u32,
}

impl SegmentContext {
    fn new() -> Self {
        Self {
            sections: Vec::new(),
            paragraph: Vec::new(),
            list: None,
            blank_run: 0,
        }
    }

    fn push_item(&mut self, kind: ListKind, item: &str) {
        if let Some(open) = &self.list {
            if open.kind != kind {
                self.flush_list();
            }
        }
        self.list
            .get_or_insert_with(|| ListBlock {
                kind,
                items: Vec::new(),
            })
            .items
            .push(item.to_string());
    }

    fn flush_list(&mut self) {
        if let Some(list) = self.list.take() {
            if !list.items.is_empty() {
                self.paragraph.push(ParagraphPart::List(list));
            }
        }
    }

    fn flush_paragraph(&mut self) {
        if self.paragraph.is_empty() {
            return;
        }
        let parts = std::mem::take(&mut self.paragraph);
        self.sections.push(Section::Paragraph(parts));
    }

    fn finish(mut self, input: &str) -> Vec<Section> {
        self.flush_list();
        self.flush_paragraph();

        if self.sections.is_empty() {
            let trimmed = input.trim();
            if !trimmed.is_empty() {
                self.sections.push(Section::Paragraph(vec![ParagraphPart::Text(
                    trimmed.to_string(),
                )]));
            }
        }
        self.sections
    }
}

/// A table row starts and ends with `|` and splits into at least two
/// non-empty cells; anything weaker falls through to the other classes.
fn is_table_row(line: &str) -> bool {
    line.starts_with('|')
        && line.ends_with('|')
        && line.len() >= 2
        && parse_row(line).is_some_and(|cells| cells.len() >= 2)
}

/// Title heuristics, tried in order: wrapped in bold markers; a
/// capitalized line ending in `:` under 100 chars; a capitalized line
/// under 80 chars with no `.` or `,`.
fn title_text(line: &str) -> Option<String> {
    if line.len() > 4 && line.starts_with("**") && line.ends_with("**") {
        let inner = line[2..line.len() - 2].trim();
        if !inner.is_empty() {
            return Some(inner.to_string());
        }
    }

    let capitalized = line.chars().next().is_some_and(|c| c.is_uppercase());
    if capitalized {
        let chars = line.chars().count();
        if line.ends_with(':') && chars < 100 {
            return Some(line.to_string());
        }
        if chars < 80 && !line.contains('.') && !line.contains(',') {
            return Some(line.to_string());
        }
    }
    None
}

/// Matches `^\d+\.\s+`, returning the item text with the marker
/// stripped.
fn numbered_item(line: &str) -> Option<&str> {
    let digits = line.bytes().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let rest = line[digits..].strip_prefix('.')?;
    let item = rest.strip_prefix(|c: char| c.is_whitespace())?;
    Some(item.trim())
}

/// Matches `^[-•*]\s+`.
fn bullet_item(line: &str) -> Option<&str> {
    let mut chars = line.chars();
    if !matches!(chars.next()?, '-' | '•' | '*') {
        return None;
    }
    let item = chars.as_str().strip_prefix(|c: char| c.is_whitespace())?;
    Some(item.trim())
}

/// Memoizes segmentation per message so repeated re-renders never
/// re-segment. Keyed by message id; the stored text is compared so an
/// id reused with different text (fresh conversation) re-segments.
#[derive(Debug, Default)]
pub struct SegmentCache {
    entries: Mutex<HashMap<u64, CacheEntry>>,
}

#[derive(Debug)]
struct CacheEntry {
    text: String,
    sections: Arc<Vec<Section>>,
}

impl SegmentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sections_for(&self, message_id: u64, text: &str) -> Arc<Vec<Section>> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get(&message_id) {
            if entry.text == text {
                return Arc::clone(&entry.sections);
            }
        }
        let sections = Arc::new(segment(text));
        entries.insert(
            message_id,
            CacheEntry {
                text: text.to_string(),
                sections: Arc::clone(&sections),
            },
        );
        sections
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let input = "**Report**\n\n| A | B |\n| 1 | 2 |\n\nSome closing remarks here.";
        assert_eq!(segment(input), segment(input));
    }

    #[test]
    fn test_plain_sentences_become_one_paragraph() {
        let sections = segment("the quick brown fox jumps.\nover the lazy dog, twice.");
        assert_eq!(sections.len(), 1);
        match &sections[0] {
            Section::Paragraph(parts) => {
                assert_eq!(parts.len(), 2);
                assert_eq!(
                    parts[0],
                    ParagraphPart::Text("the quick brown fox jumps.".to_string())
                );
            }
            other => panic!("Expected Paragraph, got {:?}", other),
        }
    }

    #[test]
    fn test_whitespace_only_yields_nothing() {
        assert!(segment("   \n\n  ").is_empty());
    }

    #[test]
    fn test_bold_wrapped_title() {
        let sections = segment("**Weekly Summary**\nall numbers are up.");
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0], Section::Title("Weekly Summary".to_string()));
    }

    #[test]
    fn test_capitalized_colon_title() {
        let sections = segment("Top products this month:\nthe usual suspects, mostly.");
        assert_eq!(
            sections[0],
            Section::Title("Top products this month:".to_string())
        );
    }

    #[test]
    fn test_short_capitalized_line_is_title() {
        let sections = segment("Revenue Overview\nfigures below are net of refunds.");
        assert_eq!(sections[0], Section::Title("Revenue Overview".to_string()));
    }

    #[test]
    fn test_long_or_punctuated_lines_are_not_titles() {
        let sections = segment("Revenue went up, costs went down.");
        assert!(matches!(sections[0], Section::Paragraph(_)));
    }

    #[test]
    fn test_table_with_separator() {
        let sections = segment("| A | B |\n|---|---|\n| 1 | 2 |\n| 3 | 4 |");
        assert_eq!(sections.len(), 1);
        assert_eq!(
            sections[0],
            Section::Table(vec![
                vec!["A".to_string(), "B".to_string()],
                vec!["1".to_string(), "2".to_string()],
                vec!["3".to_string(), "4".to_string()],
            ])
        );
    }

    #[test]
    fn test_lone_table_row() {
        let sections = segment("| A | B |");
        assert_eq!(
            sections[0],
            Section::Table(vec![vec!["A".to_string(), "B".to_string()]])
        );
    }

    #[test]
    fn test_list_kind_switch_flushes_prior_list() {
        let sections = segment("1. first\n2. second\n- bullet");
        assert_eq!(sections.len(), 1);
        match &sections[0] {
            Section::Paragraph(parts) => {
                assert_eq!(parts.len(), 2);
                assert_eq!(
                    parts[0],
                    ParagraphPart::List(ListBlock {
                        kind: ListKind::Numbered,
                        items: vec!["first".to_string(), "second".to_string()],
                    })
                );
                assert_eq!(
                    parts[1],
                    ParagraphPart::List(ListBlock {
                        kind: ListKind::Bullet,
                        items: vec!["bullet".to_string()],
                    })
                );
            }
            other => panic!("Expected Paragraph, got {:?}", other),
        }
    }

    #[test]
    fn test_bullet_markers() {
        let sections = segment("- dash\n• dot\n* star");
        match &sections[0] {
            Section::Paragraph(parts) => {
                assert_eq!(
                    parts[0],
                    ParagraphPart::List(ListBlock {
                        kind: ListKind::Bullet,
                        items: vec![
                            "dash".to_string(),
                            "dot".to_string(),
                            "star".to_string()
                        ],
                    })
                );
            }
            other => panic!("Expected Paragraph, got {:?}", other),
        }
    }

    #[test]
    fn test_double_blank_is_section_boundary() {
        let sections = segment("first block of text here.\n\n\nsecond block of text here.");
        assert_eq!(sections.len(), 2);
    }

    #[test]
    fn test_single_blank_keeps_paragraph_open() {
        let sections = segment("first line of text here.\n\nstill the same paragraph.");
        assert_eq!(sections.len(), 1);
    }

    #[test]
    fn test_text_after_table_resumes() {
        let sections = segment("| A | B |\n| 1 | 2 |\nclosing line, with detail.");
        assert_eq!(sections.len(), 2);
        assert!(matches!(sections[0], Section::Table(_)));
        assert!(matches!(sections[1], Section::Paragraph(_)));
    }

    #[test]
    fn test_mixed_document() {
        let input = "**Sales Digest**\norders rose sharply, as shown below.\n1. north region\n2. south region\n\n\n| Region | Orders |\n|---|---|\n| North | 120 |";
        let sections = segment(input);
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0], Section::Title("Sales Digest".to_string()));
        match &sections[1] {
            Section::Paragraph(parts) => {
                assert!(matches!(parts[0], ParagraphPart::Text(_)));
                assert!(matches!(parts[1], ParagraphPart::List(_)));
            }
            other => panic!("Expected Paragraph, got {:?}", other),
        }
        assert!(matches!(sections[2], Section::Table(_)));
    }

    #[test]
    fn test_cache_returns_same_sections_without_resegmenting() {
        let cache = SegmentCache::new();
        let first = cache.sections_for(1, "hello there, general text.");
        let second = cache.sections_for(1, "hello there, general text.");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_cache_resegments_when_text_changes() {
        let cache = SegmentCache::new();
        let first = cache.sections_for(1, "old text, unchanged.");
        let second = cache.sections_for(1, "new text entirely, replaced.");
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
