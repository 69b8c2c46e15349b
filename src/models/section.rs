use serde::{Deserialize, Serialize};

/// One structurally classified unit of an assistant response.
///
/// Consumers should match exhaustively on the variant, never probe for
/// optional fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Section {
    Title(String),
    /// Ordered rows of non-empty cells. Whether row 0 renders as a
    /// header is a presentation decision; a one-row table is valid.
    Table(Vec<Vec<String>>),
    Paragraph(Vec<ParagraphPart>),
}

/// A paragraph interleaves free text lines with list blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParagraphPart {
    Text(String),
    List(ListBlock),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListBlock {
    pub kind: ListKind,
    pub items: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListKind {
    Bullet,
    Numbered,
}
