use serde::{Deserialize, Serialize};

/// A source location: file ID + byte offset range.
///
/// Spans are produced by the front end and travel with every AST node so
/// that generator defects can point back at the offending source text.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    #[serde(default)]
    pub file_id: u16,
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(file_id: u16, start: u32, end: u32) -> Self {
        Self {
            file_id,
            start,
            end,
        }
    }

    pub fn dummy() -> Self {
        Self {
            file_id: 0,
            start: 0,
            end: 0,
        }
    }

    pub fn is_dummy(&self) -> bool {
        self.start == 0 && self.end == 0
    }
}

/// A value annotated with its source span.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Spanned<T> {
    pub node: T,
    #[serde(default)]
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }

    pub fn dummy(node: T) -> Self {
        Self {
            node,
            span: Span::dummy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spanned_node_keeps_span() {
        let s = Spanned::new(2, Span::new(1, 5, 6));
        assert_eq!(s.node, 2);
        assert!(!s.span.is_dummy());
        assert!(Spanned::dummy(3).span.is_dummy());
    }

    #[test]
    fn file_id_defaults_when_absent() {
        let span: Span = serde_json::from_str(r#"{"start": 3, "end": 7}"#).unwrap();
        assert_eq!(span, Span::new(0, 3, 7));
        assert!(!span.is_dummy());
        assert!(Span::dummy().is_dummy());
    }
}
