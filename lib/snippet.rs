use std::fmt;

/// Sequence number of a submitted snippet. Assigned by the compiler's
/// counter, never reused, strictly increasing for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnippetId(pub u32);

impl SnippetId {
    pub fn next(self) -> SnippetId {
        SnippetId(self.0 + 1)
    }
}

impl fmt::Display for SnippetId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snippet {
    pub id: SnippetId,
    pub source: String,
}

impl Snippet {
    pub fn new(id: SnippetId, source: &str) -> Self {
        Self {
            id,
            source: source.to_string(),
        }
    }
}
