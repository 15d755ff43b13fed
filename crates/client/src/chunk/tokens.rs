//! Whitespace token model.
//!
//! A token is a maximal run of non-whitespace characters. Positions are byte
//! offsets into the source, so any token range maps back to an exact slice.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub start: usize,
    pub end: usize,
}

pub fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut start = None;
    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            if let Some(s) = start.take() {
                tokens.push(Token { start: s, end: i });
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        tokens.push(Token { start: s, end: text.len() });
    }
    tokens
}

/// Token count without materializing positions.
pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}
