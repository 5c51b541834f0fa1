//! Byte-level SQL scanner.
//!
//! Placeholder detection has to ignore anything inside string literals,
//! bracket-quoted identifiers, and comments. The regex crate has no
//! lookbehind, so this is a small hand-rolled state machine instead.

#[derive(Clone)]
enum State {
    Normal,
    SingleQuoted,
    DoubleQuoted,
    BracketQuoted,
    LineComment,
    BlockComment(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PlaceholderKind {
    /// Positional `?`
    Question,
    /// `$n`, 1-based index
    Dollar(usize),
    /// `:name`
    Named(String),
}

/// A placeholder token located in raw SQL text, byte offsets half-open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Placeholder {
    pub start: usize,
    pub end: usize,
    pub kind: PlaceholderKind,
}

fn is_line_comment_start(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'-') && bytes.get(idx + 1) == Some(&b'-')
}

fn is_block_comment_start(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'/') && bytes.get(idx + 1) == Some(&b'*')
}

fn is_block_comment_end(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'*') && bytes.get(idx + 1) == Some(&b'/')
}

pub(crate) fn scan_digits(bytes: &[u8], start: usize) -> Option<(usize, &str)> {
    let mut idx = start;
    while idx < bytes.len() && bytes[idx].is_ascii_digit() {
        idx += 1;
    }
    if idx == start {
        None
    } else {
        std::str::from_utf8(&bytes[start..idx])
            .ok()
            .map(|digits| (idx, digits))
    }
}

fn scan_name(bytes: &[u8], start: usize) -> Option<(usize, &str)> {
    let first = *bytes.get(start)?;
    if !(first.is_ascii_alphabetic() || first == b'_') {
        return None;
    }
    let mut idx = start + 1;
    while idx < bytes.len() && (bytes[idx].is_ascii_alphanumeric() || bytes[idx] == b'_') {
        idx += 1;
    }
    std::str::from_utf8(&bytes[start..idx])
        .ok()
        .map(|name| (idx, name))
}

/// Locate every placeholder token in `sql`, skipping literals and comments.
pub(crate) fn find_placeholders(sql: &str) -> Vec<Placeholder> {
    let bytes = sql.as_bytes();
    let mut out = Vec::new();
    let mut state = State::Normal;
    let mut idx = 0;

    while idx < bytes.len() {
        let b = bytes[idx];
        match state {
            State::Normal => match b {
                b'\'' => state = State::SingleQuoted,
                b'"' => state = State::DoubleQuoted,
                b'[' => state = State::BracketQuoted,
                _ if is_line_comment_start(bytes, idx) => {
                    state = State::LineComment;
                    idx += 1;
                }
                _ if is_block_comment_start(bytes, idx) => {
                    state = State::BlockComment(1);
                    idx += 1;
                }
                b'?' => out.push(Placeholder {
                    start: idx,
                    end: idx + 1,
                    kind: PlaceholderKind::Question,
                }),
                b'$' => {
                    // $n is 1-based; $0 is not a placeholder
                    if let Some((digits_end, digits)) = scan_digits(bytes, idx + 1)
                        && !digits.starts_with('0')
                        && let Ok(index) = digits.parse::<usize>()
                    {
                        out.push(Placeholder {
                            start: idx,
                            end: digits_end,
                            kind: PlaceholderKind::Dollar(index),
                        });
                        idx = digits_end - 1;
                    }
                }
                b':' => {
                    if bytes.get(idx + 1) == Some(&b':') {
                        // `::` is a scope/cast token, never a placeholder
                        idx += 1;
                    } else if let Some((name_end, name)) = scan_name(bytes, idx + 1) {
                        out.push(Placeholder {
                            start: idx,
                            end: name_end,
                            kind: PlaceholderKind::Named(name.to_string()),
                        });
                        idx = name_end - 1;
                    }
                }
                _ => {}
            },
            State::SingleQuoted => {
                if b == b'\'' {
                    if bytes.get(idx + 1) == Some(&b'\'') {
                        idx += 1; // skip escaped quote
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::DoubleQuoted => {
                if b == b'"' {
                    if bytes.get(idx + 1) == Some(&b'"') {
                        idx += 1;
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::BracketQuoted => {
                if b == b']' {
                    if bytes.get(idx + 1) == Some(&b']') {
                        idx += 1;
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::LineComment => {
                if b == b'\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment(depth) => {
                if is_block_comment_start(bytes, idx) {
                    state = State::BlockComment(depth + 1);
                    idx += 1;
                } else if is_block_comment_end(bytes, idx) {
                    state = if depth == 1 {
                        State::Normal
                    } else {
                        State::BlockComment(depth - 1)
                    };
                    idx += 1;
                }
            }
        }
        idx += 1;
    }

    out
}

/// Split `sql` into the text segments around each positional `?` marker.
/// A query with N markers yields N+1 segments.
pub(crate) fn split_on_positional(sql: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut last = 0;
    for ph in find_placeholders(sql) {
        if ph.kind == PlaceholderKind::Question {
            segments.push(&sql[last..ph.start]);
            last = ph.end;
        }
    }
    segments.push(&sql[last..]);
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(sql: &str) -> Vec<PlaceholderKind> {
        find_placeholders(sql).into_iter().map(|p| p.kind).collect()
    }

    #[test]
    fn finds_each_style() {
        assert_eq!(
            kinds("select * from t where a = ? and b = :name and c = $2"),
            vec![
                PlaceholderKind::Question,
                PlaceholderKind::Named("name".into()),
                PlaceholderKind::Dollar(2),
            ]
        );
    }

    #[test]
    fn skips_literals_and_comments() {
        let sql = "select '?', \"?col\", [we?rd] -- :skip\n/* $3 */ from t where a = ?";
        assert_eq!(kinds(sql), vec![PlaceholderKind::Question]);
    }

    #[test]
    fn escaped_quote_stays_inside_literal() {
        let sql = "select 'it''s a ?' from t where a = ?";
        assert_eq!(kinds(sql), vec![PlaceholderKind::Question]);
    }

    #[test]
    fn double_colon_is_not_named() {
        assert_eq!(kinds("select a::int from t"), vec![]);
    }

    #[test]
    fn dollar_zero_is_not_a_placeholder() {
        assert_eq!(kinds("select $0, $10 from t"), vec![PlaceholderKind::Dollar(10)]);
    }

    #[test]
    fn splits_around_positional_markers() {
        assert_eq!(
            split_on_positional("a = ? and b = ?"),
            vec!["a = ", " and b = ", ""]
        );
        assert_eq!(split_on_positional("no markers"), vec!["no markers"]);
        // a ? inside a literal is text, not a split point
        assert_eq!(
            split_on_positional("a = '?' and b = ?"),
            vec!["a = '?' and b = ", ""]
        );
    }
}
