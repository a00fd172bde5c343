use super::{ParamValue, QueryParams};
use crate::error::{AppError, AppResult};

/// Positional placeholder syntax of a dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `$1`, `$2`, ... (PostgreSQL)
    Dollar,
    /// `?1`, `?2`, ... (SQLite)
    Question,
}

impl PlaceholderStyle {
    fn placeholder(self, index: usize) -> String {
        match self {
            PlaceholderStyle::Dollar => format!("${}", index),
            PlaceholderStyle::Question => format!("?{}", index),
        }
    }
}

/// A template rewritten to positional form, with values in bind order.
#[derive(Debug)]
pub struct BoundQuery<'p> {
    pub sql: String,
    pub values: Vec<&'p ParamValue>,
}

/// Rewrite `:name` placeholders to positional ones.
///
/// A name used twice maps to the same position. Quoted strings (including
/// PostgreSQL `E'...'` and `$tag$...$tag$` bodies), quoted identifiers,
/// comments and `::` casts are copied untouched. Parameters the template
/// does not reference are ignored; a referenced name with no value is an
/// error.
pub fn bind_named<'p>(
    sql: &str,
    params: &'p QueryParams,
    style: PlaceholderStyle,
) -> AppResult<BoundQuery<'p>> {
    rewrite(sql, params, |index| style.placeholder(index))
}

/// Dollar-style rewrite where position `i` becomes `$i::casts[i - 1]` when
/// a cast is given. Positions are assigned exactly as in [`bind_named`].
pub fn bind_named_with_casts<'p>(
    sql: &str,
    params: &'p QueryParams,
    casts: &[Option<String>],
) -> AppResult<BoundQuery<'p>> {
    rewrite(sql, params, |index| {
        let placeholder = PlaceholderStyle::Dollar.placeholder(index);
        match casts.get(index - 1).and_then(Option::as_deref) {
            Some(cast) => format!("{}::{}", placeholder, cast),
            None => placeholder,
        }
    })
}

fn rewrite<'p>(
    sql: &str,
    params: &'p QueryParams,
    placeholder: impl Fn(usize) -> String,
) -> AppResult<BoundQuery<'p>> {
    let chars: Vec<char> = sql.chars().collect();
    let mut rewritten = String::with_capacity(sql.len());
    let mut names: Vec<String> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match c {
            '\'' | '"' => {
                // E'...' strings let a backslash escape the quote.
                let escapes = c == '\''
                    && i > 0
                    && matches!(chars[i - 1], 'E' | 'e')
                    && (i < 2 || !is_ident_char(chars[i - 2]));
                rewritten.push(c);
                i += 1;
                while i < chars.len() {
                    let current = chars[i];
                    rewritten.push(current);
                    i += 1;
                    if escapes && current == '\\' {
                        if let Some(&escaped) = chars.get(i) {
                            rewritten.push(escaped);
                            i += 1;
                        }
                    } else if current == c {
                        break;
                    }
                }
            }
            '$' => match dollar_tag_end(&chars, i) {
                Some(tag_end) => {
                    let tag = &chars[i..=tag_end];
                    rewritten.extend(tag);
                    i = tag_end + 1;
                    while i < chars.len() {
                        if chars[i..].starts_with(tag) {
                            rewritten.extend(tag);
                            i += tag.len();
                            break;
                        }
                        rewritten.push(chars[i]);
                        i += 1;
                    }
                }
                None => {
                    rewritten.push(c);
                    i += 1;
                }
            },
            '-' if next == Some('-') => {
                while i < chars.len() && chars[i] != '\n' {
                    rewritten.push(chars[i]);
                    i += 1;
                }
            }
            '/' if next == Some('*') => {
                rewritten.push_str("/*");
                i += 2;
                while i < chars.len() {
                    if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
                        rewritten.push_str("*/");
                        i += 2;
                        break;
                    }
                    rewritten.push(chars[i]);
                    i += 1;
                }
            }
            ':' if next == Some(':') => {
                rewritten.push_str("::");
                i += 2;
            }
            ':' if next.map_or(false, is_ident_start) => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && is_ident_char(chars[end]) {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();

                let position = match names.iter().position(|n| *n == name) {
                    Some(p) => p,
                    None => {
                        names.push(name);
                        names.len() - 1
                    }
                };
                rewritten.push_str(&placeholder(position + 1));
                i = end;
            }
            _ => {
                rewritten.push(c);
                i += 1;
            }
        }
    }

    let values = names
        .iter()
        .map(|name| {
            params
                .get(name)
                .ok_or_else(|| AppError::Query(format!("no value bound for :{}", name)))
        })
        .collect::<AppResult<Vec<_>>>()?;

    Ok(BoundQuery {
        sql: rewritten,
        values,
    })
}

/// Index of the closing `$` when a dollar-quote opener (`$$` or `$tag$`)
/// starts at `start`. `$1` positional markers and identifiers containing
/// `$` do not open one.
fn dollar_tag_end(chars: &[char], start: usize) -> Option<usize> {
    if start > 0 && is_ident_char(chars[start - 1]) {
        return None;
    }
    let mut end = start + 1;
    if chars.get(end).map_or(false, |c| c.is_ascii_digit()) {
        return None;
    }
    while end < chars.len() && is_ident_char(chars[end]) {
        end += 1;
    }
    (chars.get(end) == Some(&'$')).then_some(end)
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}
