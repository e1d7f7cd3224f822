//! `:name` placeholders to PostgreSQL `$n` positions
//!
//! Repeated names share one position. `::type` casts, quoted literals,
//! quoted identifiers and comments pass through untouched.

use serde_json::Value;

use crate::services::query_analyzer::{ExecutionError, QueryParams};

/// SQL rewritten for positional binding, with values in position order
#[derive(Debug, Clone, PartialEq)]
pub struct BoundQuery {
    pub sql: String,
    pub values: Vec<Value>,
}

pub fn bind_named(query: &str, params: &QueryParams) -> Result<BoundQuery, ExecutionError> {
    let chars: Vec<char> = query.chars().collect();
    let mut sql = String::with_capacity(query.len());
    let mut names: Vec<String> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' => {
                let end = closing_quote(&chars, i, c);
                sql.extend(&chars[i..end]);
                i = end;
            },
            '-' if chars.get(i + 1) == Some(&'-') => {
                let end =
                    chars[i..].iter().position(|&ch| ch == '\n').map_or(chars.len(), |p| i + p);
                sql.extend(&chars[i..end]);
                i = end;
            },
            ':' if chars.get(i + 1) == Some(&':') => {
                sql.push_str("::");
                i += 2;
            },
            ':' if chars.get(i + 1).is_some_and(|ch| ch.is_ascii_alphabetic() || *ch == '_') => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len()
                    && (chars[end].is_ascii_alphanumeric() || chars[end] == '_')
                {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                let position = match names.iter().position(|n| *n == name) {
                    Some(p) => p + 1,
                    None => {
                        names.push(name);
                        names.len()
                    },
                };
                sql.push('$');
                sql.push_str(&position.to_string());
                i = end;
            },
            _ => {
                sql.push(c);
                i += 1;
            },
        }
    }

    let values = names
        .iter()
        .map(|name| {
            params.get(name).cloned().ok_or_else(|| {
                ExecutionError::Syntax(format!("No value bound for parameter :{}", name))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(BoundQuery { sql, values })
}

/// Index one past the closing quote; a doubled quote is an escaped quote
fn closing_quote(chars: &[char], open: usize, quote: char) -> usize {
    let mut i = open + 1;
    while i < chars.len() {
        if chars[i] == quote {
            if chars.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}
