use std::ops::Range;

use serde_json::Value;

use maitre_core::domain::action::ActionArguments;

/// Byte range of the brace-balanced object opening at the first `{` in
/// `text`. Braces inside quoted strings do not count. Returns `None` when the
/// object never closes.
pub fn balanced_object(text: &str) -> Option<Range<usize>> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if let Some(open) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == open {
                quote = None;
            }
            continue;
        }

        match ch {
            '"' | '\'' => quote = Some(ch),
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start..start + offset + ch.len_utf8());
                }
            }
            _ => {}
        }
    }

    None
}

/// Parses an inline object literal. Strict JSON first, then a relaxed grammar
/// (single quotes, bare keys and values, trailing commas), then a plain
/// comma/colon split so that a sloppy literal still yields its pairs.
pub fn parse_object(literal: &str) -> ActionArguments {
    parse_json(literal)
        .or_else(|| parse_json(&relax(literal)))
        .unwrap_or_else(|| split_pairs(literal))
}

fn parse_json(text: &str) -> Option<ActionArguments> {
    match serde_json::from_str::<Value>(text).ok()? {
        Value::Object(object) => Some(object.into_iter().collect()),
        _ => None,
    }
}

fn is_structural(ch: char) -> bool {
    matches!(ch, '{' | '}' | '[' | ']' | ',' | ':')
}

/// Rewrites a relaxed literal into JSON text.
fn relax(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len() + 16);
    let mut chars = literal.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' | '\'' => {
                let mut value = String::new();
                let mut escaped = false;
                for inner in chars.by_ref() {
                    if escaped {
                        value.push(if inner == 'n' { '\n' } else { inner });
                        escaped = false;
                    } else if inner == '\\' {
                        escaped = true;
                    } else if inner == ch {
                        break;
                    } else {
                        value.push(inner);
                    }
                }
                out.push_str(&Value::String(value).to_string());
            }
            '}' | ']' => {
                drop_trailing_comma(&mut out);
                out.push(ch);
            }
            ch if is_structural(ch) || ch.is_whitespace() => out.push(ch),
            first => {
                let mut token = String::from(first);
                while let Some(&next) = chars.peek() {
                    if is_structural(next) || next == '"' || next == '\'' {
                        break;
                    }
                    token.push(next);
                    chars.next();
                }
                let trimmed = token.trim_end();
                out.push_str(&bare_token(trimmed));
                out.push_str(&token[trimmed.len()..]);
            }
        }
    }

    out
}

fn bare_token(token: &str) -> String {
    let is_literal = matches!(token, "true" | "false" | "null")
        || serde_json::from_str::<serde_json::Number>(token).is_ok();
    if is_literal {
        token.to_string()
    } else {
        Value::String(token.to_string()).to_string()
    }
}

fn drop_trailing_comma(out: &mut String) {
    let trimmed = out.trim_end().len();
    if out[..trimmed].ends_with(',') {
        out.truncate(trimmed - 1);
    }
}

fn split_pairs(literal: &str) -> ActionArguments {
    let body = literal.trim().trim_start_matches('{').trim_end_matches('}');

    body.split(',')
        .filter_map(|pair| {
            let (key, value) = split_on_colon(pair)?;
            let key = unquote(key);
            if key.is_empty() {
                return None;
            }
            let value = unquote(value);
            let value = match value.parse::<u64>() {
                Ok(number) => Value::from(number),
                Err(_) => Value::String(value.to_string()),
            };
            Some((key.to_string(), value))
        })
        .collect()
}

/// Splits on the first ASCII or full-width colon.
pub(crate) fn split_on_colon(text: &str) -> Option<(&str, &str)> {
    let (index, colon) = text.char_indices().find(|(_, ch)| *ch == ':' || *ch == '：')?;
    Some((&text[..index], &text[index + colon.len_utf8()..]))
}

fn unquote(text: &str) -> &str {
    text.trim().trim_matches(|ch| ch == '"' || ch == '\'').trim()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{balanced_object, parse_object, split_on_colon};

    #[test]
    fn scanner_skips_braces_inside_strings() {
        let text = r#"prefill: {"note": "bring {cake}", "size": 4} trailing"#;
        let range = balanced_object(text).expect("balanced");
        assert_eq!(&text[range], r#"{"note": "bring {cake}", "size": 4}"#);
    }

    #[test]
    fn scanner_spans_lines_and_nesting() {
        let text = "{\n  \"a\": {\"b\": 1},\n  \"c\": 2\n}\n[/RESERVATION_FORM]";
        let range = balanced_object(text).expect("balanced");
        assert!(text[range].ends_with("2\n}"));
    }

    #[test]
    fn scanner_reports_unclosed_objects() {
        assert_eq!(balanced_object("{\"a\": 1"), None);
        assert_eq!(balanced_object("no braces here"), None);
        assert_eq!(balanced_object("{\"a\": \"}\""), None);
    }

    #[test]
    fn relaxed_literal_accepts_single_quotes_and_bare_keys() {
        let parsed = parse_object("{customer_name: '王小明', party_size: 4, vip: true,}");
        assert_eq!(parsed.get("customer_name"), Some(&json!("王小明")));
        assert_eq!(parsed.get("party_size"), Some(&json!(4)));
        assert_eq!(parsed.get("vip"), Some(&json!(true)));
    }

    #[test]
    fn sloppy_literal_falls_back_to_pair_split() {
        let parsed = parse_object("{reservation_time: 19:00, party_size：4}");
        assert_eq!(parsed.get("reservation_time"), Some(&json!("19:00")));
        assert_eq!(parsed.get("party_size"), Some(&json!(4)));
    }

    #[test]
    fn colon_split_prefers_the_first_colon_of_either_width() {
        assert_eq!(split_on_colon("time：19:00"), Some(("time", "19:00")));
        assert_eq!(split_on_colon("time: 19：00"), Some(("time", " 19：00")));
        assert_eq!(split_on_colon("no colon"), None);
    }
}
