//! Tolerant parser for a JSON document that is still being streamed
//!
//! Whatever has arrived so far is closed off as if the document ended there:
//! an open string keeps its prefix, open objects and arrays are closed, and a
//! key whose value has not started yet is left out. Numbers and literals cut
//! off at the end are dropped since they may still grow. Malformed input
//! yields `None` rather than an error.

use serde_json::{Map, Number, Value};

/// A best-effort view of a truncated JSON document.
#[derive(Clone, Debug, PartialEq)]
pub struct PartialJson {
    pub value: Value,
    /// Top-level object key whose string value was cut off mid-way.
    pub open_key: Option<String>,
    /// The top-level object's closing brace has arrived.
    pub closed: bool,
}

impl PartialJson {
    /// A top-level string field that has been fully received.
    pub fn complete_str(&self, key: &str) -> Option<&str> {
        if self.open_key.as_deref() == Some(key) {
            return None;
        }
        self.value.get(key).and_then(Value::as_str)
    }

    /// A top-level string field, complete or not.
    pub fn str(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(Value::as_str)
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.value.get(key).is_some()
    }
}

pub fn parse_partial(input: &str) -> Option<PartialJson> {
    let mut parser = Parser {
        chars: input.chars().collect(),
        pos: 0,
        open_key: None,
        closed: false,
    };
    parser.skip_ws();
    let value = parser.value(0, None).ok()??;
    parser.skip_ws();
    if !parser.at_end() {
        return None;
    }
    Some(PartialJson {
        value,
        open_key: parser.open_key,
        closed: parser.closed,
    })
}

/// Parse failure: the input can never become valid JSON.
struct Malformed;

type Step<T> = Result<T, Malformed>;

struct Parser {
    chars: Vec<char>,
    pos: usize,
    open_key: Option<String>,
    closed: bool,
}

impl Parser {
    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    /// `Ok(None)` means the input ended before a usable value.
    fn value(&mut self, depth: usize, key: Option<&str>) -> Step<Option<Value>> {
        match self.peek() {
            None => Ok(None),
            Some('{') => self.object(depth).map(Some),
            Some('[') => self.array(depth).map(Some),
            Some('"') => {
                let (s, complete) = self.string()?;
                if !complete && depth == 1 {
                    self.open_key = key.map(String::from);
                }
                Ok(Some(Value::String(s)))
            }
            Some('t') => self.literal("true", Value::Bool(true)),
            Some('f') => self.literal("false", Value::Bool(false)),
            Some('n') => self.literal("null", Value::Null),
            Some(c) if c == '-' || c.is_ascii_digit() => self.number(),
            Some(_) => Err(Malformed),
        }
    }

    fn object(&mut self, depth: usize) -> Step<Value> {
        self.bump();
        let mut map = Map::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => return Ok(Value::Object(map)),
                Some('}') => {
                    self.bump();
                    self.closed |= depth == 0;
                    return Ok(Value::Object(map));
                }
                Some('"') => {}
                Some(_) => return Err(Malformed),
            }
            let (key, complete) = self.string()?;
            if !complete {
                return Ok(Value::Object(map));
            }
            self.skip_ws();
            match self.bump() {
                None => return Ok(Value::Object(map)),
                Some(':') => {}
                Some(_) => return Err(Malformed),
            }
            self.skip_ws();
            match self.value(depth + 1, Some(&key))? {
                Some(v) => {
                    map.insert(key, v);
                }
                None => return Ok(Value::Object(map)),
            }
            self.skip_ws();
            match self.bump() {
                None => return Ok(Value::Object(map)),
                Some(',') => {}
                Some('}') => {
                    self.closed |= depth == 0;
                    return Ok(Value::Object(map));
                }
                Some(_) => return Err(Malformed),
            }
        }
    }

    fn array(&mut self, depth: usize) -> Step<Value> {
        self.bump();
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => return Ok(Value::Array(items)),
                Some(']') => {
                    self.bump();
                    return Ok(Value::Array(items));
                }
                _ => {}
            }
            match self.value(depth + 1, None)? {
                Some(v) => items.push(v),
                None => return Ok(Value::Array(items)),
            }
            self.skip_ws();
            match self.bump() {
                None => return Ok(Value::Array(items)),
                Some(',') => {}
                Some(']') => return Ok(Value::Array(items)),
                Some(_) => return Err(Malformed),
            }
        }
    }

    /// Returns the decoded string and whether its closing quote was seen.
    /// A dangling escape at the end is dropped.
    fn string(&mut self) -> Step<(String, bool)> {
        self.bump();
        let mut out = String::new();
        loop {
            let Some(c) = self.bump() else {
                return Ok((out, false));
            };
            match c {
                '"' => return Ok((out, true)),
                '\\' => {
                    let Some(esc) = self.bump() else {
                        return Ok((out, false));
                    };
                    match esc {
                        '"' => out.push('"'),
                        '\\' => out.push('\\'),
                        '/' => out.push('/'),
                        'b' => out.push('\u{0008}'),
                        'f' => out.push('\u{000C}'),
                        'n' => out.push('\n'),
                        'r' => out.push('\r'),
                        't' => out.push('\t'),
                        'u' => match self.unicode_escape()? {
                            Some(ch) => out.push(ch),
                            None => return Ok((out, false)),
                        },
                        _ => return Err(Malformed),
                    }
                }
                c => out.push(c),
            }
        }
    }

    fn hex4(&mut self) -> Step<Option<u32>> {
        let mut code = 0u32;
        for _ in 0..4 {
            let Some(c) = self.bump() else {
                return Ok(None);
            };
            code = code * 16 + c.to_digit(16).ok_or(Malformed)?;
        }
        Ok(Some(code))
    }

    /// `\uXXXX`, including surrogate pairs. `None` if cut off.
    fn unicode_escape(&mut self) -> Step<Option<char>> {
        let Some(high) = self.hex4()? else {
            return Ok(None);
        };
        if !(0xD800..0xDC00).contains(&high) {
            return Ok(Some(char::from_u32(high).unwrap_or('\u{FFFD}')));
        }
        match (self.bump(), self.bump()) {
            (Some('\\'), Some('u')) => {}
            (None, _) | (Some('\\'), None) => return Ok(None),
            _ => return Ok(Some('\u{FFFD}')),
        }
        let Some(low) = self.hex4()? else {
            return Ok(None);
        };
        let code = 0x10000 + ((high - 0xD800) << 10) + (low.wrapping_sub(0xDC00) & 0x3FF);
        Ok(Some(char::from_u32(code).unwrap_or('\u{FFFD}')))
    }

    fn literal(&mut self, word: &str, value: Value) -> Step<Option<Value>> {
        for expected in word.chars() {
            match self.bump() {
                None => return Ok(None),
                Some(c) if c == expected => {}
                Some(_) => return Err(Malformed),
            }
        }
        Ok(Some(value))
    }

    fn number(&mut self) -> Step<Option<Value>> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
        {
            self.pos += 1;
        }
        if self.at_end() {
            // may still grow
            return Ok(None);
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        if let Ok(i) = text.parse::<i64>() {
            return Ok(Some(Value::Number(i.into())));
        }
        let f: f64 = text.parse().map_err(|_| Malformed)?;
        Number::from_f64(f)
            .map(|n| Some(Value::Number(n)))
            .ok_or(Malformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn complete_document() {
        let p = parse_partial(r#"{"a": 1, "b": [true, null], "c": "x"}"#).unwrap();
        assert_eq!(p.value, json!({"a": 1, "b": [true, null], "c": "x"}));
        assert!(p.open_key.is_none());
        assert!(p.closed);
    }

    #[test]
    fn closed_only_at_top_level_brace() {
        assert!(!parse_partial(r#"{"text":"hi"#).unwrap().closed);
        assert!(!parse_partial(r#"{"mention":{"to":"beta"}"#).unwrap().closed);
        assert!(parse_partial(r#"{"mention":{"to":"beta"}}"#).unwrap().closed);
        assert!(parse_partial("{}").unwrap().closed);
    }

    #[test]
    fn open_string_keeps_prefix() {
        let p = parse_partial(r#"{"spaceId":"lobby","text":"Hel"#).unwrap();
        assert_eq!(p.complete_str("spaceId"), Some("lobby"));
        assert_eq!(p.str("text"), Some("Hel"));
        assert_eq!(p.complete_str("text"), None);
        assert_eq!(p.open_key.as_deref(), Some("text"));
    }

    #[test]
    fn truncated_key_and_colon() {
        assert_eq!(parse_partial(r#"{"spa"#).unwrap().value, json!({}));
        assert_eq!(parse_partial(r#"{"spaceId""#).unwrap().value, json!({}));
        assert_eq!(parse_partial(r#"{"spaceId": "#).unwrap().value, json!({}));
        assert_eq!(parse_partial("").map(|p| p.value), None);
    }

    #[test]
    fn dangling_escapes_are_dropped() {
        let p = parse_partial(r#"{"text":"line\"#).unwrap();
        assert_eq!(p.str("text"), Some("line"));
        let p = parse_partial(r#"{"text":"caf\u00"#).unwrap();
        assert_eq!(p.str("text"), Some("caf"));
        let p = parse_partial(r#"{"text":"café \ud83d"#).unwrap();
        assert_eq!(p.str("text"), Some("café "));
        let p = parse_partial(r#"{"text":"a\nb😀"}"#).unwrap();
        assert_eq!(p.str("text"), Some("a\nb😀"));
    }

    #[test]
    fn trailing_numbers_and_literals_wait() {
        assert_eq!(parse_partial(r#"{"n": 12"#).unwrap().value, json!({}));
        assert_eq!(parse_partial(r#"{"n": 12,"#).unwrap().value, json!({"n": 12}));
        assert_eq!(parse_partial(r#"{"ok": tr"#).unwrap().value, json!({}));
        assert_eq!(parse_partial(r#"[1.5, fals"#).unwrap().value, json!([1.5]));
    }

    #[test]
    fn nested_open_string_is_not_top_level() {
        let p = parse_partial(r#"{"mention":{"reason":"need appr"#).unwrap();
        assert!(p.open_key.is_none());
        assert_eq!(p.value["mention"]["reason"], "need appr");
    }

    #[test]
    fn malformed_is_none() {
        assert!(parse_partial(r#"{"a" 1}"#).is_none());
        assert!(parse_partial(r#"{"a": x}"#).is_none());
        assert!(parse_partial(r#"{"a": "\q"}"#).is_none());
        assert!(parse_partial(r#"{"a": 1}}"#).is_none());
    }
}
