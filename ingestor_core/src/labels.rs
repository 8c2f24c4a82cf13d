use std::collections::BTreeMap;
use std::iter::FromIterator;

use thiserror::Error;

use crate::debug::DEBUG;

/// The label whose value is always replaced by the FQDN from the topic.
pub const INSTANCE_LABEL: &str = "instance";

/// A set of labels with unique names.
///
/// Iteration follows label name order, so serializing a set is deterministic
/// no matter the order the labels were added in.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LabelSet {
    labels: BTreeMap<String, String>,
}

impl LabelSet {
    pub fn new() -> Self {
        LabelSet::default()
    }

    /// Set a label, replacing any previous value for the same name.
    pub fn set(&mut self, name: &str, value: &str) {
        self.labels.insert(name.to_string(), value.to_string());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Iterate over (name, value) pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.labels
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

impl FromIterator<(String, String)> for LabelSet {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        LabelSet {
            labels: iter.into_iter().collect(),
        }
    }
}

#[derive(Error, Debug, Eq, PartialEq)]
pub enum LabelParseError {
    #[error("expected label name near '{0}'")]
    Name(String),
    #[error("expected '=' after label '{0}'")]
    Equals(String),
    #[error("expected quoted value for label '{0}'")]
    Quote(String),
    #[error("unterminated value for label '{0}'")]
    Unterminated(String),
    #[error("expected ',' between matchers near '{0}'")]
    Separator(String),
}

/// Convert labels text to a label set.
///
/// Malformed label text degrades to an empty set instead of failing the
/// message; the numeric value is worth keeping even unlabeled.
pub fn text_to_labels(text: &str) -> LabelSet {
    match parse_selector(text) {
        Ok(pairs) => pairs.into_iter().collect(),
        Err(err) => {
            DEBUG.label_failed();
            eprintln!("Warn: failed to decode labels {:?}: {}", text, err);
            LabelSet::new()
        }
    }
}

/// Parse selector text of the form `name1="value1",name2="value2"`.
///
/// Only equality matchers are understood. Values use the usual escapes
/// (`\\`, `\n`, `\"`); a trailing comma is accepted.
pub fn parse_selector(text: &str) -> Result<Vec<(String, String)>, LabelParseError> {
    let mut pairs = Vec::new();
    let mut tail = text.trim();

    while !tail.is_empty() {
        // Label name
        let name_len = tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        let name = &tail[..name_len];
        if name.is_empty() || name.starts_with(|ch: char| ch.is_ascii_digit()) {
            return Err(LabelParseError::Name(preview(tail)));
        }
        tail = tail[name_len..].trim_start();

        // '='
        if !tail.starts_with('=') {
            return Err(LabelParseError::Equals(name.to_string()));
        }
        tail = tail[1..].trim_start();

        // Quoted value
        if !tail.starts_with('"') {
            return Err(LabelParseError::Quote(name.to_string()));
        }
        let (value, rest) = parse_quoted(&tail[1..])
            .ok_or_else(|| LabelParseError::Unterminated(name.to_string()))?;
        pairs.push((name.to_string(), value));
        tail = rest.trim_start();

        // Separator or end
        if tail.is_empty() {
            break;
        }
        if !tail.starts_with(',') {
            return Err(LabelParseError::Separator(preview(tail)));
        }
        tail = tail[1..].trim_start();
    }

    Ok(pairs)
}

/// Scan an escaped value up to the closing quote.
///
/// Returns the unescaped value and the text after the quote.
fn parse_quoted(tail: &str) -> Option<(String, &str)> {
    let mut value = String::new();
    let mut chars = tail.char_indices();
    while let Some((i, ch)) = chars.next() {
        match ch {
            '"' => return Some((value, &tail[i + 1..])),
            '\\' => match chars.next() {
                Some((_, 'n')) => value.push('\n'),
                Some((_, escaped)) => value.push(escaped),
                None => return None,
            },
            _ => value.push(ch),
        }
    }
    None
}

fn preview(tail: &str) -> String {
    tail.chars().take(16).collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_selector_text() {
        let pairs = parse_selector(r#"job="x",instance="y""#).unwrap();
        assert_eq!(
            pairs,
            vec![
                ("job".to_string(), "x".to_string()),
                ("instance".to_string(), "y".to_string()),
            ]
        );
    }

    #[test]
    fn parses_awkward_values() {
        // It can handle commas and equal signs inside quoted values
        let pairs = parse_selector(r#"code="2,00",content="text==true""#).unwrap();
        assert_eq!(pairs[0].1, "2,00");
        assert_eq!(pairs[1].1, "text==true");

        // It unescapes backslash sequences in values
        let pairs =
            parse_selector(r#"path="C:\\DIR\\FILE.TXT",error="Cannot find file:\n\"FILE.TXT\"""#)
                .unwrap();
        assert_eq!(pairs[0].1, "C:\\DIR\\FILE.TXT");
        assert_eq!(pairs[1].1, "Cannot find file:\n\"FILE.TXT\"");
    }

    #[test]
    fn tolerates_spacing_and_trailing_commas() {
        let pairs = parse_selector(r#" job = "x" , core = "0" , "#).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1], ("core".to_string(), "0".to_string()));

        assert_eq!(parse_selector("").unwrap(), vec![]);
        assert_eq!(parse_selector("   ").unwrap(), vec![]);
    }

    #[test]
    fn rejects_malformed_selectors() {
        let texts = [
            r#"job=x"#,        // unquoted value
            r#"job="x"#,       // unterminated value
            r#"="x""#,         // missing name
            r#"1bad="x""#,     // name starts with a digit
            r#"job="x" core"#, // missing separator
            r#"job!="x""#,     // not an equality matcher
        ];

        for text in &texts {
            assert!(
                parse_selector(text).is_err(),
                "selector {:?} should not parse",
                text
            );
        }
    }

    #[test]
    fn degrades_bad_text_to_an_empty_set() {
        let labels = text_to_labels("not a selector");
        assert!(labels.is_empty());
    }

    #[test]
    fn set_replaces_existing_labels() {
        let mut labels = text_to_labels(r#"job="x",instance="spoofed""#);
        labels.set(INSTANCE_LABEL, "real.example.com");

        assert_eq!(labels.len(), 2);
        assert_eq!(labels.get(INSTANCE_LABEL), Some("real.example.com"));
    }

    #[test]
    fn iterates_in_name_order() {
        let mut labels = LabelSet::new();
        labels.set("zone", "eu");
        labels.set("core", "0");
        labels.set("job", "x");

        let names: Vec<_> = labels.iter().map(|(name, _)| name.to_string()).collect();
        assert_eq!(names, vec!["core", "job", "zone"]);
    }
}
