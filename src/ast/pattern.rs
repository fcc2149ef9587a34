//! Glob patterns for the `like` operator.
//!
//! `*` matches any (possibly empty) sequence of characters; `\*` matches a
//! literal star. No other character is special.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::PolicyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternElem {
    Char(char),
    Wildcard,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Pattern {
    elems: Vec<PatternElem>,
}

impl Pattern {
    pub fn new(elems: impl IntoIterator<Item = PatternElem>) -> Self {
        Self {
            elems: elems.into_iter().collect(),
        }
    }

    pub fn elems(&self) -> &[PatternElem] {
        &self.elems
    }

    /// Whether `text` matches the whole pattern.
    pub fn wildcard_match(&self, text: &str) -> bool {
        let text: Vec<char> = text.chars().collect();
        let pattern = &self.elems;

        let (mut t, mut p) = (0usize, 0usize);
        // Position of the last star seen and the text index it was tried at.
        let mut backtrack: Option<(usize, usize)> = None;

        while t < text.len() {
            match pattern.get(p) {
                Some(PatternElem::Wildcard) => {
                    backtrack = Some((p, t));
                    p += 1;
                }
                Some(PatternElem::Char(c)) if *c == text[t] => {
                    p += 1;
                    t += 1;
                }
                _ => match backtrack {
                    Some((star, tried)) => {
                        p = star + 1;
                        t = tried + 1;
                        backtrack = Some((star, tried + 1));
                    }
                    None => return false,
                },
            }
        }

        pattern[p..].iter().all(|e| *e == PatternElem::Wildcard)
    }
}

impl FromStr for Pattern {
    type Err = PolicyError;

    /// Parse the glob text used inside `like "..."`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut elems = Vec::with_capacity(s.len());
        let mut chars = s.chars();
        while let Some(c) = chars.next() {
            match c {
                '*' => elems.push(PatternElem::Wildcard),
                '\\' => match chars.next() {
                    Some(escaped) => elems.push(PatternElem::Char(escaped)),
                    None => {
                        return Err(PolicyError::ParseError(format!(
                            "pattern `{s}` ends with a dangling escape"
                        )));
                    }
                },
                c => elems.push(PatternElem::Char(c)),
            }
        }
        Ok(Self { elems })
    }
}

impl Display for Pattern {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        for elem in &self.elems {
            match elem {
                PatternElem::Wildcard => write!(f, "*")?,
                PatternElem::Char('*') => write!(f, "\\*")?,
                PatternElem::Char('\\') => write!(f, "\\\\")?,
                PatternElem::Char(c) => write!(f, "{c}")?,
            }
        }
        Ok(())
    }
}

/// JSON element: `"Wildcard"` or `{"Literal": "abc"}`.
#[derive(Serialize, Deserialize)]
enum PatternElemJson {
    Literal(String),
    Wildcard,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PatternJson {
    Glob(String),
    Elems(Vec<PatternElemJson>),
}

impl Serialize for Pattern {
    fn serialize<S>(&self, ser: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let elems: Vec<PatternElemJson> = self
            .elems
            .iter()
            .map(|e| match e {
                PatternElem::Char(c) => PatternElemJson::Literal(c.to_string()),
                PatternElem::Wildcard => PatternElemJson::Wildcard,
            })
            .collect();
        elems.serialize(ser)
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D>(de: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match PatternJson::deserialize(de)? {
            PatternJson::Glob(text) => text.parse().map_err(serde::de::Error::custom),
            PatternJson::Elems(elems) => Ok(Pattern::new(elems.into_iter().flat_map(|e| {
                match e {
                    PatternElemJson::Literal(s) => s.chars().map(PatternElem::Char).collect(),
                    PatternElemJson::Wildcard => vec![PatternElem::Wildcard],
                }
            }))),
        }
    }
}
