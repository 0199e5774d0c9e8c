//! Field paths addressing values inside a configuration document.
//!
//! A path is a dot-separated list of object keys, each optionally followed
//! by bracketed selectors: `[2]` picks an array element by position and
//! `[class_name=Sandbox]` picks the single element whose `class_name`
//! equals `Sandbox`. Discriminators survive entries being reordered.

use std::fmt;
use std::str::FromStr;

use crate::config::jsonc::{Node, NodeKind};
use crate::error::PatchError;

/// One step of a field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Object member by key.
    Key(String),
    /// Array element by position.
    Index(usize),
    /// Array element whose `field` member equals `value`.
    Match {
        /// Discriminating member.
        field: String,
        /// Expected scalar text.
        value: String,
    },
}

/// A parsed field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<Segment>,
}

impl FieldPath {
    /// Builds a path from segments.
    #[must_use]
    pub const fn new(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    /// Parses a path expression.
    ///
    /// # Errors
    ///
    /// Returns [`PatchError::InvalidPath`] for malformed expressions.
    pub fn parse(expr: &str) -> Result<Self, PatchError> {
        let invalid = |reason: &str| PatchError::InvalidPath {
            path: expr.to_string(),
            reason: reason.to_string(),
        };

        if expr.trim().is_empty() {
            return Err(invalid("path is empty"));
        }

        let mut segments = Vec::new();
        for part in expr.split('.') {
            let (key, mut rest) = part.find('[').map_or((part, ""), |i| part.split_at(i));
            if !key.is_empty() {
                segments.push(Segment::Key(key.to_string()));
            } else if rest.is_empty() {
                return Err(invalid("empty key"));
            }

            while !rest.is_empty() {
                let Some(stripped) = rest.strip_prefix('[') else {
                    return Err(invalid("expected '[' after selector"));
                };
                let Some(close) = stripped.find(']') else {
                    return Err(invalid("unclosed '['"));
                };
                let selector = &stripped[..close];
                rest = &stripped[close + 1..];

                if let Some((field, value)) = selector.split_once('=') {
                    let field = field.trim();
                    if field.is_empty() {
                        return Err(invalid("discriminator needs a field name"));
                    }
                    segments.push(Segment::Match {
                        field: field.to_string(),
                        value: value.trim().to_string(),
                    });
                } else {
                    let index = selector
                        .trim()
                        .parse::<usize>()
                        .map_err(|_| invalid("selector must be an index or field=value"))?;
                    segments.push(Segment::Index(index));
                }
            }
        }

        Ok(Self { segments })
    }

    /// The segments of this path.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Walks the tree and returns the addressed node.
    ///
    /// # Errors
    ///
    /// Returns [`PatchError::PathNotFound`] if a step does not exist and
    /// [`PatchError::AmbiguousMatch`] if a discriminator is not unique.
    pub fn resolve<'a>(&self, root: &'a Node) -> Result<&'a Node, PatchError> {
        let not_found = || PatchError::PathNotFound {
            path: self.to_string(),
        };

        let mut current = root;
        for segment in &self.segments {
            current = match (segment, &current.kind) {
                (Segment::Key(key), NodeKind::Object(_)) => current.get(key).ok_or_else(not_found)?,
                (Segment::Index(index), NodeKind::Array(items)) => {
                    items.get(*index).ok_or_else(not_found)?
                }
                (Segment::Match { field, value }, NodeKind::Array(items)) => {
                    let matches: Vec<&Node> = items
                        .iter()
                        .filter(|item| {
                            item.get(field)
                                .and_then(Node::scalar_text)
                                .is_some_and(|text| text == value.as_str())
                        })
                        .collect();
                    match matches.as_slice() {
                        [only] => *only,
                        [] => return Err(not_found()),
                        many => {
                            return Err(PatchError::AmbiguousMatch {
                                path: self.to_string(),
                                count: many.len(),
                            });
                        }
                    }
                }
                _ => return Err(not_found()),
            };
        }

        Ok(current)
    }
}

impl FromStr for FieldPath {
    type Err = PatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Key(key) => {
                    if i > 0 {
                        f.write_str(".")?;
                    }
                    f.write_str(key)?;
                }
                Segment::Index(index) => write!(f, "[{index}]")?,
                Segment::Match { field, value } => write!(f, "[{field}={value}]")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::jsonc;

    #[test]
    fn test_parse_mixed_path() {
        let path = FieldPath::parse("containers[class_name=Sandbox].max_instances")
            .expect("should parse");
        assert_eq!(
            path.segments(),
            &[
                Segment::Key(String::from("containers")),
                Segment::Match {
                    field: String::from("class_name"),
                    value: String::from("Sandbox"),
                },
                Segment::Key(String::from("max_instances")),
            ]
        );
        assert_eq!(path.to_string(), "containers[class_name=Sandbox].max_instances");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for expr in ["", "a..b", "a[", "a[x]", "a[=v]", "a[0]b"] {
            assert!(FieldPath::parse(expr).is_err(), "{expr} should be rejected");
        }
    }

    #[test]
    fn test_resolve_by_discriminator_ignores_order() {
        let root = jsonc::parse(
            r#"{"containers": [
                {"class_name": "Worker", "max_instances": 1},
                {"class_name": "Sandbox", "max_instances": 10}
            ]}"#,
        )
        .expect("should parse");
        let path = FieldPath::parse("containers[class_name=Sandbox].max_instances")
            .expect("should parse");
        let node = path.resolve(&root).expect("should resolve");
        assert_eq!(node.scalar_text(), Some("10"));

        let by_index = FieldPath::parse("containers[0].max_instances").expect("should parse");
        assert_eq!(by_index.resolve(&root).expect("resolves").scalar_text(), Some("1"));
    }

    #[test]
    fn test_resolve_ambiguous_and_missing() {
        let root = jsonc::parse(r#"{"c": [{"k": "a"}, {"k": "a"}]}"#).expect("should parse");
        assert!(matches!(
            FieldPath::parse("c[k=a]").expect("parse").resolve(&root),
            Err(PatchError::AmbiguousMatch { count: 2, .. })
        ));
        assert!(matches!(
            FieldPath::parse("c[k=b]").expect("parse").resolve(&root),
            Err(PatchError::PathNotFound { .. })
        ));
        assert!(matches!(
            FieldPath::parse("c.k").expect("parse").resolve(&root),
            Err(PatchError::PathNotFound { .. })
        ));
    }
}
