use serde::{Deserialize, Serialize};

/// Structural identifier addressing one cached entity.
///
/// A key is an ordered list of segments, e.g. `["events", "e1"]`. Equality
/// and hashing are structural, so two keys built independently from the same
/// segments address the same entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
  pub fn new<I, S>(segments: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self(segments.into_iter().map(Into::into).collect())
  }

  pub fn segments(&self) -> &[String] {
    &self.0
  }
}

impl std::fmt::Display for QueryKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0.join("/"))
  }
}

impl<S: Into<String>, const N: usize> From<[S; N]> for QueryKey {
  fn from(segments: [S; N]) -> Self {
    Self::new(segments)
  }
}

impl From<Vec<String>> for QueryKey {
  fn from(segments: Vec<String>) -> Self {
    Self(segments)
  }
}

impl From<&[&str]> for QueryKey {
  fn from(segments: &[&str]) -> Self {
    Self::new(segments.iter().copied())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_structural_equality() {
    let a = QueryKey::from(["events", "e1"]);
    let b = QueryKey::new(vec!["events".to_string(), "e1".to_string()]);
    assert_eq!(a, b);
    assert_ne!(a, QueryKey::from(["events", "e2"]));
  }

  #[test]
  fn test_display_joins_segments() {
    let key = QueryKey::from(["events", "e1"]);
    assert_eq!(key.to_string(), "events/e1");
  }
}
