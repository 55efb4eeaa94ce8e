//! Tree path parsing
//!
//! Every element is addressed by the numbers of its ancestors, joined by dots:
//! ```text
//! 1          top-level element number 1
//! 1.2        child 2 of element 1
//! 1.3.0      child 0 of child 3 of element 1
//! ```
//!
//! The empty path addresses the tree root.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// A parsed qualified path
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TreePath(Vec<u32>);

impl TreePath {
    /// The root path (no components)
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Parse a dot-separated path string
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::root());
        }

        let numbers = s
            .split('.')
            .map(|segment| {
                segment.parse::<u32>().map_err(|_| {
                    Error::InvalidPath(format!("bad segment '{}' in path {}", segment, s))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self(numbers))
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Path components, root first
    pub fn numbers(&self) -> &[u32] {
        &self.0
    }

    /// Number of the addressed element within its parent
    pub fn last(&self) -> Option<u32> {
        self.0.last().copied()
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Path of the parent element (the root is its own parent)
    pub fn parent(&self) -> TreePath {
        let mut numbers = self.0.clone();
        numbers.pop();
        Self(numbers)
    }

    /// Path of a child of this element
    pub fn child(&self, number: u32) -> TreePath {
        let mut numbers = self.0.clone();
        numbers.push(number);
        Self(numbers)
    }

    /// Path of the sibling with the given number
    pub fn sibling(&self, number: u32) -> TreePath {
        self.parent().child(number)
    }

    /// Check whether `self` lies at or below `ancestor`
    pub fn starts_with(&self, ancestor: &TreePath) -> bool {
        self.0.starts_with(&ancestor.0)
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for n in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{}", n)?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for TreePath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        TreePath::parse(s)
    }
}

impl TryFrom<&str> for TreePath {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        TreePath::parse(s)
    }
}

impl TryFrom<String> for TreePath {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        TreePath::parse(&s)
    }
}

impl From<TreePath> for String {
    fn from(path: TreePath) -> Self {
        path.to_string()
    }
}

impl From<Vec<u32>> for TreePath {
    fn from(numbers: Vec<u32>) -> Self {
        Self(numbers)
    }
}

impl From<&[u32]> for TreePath {
    fn from(numbers: &[u32]) -> Self {
        Self(numbers.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let path = TreePath::parse("1.2.3").unwrap();
        assert_eq!(path.numbers(), &[1, 2, 3]);
        assert_eq!(path.to_string(), "1.2.3");
        assert_eq!(path.last(), Some(3));
    }

    #[test]
    fn test_root() {
        let path = TreePath::parse("").unwrap();
        assert!(path.is_root());
        assert_eq!(path.to_string(), "");
        assert_eq!(path.parent(), TreePath::root());
    }

    #[test]
    fn test_invalid() {
        assert!(TreePath::parse("1..2").is_err());
        assert!(TreePath::parse("1.a").is_err());
        assert!(TreePath::parse("-1").is_err());
    }

    #[test]
    fn test_relatives() {
        let path = TreePath::parse("1.2").unwrap();
        assert_eq!(path.child(7).to_string(), "1.2.7");
        assert_eq!(path.sibling(3).to_string(), "1.3");
        assert!(path.child(7).starts_with(&path));
        assert!(!path.starts_with(&path.child(7)));
    }
}
