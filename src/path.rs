use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};

/// Ancestry of a section from its outermost enclosing section down to itself.
///
/// Two sections with the same name under the same ancestry share a path and
/// aggregate together; the same name under a different ancestry is a distinct
/// node. Cloning is cheap, segments are shared.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectionPath(Arc<[String]>);

impl SectionPath {
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

    /// Number of segments. A top-level section has depth 1.
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn leaf(&self) -> &str {
        self.0.last().map_or("", String::as_str)
    }

    /// Path of the enclosing section, or `None` for a top-level section.
    pub fn parent(&self) -> Option<SectionPath> {
        match self.0.len() {
            0 | 1 => None,
            n => Some(Self(self.0[..n - 1].into())),
        }
    }

    /// This path extended by one nested section.
    pub fn child(&self, name: &str) -> SectionPath {
        let mut segments = self.0.to_vec();
        segments.push(name.to_owned());
        Self(segments.into())
    }

    pub fn starts_with(&self, prefix: &SectionPath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// A path can be recorded only if it has at least one segment and no
    /// segment is empty or whitespace.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty() && self.0.iter().all(|s| !is_blank(s))
    }
}

pub(crate) fn is_blank(name: &str) -> bool {
    name.trim().is_empty()
}

impl fmt::Display for SectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

impl fmt::Debug for SectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SectionPath({self})")
    }
}

impl Serialize for SectionPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter())
    }
}
