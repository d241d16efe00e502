//! Host chains captured together with a path.

use std::sync::{Arc, Weak};

use crate::host::{Host, HostOptions, HostRef};
use crate::listing::Listing;

/// One level of a host chain.
#[derive(Debug, Clone)]
pub struct PathStackPart {
    pub tag: &'static str,
    pub junction: String,
    pub options: Option<HostOptions>,
    host: Weak<dyn Host>,
}

impl PathStackPart {
    /// The host of this level, if it is still alive.
    pub fn host(&self) -> Option<HostRef> {
        self.host.upgrade()
    }

    /// Equality that ignores host identity.
    ///
    /// Two independently constructed hosts mounted at the same junction with the
    /// same options describe the same location.
    pub fn weak_equal(&self, other: &Self) -> bool {
        self == other
            || (self.tag == other.tag
                && self.junction == other.junction
                && self.options == other.options)
    }
}

impl PartialEq for PathStackPart {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag
            && self.junction == other.junction
            && Weak::ptr_eq(&self.host, &other.host)
            && self.options == other.options
    }
}

/// The chain from the root host down to a host, plus a path on that host.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathStack {
    parts: Vec<PathStackPart>,
    path: String,
}

impl PathStack {
    pub fn new(host: &HostRef, path: impl Into<String>) -> Self {
        let mut parts = Vec::new();
        let mut current = Some(host.clone());
        while let Some(h) = current {
            parts.push(PathStackPart {
                tag: h.tag(),
                junction: h.junction_path().to_string(),
                options: h.options(),
                host: Arc::downgrade(&h),
            });
            current = h.parent().cloned();
        }
        parts.reverse();

        Self {
            parts,
            path: path.into(),
        }
    }

    /// Stack for the directory of a listing.
    pub fn from_listing(listing: &Listing) -> Self {
        Self::new(listing.host(), listing.directory())
    }

    pub fn parts(&self) -> &[PathStackPart] {
        &self.parts
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// The innermost host, if alive.
    pub fn host(&self) -> Option<HostRef> {
        self.parts.last().and_then(PathStackPart::host)
    }

    pub fn weak_equal(&self, other: &Self) -> bool {
        self.path == other.path
            && self.parts.len() == other.parts.len()
            && self
                .parts
                .iter()
                .zip(&other.parts)
                .all(|(a, b)| a.weak_equal(b))
    }

    /// Human-readable location, e.g. `/tmp/a.tar:/docs/`.
    pub fn verbose_string(&self) -> String {
        let mut out = String::new();
        if let Some(root) = self.parts.first() {
            if root.tag != "native" {
                out.push_str(&format!("[{}]:", root.tag));
            }
        }
        for (i, part) in self.parts.iter().enumerate() {
            out.push_str(&part.junction);
            if i > 0 {
                out.push(':');
            }
        }
        out.push_str(&self.path);
        out
    }
}
