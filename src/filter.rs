use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

/// Extension of `path` as the watch filter understands it: the substring
/// from the last `.` of the file name through its end, dot included, case
/// preserved. `None` when the file name has no dot.
pub fn path_extension(path: &Path) -> Option<&str> {
    let name = path.file_name()?.to_str()?;
    name.rfind('.').map(|idx| &name[idx..])
}

/// The set of file extensions a watch session records.
///
/// The default is unrestricted: every signal passes. A restricted filter
/// keeps only signals whose path extension is in the set; everything else is
/// dropped before reconciliation, whatever the signal's kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionFilter {
    allowed: Option<BTreeSet<String>>,
}

impl ExtensionFilter {
    /// Unrestricted filter: every extension is watched.
    pub fn all() -> Self {
        Self { allowed: None }
    }

    /// Restrict to the given dot-prefixed extensions, e.g. `".txt"`.
    ///
    /// An empty iterator yields the unrestricted filter, matching the start
    /// call convention where an empty extension list means "watch everything".
    pub fn only<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = extensions.into_iter().map(Into::into).collect();
        if set.is_empty() {
            Self::all()
        } else {
            Self { allowed: Some(set) }
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        self.allowed.is_none()
    }

    /// Whether a signal for `path` should be kept.
    pub fn matches(&self, path: &Path) -> bool {
        match &self.allowed {
            None => true,
            Some(set) => path_extension(path).map_or(false, |ext| set.contains(ext)),
        }
    }

    /// The watched set, `None` when unrestricted.
    pub fn allowed(&self) -> Option<&BTreeSet<String>> {
        self.allowed.as_ref()
    }
}

impl fmt::Display for ExtensionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.allowed {
            None => f.write_str("*"),
            Some(set) => {
                let mut first = true;
                for ext in set {
                    if !first {
                        f.write_str(",")?;
                    }
                    f.write_str(ext)?;
                    first = false;
                }
                Ok(())
            }
        }
    }
}
