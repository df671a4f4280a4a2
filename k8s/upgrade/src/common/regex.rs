use crate::common::error::{RegexCompile, Result};
use regex::Regex as BackendRegex;
use snafu::ResultExt;

/// A DNS-1123 label, the format of a Kubernetes namespace name.
pub(crate) const DNS_1123_LABEL: &str = r"^[a-z0-9]([-a-z0-9]{0,61}[a-z0-9])?$";

/// This is a wrapper around regex::Regex.
pub(crate) struct Regex {
    inner: BackendRegex,
}

impl Regex {
    /// This is a wrapper around regex::Regex::new(). It handles errors, so that crate-wide
    /// if statements can look prettier:
    ///
    /// ```ignore
    /// if Regex::new(r"^yay$")?.is_match("yay") {
    ///     todo!();
    /// }
    /// ```
    pub(crate) fn new(expr: &str) -> Result<Regex> {
        let regex = BackendRegex::new(expr).context(RegexCompile {
            expression: expr.to_string(),
        })?;

        Ok(Self { inner: regex })
    }

    /// This is a wrapper around regex::Regex::is_match().
    pub(crate) fn is_match(&self, haystack: &str) -> bool {
        self.inner.is_match(haystack)
    }
}

/// Returns true if the input is usable as a namespace name.
pub fn is_namespace_name(name: &str) -> Result<bool> {
    Ok(Regex::new(DNS_1123_LABEL)?.is_match(name))
}
