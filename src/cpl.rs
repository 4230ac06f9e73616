//! Name/value option lists
//!
//! GDAL passes `KEY=VALUE` formatted options (open options, layer algebra options,
//! metadata) as null-terminated string lists. [`CslStringList`] is the owned Rust
//! side of such a list; engines convert it to their native representation.
//!
//! See the [`CSL*` GDAL functions](https://gdal.org/api/cpl.html#cpl-string-h) for the
//! native counterpart.

use std::fmt::{Debug, Formatter};

use crate::errors::{GdalError, Result};

/// An ordered list of `KEY=VALUE` entries with unique keys.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CslStringList {
    entries: Vec<(String, String)>,
}

impl CslStringList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns `value` to `name`.
    ///
    /// Overwrites duplicate `name`s (compared case-insensitively, as GDAL does).
    ///
    /// Returns `Ok<()>` on success, `Err<GdalError>` if `name` has non alphanumeric
    /// characters, or `value` has newline characters.
    pub fn set_name_value(&mut self, name: &str, value: &str) -> Result<()> {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(GdalError::BadArgument(format!(
                "Invalid characters in name: '{name}'"
            )));
        }
        if value.contains(['\n', '\r']) {
            return Err(GdalError::BadArgument(format!(
                "Invalid characters in value: '{value}'"
            )));
        }
        match self
            .entries
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            Some(entry) => entry.1 = value.to_string(),
            None => self.entries.push((name.to_string(), value.to_string())),
        }
        Ok(())
    }

    /// Adds an entry given in `KEY=VALUE` form.
    pub fn add_string(&mut self, entry: &str) -> Result<()> {
        match entry.split_once('=') {
            Some((name, value)) => self.set_name_value(name.trim(), value),
            None => Err(GdalError::BadArgument(format!(
                "Expected KEY=VALUE, got '{entry}'"
            ))),
        }
    }

    /// Builds a list from `KEY=VALUE` strings.
    pub fn from_strings<S: AsRef<str>>(entries: &[S]) -> Result<Self> {
        let mut list = Self::new();
        for entry in entries {
            list.add_string(entry.as_ref())?;
        }
        Ok(list)
    }

    /// Looks up the value corresponding to `key`.
    pub fn fetch_name_value(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Interprets the value of `key` the way `CPLTestBool` does.
    pub fn fetch_bool(&self, key: &str, default: bool) -> bool {
        match self.fetch_name_value(key) {
            Some(v) => !matches!(
                v.to_ascii_uppercase().as_str(),
                "NO" | "FALSE" | "OFF" | "0"
            ),
            None => default,
        }
    }

    /// Determine the number of entries in the list.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Determine if the list has any values
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get an iterator over the name/value elements of the list.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// The entries rendered back into `KEY=VALUE` form.
    pub fn to_strings(&self) -> Vec<String> {
        self.entries.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }
}

impl Debug for CslStringList {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (k, v) in self.iter() {
            f.write_fmt(format_args!("{k}={v}\n"))?;
        }
        Ok(())
    }
}

/// Convenience shorthand for specifying an empty `CslStringList` to functions accepting
/// `Into<CslStringList>`.
impl From<()> for CslStringList {
    fn from(_: ()) -> Self {
        CslStringList::default()
    }
}

/// Creates a [`CslStringList`] from a slice of _key_/_value_ tuples.
impl<const N: usize> From<&[(&str, &str); N]> for CslStringList {
    fn from(pairs: &[(&str, &str); N]) -> Self {
        let mut result = Self::default();
        for (k, v) in pairs {
            result.set_name_value(k, v).expect("valid key/value pair");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use crate::cpl::CslStringList;
    use crate::errors::Result;

    fn fixture() -> Result<CslStringList> {
        let mut l = CslStringList::new();
        l.set_name_value("ONE", "1")?;
        l.set_name_value("TWO", "2")?;
        l.set_name_value("THREE", "3")?;

        Ok(l)
    }

    #[test]
    fn basic_list() -> Result<()> {
        let l = fixture()?;
        assert_eq!(l.fetch_name_value("ONE"), Some("1"));
        assert_eq!(l.fetch_name_value("three"), Some("3"));
        assert_eq!(l.fetch_name_value("FOO"), None);
        assert_eq!(l.len(), 3);

        Ok(())
    }

    #[test]
    fn overwrites_existing_key() -> Result<()> {
        let mut l = fixture()?;
        l.set_name_value("two", "22")?;
        assert_eq!(l.len(), 3);
        assert_eq!(l.to_strings(), vec!["ONE=1", "TWO=22", "THREE=3"]);

        Ok(())
    }

    #[test]
    fn parses_key_value_strings() -> Result<()> {
        let l = CslStringList::from_strings(&["SKIP_FAILURES=YES", "INPUT_PREFIX=in_"])?;
        assert!(l.fetch_bool("SKIP_FAILURES", false));
        assert!(!l.fetch_bool("PROMOTE_TO_MULTI", false));
        assert_eq!(l.fetch_name_value("INPUT_PREFIX"), Some("in_"));
        assert!(CslStringList::from_strings(&["NOVALUE"]).is_err());

        Ok(())
    }

    #[test]
    fn invalid_keys() -> Result<()> {
        let mut l = fixture()?;
        assert!(l.set_name_value("l==t", "2").is_err());
        assert!(l.set_name_value("foo", "2\n4\r5").is_err());

        Ok(())
    }

    #[test]
    fn debug_fmt() -> Result<()> {
        let l = fixture()?;
        let s = format!("{l:?}");
        assert!(s.contains("ONE=1"));
        assert!(s.contains("TWO=2"));
        assert!(s.contains("THREE=3"));

        Ok(())
    }
}
