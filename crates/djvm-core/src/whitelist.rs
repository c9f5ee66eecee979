//! Regex sets over class names.
//!
//! The whitelist matches internal names that are never relocated into the
//! sandbox. The denylist uses the same type over binary names.

use regex::RegexSet;
use std::fmt;

/// An ordered list of class-name patterns compiled into one [`RegexSet`].
#[derive(Clone)]
pub struct ClassPatterns {
    patterns: Vec<String>,
    set: RegexSet,
}

impl ClassPatterns {
    pub fn new<I, S>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns: Vec<String> = patterns.into_iter().map(Into::into).collect();
        let set = RegexSet::new(&patterns)?;
        Ok(Self { patterns, set })
    }

    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
            set: RegexSet::empty(),
        }
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.set.is_match(name)
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl fmt::Debug for ClassPatterns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.patterns).finish()
    }
}

impl PartialEq for ClassPatterns {
    fn eq(&self, other: &Self) -> bool {
        self.patterns == other.patterns
    }
}
