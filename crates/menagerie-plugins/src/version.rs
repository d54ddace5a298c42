//! Plugin version strings: a semver triple with optional codename and tags.
//!
//! Manifests carry versions in the form `MAJOR.MINOR.PATCH[-codename][ --tag]*`,
//! for example `2.1.0-lynx --beta --nightly`. Missing numeric components
//! parse as zero; an all-zero triple is rejected as unparseable.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A parsed plugin version.
///
/// # Example
///
/// ```
/// use menagerie_plugins::version::Version;
///
/// let v: Version = "2.1.0-lynx --beta".parse().expect("parses");
/// assert_eq!(v.major, 2);
/// assert_eq!(v.codename.as_deref(), Some("lynx"));
/// assert_eq!(v.tags, vec!["beta"]);
/// assert_eq!(v.to_string(), "2.1.0-lynx --beta");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    /// Major component.
    pub major: u32,
    /// Minor component.
    pub minor: u32,
    /// Patch component.
    pub patch: u32,
    /// Optional release codename, rendered after a hyphen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codename: Option<String>,
    /// Optional `--tag` markers, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Error returned when a version string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unable to parse version '{input}'")]
pub struct VersionParseError {
    /// The string that failed to parse.
    pub input: String,
}

impl std::str::FromStr for Version {
    type Err = VersionParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if input.trim().is_empty() {
            return Err(VersionParseError {
                input: input.to_string(),
            });
        }

        let mut words = input.split_whitespace();
        let version_part = words.next().ok_or_else(|| VersionParseError {
            input: input.to_string(),
        })?;
        let tags: Vec<String> = words
            .filter_map(|word| word.strip_prefix("--"))
            .map(ToString::to_string)
            .collect();

        let (triple, codename) = match version_part.split_once('-') {
            Some((triple, codename)) if !codename.is_empty() => {
                (triple, Some(codename.to_string()))
            }
            Some((triple, _)) => (triple, None),
            None => (version_part, None),
        };

        let mut numbers = triple.split('.');
        let major = parse_component(numbers.next());
        let minor = parse_component(numbers.next());
        let patch = parse_component(numbers.next());

        if major == 0 && minor == 0 && patch == 0 {
            return Err(VersionParseError {
                input: input.to_string(),
            });
        }

        Ok(Self {
            major,
            minor,
            patch,
            codename,
            tags,
        })
    }
}

fn parse_component(component: Option<&str>) -> u32 {
    component.and_then(|n| n.parse().ok()).unwrap_or(0)
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(codename) = &self.codename {
            write!(f, "-{codename}")?;
        }
        for tag in &self.tags {
            write!(f, " --{tag}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::plain("1.2.3", Version { major: 1, minor: 2, patch: 3, codename: None, tags: vec![] })]
    #[case::codename("1.0.0-otter", Version { major: 1, minor: 0, patch: 0, codename: Some("otter".into()), tags: vec![] })]
    #[case::tags("0.3.0 --beta --hotfix", Version { major: 0, minor: 3, patch: 0, codename: None, tags: vec!["beta".into(), "hotfix".into()] })]
    #[case::partial("2", Version { major: 2, minor: 0, patch: 0, codename: None, tags: vec![] })]
    fn parses_valid_versions(#[case] input: &str, #[case] expected: Version) {
        let parsed: Version = input.parse().expect("should parse");
        assert_eq!(parsed, expected);
    }

    #[rstest]
    #[case::empty("")]
    #[case::whitespace("   ")]
    #[case::all_zero("0.0.0")]
    #[case::garbage("x.y.z")]
    fn rejects_unparseable_versions(#[case] input: &str) {
        assert!(input.parse::<Version>().is_err());
    }

    #[rstest]
    #[case::plain("1.2.3")]
    #[case::codename("1.0.0-otter")]
    #[case::full("2.1.0-lynx --beta --nightly")]
    fn display_round_trips(#[case] input: &str) {
        let parsed: Version = input.parse().expect("should parse");
        assert_eq!(parsed.to_string(), input);
    }

    #[test]
    fn non_tag_words_are_ignored() {
        let parsed: Version = "1.0.0 stray --kept".parse().expect("should parse");
        assert_eq!(parsed.tags, vec!["kept"]);
    }
}
