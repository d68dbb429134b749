// src/version.rs

//! Version handling and dependency specifications
//!
//! Version syntax and comparison rules follow Debian's
//! `[epoch:]upstream[-revision]` format, since the produced archives
//! are consumed by an Opkg-compatible installer. Dependencies are
//! declared as `[build:|host:]package[(<<|<=|=|>=|>>)version]`:
//! `build:` packages install into the build container, `host:` (or
//! unprefixed) packages into the target sysroot.

use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Characters permitted in the upstream part of a version number
const UPSTREAM_CHARS: &str = "A-Za-z0-9.+~-";

/// Characters permitted in the revision part of a version number
const REVISION_CHARS: &str = "A-Za-z0-9.+~";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidVersion {
    #[error("invalid epoch '{0}', must be numeric")]
    Epoch(String),

    #[error("upstream version cannot be empty")]
    EmptyUpstream,

    #[error("invalid chars in upstream version '{0}', allowed chars are {UPSTREAM_CHARS}")]
    UpstreamChars(String),

    #[error("revision cannot be empty")]
    EmptyRevision,

    #[error("invalid chars in revision '{0}', allowed chars are {REVISION_CHARS}")]
    RevisionChars(String),

    #[error("package version '{0}' must be <upstream>-<revision> with a numeric revision")]
    PackageFormat(String),

    #[error("package version '{0}' must start with a digit")]
    LeadingDigit(String),
}

/// A parsed package version with epoch, upstream, and revision parts
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    pub epoch: u64,
    pub upstream: String,
    pub revision: String,
}

impl Version {
    /// Parse a version number.
    ///
    /// The epoch precedes the first `:` (default 0); the revision
    /// follows the last `-` (default "0").
    pub fn parse(version: &str) -> Result<Self, InvalidVersion> {
        let (epoch, rest) = match version.find(':') {
            Some(idx) => {
                let epoch_text = &version[..idx];
                let epoch = epoch_text
                    .parse::<u64>()
                    .map_err(|_| InvalidVersion::Epoch(epoch_text.to_string()))?;
                (epoch, &version[idx + 1..])
            }
            None => (0, version),
        };

        let (upstream, revision) = match rest.rfind('-') {
            Some(idx) => (&rest[..idx], &rest[idx + 1..]),
            None => (rest, "0"),
        };

        if upstream.is_empty() {
            return Err(InvalidVersion::EmptyUpstream);
        }
        if !upstream
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || ".+~-".contains(c))
        {
            return Err(InvalidVersion::UpstreamChars(upstream.to_string()));
        }

        if revision.is_empty() {
            return Err(InvalidVersion::EmptyRevision);
        }
        if !revision
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || ".+~".contains(c))
        {
            return Err(InvalidVersion::RevisionChars(revision.to_string()));
        }

        Ok(Self {
            epoch,
            upstream: upstream.to_string(),
            revision: revision.to_string(),
        })
    }

    /// Parse a `pkgver` declaration.
    ///
    /// Recipe versions are stricter than dependency constraints: the
    /// string must be `<upstream>-<revision>` where the revision is a
    /// positive decimal integer and the upstream part starts with a
    /// digit.
    pub fn parse_package(version: &str) -> Result<Self, InvalidVersion> {
        let parsed = Self::parse(version)?;

        let bare = match version.find(':') {
            Some(idx) => &version[idx + 1..],
            None => version,
        };

        if !bare.contains('-')
            || !parsed.revision.chars().all(|c| c.is_ascii_digit())
            || parsed.revision.parse::<u64>().map_or(true, |r| r == 0)
        {
            return Err(InvalidVersion::PackageFormat(version.to_string()));
        }

        if !parsed
            .upstream
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit())
        {
            return Err(InvalidVersion::LeadingDigit(version.to_string()));
        }

        Ok(parsed)
    }

    /// Compare two versions under Debian ordering rules
    pub fn compare(&self, other: &Version) -> Ordering {
        match self.epoch.cmp(&other.epoch) {
            Ordering::Equal => {}
            ord => return ord,
        }

        match compare_version_part(&self.upstream, &other.upstream) {
            Ordering::Equal => {}
            ord => return ord,
        }

        compare_version_part(&self.revision, &other.revision)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}", self.upstream)?;
        // A "0" revision is only implicit when it cannot be confused
        // with a dash inside the upstream part
        if self.revision != "0" || self.upstream.contains('-') {
            write!(f, "-{}", self.revision)?;
        }
        Ok(())
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Sort rank for non-digit version characters.
///
/// `~` sorts lower than anything, even the end of the part; letters
/// sort before the remaining punctuation.
fn alpha_rank(c: Option<char>) -> u32 {
    match c {
        Some('~') => 0,
        None => 1,
        Some(c @ 'A'..='Z') => 2 + (c as u32 - 'A' as u32),
        Some(c @ 'a'..='z') => 28 + (c as u32 - 'a' as u32),
        Some('+') => 54,
        Some('-') => 55,
        Some('.') => 56,
        // Parsing rejects anything else; rank it last to stay total
        Some(_) => 57,
    }
}

/// Compare one upstream or revision string by alternating non-digit
/// and numeric runs, per Debian's algorithm.
fn compare_version_part(left: &str, right: &str) -> Ordering {
    let mut left = left;
    let mut right = right;

    while !left.is_empty() || !right.is_empty() {
        let (left_alpha, left_rest) = split_at_digit(left);
        let (right_alpha, right_rest) = split_at_digit(right);

        let max_len = left_alpha.chars().count().max(right_alpha.chars().count());
        for i in 0..max_len {
            let l = alpha_rank(left_alpha.chars().nth(i));
            let r = alpha_rank(right_alpha.chars().nth(i));
            match l.cmp(&r) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }

        let (left_digits, left_rest) = split_at_non_digit(left_rest);
        let (right_digits, right_rest) = split_at_non_digit(right_rest);

        let left_num: u64 = left_digits.parse().unwrap_or(0);
        let right_num: u64 = right_digits.parse().unwrap_or(0);
        match left_num.cmp(&right_num) {
            Ordering::Equal => {}
            ord => return ord,
        }

        left = left_rest;
        right = right_rest;
    }

    Ordering::Equal
}

fn split_at_digit(s: &str) -> (&str, &str) {
    let idx = s.find(|c: char| c.is_ascii_digit()).unwrap_or(s.len());
    s.split_at(idx)
}

fn split_at_non_digit(s: &str) -> (&str, &str) {
    let idx = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    s.split_at(idx)
}

/// Operators used to compare two version numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionComparator {
    LowerThan,
    LowerThanOrEqual,
    Equal,
    GreaterThanOrEqual,
    GreaterThan,
}

impl VersionComparator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LowerThan => "<<",
            Self::LowerThanOrEqual => "<=",
            Self::Equal => "=",
            Self::GreaterThanOrEqual => ">=",
            Self::GreaterThan => ">>",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "<<" => Some(Self::LowerThan),
            "<=" => Some(Self::LowerThanOrEqual),
            "=" => Some(Self::Equal),
            ">=" => Some(Self::GreaterThanOrEqual),
            ">>" => Some(Self::GreaterThan),
            _ => None,
        }
    }
}

/// Where a dependency gets installed during a build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyKind {
    /// Installed in the container that runs the build (a Debian package)
    Build,
    /// Installed in the target sysroot or on the device itself
    Host,
}

impl DependencyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Host => "host",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidDependency {
    #[error("unknown dependency type '{0}', valid types are 'build', 'host'")]
    UnknownKind(String),

    #[error("invalid version comparator '{0}', valid comparators are <<, <=, =, >=, >>")]
    UnknownComparator(String),

    #[error(transparent)]
    Version(#[from] InvalidVersion),
}

/// A version-constrained dependency on another package
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    pub kind: DependencyKind,
    pub package: String,
    pub comparator: VersionComparator,
    pub version: Option<Version>,
}

impl Dependency {
    /// Parse a dependency specification.
    pub fn parse(dependency: &str) -> Result<Self, InvalidDependency> {
        let (spec, comparator, version) = match dependency.find(|c| "<>=".contains(c)) {
            Some(start) => {
                let end = dependency[start..]
                    .find(|c| !"<>=".contains(c))
                    .map(|i| start + i)
                    .unwrap_or(dependency.len());
                let op = &dependency[start..end];
                let comparator = VersionComparator::parse(op)
                    .ok_or_else(|| InvalidDependency::UnknownComparator(op.to_string()))?;
                let version = Version::parse(&dependency[end..])?;
                (&dependency[..start], comparator, Some(version))
            }
            None => (dependency, VersionComparator::Equal, None),
        };

        let (kind, package) = match spec.find(':') {
            Some(idx) => {
                let kind = match &spec[..idx] {
                    "build" => DependencyKind::Build,
                    "host" => DependencyKind::Host,
                    other => return Err(InvalidDependency::UnknownKind(other.to_string())),
                };
                (kind, &spec[idx + 1..])
            }
            None => (DependencyKind::Host, spec),
        };

        Ok(Self {
            kind,
            package: package.to_string(),
            comparator,
            version,
        })
    }

    /// Check whether a given version fulfills this dependency
    pub fn matches(&self, version: &Version) -> bool {
        let constraint = match &self.version {
            Some(v) => v,
            None => return true,
        };

        match self.comparator {
            VersionComparator::Equal => version == constraint,
            VersionComparator::LowerThan => version < constraint,
            VersionComparator::LowerThanOrEqual => version <= constraint,
            VersionComparator::GreaterThan => version > constraint,
            VersionComparator::GreaterThanOrEqual => version >= constraint,
        }
    }

    /// Render in the Debian control-file format
    pub fn to_debian(&self) -> String {
        match &self.version {
            None => self.package.clone(),
            Some(v) => format!("{} ({} {})", self.package, self.comparator.as_str(), v),
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.package)?;
        if let Some(v) = &self.version {
            write!(f, "{}{}", self.comparator.as_str(), v)?;
        }
        Ok(())
    }
}
