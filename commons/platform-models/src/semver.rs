use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid semantic version {0:?}")]
pub struct SemVerError(pub String);

/// A semantic version. A leading `v` or `V` is accepted and dropped.
///
/// Ordering follows semver precedence: major, minor, patch, then
/// prerelease (a version without prerelease ranks above one with it).
/// Build metadata is kept for display but never takes part in ordering
/// or equality.
#[derive(Debug, Clone, Default)]
pub struct SemVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub prerelease: String,
    pub build: String,
}

impl SemVersion {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            ..Default::default()
        }
    }

    pub fn parse(input: &str) -> Result<Self, SemVerError> {
        input.parse()
    }
}

impl FromStr for SemVersion {
    type Err = SemVerError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let err = || SemVerError(input.to_string());
        let trimmed = input.trim();
        let rest = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);

        let (rest, build) = match rest.split_once('+') {
            Some((_, "")) => return Err(err()),
            Some((r, b)) => (r, b),
            None => (rest, ""),
        };
        let (core, prerelease) = match rest.split_once('-') {
            Some((_, "")) => return Err(err()),
            Some((c, p)) => (c, p),
            None => (rest, ""),
        };

        let mut parts = core.split('.');
        let mut next = || -> Result<u64, SemVerError> {
            let p = parts.next().ok_or_else(err)?;
            if p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit()) {
                return Err(err());
            }
            p.parse::<u64>().map_err(|_| err())
        };
        let major = next()?;
        let minor = next()?;
        let patch = next()?;
        if parts.next().is_some() {
            return Err(err());
        }

        for ids in [prerelease, build] {
            if ids.is_empty() {
                continue;
            }
            let valid = ids.split('.').all(|id| {
                !id.is_empty()
                    && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
            });
            if !valid {
                return Err(err());
            }
        }

        Ok(SemVersion {
            major,
            minor,
            patch,
            prerelease: prerelease.to_string(),
            build: build.to_string(),
        })
    }
}

fn compare_prerelease(a: &str, b: &str) -> Ordering {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        _ => {}
    }
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ord = match (l.parse::<u64>(), r.parse::<u64>()) {
                    (Ok(ln), Ok(rn)) => ln.cmp(&rn),
                    // numeric identifiers rank below alphanumeric ones
                    (Ok(_), Err(_)) => Ordering::Less,
                    (Err(_), Ok(_)) => Ordering::Greater,
                    (Err(_), Err(_)) => l.cmp(r),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

impl Ord for SemVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
            .then_with(|| compare_prerelease(&self.prerelease, &other.prerelease))
    }
}

impl PartialOrd for SemVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SemVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SemVersion {}

impl fmt::Display for SemVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if !self.prerelease.is_empty() {
            write!(f, "-{}", self.prerelease)?;
        }
        if !self.build.is_empty() {
            write!(f, "+{}", self.build)?;
        }
        Ok(())
    }
}
