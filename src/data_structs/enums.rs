use std::fmt::Display;
use std::str::FromStr;

use serde::{
    Deserialize,
    Serialize,
};

#[derive(Eq, Hash, PartialEq, Copy, Clone, Debug, PartialOrd, Ord)]
pub enum Strand {
    /// Forward strand (`+`, or `t` for nanopolish template reads).
    Forward,
    /// Reverse strand (`-`, or `c` for nanopolish complement reads).
    Reverse,
    /// No strand.
    None,
}

impl FromStr for Strand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "+" | "t" => Ok(Strand::Forward),
            "-" | "c" => Ok(Strand::Reverse),
            "." => Ok(Strand::None),
            other => Err(format!("unknown strand '{other}' (expected +, -, t, c or .)")),
        }
    }
}

impl From<Strand> for Option<bool> {
    fn from(value: Strand) -> Option<bool> {
        match value {
            Strand::Forward => Some(true),
            Strand::Reverse => Some(false),
            Strand::None => None,
        }
    }
}

impl From<Option<bool>> for Strand {
    fn from(value: Option<bool>) -> Strand {
        match value {
            Some(true) => Strand::Forward,
            Some(false) => Strand::Reverse,
            None => Strand::None,
        }
    }
}

impl Display for Strand {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Strand::Forward => write!(f, "+"),
            Strand::Reverse => write!(f, "-"),
            Strand::None => write!(f, "."),
        }
    }
}

impl Serialize for Strand {
    fn serialize<S>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer, {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Strand {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>, {
        let s = String::deserialize(deserializer)?;
        FromStr::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Outcome of a single per-read methylation call.
#[derive(Eq, Hash, PartialEq, Copy, Clone, Debug, PartialOrd, Ord)]
pub enum MethCall {
    Methylated,
    Unmethylated,
    /// |llr| below the calling threshold.
    Ambiguous,
}

impl MethCall {
    /// Classifies a log-likelihood ratio against a symmetric threshold.
    ///
    /// `llr >= threshold` is methylated, `llr <= -threshold` is
    /// unmethylated, anything in between is ambiguous.
    pub fn classify(
        log_lik_ratio: f64,
        threshold: f64,
    ) -> Self {
        if log_lik_ratio >= threshold {
            MethCall::Methylated
        }
        else if log_lik_ratio <= -threshold {
            MethCall::Unmethylated
        }
        else {
            MethCall::Ambiguous
        }
    }
}

/// Whether ambiguous calls count towards a site's covered reads.
#[derive(Eq, Hash, PartialEq, Copy, Clone, Debug, Serialize, Deserialize)]
pub enum AmbiguousPolicy {
    /// covered = methylated + unmethylated + ambiguous
    Include,
    /// covered = methylated + unmethylated
    Exclude,
}

/// How the collapser treats the order of its input.
#[derive(Eq, Hash, PartialEq, Copy, Clone, Debug, Serialize, Deserialize)]
pub enum SortMode {
    /// Trust that the input is grouped; fail on a reappearing group.
    Trust,
    /// Externally sort the input by group key before collapsing.
    SortFirst,
}

/// What to do with rows that cannot be parsed.
#[derive(Eq, Hash, PartialEq, Copy, Clone, Debug, Serialize, Deserialize)]
pub enum MalformedPolicy {
    Fail,
    SkipAndWarn,
}

impl Display for SortMode {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            SortMode::Trust => write!(f, "trust"),
            SortMode::SortFirst => write!(f, "sort-first"),
        }
    }
}
