//! Header resolution: map the semantic roles a computation needs onto the
//! actual column names of a loaded table.

use serde::{Deserialize, Serialize};

use crate::CdError;

/// Minimum similarity for a header to be accepted as a fuzzy match.
pub const MATCH_THRESHOLD: f64 = 0.6;

/// Scores how alike two (already lower-cased) names are, in `0.0..=1.0`.
/// `candidate` is the table header and `target` the wanted label; the default
/// ratio is not symmetric, so the order matters.
pub trait Similarity {
    fn score(&self, candidate: &str, target: &str) -> f64;
}

impl<F> Similarity for F
where
    F: Fn(&str, &str) -> f64,
{
    fn score(&self, candidate: &str, target: &str) -> f64 {
        self(candidate, target)
    }
}

/// Ratcliff/Obershelp ratio: `2·M / T`, where M counts characters in the
/// recursively found longest common blocks and T is the combined length.
#[derive(Clone, Copy, Debug, Default)]
pub struct SequenceRatio;

impl Similarity for SequenceRatio {
    fn score(&self, candidate: &str, target: &str) -> f64 {
        sequence_ratio(candidate, target)
    }
}

pub fn sequence_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_chars(&a, &b) as f64 / total as f64
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let (i, j, k) = longest_common_block(a, b);
    if k == 0 {
        return 0;
    }
    k + matching_chars(&a[..i], &b[..j]) + matching_chars(&a[i + k..], &b[j + k..])
}

// Earliest block in `a` wins ties.
fn longest_common_block(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut prev = vec![0usize; b.len() + 1];
    for i in 0..a.len() {
        let mut cur = vec![0usize; b.len() + 1];
        for j in 0..b.len() {
            if a[i] == b[j] {
                let k = prev[j] + 1;
                cur[j + 1] = k;
                if k > best.2 {
                    best = (i + 1 - k, j + 1 - k, k);
                }
            }
        }
        prev = cur;
    }
    best
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Semantic {
    Timestamp,
    Speed,
    Acceleration,
}

impl Semantic {
    pub const ALL: [Semantic; 3] = [Semantic::Timestamp, Semantic::Speed, Semantic::Acceleration];

    pub fn name(&self) -> &'static str {
        match self {
            Semantic::Timestamp => "timestamp",
            Semantic::Speed => "speed",
            Semantic::Acceleration => "acceleration",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ColumnSpec {
    /// Label the headers are fuzzily compared against.
    pub label: String,
    pub required: bool,
    /// Exact header name; bypasses fuzzy matching when set.
    #[serde(default)]
    pub exact: Option<String>,
}

impl ColumnSpec {
    fn new(label: &str, required: bool) -> Self {
        Self {
            label: label.to_string(),
            required,
            exact: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ColumnMapping {
    pub timestamp: ColumnSpec,
    pub speed: ColumnSpec,
    pub acceleration: ColumnSpec,
    pub threshold: f64,
}

impl ColumnMapping {
    /// Dyno log layout used by the range calculator.
    pub fn range_defaults() -> Self {
        Self {
            timestamp: ColumnSpec::new("timestamps", true),
            speed: ColumnSpec::new("Speed_dyno", true),
            acceleration: ColumnSpec::new("Longitudinal acceleration (g)", false),
            threshold: MATCH_THRESHOLD,
        }
    }

    /// Data-logger export layout used by the coastdown force tool.
    pub fn coastdown_defaults() -> Self {
        Self {
            timestamp: ColumnSpec::new("Time", false),
            speed: ColumnSpec::new("Speed (km/h)", true),
            acceleration: ColumnSpec::new("Longitudinal acceleration (g)", true),
            threshold: MATCH_THRESHOLD,
        }
    }

    pub fn spec(&self, semantic: Semantic) -> &ColumnSpec {
        match semantic {
            Semantic::Timestamp => &self.timestamp,
            Semantic::Speed => &self.speed,
            Semantic::Acceleration => &self.acceleration,
        }
    }

    pub fn spec_mut(&mut self, semantic: Semantic) -> &mut ColumnSpec {
        match semantic {
            Semantic::Timestamp => &mut self.timestamp,
            Semantic::Speed => &mut self.speed,
            Semantic::Acceleration => &mut self.acceleration,
        }
    }

    pub fn with_exact(mut self, semantic: Semantic, header: impl Into<String>) -> Self {
        self.spec_mut(semantic).exact = Some(header.into());
        self
    }

    pub fn with_required(mut self, semantic: Semantic, required: bool) -> Self {
        self.spec_mut(semantic).required = required;
        self
    }

    pub fn resolve(&self, headers: &[String]) -> Result<ResolvedColumns, CdError> {
        self.resolve_with(headers, &SequenceRatio)
    }

    /// Resolve every semantic against `headers`; fails listing all required
    /// labels that found no column.
    pub fn resolve_with<S: Similarity>(
        &self,
        headers: &[String],
        similarity: &S,
    ) -> Result<ResolvedColumns, CdError> {
        let mut resolved = ResolvedColumns::default();
        let mut missing = Vec::new();
        for semantic in Semantic::ALL {
            let spec = self.spec(semantic);
            let found = match spec.exact.as_deref() {
                Some(exact) => headers
                    .iter()
                    .find(|h| h.trim() == exact.trim())
                    .map(|h| h.to_string()),
                None => best_match(&spec.label, headers, similarity, self.threshold)
                    .map(str::to_string),
            };
            match found {
                Some(name) => *resolved.slot_mut(semantic) = Some(name),
                None if spec.required => {
                    missing.push(spec.exact.clone().unwrap_or_else(|| spec.label.clone()))
                }
                None => {}
            }
        }
        if !missing.is_empty() {
            return Err(CdError::MissingColumns {
                wanted: missing,
                available: headers.to_vec(),
            });
        }
        Ok(resolved)
    }
}

/// Best header for `target` scoring at least `threshold`, compared
/// case-insensitively. The first header wins on equal scores.
pub fn best_match<'a, S: Similarity>(
    target: &str,
    available: &'a [String],
    similarity: &S,
    threshold: f64,
) -> Option<&'a str> {
    let target = target.to_lowercase();
    let mut best: Option<(f64, &'a str)> = None;
    for header in available {
        let score = similarity.score(&header.to_lowercase(), &target);
        if score < threshold {
            continue;
        }
        if best.map_or(true, |(s, _)| score > s) {
            best = Some((score, header.as_str()));
        }
    }
    best.map(|(_, h)| h)
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedColumns {
    pub timestamp: Option<String>,
    pub speed: Option<String>,
    pub acceleration: Option<String>,
}

impl ResolvedColumns {
    pub fn get(&self, semantic: Semantic) -> Option<&str> {
        match semantic {
            Semantic::Timestamp => self.timestamp.as_deref(),
            Semantic::Speed => self.speed.as_deref(),
            Semantic::Acceleration => self.acceleration.as_deref(),
        }
    }

    /// Column name for `semantic`, or a missing-column error listing `available`.
    pub fn require(&self, semantic: Semantic, available: &[String]) -> Result<&str, CdError> {
        self.get(semantic).ok_or_else(|| CdError::MissingColumns {
            wanted: vec![semantic.name().to_string()],
            available: available.to_vec(),
        })
    }

    fn slot_mut(&mut self, semantic: Semantic) -> &mut Option<String> {
        match semantic {
            Semantic::Timestamp => &mut self.timestamp,
            Semantic::Speed => &mut self.speed,
            Semantic::Acceleration => &mut self.acceleration,
        }
    }
}
