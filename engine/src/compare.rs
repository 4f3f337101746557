//! Source/destination digest comparison.

use crate::model::{DigestMapping, Verdict};
use serde::{Deserialize, Serialize};

/// Bounded lists of paths per discrepancy category, for human triage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscrepancySamples {
    pub mismatched: Vec<String>,
    pub missing_in_destination: Vec<String>,
    pub extra_in_destination: Vec<String>,
}

impl DiscrepancySamples {
    pub fn is_empty(&self) -> bool {
        self.mismatched.is_empty()
            && self.missing_in_destination.is_empty()
            && self.extra_in_destination.is_empty()
    }
}

/// Classification of every path in the union of two mappings.
///
/// `matched + mismatched + missing_in_destination + extra_in_destination`
/// always equals the size of the key union.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub matched: usize,
    pub mismatched: usize,
    pub missing_in_destination: usize,
    pub extra_in_destination: usize,
    #[serde(default, skip_serializing_if = "DiscrepancySamples::is_empty")]
    pub samples: DiscrepancySamples,
}

impl ComparisonSummary {
    /// Total number of classified paths.
    pub fn total(&self) -> usize {
        self.matched + self.mismatched + self.missing_in_destination + self.extra_in_destination
    }

    /// PASS iff nothing is mismatched, missing or extra. `matched` does not gate it.
    pub fn verdict(&self) -> Verdict {
        if self.mismatched == 0
            && self.missing_in_destination == 0
            && self.extra_in_destination == 0
        {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }
}

fn push_sample(samples: &mut Vec<String>, path: &str, limit: usize) {
    if samples.len() < limit {
        samples.push(path.to_string());
    }
}

/// Classify every path present in either mapping.
///
/// - only in `destination`: extra
/// - only in `source`: missing
/// - in both with identical digests: matched
/// - otherwise mismatched, including when either side has no digest
///
/// At most `sample_limit` paths are kept per non-matched category.
pub fn compare(
    source: &DigestMapping,
    destination: &DigestMapping,
    sample_limit: usize,
) -> ComparisonSummary {
    let mut summary = ComparisonSummary::default();

    for (path, src_digest) in source.iter() {
        match destination.get(path) {
            None => {
                summary.missing_in_destination += 1;
                push_sample(&mut summary.samples.missing_in_destination, path, sample_limit);
            }
            Some(dst_digest) => match (src_digest, dst_digest) {
                (Some(a), Some(b)) if a == b => summary.matched += 1,
                _ => {
                    summary.mismatched += 1;
                    push_sample(&mut summary.samples.mismatched, path, sample_limit);
                }
            },
        }
    }

    for path in destination.keys().filter(|p| !source.contains(p)) {
        summary.extra_in_destination += 1;
        push_sample(&mut summary.samples.extra_in_destination, path, sample_limit);
    }

    summary
}
