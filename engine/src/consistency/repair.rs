//! Repair notes
//!
//! When a draft fails with a repairable report, the orchestrator appends each
//! violation to the plan's `consistency_checks` as `Repair: <violation>`.
//! Writers read them back through [`RepairNote::parse`]. The violation
//! wording is defined here so the checker that writes it and the writers
//! that read it cannot drift apart.

use quill_sdk::types::DirectorPlan;

/// Prefix of the notes appended to `consistency_checks` on repair
pub const REPAIR_PREFIX: &str = "Repair: ";

pub(crate) const LENGTH_PREFIX: &str = "Length ";
pub(crate) const MISSING_TERMS: &str = "Missing required terms: ";
pub(crate) const FORBIDDEN_TERMS: &str = "Contains forbidden terms: ";
pub(crate) const MISSING_DIALOGUE: &str = "Dialogue is required but none was found";
const PARAGRAPHS_PREFIX: &str = "Expected at least ";

/// Separator between terms in a violation message
pub(crate) const TERM_SEPARATOR: &str = ", ";

/// A repair note, decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairNote {
    ForbiddenTerms(Vec<String>),
    MissingTerms(Vec<String>),
    Length { min: usize, max: usize },
    Paragraphs { min: usize },
    Dialogue,
    /// Anything else, usually from the semantic judge
    Other(String),
}

impl RepairNote {
    /// Decode one violation, with or without the `Repair: ` prefix
    pub fn parse(note: &str) -> Self {
        let text = note.strip_prefix(REPAIR_PREFIX).unwrap_or(note).trim();

        if let Some(terms) = text.strip_prefix(FORBIDDEN_TERMS) {
            return RepairNote::ForbiddenTerms(split_terms(terms));
        }
        if let Some(terms) = text.strip_prefix(MISSING_TERMS) {
            return RepairNote::MissingTerms(split_terms(terms));
        }
        if text == MISSING_DIALOGUE {
            return RepairNote::Dialogue;
        }
        if text.starts_with(LENGTH_PREFIX) {
            if let Some((min, max)) = parse_range(text) {
                return RepairNote::Length { min, max };
            }
        }
        if let Some(rest) = text.strip_prefix(PARAGRAPHS_PREFIX) {
            if let Some(min) = rest
                .split_whitespace()
                .next()
                .and_then(|n| n.parse().ok())
            {
                return RepairNote::Paragraphs { min };
            }
        }
        RepairNote::Other(text.to_string())
    }

    /// All repair notes carried by a plan, in order
    pub fn from_plan(plan: &DirectorPlan) -> Vec<Self> {
        plan.quality_constraints
            .consistency_checks
            .iter()
            .filter(|c| c.starts_with(REPAIR_PREFIX))
            .map(|c| Self::parse(c))
            .collect()
    }
}

/// Violation text for a paragraph shortfall
pub(crate) fn paragraphs_violation(min: usize, found: usize) -> String {
    format!("{}{} paragraphs, found {}", PARAGRAPHS_PREFIX, min, found)
}

fn split_terms(terms: &str) -> Vec<String> {
    terms
        .split(TERM_SEPARATOR)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

/// `[lo, hi]` at the end of a length violation
fn parse_range(text: &str) -> Option<(usize, usize)> {
    let open = text.rfind('[')?;
    let inner = text[open + 1..].strip_suffix(']')?;
    let (lo, hi) = inner.split_once(',')?;
    Some((lo.trim().parse().ok()?, hi.trim().parse().ok()?))
}
