//! Human-readable document numbers scoped to a location and calendar month.
//!
//! Job cards, parts-issue requests and sub-purchase-orders all carry a number
//! of the form `{locationCode}-{yyyy}-{mm}-{nnnn}`. Numbers of kinds other than
//! job cards carry a kind prefix (`PI-`, `SPO-`) so two documents of different
//! kinds never render to the same string.
//!
//! Allocation itself is atomic and lives in the store. This module owns the
//! value types, parsing, and the scan-based derivation used to seed counters
//! from documents that already exist.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when building or parsing document numbers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentNumberError {
    #[error("location code must not be empty")]
    EmptyLocationCode,
    #[error("invalid location code: {0}")]
    InvalidLocationCode(String),
    #[error("invalid year: {0}")]
    InvalidYear(i32),
    #[error("invalid month: {0}")]
    InvalidMonth(u32),
    #[error("malformed document number: {0}")]
    Malformed(String),
}

/// The kind of document a number belongs to. Each kind has its own counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentKind {
    JobCard,
    PartsIssue,
    SubPurchaseOrder,
}

impl DocumentKind {
    /// All kinds.
    pub const ALL: [Self; 3] = [Self::JobCard, Self::PartsIssue, Self::SubPurchaseOrder];

    /// Prefix rendered in front of the location code, if any.
    #[must_use]
    pub const fn prefix(self) -> Option<&'static str> {
        match self {
            Self::JobCard => None,
            Self::PartsIssue => Some("PI"),
            Self::SubPurchaseOrder => Some("SPO"),
        }
    }

    /// Canonical database spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::JobCard => "JOB_CARD",
            Self::PartsIssue => "PARTS_ISSUE",
            Self::SubPurchaseOrder => "SUB_PURCHASE_ORDER",
        }
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DocumentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("invalid document kind: {s}"))
    }
}

/// The scope a sequence counter is unique within.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceScope {
    kind: DocumentKind,
    location_code: String,
    year: i32,
    month: u32,
}

impl SequenceScope {
    /// Build a scope, validating the location code, year and month.
    ///
    /// # Errors
    ///
    /// Returns `DocumentNumberError` if the location code is empty or contains
    /// characters other than ASCII letters, digits, `-` and `_`, if the year is
    /// not a four-digit year, or if the month is outside `1..=12`.
    pub fn new(
        kind: DocumentKind,
        location_code: &str,
        year: i32,
        month: u32,
    ) -> Result<Self, DocumentNumberError> {
        let location_code = location_code.trim();
        if location_code.is_empty() {
            return Err(DocumentNumberError::EmptyLocationCode);
        }
        if !location_code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(DocumentNumberError::InvalidLocationCode(
                location_code.to_string(),
            ));
        }
        if !(1000..=9999).contains(&year) {
            return Err(DocumentNumberError::InvalidYear(year));
        }
        if !(1..=12).contains(&month) {
            return Err(DocumentNumberError::InvalidMonth(month));
        }

        Ok(Self {
            kind,
            location_code: location_code.to_string(),
            year,
            month,
        })
    }

    /// Scope for a document created at `at`.
    ///
    /// # Errors
    ///
    /// Returns `DocumentNumberError` if the location code is invalid.
    pub fn at(
        kind: DocumentKind,
        location_code: &str,
        at: DateTime<Utc>,
    ) -> Result<Self, DocumentNumberError> {
        Self::new(kind, location_code, at.year(), at.month())
    }

    #[must_use]
    pub const fn kind(&self) -> DocumentKind {
        self.kind
    }

    #[must_use]
    pub fn location_code(&self) -> &str {
        &self.location_code
    }

    #[must_use]
    pub const fn year(&self) -> i32 {
        self.year
    }

    #[must_use]
    pub const fn month(&self) -> u32 {
        self.month
    }

    /// The document number carrying `sequence` in this scope.
    #[must_use]
    pub fn number(&self, sequence: u32) -> DocumentNumber {
        DocumentNumber {
            scope: self.clone(),
            sequence,
        }
    }
}

/// A rendered document number: a scope plus a sequence within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentNumber {
    scope: SequenceScope,
    sequence: u32,
}

impl DocumentNumber {
    /// Parse a rendered number of the given kind.
    ///
    /// The location code may itself contain `-`, so the numeric segments are
    /// taken from the right.
    ///
    /// # Errors
    ///
    /// Returns `DocumentNumberError::Malformed` if the string is not a number
    /// of this kind, or a scope error if its segments are out of range.
    pub fn parse(kind: DocumentKind, s: &str) -> Result<Self, DocumentNumberError> {
        let malformed = || DocumentNumberError::Malformed(s.to_string());

        let body = match kind.prefix() {
            Some(prefix) => s
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix('-'))
                .ok_or_else(malformed)?,
            None => s,
        };

        let mut parts = body.rsplitn(4, '-');
        let sequence = parts.next().ok_or_else(malformed)?;
        let month = parts.next().ok_or_else(malformed)?;
        let year = parts.next().ok_or_else(malformed)?;
        let location_code = parts.next().ok_or_else(malformed)?;

        if year.len() != 4 || month.len() != 2 || sequence.len() < 4 {
            return Err(malformed());
        }
        if ![year, month, sequence]
            .iter()
            .all(|part| part.chars().all(|c| c.is_ascii_digit()))
        {
            return Err(malformed());
        }

        let year: i32 = year.parse().map_err(|_| malformed())?;
        let month: u32 = month.parse().map_err(|_| malformed())?;
        let sequence: u32 = sequence.parse().map_err(|_| malformed())?;
        if sequence == 0 {
            return Err(malformed());
        }

        let scope = SequenceScope::new(kind, location_code, year, month)?;
        Ok(scope.number(sequence))
    }

    #[must_use]
    pub const fn scope(&self) -> &SequenceScope {
        &self.scope
    }

    #[must_use]
    pub const fn sequence(&self) -> u32 {
        self.sequence
    }
}

impl std::fmt::Display for DocumentNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(prefix) = self.scope.kind.prefix() {
            write!(f, "{prefix}-")?;
        }
        write!(
            f,
            "{}-{:04}-{:02}-{:04}",
            self.scope.location_code, self.scope.year, self.scope.month, self.sequence
        )
    }
}

/// Derive the next sequence for `scope` by scanning existing numbers.
///
/// Numbers of another scope and malformed numbers are skipped. Returns 1 when
/// nothing in the scope exists yet.
///
/// This is not safe under concurrent allocation: two callers scanning the
/// same set compute the same value. It is only used to seed the atomic
/// counters from documents that predate them.
pub fn next_from_existing<'a, I>(scope: &SequenceScope, existing: I) -> u32
where
    I: IntoIterator<Item = &'a str>,
{
    existing
        .into_iter()
        .filter_map(|raw| DocumentNumber::parse(scope.kind, raw).ok())
        .filter(|number| number.scope == *scope)
        .map(|number| number.sequence)
        .max()
        .map_or(1, |max| max.saturating_add(1))
}

/// In-memory map of the last sequence issued per scope.
///
/// Mirrors the contract of the store-backed allocator: `allocate` never hands
/// out the same sequence twice for a scope and is strictly increasing.
#[derive(Debug, Clone, Default)]
pub struct SequenceBook {
    last: HashMap<SequenceScope, u32>,
}

impl SequenceBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a book from existing rendered numbers of one kind.
    ///
    /// Returns the book and the numbers that could not be parsed.
    pub fn from_existing<'a, I>(kind: DocumentKind, existing: I) -> (Self, Vec<String>)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut book = Self::new();
        let mut skipped = Vec::new();
        for raw in existing {
            match DocumentNumber::parse(kind, raw) {
                Ok(number) => book.observe(&number),
                Err(_) => skipped.push(raw.to_string()),
            }
        }
        (book, skipped)
    }

    /// Record that `number` exists, raising its scope's counter if needed.
    pub fn observe(&mut self, number: &DocumentNumber) {
        let last = self.last.entry(number.scope.clone()).or_insert(0);
        *last = (*last).max(number.sequence);
    }

    /// Allocate the next number in `scope`.
    pub fn allocate(&mut self, scope: &SequenceScope) -> DocumentNumber {
        let last = self.last.entry(scope.clone()).or_insert(0);
        *last = last.saturating_add(1);
        scope.number(*last)
    }

    /// Last sequence issued in `scope`, if any.
    #[must_use]
    pub fn last_value(&self, scope: &SequenceScope) -> Option<u32> {
        self.last.get(scope).copied()
    }

    /// Iterate over every scope and its last issued sequence.
    pub fn iter(&self) -> impl Iterator<Item = (&SequenceScope, u32)> {
        self.last.iter().map(|(scope, last)| (scope, *last))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn job_card_scope(code: &str) -> SequenceScope {
        SequenceScope::new(DocumentKind::JobCard, code, 2025, 3).unwrap()
    }

    #[test]
    fn test_job_card_number_format() {
        let number = job_card_scope("SC001").number(7);
        assert_eq!(number.to_string(), "SC001-2025-03-0007");
    }

    #[test]
    fn test_prefixed_kinds() {
        let scope = SequenceScope::new(DocumentKind::SubPurchaseOrder, "SC001", 2025, 11).unwrap();
        assert_eq!(scope.number(12).to_string(), "SPO-SC001-2025-11-0012");

        let scope = SequenceScope::new(DocumentKind::PartsIssue, "SC001", 2025, 1).unwrap();
        assert_eq!(scope.number(1).to_string(), "PI-SC001-2025-01-0001");
    }

    #[test]
    fn test_sequence_wider_than_four_digits() {
        let number = job_card_scope("SC001").number(12_345);
        assert_eq!(number.to_string(), "SC001-2025-03-12345");
        let parsed = DocumentNumber::parse(DocumentKind::JobCard, "SC001-2025-03-12345").unwrap();
        assert_eq!(parsed.sequence(), 12_345);
    }

    #[test]
    fn test_parse_location_code_with_dash() {
        let parsed = DocumentNumber::parse(DocumentKind::JobCard, "NORTH-01-2024-12-0042").unwrap();
        assert_eq!(parsed.scope().location_code(), "NORTH-01");
        assert_eq!(parsed.scope().year(), 2024);
        assert_eq!(parsed.scope().month(), 12);
        assert_eq!(parsed.sequence(), 42);
    }

    #[test]
    fn test_parse_rejects_wrong_kind_and_garbage() {
        assert!(DocumentNumber::parse(DocumentKind::SubPurchaseOrder, "SC001-2025-03-0001").is_err());
        assert!(DocumentNumber::parse(DocumentKind::JobCard, "SC001-2025-3-0001").is_err());
        assert!(DocumentNumber::parse(DocumentKind::JobCard, "SC001-2025-13-0001").is_err());
        assert!(DocumentNumber::parse(DocumentKind::JobCard, "SC001-2025-03-00x1").is_err());
        assert!(DocumentNumber::parse(DocumentKind::JobCard, "SC001-2025-03-0000").is_err());
        assert!(DocumentNumber::parse(DocumentKind::JobCard, "2025-03-0001").is_err());
        assert!(DocumentNumber::parse(DocumentKind::JobCard, "").is_err());
    }

    #[test]
    fn test_scope_validation() {
        assert_eq!(
            SequenceScope::new(DocumentKind::JobCard, "  ", 2025, 3),
            Err(DocumentNumberError::EmptyLocationCode)
        );
        assert!(matches!(
            SequenceScope::new(DocumentKind::JobCard, "SC 01", 2025, 3),
            Err(DocumentNumberError::InvalidLocationCode(_))
        ));
        assert_eq!(
            SequenceScope::new(DocumentKind::JobCard, "SC001", 2025, 0),
            Err(DocumentNumberError::InvalidMonth(0))
        );
        assert_eq!(
            SequenceScope::new(DocumentKind::JobCard, "SC001", 99, 1),
            Err(DocumentNumberError::InvalidYear(99))
        );
    }

    #[test]
    fn test_next_from_existing_starts_at_one() {
        let scope = job_card_scope("SC001");
        assert_eq!(next_from_existing(&scope, []), 1);
    }

    #[test]
    fn test_next_from_existing_filters_scope_and_skips_malformed() {
        let scope = job_card_scope("SC001");
        let existing = [
            "SC001-2025-03-0003",
            "SC001-2025-03-0009",
            "SC001-2025-04-0050",
            "SC002-2025-03-0070",
            "SC001-2025-03-garbage",
            "not a number",
        ];
        assert_eq!(next_from_existing(&scope, existing), 10);
    }

    #[test]
    fn test_book_allocations_are_distinct_and_increasing() {
        let scope = job_card_scope("SC001");
        let mut book = SequenceBook::new();

        let first = book.allocate(&scope);
        let second = book.allocate(&scope);
        assert_eq!(first.to_string(), "SC001-2025-03-0001");
        assert_eq!(second.to_string(), "SC001-2025-03-0002");

        let sequences: Vec<u32> = (0..50).map(|_| book.allocate(&scope).sequence()).collect();
        assert!(sequences.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(book.last_value(&scope), Some(52));
    }

    #[test]
    fn test_book_scopes_are_independent() {
        let mut book = SequenceBook::new();
        let a = job_card_scope("SC001");
        let b = job_card_scope("SC002");
        let spo = SequenceScope::new(DocumentKind::SubPurchaseOrder, "SC001", 2025, 3).unwrap();

        assert_eq!(book.allocate(&a).sequence(), 1);
        assert_eq!(book.allocate(&b).sequence(), 1);
        assert_eq!(book.allocate(&spo).sequence(), 1);
        assert_eq!(book.allocate(&a).sequence(), 2);
    }

    #[test]
    fn test_book_from_existing_continues_after_max() {
        let (mut book, skipped) = SequenceBook::from_existing(
            DocumentKind::JobCard,
            ["SC001-2025-03-0004", "SC001-2025-03-0002", "bogus"],
        );
        assert_eq!(skipped, vec!["bogus".to_string()]);
        assert_eq!(book.allocate(&job_card_scope("SC001")).sequence(), 5);
    }
}
