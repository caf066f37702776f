//! Sensitive-data (PHI) detection for sampled columns.
//!
//! Categories are held in a single ordered table. Order is precedence: when
//! two categories both match, the one listed first wins. Column names are
//! tested before sample values, and a value-only match is discounted.

use std::fmt;

use anyhow::{Context, Result};
use heck::ToSnakeCase;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::TransformPolicy;

/// Confidence multiplier applied when only sample values matched.
pub const VALUE_MATCH_DISCOUNT: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhiCategory {
    Ssn,
    Mrn,
    Dob,
    Email,
    Phone,
    Name,
    Address,
    ZipCode,
    IpAddress,
}

impl PhiCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhiCategory::Ssn => "SSN",
            PhiCategory::Mrn => "MRN",
            PhiCategory::Dob => "DOB",
            PhiCategory::Email => "EMAIL",
            PhiCategory::Phone => "PHONE",
            PhiCategory::Name => "NAME",
            PhiCategory::Address => "ADDRESS",
            PhiCategory::ZipCode => "ZIP_CODE",
            PhiCategory::IpAddress => "IP_ADDRESS",
        }
    }

    /// Transform applied by auto-scrub. Identifiers keep join equality
    /// through hashing; dates and locations keep coarse meaning.
    pub fn default_transform(&self) -> TransformPolicy {
        match self {
            PhiCategory::Ssn
            | PhiCategory::Mrn
            | PhiCategory::Email
            | PhiCategory::Phone
            | PhiCategory::IpAddress => TransformPolicy::Hash,
            PhiCategory::Dob | PhiCategory::Address | PhiCategory::ZipCode => {
                TransformPolicy::Generalize
            }
            PhiCategory::Name => TransformPolicy::Redact,
        }
    }
}

impl fmt::Display for PhiCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PatternRule {
    pub category: PhiCategory,
    pub confidence: f64,
    pub patterns: &'static [&'static str],
}

/// The category table, highest risk first. Name patterns run against the
/// snake_cased column name; value patterns run against trimmed sample text.
pub const PHI_PATTERNS: &[PatternRule] = &[
    PatternRule {
        category: PhiCategory::Ssn,
        confidence: 0.95,
        patterns: &[
            r"^(.*_)?ssn(_.*)?$",
            r"social_?security",
            r"^\d{3}-\d{2}-\d{4}$",
        ],
    },
    PatternRule {
        category: PhiCategory::Mrn,
        confidence: 0.9,
        patterns: &[
            r"^(.*_)?mrn(_.*)?$",
            r"medical_?record",
            r"^mrn[-:# ]?\d{4,12}$",
        ],
    },
    PatternRule {
        category: PhiCategory::Dob,
        confidence: 0.9,
        patterns: &[r"^(.*_)?dob(_.*)?$", r"birth_?date", r"date_?of_?birth"],
    },
    PatternRule {
        category: PhiCategory::Email,
        confidence: 0.85,
        patterns: &[r"(^|_)e_?mail(_|$)", r"^[^@\s]+@[^@\s]+\.[a-z]{2,}$"],
    },
    PatternRule {
        category: PhiCategory::Phone,
        confidence: 0.8,
        patterns: &[
            r"(^|_)(phone|mobile|cell|fax|tel|telephone)(_|$)",
            r"^\+?1?[ .-]?\(?\d{3}\)?[ .-]?\d{3}[ .-]?\d{4}$",
        ],
    },
    PatternRule {
        category: PhiCategory::Name,
        confidence: 0.75,
        patterns: &[
            r"^(first|last|middle|full|given|family|patient|maiden)_?name$",
            r"^(name|surname)$",
        ],
    },
    PatternRule {
        category: PhiCategory::Address,
        confidence: 0.75,
        patterns: &[
            r"(^|_)(address|addr|street)(_|$)",
            r"^\d+\s+(\w+\s+)+(street|st|avenue|ave|road|rd|boulevard|blvd|lane|ln|drive|dr)\.?$",
        ],
    },
    PatternRule {
        category: PhiCategory::ZipCode,
        confidence: 0.6,
        patterns: &[r"(^|_)(zip|zipcode|postal_?code)(_|$)", r"^\d{5}-\d{4}$"],
    },
    PatternRule {
        category: PhiCategory::IpAddress,
        confidence: 0.7,
        patterns: &[
            r"(^|_)ip(_?address)?(_|$)",
            r"^(\d{1,3}\.){3}\d{1,3}$",
        ],
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Evidence {
    ColumnName,
    SampleValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhiDetection {
    pub category: PhiCategory,
    pub confidence: f64,
    pub evidence: Evidence,
}

#[derive(Debug)]
struct CompiledRule {
    category: PhiCategory,
    confidence: f64,
    regexes: Vec<Regex>,
}

impl CompiledRule {
    fn is_match(&self, text: &str) -> bool {
        self.regexes.iter().any(|regex| regex.is_match(text))
    }
}

/// Compiled form of [`PHI_PATTERNS`]; kept as a `Vec` so table order is
/// the evaluation order.
#[derive(Debug)]
pub struct PhiMatcher {
    rules: Vec<CompiledRule>,
}

impl PhiMatcher {
    pub fn new() -> Result<Self> {
        Self::from_table(PHI_PATTERNS)
    }

    pub fn from_table(table: &[PatternRule]) -> Result<Self> {
        let rules = table
            .iter()
            .map(|rule| {
                let regexes = rule
                    .patterns
                    .iter()
                    .map(|pattern| {
                        RegexBuilder::new(pattern)
                            .case_insensitive(true)
                            .build()
                            .with_context(|| {
                                format!("Compiling {} pattern '{pattern}'", rule.category)
                            })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(CompiledRule {
                    category: rule.category,
                    confidence: rule.confidence,
                    regexes,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn base_confidence(&self, category: PhiCategory) -> Option<f64> {
        self.rules
            .iter()
            .find(|rule| rule.category == category)
            .map(|rule| rule.confidence)
    }

    /// Classifies a column. `None` means nothing matched (confidence 0).
    pub fn detect(&self, column_name: &str, samples: &[Value]) -> Option<PhiDetection> {
        let normalized = column_name.trim().to_snake_case();
        if let Some(rule) = self.rules.iter().find(|rule| rule.is_match(&normalized)) {
            return Some(PhiDetection {
                category: rule.category,
                confidence: rule.confidence,
                evidence: Evidence::ColumnName,
            });
        }

        let texts: Vec<String> = samples.iter().filter_map(sample_text).collect();
        if texts.is_empty() {
            return None;
        }
        self.rules
            .iter()
            .find(|rule| texts.iter().any(|text| rule.is_match(text)))
            .map(|rule| PhiDetection {
                category: rule.category,
                confidence: rule.confidence * VALUE_MATCH_DISCOUNT,
                evidence: Evidence::SampleValue,
            })
    }
}

fn sample_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}
