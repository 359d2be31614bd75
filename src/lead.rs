//! Lead qualification record and lexical field extraction
//!
//! Extraction is a pure function over the caller's latest utterance. Rules
//! run in a fixed priority order per field, and the last utterance that
//! matches a field overwrites it.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Currency symbol, digit groups with thousands separators, decimals, and
/// an optional scale word. Only the numeric group is kept.
static AMOUNT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$?(\d+(?:,\d+)*(?:\.\d+)?)\s*(?:k|thousand|million)?").expect("valid regex")
});

const INTEREST_RULES: &[(&[&str], InvestmentInterest)] = &[
    (&["stock", "equity", "shares"], InvestmentInterest::Stocks),
    (&["bond", "fixed income"], InvestmentInterest::Bonds),
    (
        &["real estate", "property", "reits"],
        InvestmentInterest::RealEstate,
    ),
    (
        &["crypto", "bitcoin", "ethereum"],
        InvestmentInterest::Cryptocurrency,
    ),
];

const RISK_RULES: &[(&[&str], RiskTolerance)] = &[
    (&["conservative", "safe", "low risk"], RiskTolerance::Conservative),
    (&["aggressive", "high risk", "growth"], RiskTolerance::Aggressive),
    (&["moderate", "balanced"], RiskTolerance::Moderate),
];

/// Category of investment the caller is interested in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestmentInterest {
    Stocks,
    Bonds,
    RealEstate,
    Cryptocurrency,
}

impl InvestmentInterest {
    /// Stable storage name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stocks => "stocks",
            Self::Bonds => "bonds",
            Self::RealEstate => "real_estate",
            Self::Cryptocurrency => "cryptocurrency",
        }
    }
}

impl fmt::Display for InvestmentInterest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvestmentInterest {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stocks" => Ok(Self::Stocks),
            "bonds" => Ok(Self::Bonds),
            "real_estate" => Ok(Self::RealEstate),
            "cryptocurrency" => Ok(Self::Cryptocurrency),
            other => Err(format!("unknown investment interest: {other}")),
        }
    }
}

/// Caller's stated appetite for risk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTolerance {
    Conservative,
    Moderate,
    Aggressive,
}

impl RiskTolerance {
    /// Stable storage name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Conservative => "conservative",
            Self::Moderate => "moderate",
            Self::Aggressive => "aggressive",
        }
    }
}

impl fmt::Display for RiskTolerance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskTolerance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "conservative" => Ok(Self::Conservative),
            "moderate" => Ok(Self::Moderate),
            "aggressive" => Ok(Self::Aggressive),
            other => Err(format!("unknown risk tolerance: {other}")),
        }
    }
}

/// Structured qualification snapshot for one call
///
/// Caller number and call time are fixed at creation. The remaining fields
/// only change through [`LeadRecord::extract`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadRecord {
    caller_number: String,
    call_time: DateTime<Utc>,
    investment_interest: Option<InvestmentInterest>,
    investment_amount: Option<String>,
    risk_tolerance: Option<RiskTolerance>,
    timeline: Option<String>,
    qualified: bool,
}

impl LeadRecord {
    /// Create an empty lead for a caller
    #[must_use]
    pub fn new(caller_number: impl Into<String>, call_time: DateTime<Utc>) -> Self {
        Self {
            caller_number: caller_number.into(),
            call_time,
            investment_interest: None,
            investment_amount: None,
            risk_tolerance: None,
            timeline: None,
            qualified: false,
        }
    }

    /// Rebuild a lead from persisted fields
    #[must_use]
    pub fn restore(
        caller_number: String,
        call_time: DateTime<Utc>,
        investment_interest: Option<InvestmentInterest>,
        investment_amount: Option<String>,
        risk_tolerance: Option<RiskTolerance>,
        timeline: Option<String>,
        qualified: bool,
    ) -> Self {
        Self {
            caller_number,
            call_time,
            investment_interest,
            investment_amount,
            risk_tolerance,
            timeline,
            qualified,
        }
    }

    #[must_use]
    pub fn caller_number(&self) -> &str {
        &self.caller_number
    }

    #[must_use]
    pub const fn call_time(&self) -> DateTime<Utc> {
        self.call_time
    }

    #[must_use]
    pub const fn investment_interest(&self) -> Option<InvestmentInterest> {
        self.investment_interest
    }

    #[must_use]
    pub fn investment_amount(&self) -> Option<&str> {
        self.investment_amount.as_deref()
    }

    #[must_use]
    pub const fn risk_tolerance(&self) -> Option<RiskTolerance> {
        self.risk_tolerance
    }

    #[must_use]
    pub fn timeline(&self) -> Option<&str> {
        self.timeline.as_deref()
    }

    /// Interest, amount, and risk tolerance are all known
    #[must_use]
    pub const fn is_qualified(&self) -> bool {
        self.qualified
    }

    /// Apply the extraction rules to a new caller utterance
    ///
    /// Returns the updated record; `self` is left untouched. Whitespace-only
    /// input yields an identical copy.
    #[must_use]
    pub fn extract(&self, utterance: &str) -> Self {
        let mut next = self.clone();
        if utterance.trim().is_empty() {
            return next;
        }

        let text = utterance.to_lowercase();

        if let Some(interest) = first_rule_match(INTEREST_RULES, &text) {
            next.investment_interest = Some(interest);
        }

        if let Some(amount) = AMOUNT_REGEX
            .captures(&text)
            .and_then(|caps| caps.get(1))
        {
            next.investment_amount = Some(amount.as_str().to_string());
        }

        if let Some(risk) = first_rule_match(RISK_RULES, &text) {
            next.risk_tolerance = Some(risk);
        }

        // Fields are never cleared, so qualification can only move to true
        next.qualified = next.qualified
            || (next.investment_interest.is_some()
                && next.investment_amount.is_some()
                && next.risk_tolerance.is_some());

        next
    }
}

/// Return the value of the first rule whose keyword set hits the text
fn first_rule_match<T: Copy>(rules: &[(&[&str], T)], text: &str) -> Option<T> {
    rules
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| text.contains(k)))
        .map(|(_, value)| *value)
}
