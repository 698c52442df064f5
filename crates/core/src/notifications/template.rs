//! Message templating.
//!
//! Every field is optional. A missing field drops its clause from the
//! sentence; rendering never fails.

use chrono::NaiveDate;
use rust_decimal::Decimal;

/// Values substituted into notification messages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateContext {
    /// Display name of the other party (rider for owners, owner for riders).
    pub counterpart_name: Option<String>,
    pub box_name: Option<String>,
    pub stable_name: Option<String>,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub end_date: Option<NaiveDate>,
}

impl TemplateContext {
    /// `" {prefix} {value}"`, or nothing when the value is missing or blank.
    pub fn clause(prefix: &str, value: Option<&str>) -> String {
        match value.map(str::trim) {
            Some(v) if !v.is_empty() => format!(" {prefix} {v}"),
            _ => String::new(),
        }
    }

    pub fn from_counterpart(&self) -> String {
        Self::clause("from", self.counterpart_name.as_deref())
    }

    pub fn by_counterpart(&self) -> String {
        Self::clause("by", self.counterpart_name.as_deref())
    }

    pub fn box_clause(&self, prefix: &str) -> String {
        Self::clause(prefix, self.box_name.as_deref())
    }

    pub fn stable_clause(&self, prefix: &str) -> String {
        Self::clause(prefix, self.stable_name.as_deref())
    }

    /// Amount with two decimals and the currency code, e.g. `4500.00 NOK`.
    pub fn formatted_amount(&self) -> Option<String> {
        let amount = self.amount?;
        let amount = amount.round_dp(2);
        Some(match self.currency.as_deref() {
            Some(currency) if !currency.is_empty() => format!("{amount:.2} {currency}"),
            _ => format!("{amount:.2}"),
        })
    }

    pub fn amount_clause(&self, prefix: &str) -> String {
        Self::clause(prefix, self.formatted_amount().as_deref())
    }

    pub fn end_date_clause(&self, prefix: &str) -> String {
        let date = self.end_date.map(|d| d.format("%Y-%m-%d").to_string());
        Self::clause(prefix, date.as_deref())
    }
}
