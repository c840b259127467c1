//! Price alert subscriptions and their trigger conditions

use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of trigger a subscription watches for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    PriceAbove,
    PriceBelow,
    /// Absolute percent move away from the reference price
    PercentChange,
}

impl ConditionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionKind::PriceAbove => "price_above",
            ConditionKind::PriceBelow => "price_below",
            ConditionKind::PercentChange => "percent_change",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "price_above" => Some(ConditionKind::PriceAbove),
            "price_below" => Some(ConditionKind::PriceBelow),
            "percent_change" => Some(ConditionKind::PercentChange),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub kind: ConditionKind,
    pub threshold: f64,
}

impl Condition {
    pub fn price_above(threshold: f64) -> Self {
        Self {
            kind: ConditionKind::PriceAbove,
            threshold,
        }
    }

    pub fn price_below(threshold: f64) -> Self {
        Self {
            kind: ConditionKind::PriceBelow,
            threshold,
        }
    }

    pub fn percent_change(threshold: f64) -> Self {
        Self {
            kind: ConditionKind::PercentChange,
            threshold,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.threshold.is_finite() || self.threshold <= 0.0 {
            return Err(ValidationError::InvalidValue {
                field: "threshold",
                reason: format!("{} must be a positive number", self.threshold),
            });
        }
        Ok(())
    }

    /// Whether the condition holds for `price` given a reference price.
    ///
    /// A percent-change condition without a usable reference never holds.
    pub fn is_met(&self, price: f64, reference_price: Option<f64>) -> bool {
        match self.kind {
            ConditionKind::PriceAbove => price > self.threshold,
            ConditionKind::PriceBelow => price < self.threshold,
            ConditionKind::PercentChange => match reference_price {
                Some(reference) if reference > 0.0 => {
                    percent_change(reference, price).abs() >= self.threshold
                }
                _ => false,
            },
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ConditionKind::PriceAbove => write!(f, "above {}", self.threshold),
            ConditionKind::PriceBelow => write!(f, "below {}", self.threshold),
            ConditionKind::PercentChange => write!(f, "change {}%", self.threshold),
        }
    }
}

impl FromStr for Condition {
    type Err = ValidationError;

    /// Accepts `above 50000`, `>50000`, `below 30000`, `<30000`, `change 5` and `5%`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidCondition(raw.trim().to_string());
        let text = raw.trim().to_lowercase();
        let tokens: Vec<&str> = text.split_whitespace().collect();

        let (kind, value) = match tokens.as_slice() {
            [op, value] => {
                let kind = match *op {
                    "above" | ">" | "price_above" => ConditionKind::PriceAbove,
                    "below" | "<" | "price_below" => ConditionKind::PriceBelow,
                    "change" | "move" | "percent_change" => ConditionKind::PercentChange,
                    _ => return Err(invalid()),
                };
                (kind, value.trim_end_matches('%'))
            }
            [single] => {
                if let Some(value) = single.strip_prefix('>') {
                    (ConditionKind::PriceAbove, value)
                } else if let Some(value) = single.strip_prefix('<') {
                    (ConditionKind::PriceBelow, value)
                } else if let Some(value) = single.strip_suffix('%') {
                    (ConditionKind::PercentChange, value)
                } else {
                    return Err(invalid());
                }
            }
            _ => return Err(invalid()),
        };

        let threshold: f64 = value
            .trim_start_matches('$')
            .replace(',', "")
            .parse()
            .map_err(|_| invalid())?;
        let condition = Self { kind, threshold };
        condition.validate().map_err(|_| invalid())?;
        Ok(condition)
    }
}

/// Percent change from `from` to `to`.
pub fn percent_change(from: f64, to: f64) -> f64 {
    (to - from) / from * 100.0
}

/// Normalize a user-supplied ticker to upper case, rejecting anything but 2-5 letters.
pub fn normalize_symbol(raw: &str) -> Result<String, ValidationError> {
    let symbol = raw.trim().to_uppercase();
    let valid = (2..=5).contains(&symbol.len()) && symbol.chars().all(|c| c.is_ascii_alphabetic());
    if valid {
        Ok(symbol)
    } else {
        Err(ValidationError::InvalidSymbol(raw.trim().to_string()))
    }
}

/// A user's standing request to be notified about a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub user_id: i64,
    pub symbol: String,
    pub condition: Condition,
    pub active: bool,
    /// Cleared after firing; set again once the condition stops holding.
    pub armed: bool,
    pub reference_price: Option<f64>,
    pub last_price: Option<f64>,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating or replacing a user's subscription on a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSubscription {
    pub user_id: i64,
    pub symbol: String,
    pub condition: Condition,
    pub reference_price: Option<f64>,
}

/// State written back after evaluating a subscription during a tick
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionUpdate {
    pub armed: bool,
    pub reference_price: Option<f64>,
    pub last_price: f64,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub fired: bool,
    pub update: SubscriptionUpdate,
}

impl Subscription {
    /// Evaluate the subscription against a freshly fetched price.
    ///
    /// Edge-triggered: an armed subscription fires once when its condition holds,
    /// then stays quiet until a tick where the condition no longer holds.
    /// Percent-change subscriptions move their reference to the firing price and
    /// stay armed, so each further move of `threshold` percent fires again.
    pub fn evaluate(&self, price: f64, now: DateTime<Utc>) -> Evaluation {
        let reference = self.reference_price.or(self.last_price);
        let met = self.condition.is_met(price, reference);

        let mut update = SubscriptionUpdate {
            armed: self.armed,
            reference_price: reference.or(Some(price)),
            last_price: price,
            last_triggered_at: self.last_triggered_at,
            updated_at: now,
        };

        let fired = match self.condition.kind {
            ConditionKind::PercentChange => {
                if met {
                    update.reference_price = Some(price);
                    update.last_triggered_at = Some(now);
                }
                update.armed = true;
                met
            }
            ConditionKind::PriceAbove | ConditionKind::PriceBelow => {
                let fired = met && self.armed;
                if fired {
                    update.last_triggered_at = Some(now);
                }
                update.armed = !met;
                fired
            }
        };

        Evaluation { fired, update }
    }

    /// Percent change of `price` relative to the price seen at subscription time.
    pub fn change_since_subscription(&self, price: f64) -> Option<f64> {
        self.reference_price
            .filter(|reference| *reference > 0.0)
            .map(|reference| percent_change(reference, price))
    }

    pub fn alert_message(&self, price: f64) -> String {
        match self.condition.kind {
            ConditionKind::PriceAbove => format!(
                "🚨 Price alert: {} is above {:.2} (current: {:.2})",
                self.symbol, self.condition.threshold, price
            ),
            ConditionKind::PriceBelow => format!(
                "🚨 Price alert: {} is below {:.2} (current: {:.2})",
                self.symbol, self.condition.threshold, price
            ),
            ConditionKind::PercentChange => {
                let change = self
                    .reference_price
                    .or(self.last_price)
                    .filter(|reference| *reference > 0.0)
                    .map(|reference| percent_change(reference, price))
                    .unwrap_or_default();
                format!(
                    "🚨 Price alert: {} moved {:+.2}% (current: {:.2})",
                    self.symbol, change, price
                )
            }
        }
    }
}
