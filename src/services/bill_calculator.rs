use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

const CURRENCY_SCALE: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LineItem {
    #[serde(default)]
    pub description: String,
    pub amount: Decimal,
}

/// A discount or fee as submitted: older forms send one number, newer forms
/// send an itemized list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ChargeAmount {
    Scalar(Decimal),
    Itemized(Vec<LineItem>),
}

impl Default for ChargeAmount {
    fn default() -> Self {
        Self::Itemized(Vec::new())
    }
}

impl ChargeAmount {
    pub fn total(&self) -> Decimal {
        match self {
            Self::Scalar(amount) => *amount,
            Self::Itemized(items) => items.iter().map(|item| item.amount).sum(),
        }
    }

    pub fn amounts(&self) -> Vec<Decimal> {
        match self {
            Self::Scalar(amount) => vec![*amount],
            Self::Itemized(items) => items.iter().map(|item| item.amount).collect(),
        }
    }

    /// Canonical stored form. A legacy scalar becomes a single item carrying
    /// `label`; a zero scalar becomes an empty list.
    pub fn into_line_items(self, label: &str) -> Vec<LineItem> {
        match self {
            Self::Scalar(amount) if amount.is_zero() => Vec::new(),
            Self::Scalar(amount) => vec![LineItem {
                description: label.to_string(),
                amount,
            }],
            Self::Itemized(items) => items,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MeterReading {
    pub start_meter: Decimal,
    pub end_meter: Decimal,
    pub rate: Decimal,
    #[serde(default)]
    pub meter_fee: Decimal,
}

impl MeterReading {
    pub fn usage(&self) -> Decimal {
        self.end_meter - self.start_meter
    }

    pub fn cost(&self) -> Decimal {
        round_currency(self.usage() * self.rate + self.meter_fee)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillCharges {
    pub rent: Decimal,
    pub discounts: ChargeAmount,
    pub electricity: MeterReading,
    pub water: MeterReading,
    pub aircon_fee: Decimal,
    pub fridge_fee: Decimal,
    pub other_fees: ChargeAmount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DerivedAmounts {
    pub net_rent: Decimal,
    pub electricity_cost: Decimal,
    pub water_cost: Decimal,
    pub other_fees_total: Decimal,
    pub grand_total: Decimal,
}

/// Derives the computed bill fields. Every component is rounded to cents
/// exactly once and the grand total is the plain sum of those components.
pub fn calculate(charges: &BillCharges) -> DerivedAmounts {
    let net_rent = round_currency(charges.rent - charges.discounts.total());
    let electricity_cost = charges.electricity.cost();
    let water_cost = charges.water.cost();
    let other_fees_total = round_currency(charges.other_fees.total());
    let grand_total = net_rent
        + electricity_cost
        + water_cost
        + round_currency(charges.aircon_fee)
        + round_currency(charges.fridge_fee)
        + other_fees_total;

    if net_rent.is_sign_negative() || grand_total.is_sign_negative() {
        tracing::warn!(
            %net_rent,
            %grand_total,
            "Bill computes to a negative amount, keeping it as a credit"
        );
    }

    DerivedAmounts {
        net_rent,
        electricity_cost,
        water_cost,
        other_fees_total,
        grand_total,
    }
}

pub fn round_currency(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(CURRENCY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}
