use crate::error::{InputError, Result};
use crate::monitor::ChatId;
use dashmap::DashMap;
use log::{debug, warn};
use rust_decimal::Decimal;

/// Per-chat alert settings. A limit of zero means "unset".
#[derive(Debug, Clone, PartialEq)]
pub struct Subscriber {
    pub id: ChatId,
    pub lower_limit: Decimal,
    pub upper_limit: Decimal,
    pub holding_amount: Option<Decimal>,
}

impl Subscriber {
    pub fn new(id: ChatId) -> Self {
        Self {
            id,
            lower_limit: Decimal::ZERO,
            upper_limit: Decimal::ZERO,
            holding_amount: None,
        }
    }

    /// `price * holding_amount`, if an amount has been set. `None` when the
    /// product does not fit a `Decimal`; the line is then left out of the alert.
    pub fn holding_value(&self, price: Decimal) -> Option<Decimal> {
        let amount = self.holding_amount?;
        let value = price.checked_mul(amount);
        if value.is_none() {
            warn!(
                "Holding value for {} out of range ({} * {}), omitted",
                self.id, price, amount
            );
        }
        value
    }
}

/// A limit as typed by the subscriber.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LimitInput {
    /// Price of one coin.
    PerUnit(Decimal),
    /// Value of the whole holding; divided by the holding amount.
    Total(Decimal),
}

impl LimitInput {
    fn per_unit(self, holding_amount: Option<Decimal>) -> std::result::Result<Decimal, InputError> {
        match self {
            LimitInput::PerUnit(value) => non_negative(value),
            LimitInput::Total(total) => {
                let total = non_negative(total)?;
                let amount = holding_amount.ok_or(InputError::AmountNotSet)?;
                if amount.is_zero() {
                    return Err(InputError::ZeroAmount);
                }
                total.checked_div(amount).ok_or(InputError::Overflow)
            }
        }
    }
}

fn non_negative(value: Decimal) -> std::result::Result<Decimal, InputError> {
    if value.is_sign_negative() && !value.is_zero() {
        Err(InputError::Negative)
    } else {
        Ok(value)
    }
}

#[derive(Debug, Clone, Copy)]
enum LimitSide {
    Lower,
    Upper,
}

/// Subscriber records keyed by chat. Each entry is locked independently.
#[derive(Debug, Default)]
pub struct SubscriberStore {
    entries: DashMap<ChatId, Subscriber>,
}

impl SubscriberStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: ChatId) -> Option<Subscriber> {
        self.entries.get(&id).map(|entry| entry.clone())
    }

    pub fn get_or_create(&self, id: ChatId) -> Subscriber {
        self.entries
            .entry(id)
            .or_insert_with(|| {
                debug!("New subscriber {}", id);
                Subscriber::new(id)
            })
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn set_lower_limit(&self, id: ChatId, input: LimitInput) -> Result<Subscriber> {
        self.set_limit(id, LimitSide::Lower, input)
    }

    pub fn set_upper_limit(&self, id: ChatId, input: LimitInput) -> Result<Subscriber> {
        self.set_limit(id, LimitSide::Upper, input)
    }

    pub fn set_holding_amount(&self, id: ChatId, amount: Decimal) -> Result<Subscriber> {
        let amount = non_negative(amount)?;
        let mut entry = self.entries.entry(id).or_insert_with(|| Subscriber::new(id));
        entry.holding_amount = Some(amount);
        Ok(entry.clone())
    }

    fn set_limit(&self, id: ChatId, side: LimitSide, input: LimitInput) -> Result<Subscriber> {
        let mut entry = self.entries.entry(id).or_insert_with(|| Subscriber::new(id));
        // Conversion reads the amount under the same entry lock it writes the limit with.
        let value = input.per_unit(entry.holding_amount)?;
        match side {
            LimitSide::Lower => entry.lower_limit = value,
            LimitSide::Upper => entry.upper_limit = value,
        }
        debug!("{:?} limit for {} set to {}", side, id, value);
        Ok(entry.clone())
    }
}
