//! General functions related to finance.
use crate::units::{Dimensionless, Energy, Money, MoneyPerEnergy, MoneyPerPower};

/// The number of EUR per USD used to convert technology costs, which are quoted in USD.
pub const EUR_USD_EXCHANGE_RATE: f64 = 1.17;

/// Convert a cost quoted in USD into EUR
pub fn usd_to_eur(value: f64) -> f64 {
    value / EUR_USD_EXCHANGE_RATE
}

/// Calculates the capital recovery factor (CRF) for a given lifetime and discount rate.
///
/// The CRF is used to annualise capital costs over the economic lifetime of an asset.
pub fn capital_recovery_factor(lifetime: u32, discount_rate: Dimensionless) -> Dimensionless {
    if lifetime == 0 {
        return Dimensionless(0.0);
    }
    if discount_rate == Dimensionless(0.0) {
        return Dimensionless(1.0) / Dimensionless(lifetime as f64);
    }
    let exponent = i32::try_from(lifetime).unwrap_or(i32::MAX);
    let factor = (Dimensionless(1.0) + discount_rate).powi(exponent);
    (discount_rate * factor) / (factor - Dimensionless(1.0))
}

/// Calculates the annual capital cost per unit of capacity
pub fn annual_capital_cost(
    capital_cost: MoneyPerPower,
    lifetime: u32,
    discount_rate: Dimensionless,
) -> MoneyPerPower {
    let crf = capital_recovery_factor(lifetime, discount_rate);
    capital_cost * crf
}

/// The annual cost of holding one unit of capacity: annualised capex plus fixed O&M.
pub fn annual_fixed_cost(
    capital_cost: MoneyPerPower,
    fixed_om: MoneyPerPower,
    lifetime: u32,
    discount_rate: Dimensionless,
) -> MoneyPerPower {
    annual_capital_cost(capital_cost, lifetime, discount_rate) + fixed_om
}

/// Levelised cost of energy delivered.
///
/// Returns NaN if no energy was delivered.
pub fn levelised_cost(annual_cost: Money, annual_energy: Energy) -> MoneyPerEnergy {
    if annual_energy.value() <= 0.0 {
        return MoneyPerEnergy(f64::NAN);
    }

    annual_cost / annual_energy
}

/// Levelised cost of hydrogen.
///
/// The electricity consumed by the electrolysers is charged at `electricity_price`.
pub fn levelised_cost_of_hydrogen(
    electrolyser_cost: Money,
    electricity_price: MoneyPerEnergy,
    electricity_used: Energy,
    hydrogen_produced: Energy,
) -> MoneyPerEnergy {
    levelised_cost(
        electrolyser_cost + electricity_price * electricity_used,
        hydrogen_produced,
    )
}
