use rust_decimal::{Decimal, RoundingStrategy};

use crate::seat::SeatCategory;

/// Static price multiplier per seat category.
pub fn category_multiplier(category: SeatCategory) -> Decimal {
    match category {
        SeatCategory::Standard => Decimal::ONE,
        SeatCategory::Premium => Decimal::new(15, 1),
        SeatCategory::Vip => Decimal::new(2, 0),
    }
}

/// Seat price for a show's base price, in fixed-point with two decimals.
pub fn seat_price(base_price: Decimal, category: SeatCategory) -> Decimal {
    let mut price = (base_price * category_multiplier(category))
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    price.rescale(2);
    price
}

/// Exact sum of seat prices, two decimals.
pub fn total<'a>(prices: impl IntoIterator<Item = &'a Decimal>) -> Decimal {
    let mut sum: Decimal = prices.into_iter().sum();
    sum = sum.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    sum.rescale(2);
    sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_category_prices() {
        assert_eq!(seat_price(dec!(250), SeatCategory::Standard).to_string(), "250.00");
        assert_eq!(seat_price(dec!(250), SeatCategory::Premium).to_string(), "375.00");
        assert_eq!(seat_price(dec!(250), SeatCategory::Vip).to_string(), "500.00");
        assert_eq!(seat_price(dec!(99.99), SeatCategory::Premium), dec!(149.99));
    }

    #[test]
    fn test_total_has_no_float_drift() {
        let prices = vec![dec!(0.10); 30];
        assert_eq!(total(&prices).to_string(), "3.00");

        let prices = [dec!(100.00), dec!(100.00)];
        assert_eq!(total(&prices).to_string(), "200.00");
    }
}
