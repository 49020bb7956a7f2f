//! Parsing of monetary and quantity values printed by tax portals.

use std::str::FromStr;

use rust_decimal::Decimal;

/// Parse an amount such as `R$ 1.234,56`, `10,49` or `1234.56`.
///
/// Values containing a comma use the Brazilian convention (dot thousands
/// separator, comma decimal separator). Values without a comma are read as
/// plain decimals, which is how NF-e XML encodes them.
///
/// # Examples
///
/// ```
/// use invoice_backend::domain::parse_amount;
/// use rust_decimal::Decimal;
///
/// assert_eq!(parse_amount("R$ 1.234,56"), Decimal::from_str_exact("1234.56").ok());
/// assert_eq!(parse_amount("10.49"), Decimal::from_str_exact("10.49").ok());
/// assert_eq!(parse_amount("n/a"), None);
/// ```
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches("R$")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    let normalised = if cleaned.contains(',') {
        cleaned.replace('.', "").replace(',', ".")
    } else {
        cleaned
    };
    Decimal::from_str(&normalised).ok()
}

/// Round to centavos using banker's rounding.
pub fn round_cents(value: Decimal) -> Decimal {
    value.round_dp(2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    #[rstest]
    #[case("1.234,56", dec!(1234.56))]
    #[case("R$ 10,49", dec!(10.49))]
    #[case(" 3,5 ", dec!(3.5))]
    #[case("0.750", dec!(0.750))]
    #[case("12", dec!(12))]
    #[case("1 234,00", dec!(1234.00))]
    fn parses_portal_amounts(#[case] raw: &str, #[case] expected: Decimal) {
        assert_eq!(parse_amount(raw), Some(expected));
    }

    #[rstest]
    #[case("")]
    #[case("R$")]
    #[case("abc")]
    #[case("1,2,3")]
    fn rejects_garbage(#[case] raw: &str) {
        assert_eq!(parse_amount(raw), None);
    }
}
