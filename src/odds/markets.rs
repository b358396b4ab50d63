//! Betting markets the scraper knows how to read, and the outcome labels that
//! name each odds column for that market.

const OVER_UNDER_LABELS: &[&str] = &["odds_over", "odds_under"];

/// Outcome labels for `market`, in the column order the bookmaker rows use.
/// Returns `None` for markets the scraper does not support.
pub fn outcome_labels(market: &str) -> Option<&'static [&'static str]> {
    match market {
        "1x2" => Some(&["1", "X", "2"]),
        "home_away" => Some(&["1", "2"]),
        "double_chance" => Some(&["1X", "12", "X2"]),
        "dnb" => Some(&["dnb_team1", "dnb_team2"]),
        "btts" => Some(&["btts_yes", "btts_no"]),
        m if is_over_under(m) => Some(OVER_UNDER_LABELS),
        _ => None,
    }
}

pub fn is_supported(market: &str) -> bool {
    outcome_labels(market).is_some()
}

/// `over_under_2_5`, `over_under_3`, … up to a line of 9.5
fn is_over_under(market: &str) -> bool {
    let Some(line) = market.strip_prefix("over_under_") else {
        return false;
    };
    let mut parts = line.split('_');
    if !matches!(parts.next().and_then(|p| p.parse::<u32>().ok()), Some(n) if n <= 9) {
        return false;
    }
    match (parts.next(), parts.next()) {
        (None, None) => true,
        (Some("5"), None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_markets() {
        assert_eq!(outcome_labels("1x2"), Some(&["1", "X", "2"][..]));
        assert_eq!(outcome_labels("btts"), Some(&["btts_yes", "btts_no"][..]));
        assert!(outcome_labels("corners").is_none());
    }

    #[test]
    fn test_over_under_lines() {
        assert!(is_supported("over_under_2_5"));
        assert!(is_supported("over_under_0_5"));
        assert!(is_supported("over_under_3"));
        assert!(!is_supported("over_under_10_5"));
        assert!(!is_supported("over_under_2_25"));
        assert!(!is_supported("over_under_"));
        assert!(!is_supported("over_under_x"));
    }
}
