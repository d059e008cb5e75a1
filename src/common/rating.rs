use serde::{Serialize, Deserialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BadgeTier {
    Green,
    Amber,
    Red,
}

impl BadgeTier {
    pub fn color(&self) -> &'static str {
        match self {
            BadgeTier::Green => "#14A44D",
            BadgeTier::Amber => "#E4A11B",
            BadgeTier::Red => "#DC4C64",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RatingBadge {
    pub percent: u8,
    pub tier: BadgeTier,
}

/// Converts a 0-10 vote average into a whole percentage.
pub fn vote_percent(vote_average: f64) -> Option<u8> {
    if !vote_average.is_finite() {
        return None;
    }
    Some((vote_average * 10.0).round().clamp(0.0, 100.0) as u8)
}

/// Above 80 is green, 60 through 80 inclusive is amber, below 60 is red.
pub fn tier_for(percent: u8) -> BadgeTier {
    if percent > 80 {
        BadgeTier::Green
    } else if percent >= 60 {
        BadgeTier::Amber
    } else {
        BadgeTier::Red
    }
}

/// No badge for unrated titles (a zero vote average means "no votes yet").
pub fn badge(vote_average: Option<f64>) -> Option<RatingBadge> {
    let vote = vote_average.filter(|v| *v > 0.0)?;
    let percent = vote_percent(vote)?;
    Some(RatingBadge { percent, tier: tier_for(percent) })
}

pub fn badge_for_percent(percent: Option<u8>) -> Option<RatingBadge> {
    percent.filter(|p| *p > 0).map(|p| RatingBadge { percent: p, tier: tier_for(p) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_boundaries_are_pinned() {
        assert_eq!(tier_for(100), BadgeTier::Green);
        assert_eq!(tier_for(81), BadgeTier::Green);
        assert_eq!(tier_for(80), BadgeTier::Amber);
        assert_eq!(tier_for(60), BadgeTier::Amber);
        assert_eq!(tier_for(59), BadgeTier::Red);
        assert_eq!(tier_for(0), BadgeTier::Red);
    }

    #[test]
    fn vote_average_rounds_to_percent() {
        assert_eq!(vote_percent(8.04), Some(80));
        assert_eq!(vote_percent(8.06), Some(81));
        assert_eq!(vote_percent(12.0), Some(100));
        assert_eq!(vote_percent(f64::NAN), None);

        let b = badge(Some(8.25)).unwrap();
        assert_eq!(b.percent, 83);
        assert_eq!(b.tier.color(), "#14A44D");
        assert_eq!(badge(Some(0.0)), None);
        assert_eq!(badge(None), None);
    }
}
