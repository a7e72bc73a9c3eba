//! RFM segmentation rules

use std::fmt;
use std::str::FromStr;

/// Named user-value category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    HighValue,
    Potential,
    New,
    LapsedHighValue,
    General,
}

impl Segment {
    /// All segments in rule priority order
    pub const ALL: [Segment; 5] = [
        Segment::HighValue,
        Segment::Potential,
        Segment::New,
        Segment::LapsedHighValue,
        Segment::General,
    ];

    /// Name used in reports and the RFM CSV
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighValue => "high-value",
            Self::Potential => "potential",
            Self::New => "new",
            Self::LapsedHighValue => "lapsed high-value",
            Self::General => "general",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Segment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|segment| segment.as_str() == s)
            .ok_or_else(|| format!("unknown segment '{s}'"))
    }
}

/// Recency, frequency and monetary scores of one user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScoreTriple {
    pub r: u8,
    pub f: u8,
    pub m: u8,
}

impl ScoreTriple {
    pub fn new(r: u8, f: u8, m: u8) -> Self {
        Self { r, f, m }
    }

    /// Sum of the three scores, 3-15
    pub fn total(&self) -> u8 {
        self.r + self.f + self.m
    }
}

type Rule = (fn(&ScoreTriple) -> bool, Segment);

/// Segmentation table, evaluated top to bottom; the first matching rule wins
pub const SEGMENT_RULES: [Rule; 5] = [
    (|s| s.r >= 3 && s.f >= 3 && s.m >= 3, Segment::HighValue),
    (|s| s.r >= 3 && s.f >= 2 && s.m >= 2, Segment::Potential),
    (|s| s.r >= 3 && s.f <= 2, Segment::New),
    (|s| s.r <= 2 && s.f >= 3 && s.m >= 3, Segment::LapsedHighValue),
    (|_| true, Segment::General),
];

/// Segment for a score triple
pub fn segment_for(scores: &ScoreTriple) -> Segment {
    SEGMENT_RULES
        .iter()
        .find(|(matches, _)| matches(scores))
        .map_or(Segment::General, |(_, segment)| *segment)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(r: u8, f: u8, m: u8) -> Segment {
        segment_for(&ScoreTriple::new(r, f, m))
    }

    #[test]
    fn test_rule_examples() {
        assert_eq!(seg(5, 5, 5), Segment::HighValue);
        assert_eq!(seg(3, 3, 3), Segment::HighValue);
        assert_eq!(seg(3, 2, 2), Segment::Potential);
        assert_eq!(seg(4, 3, 2), Segment::Potential);
        assert_eq!(seg(3, 1, 5), Segment::New);
        assert_eq!(seg(5, 2, 1), Segment::New);
        assert_eq!(seg(2, 3, 3), Segment::LapsedHighValue);
        assert_eq!(seg(1, 5, 4), Segment::LapsedHighValue);
        assert_eq!(seg(2, 2, 2), Segment::General);
        assert_eq!(seg(3, 4, 1), Segment::General);
        assert_eq!(seg(1, 1, 1), Segment::General);
    }

    #[test]
    fn test_priority_order() {
        // (3,3,3) also satisfies the "potential" rule; the earlier rule wins
        assert!((SEGMENT_RULES[1].0)(&ScoreTriple::new(3, 3, 3)));
        assert_eq!(seg(3, 3, 3), Segment::HighValue);
    }

    #[test]
    fn test_every_triple_has_a_segment() {
        for r in 1..=5 {
            for f in 1..=5 {
                for m in 1..=5 {
                    let triple = ScoreTriple::new(r, f, m);
                    let first = SEGMENT_RULES.iter().position(|(p, _)| p(&triple));
                    assert!(first.is_some());
                    assert_eq!(SEGMENT_RULES[first.unwrap()].1, segment_for(&triple));
                    assert_eq!(segment_for(&triple), segment_for(&triple));
                    assert!((3..=15).contains(&triple.total()));
                }
            }
        }
    }

    #[test]
    fn test_segment_names_round_trip() {
        for segment in Segment::ALL {
            assert_eq!(segment.as_str().parse::<Segment>(), Ok(segment));
        }
        assert!("vip".parse::<Segment>().is_err());
    }
}
