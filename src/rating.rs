use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Starting rating for players that have never finished a duel.
pub const DEFAULT_ELO: i64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rank {
    Bronce,
    Plata,
    Oro,
    Diamante,
    Maestro,
}

impl Rank {
    pub fn of(elo: i64) -> Self {
        match elo {
            e if e < 500 => Rank::Bronce,
            e if e < 1200 => Rank::Plata,
            e if e < 2000 => Rank::Oro,
            e if e < 3000 => Rank::Diamante,
            _ => Rank::Maestro,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Rank::Bronce => "Bronce",
            Rank::Plata => "Plata",
            Rank::Oro => "Oro",
            Rank::Diamante => "Diamante",
            Rank::Maestro => "Maestro",
        }
    }
}

impl Display for Rank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Rank {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Bronce" => Ok(Rank::Bronce),
            "Plata" => Ok(Rank::Plata),
            "Oro" => Ok(Rank::Oro),
            "Diamante" => Ok(Rank::Diamante),
            "Maestro" => Ok(Rank::Maestro),
            other => anyhow::bail!("unknown rank {other:?}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Win,
    Draw,
    Loss,
}

impl Outcome {
    fn actual_score(self) -> f64 {
        match self {
            Outcome::Win => 1.0,
            Outcome::Draw => 0.5,
            Outcome::Loss => 0.0,
        }
    }
}

pub fn expected_score(elo: i64, opponent_elo: i64) -> f64 {
    1.0 / (1.0 + 10f64.powf((opponent_elo - elo) as f64 / 400.0))
}

/// Newer players move faster through the ladder.
pub fn k_factor(elo: i64) -> f64 {
    match elo {
        e if e < 1000 => 40.0,
        e if e < 2000 => 32.0,
        _ => 24.0,
    }
}

/// Both players of a duel must be rated against the same pre-duel pair;
/// never feed one freshly updated elo into the other calculation.
pub fn new_elo(elo: i64, opponent_elo: i64, outcome: Outcome) -> i64 {
    let expected = expected_score(elo, opponent_elo);
    let mut delta = (k_factor(elo) * (outcome.actual_score() - expected)).round() as i64;
    if outcome == Outcome::Win && delta < 1 {
        // A win always pays out something, even for a heavy favourite.
        delta = 1;
    }
    (elo + delta).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_buckets() {
        assert_eq!(Rank::of(0), Rank::Bronce);
        assert_eq!(Rank::of(499), Rank::Bronce);
        assert_eq!(Rank::of(500), Rank::Plata);
        assert_eq!(Rank::of(1199), Rank::Plata);
        assert_eq!(Rank::of(1200), Rank::Oro);
        assert_eq!(Rank::of(1999), Rank::Oro);
        assert_eq!(Rank::of(2000), Rank::Diamante);
        assert_eq!(Rank::of(2999), Rank::Diamante);
        assert_eq!(Rank::of(3000), Rank::Maestro);
    }

    #[test]
    fn rank_round_trips_through_strings() {
        for rank in [Rank::Bronce, Rank::Plata, Rank::Oro, Rank::Diamante, Rank::Maestro] {
            assert_eq!(rank.as_str().parse::<Rank>().unwrap(), rank);
        }
        assert!("Platino".parse::<Rank>().is_err());
    }

    #[test]
    fn expected_score_is_symmetric() {
        let a = expected_score(1200, 1200);
        assert!((a - 0.5).abs() < 1e-9);

        let favourite = expected_score(1600, 1200);
        let underdog = expected_score(1200, 1600);
        assert!((favourite + underdog - 1.0).abs() < 1e-9);
        assert!(favourite > 0.9);
    }

    #[test]
    fn k_factor_tiers() {
        assert_eq!(k_factor(0), 40.0);
        assert_eq!(k_factor(999), 40.0);
        assert_eq!(k_factor(1000), 32.0);
        assert_eq!(k_factor(1999), 32.0);
        assert_eq!(k_factor(2000), 24.0);
    }

    #[test]
    fn even_match_swings_half_the_k_factor() {
        assert_eq!(new_elo(1200, 1200, Outcome::Win), 1216);
        assert_eq!(new_elo(1200, 1200, Outcome::Loss), 1184);
        assert_eq!(new_elo(1200, 1200, Outcome::Draw), 1200);
    }

    #[test]
    fn winner_always_gains_at_least_one_point() {
        // Expected score so close to 1 that the rounded delta would be 0.
        let before = 3000;
        let after = new_elo(before, 0, Outcome::Win);
        assert!(after >= before + 1);
    }

    #[test]
    fn elo_never_goes_negative() {
        assert_eq!(new_elo(0, 1200, Outcome::Loss), 0);
        assert_eq!(new_elo(3, 1200, Outcome::Loss), 0);
    }

    #[test]
    fn draw_deltas_stay_within_the_k_factor() {
        for (a, b) in [(0, 3000), (800, 1500), (1200, 1200), (2500, 100)] {
            let da = (new_elo(a, b, Outcome::Draw) - a).abs() as f64;
            let db = (new_elo(b, a, Outcome::Draw) - b).abs() as f64;
            assert!(da + db <= k_factor(a).max(k_factor(b)));
        }
    }
}
