//! Payout multipliers derived from the entered field

use super::racer::Racer;

/// Scale applied to the weakness modifier
pub const ODDS_SCALE: f64 = 10.0;
/// No racer ever pays out at less than 1:1
pub const MIN_ODDS: f64 = 1.0;

/// Compute one payout multiplier per racer, index-aligned with `racers`.
///
/// Speed and stamina are normalised against the field, so favourites end up
/// with a smaller weakness modifier. A lifetime win rate scales the modifier
/// by `1 - win_rate`, so an undefeated racer always lands on `MIN_ODDS`.
pub fn compute_odds(racers: &[Racer]) -> Vec<f64> {
    let (sum_speed, sum_stamina) = racers.iter().fold((0.0, 0.0), |(speed, stamina), r| {
        (speed + r.stats.speed, stamina + r.stats.stamina)
    });

    racers
        .iter()
        .map(|racer| {
            let norm_speed = normalise(racer.stats.speed, sum_speed);
            let norm_stamina = normalise(racer.stats.stamina, sum_stamina);
            let modifier = 1.0 - (norm_speed + norm_stamina);

            let penalty = racer
                .win_rate()
                .map(|rate| 1.0 - rate)
                .unwrap_or(1.0);

            (ODDS_SCALE * modifier * penalty).max(MIN_ODDS)
        })
        .collect()
}

fn normalise(value: f64, total: f64) -> f64 {
    if total > 0.0 {
        value / total
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::race::racer::{RacerStats, StatTier};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use uuid::Uuid;

    fn racer(speed: f64, stamina: f64) -> Racer {
        Racer::new(Uuid::new_v4(), "r", None, RacerStats::new(speed, stamina, 5.0))
    }

    #[test]
    fn odds_are_index_aligned_and_floored() {
        let mut rng = ChaCha8Rng::seed_from_u64(99);
        for size in 1..=12 {
            let field: Vec<Racer> = (0..size)
                .map(|_| Racer::owned(Uuid::new_v4(), StatTier::Random, &mut rng))
                .collect();
            let odds = compute_odds(&field);
            assert_eq!(odds.len(), field.len());
            assert!(odds.iter().all(|&o| o >= MIN_ODDS));
        }
    }

    #[test]
    fn favourites_get_lower_odds() {
        let field = vec![racer(15.0, 15.0), racer(3.0, 3.0), racer(6.0, 6.0), racer(4.0, 5.0)];
        let odds = compute_odds(&field);
        assert!(odds[0] <= odds[1]);
        assert!(odds[0] < odds[2]);
    }

    #[test]
    fn evenly_matched_field_shares_odds() {
        let field = vec![racer(5.0, 5.0); 4];
        let odds = compute_odds(&field);
        // 10 * (1 - (0.25 + 0.25))
        for odd in odds {
            assert!((odd - 5.0).abs() < 1e-9);
        }
    }

    #[test]
    fn winning_history_shortens_odds() {
        let mut veteran = racer(5.0, 5.0);
        veteran.races = 4;
        veteran.wins = 2;
        let field = vec![veteran, racer(5.0, 5.0), racer(5.0, 5.0), racer(5.0, 5.0)];
        let odds = compute_odds(&field);
        assert!((odds[0] - 2.5).abs() < 1e-9);
        assert!((odds[1] - 5.0).abs() < 1e-9);
    }

    #[test]
    fn undefeated_racer_lands_on_the_floor() {
        let mut champ = racer(2.0, 2.0);
        champ.races = 1;
        champ.wins = 1;
        let mut veteran = racer(2.0, 2.0);
        veteran.races = 10;
        veteran.wins = 9;
        let field = vec![champ, veteran, racer(8.0, 8.0), racer(8.0, 8.0)];
        let odds = compute_odds(&field);
        // 10 * 0.8 * 0.0 and 10 * 0.8 * 0.1 both floor to even money
        assert_eq!(odds[0], MIN_ODDS);
        assert_eq!(odds[1], MIN_ODDS);
        assert!((odds[2] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn single_entrant_pays_even_money() {
        let odds = compute_odds(&[racer(8.0, 8.0)]);
        assert_eq!(odds, vec![MIN_ODDS]);
    }

    #[test]
    fn empty_field_has_no_odds() {
        assert!(compute_odds(&[]).is_empty());
    }
}
