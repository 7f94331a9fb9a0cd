//! Racer stats and the per-tick movement model

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::names::generate_name;

/// Distance from the start line to the finish line, in track units
pub const TRACK_LENGTH: f64 = 100.0;
/// Largest distance a racer can cover in a single tick
pub const MAX_STEP: f64 = 5.0;
/// Upper bound of every stat; a speed of this value sprints on every tick
pub const STAT_CEILING: f64 = 20.0;
/// Stamina regained per tick while exhausted is `recovery / RECOVERY_DIVISOR`
pub const RECOVERY_DIVISOR: f64 = 10.0;
/// Width of the rendered lane, in characters
pub const LANE_WIDTH: usize = 20;

/// Temperament of a racer, shifts the mood bias drawn each tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    Sad,
    #[default]
    Focused,
    Happy,
}

impl Mood {
    /// Signed offset added to the uniform draw in `[0, 1)`
    pub fn offset(self) -> f64 {
        match self {
            Mood::Sad => -1.0,
            Mood::Focused => 0.0,
            Mood::Happy => 1.0,
        }
    }
}

/// Stat band a new racer is rolled in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatTier {
    Starting,
    Amateur,
    Professional,
    Expert,
    Random,
}

impl StatTier {
    /// Half-open range each stat is drawn from
    pub fn range(self) -> (f64, f64) {
        match self {
            StatTier::Starting => (1.0, 5.0),
            StatTier::Amateur => (5.0, 10.0),
            StatTier::Professional => (10.0, 15.0),
            StatTier::Expert => (15.0, STAT_CEILING),
            StatTier::Random => (1.0, STAT_CEILING),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RacerStats {
    pub speed: f64,
    pub stamina: f64,
    pub recovery: f64,
}

impl RacerStats {
    #[cfg(test)]
    pub fn new(speed: f64, stamina: f64, recovery: f64) -> Self {
        Self {
            speed,
            stamina,
            recovery,
        }
    }

    /// Roll a stat triple inside the tier's band
    pub fn roll<R: Rng + ?Sized>(tier: StatTier, rng: &mut R) -> Self {
        let (low, high) = tier.range();
        Self {
            speed: rng.gen_range(low..high),
            stamina: rng.gen_range(low..high),
            recovery: rng.gen_range(low..high),
        }
    }
}

/// A racer entered into races.
///
/// The persisted part mirrors a row of the `racers` table. `position` and
/// `stamina_left` only exist for the duration of one race attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Racer {
    pub id: Uuid,
    pub name: String,
    /// Owning account, `None` for auto-fill racers
    pub owner_id: Option<Uuid>,
    #[serde(default)]
    pub level: u64,
    #[serde(default)]
    pub exp: u64,
    #[serde(default)]
    pub races: u64,
    #[serde(default)]
    pub wins: u64,
    #[serde(default)]
    pub mood: Mood,
    #[serde(flatten)]
    pub stats: RacerStats,

    #[serde(skip)]
    position: f64,
    #[serde(skip)]
    stamina_left: f64,
}

impl Racer {
    pub fn new(id: Uuid, name: impl Into<String>, owner_id: Option<Uuid>, stats: RacerStats) -> Self {
        Self {
            id,
            name: name.into(),
            owner_id,
            level: if owner_id.is_some() { 1 } else { 0 },
            exp: 0,
            races: 0,
            wins: 0,
            mood: Mood::Focused,
            stats,
            position: 0.0,
            stamina_left: stats.stamina,
        }
    }

    /// Create a freshly rolled racer for an account
    pub fn owned<R: Rng + ?Sized>(owner_id: Uuid, tier: StatTier, rng: &mut R) -> Self {
        let stats = RacerStats::roll(tier, rng);
        Self::new(Uuid::new_v4(), generate_name(rng), Some(owner_id), stats)
    }

    /// Create an unowned filler racer with starting-tier stats
    pub fn synthetic<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let stats = RacerStats::roll(StatTier::Starting, rng);
        Self::new(Uuid::new_v4(), generate_name(rng), None, stats)
    }

    #[cfg(test)]
    pub fn is_owned(&self) -> bool {
        self.owner_id.is_some()
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn stamina_left(&self) -> f64 {
        self.stamina_left
    }

    /// Put the racer back on the start line with a full stamina reserve
    pub fn reset_for_race(&mut self) {
        self.position = 0.0;
        self.stamina_left = self.stats.stamina;
    }

    /// Advance the racer by one tick.
    ///
    /// A rested racer either sprints the full `MAX_STEP` or strolls a random
    /// shorter distance. The chance to sprint grows with speed and is shifted
    /// by mood; sprinting drains twice as much stamina. A small jitter is
    /// taken off every step so equal racers rarely land on the same tick.
    /// An exhausted racer stands still and regains stamina from recovery.
    pub fn advance<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let bias = rng.gen::<f64>() + self.mood.offset();
        let potential = self.stats.speed / STAT_CEILING;

        if self.stamina_left > 0.0 {
            if bias >= 1.0 - potential {
                self.position += MAX_STEP;
                self.stamina_left -= rng.gen::<f64>() * 2.0;
            } else {
                self.position += rng.gen_range(0.0..MAX_STEP);
                self.stamina_left -= rng.gen::<f64>();
            }
            self.position -= rng.gen::<f64>();
        } else {
            self.stamina_left += self.stats.recovery / RECOVERY_DIVISOR;
        }

        self.position = self.position.clamp(0.0, TRACK_LENGTH);
        self.stamina_left = self.stamina_left.max(0.0);
    }

    pub fn has_finished(&self) -> bool {
        self.position >= TRACK_LENGTH
    }

    /// Add experience, levelling up once `exp` reaches `level * 100`
    pub fn gain_experience(&mut self, amount: u64) {
        self.exp += amount;
        let threshold = self.level.max(1) * 100;
        if self.exp >= threshold {
            self.exp -= threshold;
            self.level += 1;
        }
    }

    /// Percent of the way to the next level
    pub fn level_progress(&self) -> f64 {
        let threshold = self.level.max(1) * 100;
        self.exp as f64 * 100.0 / threshold as f64
    }

    /// Bump the lifetime counters after a race
    pub fn record_race(&mut self, won: bool) {
        self.races += 1;
        if won {
            self.wins += 1;
        }
    }

    /// Share of recorded races that were won, `None` without history
    pub fn win_rate(&self) -> Option<f64> {
        if self.races == 0 || self.wins == 0 {
            return None;
        }
        Some((self.wins as f64 / self.races as f64).min(1.0))
    }

    #[cfg(test)]
    pub fn render_lane(&self) -> String {
        render_lane(self.position)
    }
}

/// Render a lane as a trail of dots ending in the snail
pub fn render_lane(position: f64) -> String {
    let progress = (position / TRACK_LENGTH * LANE_WIDTH as f64) as usize;
    let trail = ".".repeat(progress.saturating_sub(1).min(LANE_WIDTH - 1));
    format!("{:<width$}", format!("{trail}@"), width = LANE_WIDTH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn racer(speed: f64, stamina: f64, recovery: f64) -> Racer {
        Racer::new(
            Uuid::new_v4(),
            "test-snail",
            Some(Uuid::new_v4()),
            RacerStats::new(speed, stamina, recovery),
        )
    }

    fn ticks_to_finish(racer: &mut Racer, rng: &mut ChaCha8Rng) -> u32 {
        racer.reset_for_race();
        let mut ticks = 0;
        while !racer.has_finished() {
            racer.advance(rng);
            ticks += 1;
            assert!(ticks < 10_000, "racer never finished");
        }
        ticks
    }

    #[test]
    fn reset_restores_start_line_and_stamina() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut r = racer(10.0, 8.5, 4.0);
        for _ in 0..15 {
            r.advance(&mut rng);
        }
        r.reset_for_race();
        assert_eq!(r.position(), 0.0);
        assert_eq!(r.stamina_left(), 8.5);
    }

    #[test]
    fn advance_stays_in_bounds() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for tier in [StatTier::Starting, StatTier::Expert, StatTier::Random] {
            for mood in [Mood::Sad, Mood::Focused, Mood::Happy] {
                let mut r = Racer::owned(Uuid::new_v4(), tier, &mut rng);
                r.mood = mood;
                r.reset_for_race();
                for _ in 0..500 {
                    r.advance(&mut rng);
                    assert!(r.position() >= 0.0 && r.position() <= TRACK_LENGTH);
                    assert!(r.stamina_left() >= 0.0);
                }
            }
        }
    }

    #[test]
    fn exhausted_racer_recovers_in_place() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut r = racer(10.0, 0.0, 5.0);
        r.reset_for_race();
        r.advance(&mut rng);
        assert_eq!(r.position(), 0.0);
        assert!((r.stamina_left() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn higher_speed_finishes_sooner_on_average() {
        let mut rng = ChaCha8Rng::seed_from_u64(2024);
        let mut slow = racer(3.0, 10.0, 10.0);
        let mut fast = racer(17.0, 10.0, 10.0);

        let runs = 300;
        let slow_total: u32 = (0..runs).map(|_| ticks_to_finish(&mut slow, &mut rng)).sum();
        let fast_total: u32 = (0..runs).map(|_| ticks_to_finish(&mut fast, &mut rng)).sum();

        let slow_avg = slow_total as f64 / runs as f64;
        let fast_avg = fast_total as f64 / runs as f64;
        assert!(
            fast_avg < slow_avg,
            "fast averaged {fast_avg} ticks, slow averaged {slow_avg}"
        );
    }

    #[test]
    fn rolled_stats_respect_tier_band() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        for _ in 0..100 {
            let stats = RacerStats::roll(StatTier::Amateur, &mut rng);
            for stat in [stats.speed, stats.stamina, stats.recovery] {
                assert!((5.0..10.0).contains(&stat));
            }
        }
    }

    #[test]
    fn synthetic_racers_are_unowned() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let r = Racer::synthetic(&mut rng);
        assert!(!r.is_owned());
        assert_eq!(r.level, 0);
        assert_eq!(r.stamina_left(), r.stats.stamina);
    }

    #[test]
    fn experience_levels_up_at_threshold() {
        let mut r = racer(5.0, 5.0, 5.0);
        r.gain_experience(60);
        assert_eq!((r.level, r.exp), (1, 60));
        assert_eq!(r.level_progress(), 60.0);
        r.gain_experience(50);
        assert_eq!((r.level, r.exp), (2, 10));
        assert_eq!(r.level_progress(), 5.0);
    }

    #[test]
    fn win_rate_needs_history() {
        let mut r = racer(5.0, 5.0, 5.0);
        assert_eq!(r.win_rate(), None);
        r.record_race(false);
        assert_eq!(r.win_rate(), None);
        r.record_race(true);
        assert_eq!(r.win_rate(), Some(0.5));
    }

    #[test]
    fn lane_renders_progress() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut r = racer(20.0, 20.0, 20.0);
        r.reset_for_race();
        assert_eq!(r.render_lane(), format!("{:<20}", "@"));

        while !r.has_finished() {
            r.advance(&mut rng);
        }
        let lane = r.render_lane();
        assert_eq!(lane.len(), LANE_WIDTH);
        assert!(lane.ends_with('@'));
    }
}
