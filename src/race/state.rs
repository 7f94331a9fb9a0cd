//! Race state and stage transitions

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use uuid::Uuid;

use super::odds::compute_odds;
use super::racer::Racer;
use super::wager::{settle, Payout, Wager, WagerBook};
use super::{Host, RaceError, RaceFlags, RaceId, RaceOptions, RaceResult, Stage};

/// Auto-fill pads the field up to this many entrants
pub const MIN_FIELD_SIZE: usize = 4;
/// Hard cap on entrants
pub const MAX_FIELD_SIZE: usize = 12;
/// Total running attempts allowed when retrying ties for first
pub const MAX_ATTEMPTS: u32 = 5;

/// Experience awarded per finishing rank, anything else gets the last entry
const RANK_EXPERIENCE: [u64; 3] = [50, 30, 20];
const ENTRY_EXPERIENCE: u64 = 10;

/// Bookkeeping owed to an owned entrant once the race is over
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrantOutcome {
    pub racer_id: Uuid,
    pub owner_id: Uuid,
    pub rank: Option<u32>,
    pub experience: u64,
}

impl EntrantOutcome {
    pub fn won(&self) -> bool {
        self.rank == Some(1)
    }
}

/// A single race, from open entries to final results.
///
/// External callers only join and bet. Every other mutation belongs to the
/// race's worker.
pub struct Race {
    id: RaceId,
    channel_id: String,
    host: Host,
    options: RaceOptions,
    stage: Stage,
    racers: Vec<Racer>,
    book: WagerBook,
    odds: Vec<f64>,
    results: Vec<RaceResult>,
    attempt: u32,
    tick: u64,
    rng: ChaCha8Rng,
    created_at: DateTime<Utc>,
}

impl Race {
    pub fn new(id: RaceId, channel_id: String, host: Host, options: RaceOptions, seed: u64) -> Self {
        Self {
            id,
            channel_id,
            host,
            options,
            stage: Stage::Open,
            racers: Vec::new(),
            book: WagerBook::new(),
            odds: Vec::new(),
            results: Vec::new(),
            attempt: 0,
            tick: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn flags(&self) -> &RaceFlags {
        &self.options.flags
    }

    pub fn racers(&self) -> &[Racer] {
        &self.racers
    }

    pub fn odds(&self) -> &[f64] {
        &self.odds
    }

    pub fn results(&self) -> &[RaceResult] {
        &self.results
    }

    pub fn wagers(&self) -> &[Wager] {
        self.book.wagers()
    }

    pub fn pool(&self) -> u64 {
        self.book.pool()
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn get_racer(&self, index: usize) -> Option<&Racer> {
        self.racers.get(index)
    }

    /// Rank of a racer in the current attempt, if it has finished
    pub fn rank_of(&self, racer_index: usize) -> Option<u32> {
        self.results
            .iter()
            .find(|r| r.racer_index == racer_index)
            .map(|r| r.rank)
    }

    /// Enter a racer. Only accepted while the race is open, once per racer
    /// and once per owning account.
    pub fn add_racer(&mut self, racer: Racer) -> Result<usize, RaceError> {
        match self.stage {
            Stage::Open => {}
            Stage::Finished => return Err(RaceError::RaceConcluded),
            _ => return Err(RaceError::RaceClosed),
        }

        let duplicate = self.racers.iter().any(|r| {
            r.id == racer.id || (racer.owner_id.is_some() && r.owner_id == racer.owner_id)
        });
        if duplicate {
            return Err(RaceError::AlreadyJoined);
        }

        if self.racers.len() >= MAX_FIELD_SIZE {
            return Err(RaceError::RaceFull(MAX_FIELD_SIZE));
        }

        self.racers.push(racer);
        Ok(self.racers.len() - 1)
    }

    /// Record a wager on the racer at `racer_index`
    pub fn place_bet(
        &mut self,
        racer_index: usize,
        amount: u64,
        bettor_id: Uuid,
    ) -> Result<(), RaceError> {
        let field_size = self.racers.len();
        self.book.place_bet(
            self.stage,
            &self.options.flags,
            field_size,
            racer_index,
            amount,
            bettor_id,
        )
    }

    /// Close entries: pad the field if allowed, then fix the odds.
    ///
    /// Returns how many synthetic racers were added.
    pub(crate) fn open_betting(&mut self) -> usize {
        debug_assert_eq!(self.stage, Stage::Open);
        self.stage = Stage::Betting;

        let mut filled = 0;
        if !self.options.flags.no_autofill {
            while self.racers.len() < MIN_FIELD_SIZE {
                let racer = Racer::synthetic(&mut self.rng);
                self.racers.push(racer);
                filled += 1;
            }
        }

        self.odds = compute_odds(&self.racers);
        filled
    }

    pub(crate) fn start_running(&mut self) {
        debug_assert_eq!(self.stage, Stage::Betting);
        self.stage = Stage::Running;
    }

    /// Reset every racer and the results for a fresh running attempt
    pub(crate) fn begin_attempt(&mut self) {
        self.attempt += 1;
        self.tick = 0;
        self.results.clear();
        for racer in &mut self.racers {
            racer.reset_for_race();
        }
    }

    /// Run one simulation tick. Every racer still on the track advances,
    /// then newly finished racers are ranked on the current tick.
    ///
    /// Returns the number of racers that finished on this tick.
    pub(crate) fn step(&mut self) -> usize {
        let tick = self.tick;
        let rng = &mut self.rng;
        for racer in self.racers.iter_mut().filter(|r| !r.has_finished()) {
            racer.advance(rng);
        }

        let finished: Vec<usize> = self
            .racers
            .iter()
            .enumerate()
            .filter(|(index, racer)| racer.has_finished() && self.rank_of(*index).is_none())
            .map(|(index, _)| index)
            .collect();

        for &index in &finished {
            self.record_finish(index, tick);
        }

        self.tick += 1;
        finished.len()
    }

    /// Rank a finisher. Racers finishing on the same tick share a rank,
    /// otherwise the rank is one past the highest rank handed out.
    pub(crate) fn record_finish(&mut self, racer_index: usize, tick: u64) {
        let Some(racer_id) = self.racers.get(racer_index).map(|r| r.id) else {
            return;
        };
        if self.rank_of(racer_index).is_some() {
            return;
        }

        let rank = match self.results.iter().find(|r| r.tick == tick) {
            Some(tied) => tied.rank,
            None => self.results.iter().map(|r| r.rank).max().unwrap_or(0) + 1,
        };

        self.results.push(RaceResult {
            racer_index,
            racer_id,
            rank,
            tick,
        });
    }

    /// Whether the current attempt has enough finishers
    pub fn attempt_complete(&self) -> bool {
        let required = self
            .options
            .finish_policy
            .required_finishers(self.racers.len());
        self.results.len() >= required
    }

    /// More than one racer shares first place
    pub fn tied_for_first(&self) -> bool {
        self.results.iter().filter(|r| r.rank == 1).count() > 1
    }

    /// Another attempt is owed: the host wants a single winner, the result is
    /// tied and the attempt cap is not spent
    pub fn needs_rerun(&self) -> bool {
        self.options.flags.only_one_winner && self.tied_for_first() && self.attempt < MAX_ATTEMPTS
    }

    pub(crate) fn finish(&mut self) {
        self.stage = Stage::Finished;
    }

    /// Payouts owed to winning bettors
    pub fn payouts(&self) -> Vec<Payout> {
        settle(self.book.wagers(), &self.results, &self.odds)
    }

    /// Race count and experience owed to each owned entrant
    pub fn entrant_outcomes(&self) -> Vec<EntrantOutcome> {
        self.racers
            .iter()
            .enumerate()
            .filter_map(|(index, racer)| {
                let owner_id = racer.owner_id?;
                let rank = self.rank_of(index);
                let experience = rank
                    .and_then(|rank| RANK_EXPERIENCE.get(rank as usize - 1))
                    .copied()
                    .unwrap_or(ENTRY_EXPERIENCE);
                Some(EntrantOutcome {
                    racer_id: racer.id,
                    owner_id,
                    rank,
                    experience,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::race::racer::RacerStats;
    use crate::race::FinishPolicy;

    fn host() -> Host {
        Host {
            user_id: Uuid::new_v4(),
            display_name: "host".to_string(),
        }
    }

    fn race_with(flags: RaceFlags) -> Race {
        let options = RaceOptions {
            flags,
            finish_policy: FinishPolicy::Podium,
        };
        Race::new("abc123".to_string(), "channel".to_string(), host(), options, 17)
    }

    fn owned_racer() -> Racer {
        Racer::new(
            Uuid::new_v4(),
            "owned",
            Some(Uuid::new_v4()),
            RacerStats::new(10.0, 10.0, 10.0),
        )
    }

    #[test]
    fn new_race_starts_open_and_empty() {
        let race = race_with(RaceFlags::default());
        assert_eq!(race.stage(), Stage::Open);
        assert!(race.racers().is_empty());
        assert!(race.results().is_empty());
    }

    #[test]
    fn same_racer_or_owner_joins_once() {
        let mut race = race_with(RaceFlags::default());
        let racer = owned_racer();
        let owner = racer.owner_id;
        race.add_racer(racer.clone()).unwrap();

        assert_eq!(race.add_racer(racer), Err(RaceError::AlreadyJoined));

        let mut second = owned_racer();
        second.owner_id = owner;
        assert_eq!(race.add_racer(second), Err(RaceError::AlreadyJoined));

        assert_eq!(race.add_racer(owned_racer()), Ok(1));
    }

    #[test]
    fn unowned_racers_do_not_collide_on_owner() {
        let mut race = race_with(RaceFlags::default());
        let stats = RacerStats::new(3.0, 3.0, 3.0);
        race.add_racer(Racer::new(Uuid::new_v4(), "a", None, stats)).unwrap();
        race.add_racer(Racer::new(Uuid::new_v4(), "b", None, stats)).unwrap();
        assert_eq!(race.racers().len(), 2);
    }

    #[test]
    fn field_is_capped() {
        let mut race = race_with(RaceFlags::default());
        for _ in 0..MAX_FIELD_SIZE {
            race.add_racer(owned_racer()).unwrap();
        }
        assert_eq!(
            race.add_racer(owned_racer()),
            Err(RaceError::RaceFull(MAX_FIELD_SIZE))
        );
    }

    #[test]
    fn joins_rejected_after_open() {
        let mut race = race_with(RaceFlags::default());
        race.add_racer(owned_racer()).unwrap();
        race.open_betting();
        assert_eq!(race.add_racer(owned_racer()), Err(RaceError::RaceClosed));

        race.start_running();
        assert_eq!(race.add_racer(owned_racer()), Err(RaceError::RaceClosed));

        race.finish();
        assert_eq!(race.add_racer(owned_racer()), Err(RaceError::RaceConcluded));
        assert_eq!(
            race.place_bet(0, 10, Uuid::new_v4()),
            Err(RaceError::RaceConcluded)
        );
    }

    #[test]
    fn autofill_pads_to_minimum_field() {
        let mut race = race_with(RaceFlags::default());
        race.add_racer(owned_racer()).unwrap();

        assert_eq!(race.open_betting(), 3);
        assert_eq!(race.racers().len(), MIN_FIELD_SIZE);
        assert_eq!(race.racers().iter().filter(|r| !r.is_owned()).count(), 3);
        assert_eq!(race.odds().len(), MIN_FIELD_SIZE);
    }

    #[test]
    fn no_autofill_keeps_field() {
        let mut race = race_with(RaceFlags {
            no_autofill: true,
            ..RaceFlags::default()
        });
        race.add_racer(owned_racer()).unwrap();
        assert_eq!(race.open_betting(), 0);
        assert_eq!(race.racers().len(), 1);
        assert_eq!(race.odds().len(), 1);
    }

    #[test]
    fn bets_only_during_betting() {
        let mut race = race_with(RaceFlags::default());
        race.add_racer(owned_racer()).unwrap();
        race.add_racer(owned_racer()).unwrap();
        let bettor = Uuid::new_v4();

        assert_eq!(race.place_bet(0, 10, bettor), Err(RaceError::BetsClosed));
        race.open_betting();
        assert_eq!(race.place_bet(0, 10, bettor), Ok(()));
        race.start_running();
        assert_eq!(race.place_bet(0, 10, bettor), Err(RaceError::BetsClosed));
        assert_eq!(race.wagers().len(), 1);
    }

    #[test]
    fn single_racer_field_rejects_bets() {
        let mut race = race_with(RaceFlags {
            no_autofill: true,
            ..RaceFlags::default()
        });
        race.add_racer(owned_racer()).unwrap();
        race.open_betting();
        assert_eq!(
            race.place_bet(0, 10, Uuid::new_v4()),
            Err(RaceError::InsufficientField)
        );
    }

    #[test]
    fn same_tick_finishers_share_rank() {
        let mut race = race_with(RaceFlags::default());
        for _ in 0..3 {
            race.add_racer(owned_racer()).unwrap();
        }
        race.record_finish(0, 5);
        race.record_finish(1, 5);
        race.record_finish(2, 7);

        let ranks: Vec<u32> = race.results().iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 1, 2]);
        assert!(race.tied_for_first());
    }

    #[test]
    fn finishing_twice_is_ignored() {
        let mut race = race_with(RaceFlags::default());
        race.add_racer(owned_racer()).unwrap();
        race.record_finish(0, 3);
        race.record_finish(0, 4);
        assert_eq!(race.results().len(), 1);
    }

    #[test]
    fn finish_outside_field_is_ignored() {
        let mut race = race_with(RaceFlags::default());
        race.add_racer(owned_racer()).unwrap();
        race.record_finish(3, 2);
        assert!(race.results().is_empty());

        race.record_finish(0, 2);
        assert_eq!(race.results()[0].racer_id, race.racers()[0].id);
        assert_eq!(race.results()[0].rank, 1);
    }

    #[test]
    fn attempt_runs_until_podium_filled() {
        let mut race = race_with(RaceFlags::default());
        race.add_racer(owned_racer()).unwrap();
        race.open_betting();
        race.start_running();
        race.begin_attempt();

        let mut ticks = 0;
        while !race.attempt_complete() {
            race.step();
            ticks += 1;
            assert!(ticks < 10_000);
        }
        assert!(race.results().len() >= 3);
        assert!(race.results().iter().any(|r| r.rank == 1));
        for result in race.results() {
            assert!(race.racers()[result.racer_index].has_finished());
        }
    }

    #[test]
    fn all_policy_waits_for_whole_field() {
        let options = RaceOptions {
            flags: RaceFlags::default(),
            finish_policy: FinishPolicy::All,
        };
        let mut race = Race::new("all".to_string(), "c".to_string(), host(), options, 3);
        race.add_racer(owned_racer()).unwrap();
        race.open_betting();
        race.start_running();
        race.begin_attempt();
        while !race.attempt_complete() {
            race.step();
        }
        assert_eq!(race.results().len(), MIN_FIELD_SIZE);
    }

    #[test]
    fn new_attempt_clears_results_and_resets_racers() {
        let mut race = race_with(RaceFlags::default());
        race.add_racer(owned_racer()).unwrap();
        race.open_betting();
        race.start_running();
        race.begin_attempt();
        while !race.attempt_complete() {
            race.step();
        }

        race.begin_attempt();
        assert_eq!(race.attempt(), 2);
        assert_eq!(race.tick(), 0);
        assert!(race.results().is_empty());
        assert!(race.racers().iter().all(|r| r.position() == 0.0));
    }

    #[test]
    fn rerun_only_for_tied_single_winner_races() {
        let mut race = race_with(RaceFlags {
            only_one_winner: true,
            ..RaceFlags::default()
        });
        race.add_racer(owned_racer()).unwrap();
        race.add_racer(owned_racer()).unwrap();
        race.begin_attempt();
        race.record_finish(0, 4);
        race.record_finish(1, 4);
        assert!(race.needs_rerun());

        for _ in 1..MAX_ATTEMPTS {
            race.begin_attempt();
        }
        race.record_finish(0, 4);
        race.record_finish(1, 4);
        assert_eq!(race.attempt(), MAX_ATTEMPTS);
        assert!(!race.needs_rerun());
    }

    #[test]
    fn outcomes_cover_owned_entrants_only() {
        let mut race = race_with(RaceFlags::default());
        race.add_racer(owned_racer()).unwrap();
        race.add_racer(owned_racer()).unwrap();
        race.open_betting();
        race.record_finish(1, 2);
        race.record_finish(2, 3);

        let outcomes = race.entrant_outcomes();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].rank, None);
        assert_eq!(outcomes[0].experience, ENTRY_EXPERIENCE);
        assert!(outcomes[1].won());
        assert_eq!(outcomes[1].experience, 50);
    }

    #[test]
    fn payouts_follow_results() {
        let mut race = race_with(RaceFlags::default());
        race.add_racer(owned_racer()).unwrap();
        race.add_racer(owned_racer()).unwrap();
        race.open_betting();
        let winner_backer = Uuid::new_v4();
        race.place_bet(0, 10, winner_backer).unwrap();
        race.place_bet(1, 10, Uuid::new_v4()).unwrap();
        race.start_running();
        race.begin_attempt();
        race.record_finish(0, 9);
        race.record_finish(1, 12);

        let payouts = race.payouts();
        assert_eq!(payouts.len(), 1);
        assert_eq!(payouts[0].bettor_id, winner_backer);
        let expected = (10.0 * race.odds()[0]).floor() as u64;
        assert_eq!(payouts[0].amount, expected);
    }
}
