//! Race worker - drives one race from announcement to payout

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::registry::{RaceHandle, RaceRegistry};
use super::view::{RaceRenderer, RenderError};
use crate::store::AccountStore;
use crate::util::time::{RaceTimings, Timer};

/// The only mutator of a race's stage, racer positions and results.
///
/// One worker runs per race on its own tokio task. It holds the race lock
/// only for synchronous steps and never across an await, so joins and bets
/// from command handlers interleave freely with the timers.
pub struct RaceWorker {
    handle: RaceHandle,
    registry: Arc<RaceRegistry>,
    accounts: Arc<dyn AccountStore>,
    renderer: Arc<dyn RaceRenderer>,
    timings: RaceTimings,
}

impl RaceWorker {
    pub fn new(
        handle: RaceHandle,
        registry: Arc<RaceRegistry>,
        accounts: Arc<dyn AccountStore>,
        renderer: Arc<dyn RaceRenderer>,
        timings: RaceTimings,
    ) -> Self {
        Self {
            handle,
            registry,
            accounts,
            renderer,
            timings,
        }
    }

    /// Run the worker on its own task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Drive the race through every stage, pay out and deregister it
    pub async fn run(self) {
        let race_id = self.handle.id.clone();

        // Nobody can join a race they never saw
        if let Err(e) = self.render() {
            error!(race_id = %race_id, error = %e, "Race announcement failed, tearing down");
            self.handle.with_race(|race| race.finish());
            self.registry.remove(&race_id);
            return;
        }
        info!(race_id = %race_id, "Race announced");

        sleep(self.timings.open).await;

        let (filled, entrants, no_bets) = self.handle.with_race(|race| {
            let filled = race.open_betting();
            (filled, race.racers().len(), race.flags().no_bets)
        });
        info!(race_id = %race_id, entrants, filled, no_bets, "Entries closed, betting open");
        self.render_or_warn();

        sleep(self.timings.betting_window(no_bets)).await;

        let wagers = self.handle.with_race(|race| {
            race.start_running();
            race.wagers().len()
        });
        info!(race_id = %race_id, wagers, "Race running");
        self.render_or_warn();

        self.run_attempts().await;

        let (attempts, winners) = self.handle.with_race(|race| {
            race.finish();
            let winners = race.results().iter().filter(|r| r.rank == 1).count();
            (race.attempt(), winners)
        });
        info!(race_id = %race_id, attempts, winners, "Race finished");
        self.render_or_warn();

        self.pay_out().await;

        self.registry.remove(&race_id);
        info!(race_id = %race_id, "Race removed from registry");
    }

    /// Tick attempts until one stands, re-running ties for first when the
    /// host asked for a single winner
    async fn run_attempts(&self) {
        let race_id = &self.handle.id;
        let max_ticks = self.timings.max_ticks();

        loop {
            let attempt = self.handle.with_race(|race| {
                race.begin_attempt();
                race.attempt()
            });
            debug!(race_id = %race_id, attempt, "Attempt started");

            let mut ticker = interval(self.timings.tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick fires immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let (finished, complete, tick) = self.handle.with_race(|race| {
                    let finished = race.step();
                    (finished, race.attempt_complete(), race.tick())
                });
                if finished > 0 {
                    debug!(race_id = %race_id, attempt, tick, finished, "Racers crossed the line");
                }
                self.render_or_warn();

                if complete {
                    break;
                }
                if tick >= max_ticks {
                    warn!(race_id = %race_id, attempt, tick, "Attempt hit the running limit");
                    break;
                }
            }

            if !self.handle.with_race(|race| race.needs_rerun()) {
                return;
            }
            info!(race_id = %race_id, attempt, "Tie for first, running again");
        }
    }

    /// Racer and owner bookkeeping for owned entrants, then winning wagers.
    /// Store failures are logged and the remaining payouts still go out.
    async fn pay_out(&self) {
        let race_id = &self.handle.id;
        let (outcomes, payouts) = self
            .handle
            .with_race(|race| (race.entrant_outcomes(), race.payouts()));

        for outcome in &outcomes {
            if let Err(e) = self
                .accounts
                .record_race(outcome.racer_id, outcome.won(), outcome.experience)
                .await
            {
                warn!(race_id = %race_id, racer_id = %outcome.racer_id, error = %e, "Failed to record race");
            }
            if let Err(e) = self
                .accounts
                .record_account_race(outcome.owner_id, outcome.won())
                .await
            {
                warn!(race_id = %race_id, user_id = %outcome.owner_id, error = %e, "Failed to record account race");
            }
            if let Err(e) = self
                .accounts
                .add_experience(outcome.owner_id, outcome.experience)
                .await
            {
                warn!(race_id = %race_id, user_id = %outcome.owner_id, error = %e, "Failed to add experience");
            }
        }

        for payout in &payouts {
            match self.accounts.credit(payout.bettor_id, payout.amount).await {
                Ok(balance) => {
                    info!(race_id = %race_id, user_id = %payout.bettor_id, amount = payout.amount, balance, "Wager paid out");
                }
                Err(e) => {
                    warn!(race_id = %race_id, user_id = %payout.bettor_id, amount = payout.amount, error = %e, "Failed to pay out wager");
                }
            }
        }
    }

    fn render(&self) -> Result<(), RenderError> {
        let timer = Timer::new();
        let view = self.handle.view();
        let result = self.renderer.render(&view);
        debug!(
            race_id = %self.handle.id,
            stage = ?view.stage,
            tick = view.tick,
            render_us = timer.elapsed_micros(),
            "Rendered race"
        );
        result
    }

    fn render_or_warn(&self) {
        if let Err(e) = self.render() {
            warn!(race_id = %self.handle.id, error = %e, "Render failed");
        }
    }
}
