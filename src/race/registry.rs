//! Registry of active races

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

use super::racer::Racer;
use super::view::RaceView;
use super::{Host, Race, RaceError, RaceId, RaceOptions};

/// Characters used in race ids, without look-alikes
const ID_ALPHABET: &[u8] = b"abcdefghjkmnpqrstuvwxyz23456789";
pub const RACE_ID_LEN: usize = 6;

/// Capacity of each race's view channel
const VIEW_CHANNEL_CAPACITY: usize = 64;

/// Handle to an active race, shared by the registry, the race worker and
/// command handlers.
///
/// All access goes through one per-race lock, so a join can never land
/// after the worker has closed entries.
#[derive(Clone)]
pub struct RaceHandle {
    pub id: RaceId,
    race: Arc<Mutex<Race>>,
    views: broadcast::Sender<RaceView>,
}

impl RaceHandle {
    fn new(race: Race) -> Self {
        let (views, _) = broadcast::channel(VIEW_CHANNEL_CAPACITY);
        Self {
            id: race.id().to_string(),
            race: Arc::new(Mutex::new(race)),
            views,
        }
    }

    pub fn add_racer(&self, racer: Racer) -> Result<usize, RaceError> {
        self.race.lock().add_racer(racer)
    }

    pub fn place_bet(
        &self,
        racer_index: usize,
        amount: u64,
        bettor_id: Uuid,
    ) -> Result<(), RaceError> {
        self.race.lock().place_bet(racer_index, amount, bettor_id)
    }

    pub fn get_racer(&self, index: usize) -> Option<Racer> {
        self.race.lock().get_racer(index).cloned()
    }

    #[cfg(test)]
    pub fn stage(&self) -> super::Stage {
        self.race.lock().stage()
    }

    pub fn entrant_count(&self) -> usize {
        self.race.lock().racers().len()
    }

    /// Current snapshot of the race
    pub fn view(&self) -> RaceView {
        RaceView::of(&self.race.lock())
    }

    /// Receive every view the worker renders from now on
    pub fn subscribe(&self) -> broadcast::Receiver<RaceView> {
        self.views.subscribe()
    }

    pub fn views(&self) -> broadcast::Sender<RaceView> {
        self.views.clone()
    }

    /// Run `f` with exclusive access to the race. Worker only.
    pub(crate) fn with_race<T>(&self, f: impl FnOnce(&mut Race) -> T) -> T {
        f(&mut self.race.lock())
    }
}

/// Registry of all active races
pub struct RaceRegistry {
    races: DashMap<RaceId, RaceHandle>,
}

impl RaceRegistry {
    pub fn new() -> Self {
        Self {
            races: DashMap::new(),
        }
    }

    /// Create a race in the open stage under a fresh id
    pub fn create_race(&self, host: Host, channel_id: String, options: RaceOptions) -> RaceHandle {
        let mut rng = rand::thread_rng();
        self.create_with_ids(host, channel_id, options, || generate_race_id(&mut rng))
    }

    /// Insert a race under the first generated id not already active
    fn create_with_ids(
        &self,
        host: Host,
        channel_id: String,
        options: RaceOptions,
        mut next_id: impl FnMut() -> RaceId,
    ) -> RaceHandle {
        loop {
            let id = next_id();
            match self.races.entry(id.clone()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    let seed = rand::random::<u64>();
                    let race = Race::new(id, channel_id, host, options, seed);
                    let handle = RaceHandle::new(race);
                    slot.insert(handle.clone());

                    info!(race_id = %handle.id, "Created new race");
                    return handle;
                }
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<RaceHandle> {
        self.races.get(id).map(|r| r.value().clone())
    }

    /// Remove a race; removing an unknown id is a no-op
    pub fn remove(&self, id: &str) -> Option<RaceHandle> {
        self.races.remove(id).map(|(_, h)| h)
    }

    pub fn active_races(&self) -> usize {
        self.races.len()
    }

    pub fn total_entrants(&self) -> usize {
        self.races.iter().map(|r| r.value().entrant_count()).sum()
    }

    /// Snapshots of every active race
    pub fn views(&self) -> Vec<RaceView> {
        self.races.iter().map(|r| r.value().view()).collect()
    }
}

impl Default for RaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Short lowercase race id
pub fn generate_race_id<R: Rng + ?Sized>(rng: &mut R) -> RaceId {
    (0..RACE_ID_LEN)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::race::racer::RacerStats;
    use crate::race::Stage;
    use std::thread;

    fn host() -> Host {
        Host {
            user_id: Uuid::new_v4(),
            display_name: "host".to_string(),
        }
    }

    #[test]
    fn created_race_is_open_and_registered() {
        let registry = RaceRegistry::new();
        let handle = registry.create_race(host(), "lobby".to_string(), RaceOptions::default());

        assert_eq!(handle.id.len(), RACE_ID_LEN);
        assert_eq!(handle.stage(), Stage::Open);
        assert!(registry.get(&handle.id).is_some());
        assert_eq!(registry.active_races(), 1);
    }

    #[test]
    fn colliding_ids_are_regenerated() {
        let registry = RaceRegistry::new();
        let mut ids = vec!["bbbbbb", "aaaaaa", "aaaaaa"].into_iter().map(String::from);
        let first =
            registry.create_with_ids(host(), "c".to_string(), RaceOptions::default(), || {
                ids.next_back().unwrap()
            });
        let second =
            registry.create_with_ids(host(), "c".to_string(), RaceOptions::default(), || {
                ids.next_back().unwrap()
            });

        assert_eq!(first.id, "aaaaaa");
        assert_eq!(second.id, "bbbbbb");
        assert_eq!(registry.active_races(), 2);
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = RaceRegistry::new();
        let handle = registry.create_race(host(), "c".to_string(), RaceOptions::default());

        assert!(registry.remove(&handle.id).is_some());
        assert!(registry.remove(&handle.id).is_none());
        assert!(registry.get(&handle.id).is_none());
    }

    #[test]
    fn generated_ids_use_alphabet() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let id = generate_race_id(&mut rng);
            assert!(id.bytes().all(|b| ID_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn concurrent_joins_are_never_lost() {
        let registry = Arc::new(RaceRegistry::new());
        let handle = registry.create_race(host(), "c".to_string(), RaceOptions::default());

        let joiners: Vec<_> = (0..8)
            .map(|_| {
                let handle = handle.clone();
                thread::spawn(move || {
                    let racer = Racer::new(
                        Uuid::new_v4(),
                        "r",
                        Some(Uuid::new_v4()),
                        RacerStats::new(5.0, 5.0, 5.0),
                    );
                    handle.add_racer(racer)
                })
            })
            .collect();

        let accepted = joiners
            .into_iter()
            .map(|j| j.join().unwrap())
            .filter(|r| r.is_ok())
            .count();
        assert_eq!(accepted, 8);
        assert_eq!(registry.total_entrants(), 8);
    }
}
