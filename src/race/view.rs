//! Render snapshots of a race and the renderer seam

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::racer::{render_lane, LANE_WIDTH};
use super::state::{Race, MAX_FIELD_SIZE};
use super::{Host, RaceFlags, RaceResult, Stage};

/// One entrant as shown to spectators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrantView {
    pub index: usize,
    pub racer_id: Uuid,
    pub name: String,
    pub owner_id: Option<Uuid>,
    /// Published once betting opens
    pub odds: Option<f64>,
    pub position: f64,
    pub rank: Option<u32>,
}

/// Everything a rendering layer needs to draw the race
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceView {
    pub race_id: String,
    pub channel_id: String,
    pub host: Host,
    pub stage: Stage,
    pub flags: RaceFlags,
    pub attempt: u32,
    pub tick: u64,
    pub max_entrants: usize,
    pub entrants: Vec<EntrantView>,
    pub results: Vec<RaceResult>,
    pub wager_count: usize,
    pub pool: u64,
    pub created_at: DateTime<Utc>,
}

impl RaceView {
    pub fn of(race: &Race) -> Self {
        let entrants = race
            .racers()
            .iter()
            .enumerate()
            .map(|(index, racer)| EntrantView {
                index,
                racer_id: racer.id,
                name: racer.name.clone(),
                owner_id: racer.owner_id,
                odds: race.odds().get(index).copied(),
                position: racer.position(),
                rank: race.rank_of(index),
            })
            .collect();

        Self {
            race_id: race.id().to_string(),
            channel_id: race.channel_id().to_string(),
            host: race.host().clone(),
            stage: race.stage(),
            flags: *race.flags(),
            attempt: race.attempt(),
            tick: race.tick(),
            max_entrants: MAX_FIELD_SIZE,
            entrants,
            results: race.results().to_vec(),
            wager_count: race.wagers().len(),
            pool: race.pool(),
            created_at: race.created_at(),
        }
    }

    /// Plain-text track, one lane per entrant with its rank once finished
    pub fn track_lines(&self) -> Vec<String> {
        let border = format!("  |{}|", "-".repeat(LANE_WIDTH + 2));
        let mut lines = Vec::with_capacity(self.entrants.len() + 2);
        lines.push(border.clone());
        for entrant in &self.entrants {
            let rank = entrant
                .rank
                .map(|r| r.to_string())
                .unwrap_or_else(|| "|".to_string());
            lines.push(format!(
                "{:>2}| {} {} {}",
                entrant.index,
                render_lane(entrant.position),
                rank,
                entrant.name
            ));
        }
        lines.push(border);
        lines
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Render delivery failed: {0}")]
    Delivery(String),
}

/// Receives a view on every stage transition and every tick.
///
/// Implementations hand the view off and return; the worker never waits for
/// the rendering layer to acknowledge.
pub trait RaceRenderer: Send + Sync {
    fn render(&self, view: &RaceView) -> Result<(), RenderError>;
}

/// Publishes views on the race's broadcast channel.
///
/// Having no subscribers is not an error, spectators come and go.
#[derive(Clone)]
pub struct BroadcastRenderer {
    views: broadcast::Sender<RaceView>,
}

impl BroadcastRenderer {
    pub fn new(views: broadcast::Sender<RaceView>) -> Self {
        Self { views }
    }
}

impl RaceRenderer for BroadcastRenderer {
    fn render(&self, view: &RaceView) -> Result<(), RenderError> {
        let _ = self.views.send(view.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::race::racer::{Racer, RacerStats};
    use crate::race::RaceOptions;

    fn race() -> Race {
        let host = Host {
            user_id: Uuid::new_v4(),
            display_name: "host".to_string(),
        };
        let mut race = Race::new(
            "view01".to_string(),
            "general".to_string(),
            host,
            RaceOptions::default(),
            5,
        );
        race.add_racer(Racer::new(
            Uuid::new_v4(),
            "slimy-comet",
            Some(Uuid::new_v4()),
            RacerStats::new(9.0, 9.0, 9.0),
        ))
        .unwrap();
        race
    }

    #[test]
    fn odds_hidden_until_betting() {
        let mut race = race();
        let view = RaceView::of(&race);
        assert_eq!(view.stage, Stage::Open);
        assert_eq!(view.entrants[0].odds, None);

        race.open_betting();
        let view = RaceView::of(&race);
        assert_eq!(view.entrants.len(), 4);
        assert!(view.entrants.iter().all(|e| e.odds.is_some()));
    }

    #[test]
    fn track_has_a_lane_per_entrant() {
        let race = race();
        let view = RaceView::of(&race);
        let lines = view.track_lines();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("slimy-comet"));
    }

    #[tokio::test]
    async fn broadcast_renderer_delivers_views() {
        let (tx, mut rx) = broadcast::channel(4);
        let renderer = BroadcastRenderer::new(tx);
        let view = RaceView::of(&race());

        renderer.render(&view).unwrap();
        assert_eq!(rx.recv().await.unwrap().race_id, "view01");
    }

    #[test]
    fn broadcast_renderer_tolerates_no_subscribers() {
        let (tx, rx) = broadcast::channel(4);
        drop(rx);
        let renderer = BroadcastRenderer::new(tx);
        assert!(renderer.render(&RaceView::of(&race())).is_ok());
    }
}
