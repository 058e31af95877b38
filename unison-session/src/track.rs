use unison_core::events::{TrackMetadata, WaitPoint};
use unison_core::order::EventStamp;

const POSITION_EPS: f64 = 1e-6;

/// Outcome of applying a `setTrack` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackChange {
    /// Event was stale; nothing changed.
    Ignored,
    /// Same track, wait points refreshed.
    PointsReplaced,
    /// A different track (or no track) was selected.
    TrackChanged,
}

#[derive(Debug, Clone)]
struct TrackWaitPoint {
    point: WaitPoint,
    consumed: bool,
}

/// The currently selected track, its wait points, and which of those the
/// group has already passed through. Dynamic wait points merged at broadcast
/// time live in the same list and die with the track.
#[derive(Debug, Default)]
pub struct PlaybackTrack {
    metadata: Option<TrackMetadata>,
    stamp: Option<EventStamp>,
    points: Vec<TrackWaitPoint>,
}

impl PlaybackTrack {
    pub fn metadata(&self) -> Option<&TrackMetadata> {
        self.metadata.as_ref()
    }

    pub fn stamp(&self) -> Option<&EventStamp> {
        self.stamp.as_ref()
    }

    pub fn has_track(&self) -> bool {
        self.metadata.is_some()
    }

    /// Identity comparison against another track reference. Two absent
    /// tracks match.
    pub fn matches(&self, other: Option<&TrackMetadata>) -> bool {
        match (&self.metadata, other) {
            (None, None) => true,
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Current wait-point list, consumed or not, in insertion order. Used to
    /// rebroadcast the full set when a dynamic point is announced.
    pub fn wait_points(&self) -> Vec<WaitPoint> {
        self.points.iter().map(|p| p.point).collect()
    }

    /// Apply a `setTrack` event. Stale stamps are ignored so that peers
    /// seeing the same events agree on the selected track regardless of
    /// delivery order. A same-identity event only refreshes wait points;
    /// an identity change resets them and forgets consumption.
    pub fn set_current(
        &mut self,
        metadata: Option<TrackMetadata>,
        wait_points: Vec<WaitPoint>,
        stamp: EventStamp,
    ) -> TrackChange {
        if let Some(current) = &self.stamp {
            if !stamp.supersedes(current) {
                return TrackChange::Ignored;
            }
        }

        let same_identity = self.matches(metadata.as_ref()) && self.metadata.is_some();
        self.stamp = Some(stamp);

        if same_identity {
            self.replace_points(wait_points);
            TrackChange::PointsReplaced
        } else {
            self.metadata = metadata;
            self.points = wait_points
                .into_iter()
                .map(|point| TrackWaitPoint {
                    point,
                    consumed: false,
                })
                .collect();
            TrackChange::TrackChanged
        }
    }

    // A released wait point must stay released across a refresh, so
    // consumption carries over by position.
    fn replace_points(&mut self, wait_points: Vec<WaitPoint>) {
        let consumed: Vec<f64> = self
            .points
            .iter()
            .filter(|p| p.consumed)
            .map(|p| p.point.position)
            .collect();
        self.points = wait_points
            .into_iter()
            .map(|point| TrackWaitPoint {
                consumed: consumed
                    .iter()
                    .any(|&c| (c - point.position).abs() < POSITION_EPS),
                point,
            })
            .collect();
    }

    /// Merge a locally announced dynamic wait point into the current track.
    pub fn add_dynamic_wait_point(&mut self, point: WaitPoint) {
        self.points.push(TrackWaitPoint {
            point,
            consumed: false,
        });
    }

    /// Lowest-position unconsumed wait point strictly past `after`.
    pub fn find_next_wait_point(&self, after: f64) -> Option<(usize, WaitPoint)> {
        self.unconsumed()
            .filter(|(_, p)| p.position > after + POSITION_EPS)
            .min_by(|(_, a), (_, b)| a.position.total_cmp(&b.position))
    }

    /// Lowest-position unconsumed wait point at or before `at`, the point a
    /// participant at `at` must hold at. Covers dynamic points injected
    /// behind the current position.
    pub fn active_wait_point(&self, at: f64) -> Option<(usize, WaitPoint)> {
        self.unconsumed()
            .filter(|(_, p)| p.position <= at + POSITION_EPS)
            .min_by(|(_, a), (_, b)| a.position.total_cmp(&b.position))
    }

    /// Unconsumed wait point matching a broadcast position, if any.
    pub fn point_at(&self, position: f64) -> Option<(usize, WaitPoint)> {
        self.unconsumed()
            .find(|(_, p)| (p.position - position).abs() < POSITION_EPS)
    }

    pub fn point(&self, index: usize) -> Option<WaitPoint> {
        self.points.get(index).map(|p| p.point)
    }

    pub fn consume(&mut self, index: usize) {
        if let Some(p) = self.points.get_mut(index) {
            p.consumed = true;
        }
    }

    pub fn is_consumed(&self, index: usize) -> bool {
        self.points.get(index).map(|p| p.consumed).unwrap_or(false)
    }

    fn unconsumed(&self) -> impl Iterator<Item = (usize, WaitPoint)> + '_ {
        self.points
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.consumed)
            .map(|(i, p)| (i, p.point))
    }
}
