//! Stop sequence resolution.
//!
//! Turns the timetable source's route description into the ordered list of
//! stations the engine counts down. Bad data degrades the sequence instead
//! of failing the alert:
//!
//! - consecutive duplicate names are collapsed
//! - missing intermediate times are interpolated from their neighbours
//! - a sequence that goes backwards in time collapses to departure + arrival
//! - an unnamed endpoint, or fewer than two known stations, is
//!   [`RouteError::InsufficientRouteData`]

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RouteError;
use crate::geo::Coordinate;

/// Endpoint station of a route as delivered by the timetable source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteStation {
    pub name: String,
    #[serde(default)]
    pub coordinate: Option<Coordinate>,
}

/// Intermediate stop as delivered by the timetable source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteStop {
    pub name: String,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub passthrough: bool,
    #[serde(default)]
    pub coordinate: Option<Coordinate>,
}

/// Route/timetable source record for one journey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub departure: RouteStation,
    pub arrival: RouteStation,
    pub departure_time: DateTime<Utc>,
    pub arrival_time: DateTime<Utc>,
    #[serde(default)]
    pub intermediate_stops: Vec<RouteStop>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopEntry {
    pub station_name: String,
    pub scheduled_time: DateTime<Utc>,
    #[serde(default)]
    pub is_passthrough: bool,
    #[serde(default)]
    pub coordinate: Option<Coordinate>,
}

/// Data-quality problems found while resolving; none of them fail the alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RouteIssue {
    DuplicateStation { name: String },
    InterpolatedTime { name: String },
    UnnamedStop { index: usize },
    NonMonotonicTimes,
    InsufficientRouteData { known: usize },
}

/// Ordered stations of one journey, departure first, target last.
///
/// Deserializing goes through [`StopSequence::new`], so a stored sequence
/// with fewer than two entries is a load error rather than a bad index later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredSequence")]
pub struct StopSequence {
    entries: Vec<StopEntry>,
}

#[derive(Deserialize)]
struct StoredSequence {
    entries: Vec<StopEntry>,
}

impl TryFrom<StoredSequence> for StopSequence {
    type Error = RouteError;

    fn try_from(stored: StoredSequence) -> Result<Self, Self::Error> {
        Self::new(stored.entries)
    }
}

impl StopSequence {
    /// Build from entries, enforcing the sequence invariants.
    pub fn new(entries: Vec<StopEntry>) -> Result<Self, RouteError> {
        if entries.len() < 2 {
            return Err(RouteError::InsufficientRouteData {
                known: entries.len(),
            });
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[StopEntry] {
        &self.entries
    }

    pub fn departure(&self) -> &StopEntry {
        &self.entries[0]
    }

    pub fn target(&self) -> &StopEntry {
        &self.entries[self.entries.len() - 1]
    }

    /// Number of stations the train actually stops at, both ends included.
    pub fn stop_count(&self) -> usize {
        let last = self.entries.len() - 1;
        self.entries
            .iter()
            .enumerate()
            .filter(|(i, e)| *i == 0 || *i == last || !e.is_passthrough)
            .count()
    }

    /// Stopping stations after `position`, up to and including the target.
    pub fn stations_remaining(&self, position: usize) -> u32 {
        let last = self.entries.len() - 1;
        self.entries
            .iter()
            .enumerate()
            .skip(position.saturating_add(1))
            .filter(|(i, e)| *i == last || !e.is_passthrough)
            .count() as u32
    }

    /// Index of the last entry the train has reached by `now`, with every
    /// scheduled time shifted by `delay`.
    pub fn position_at(&self, now: DateTime<Utc>, delay: Duration) -> usize {
        self.entries
            .iter()
            .rposition(|e| e.scheduled_time + delay <= now)
            .unwrap_or(0)
    }

    /// Index of the entry nearest to `at`, if one lies within `radius_m`.
    pub fn position_near(&self, at: &Coordinate, radius_m: f64) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.coordinate.map(|c| (i, c.distance_to(at))))
            .filter(|(_, d)| *d <= radius_m)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
    }

    /// Same journey moved by `by` (next occurrence of a repeating alert).
    pub fn shifted(&self, by: Duration) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .map(|e| StopEntry {
                    scheduled_time: e.scheduled_time + by,
                    ..e.clone()
                })
                .collect(),
        }
    }

    fn is_monotonic(entries: &[StopEntry]) -> bool {
        entries
            .windows(2)
            .all(|w| w[0].scheduled_time <= w[1].scheduled_time)
    }
}

/// Resolver output: the sequence plus whatever had to be repaired.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub sequence: StopSequence,
    pub issues: Vec<RouteIssue>,
}

/// Resolves a [`Route`] into a [`StopSequence`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StopSequenceResolver;

impl StopSequenceResolver {
    pub fn resolve(&self, route: &Route) -> Result<Resolution, RouteError> {
        let mut issues = Vec::new();

        let departure = RawStop::endpoint(&route.departure, route.departure_time);
        let arrival = RawStop::endpoint(&route.arrival, route.arrival_time);
        let endpoints_named = departure.is_some() && arrival.is_some();

        let mut candidates = Vec::with_capacity(route.intermediate_stops.len() + 2);
        candidates.extend(departure);
        for (index, stop) in route.intermediate_stops.iter().enumerate() {
            let name = stop.name.trim();
            if name.is_empty() {
                issues.push(RouteIssue::UnnamedStop { index });
                continue;
            }
            candidates.push(RawStop {
                name: name.to_string(),
                time: stop.time,
                passthrough: stop.passthrough,
                coordinate: stop.coordinate,
            });
        }
        candidates.extend(arrival);

        let mut known: Vec<RawStop> = Vec::with_capacity(candidates.len());
        for stop in candidates {
            let prev = match known.last_mut() {
                Some(prev) if prev.name == stop.name => prev,
                _ => {
                    known.push(stop);
                    continue;
                }
            };
            let issue = RouteIssue::DuplicateStation {
                name: stop.name.clone(),
            };
            // Keep the earlier call, fill in whatever it lacked.
            prev.time = prev.time.or(stop.time);
            prev.coordinate = prev.coordinate.or(stop.coordinate);
            prev.passthrough = prev.passthrough && stop.passthrough;
            if !issues.contains(&issue) {
                issues.push(issue);
            }
        }

        // Counts run from the departure station, so both ends must be named.
        if !endpoints_named || known.len() < 2 {
            tracing::warn!(known = known.len(), endpoints_named, "route has too few stations");
            return Err(RouteError::InsufficientRouteData { known: known.len() });
        }

        let entries = interpolate(known, &mut issues);

        if !StopSequence::is_monotonic(&entries) {
            tracing::warn!(
                departure = %route.departure.name,
                arrival = %route.arrival.name,
                "non-monotonic timetable, falling back to departure/arrival only"
            );
            issues.push(RouteIssue::NonMonotonicTimes);
            let first = entries[0].clone();
            let last = entries[entries.len() - 1].clone();
            let sequence = StopSequence::new(vec![first, last])?;
            return Ok(Resolution { sequence, issues });
        }

        let sequence = StopSequence::new(entries)?;
        Ok(Resolution { sequence, issues })
    }
}

struct RawStop {
    name: String,
    time: Option<DateTime<Utc>>,
    passthrough: bool,
    coordinate: Option<Coordinate>,
}

impl RawStop {
    /// Unnamed endpoints are unknown stations.
    fn endpoint(station: &RouteStation, time: DateTime<Utc>) -> Option<Self> {
        let name = station.name.trim();
        (!name.is_empty()).then(|| Self {
            name: name.to_string(),
            time: Some(time),
            passthrough: false,
            coordinate: station.coordinate,
        })
    }
}

/// Fill missing times linearly between the nearest known neighbours.
fn interpolate(known: Vec<RawStop>, issues: &mut Vec<RouteIssue>) -> Vec<StopEntry> {
    let times: Vec<Option<DateTime<Utc>>> = known.iter().map(|k| k.time).collect();

    known
        .into_iter()
        .enumerate()
        .map(|(i, stop)| {
            let scheduled_time = match stop.time {
                Some(t) => t,
                None => {
                    issues.push(RouteIssue::InterpolatedTime {
                        name: stop.name.clone(),
                    });
                    interpolated_time(&times, i)
                }
            };
            StopEntry {
                station_name: stop.name,
                scheduled_time,
                is_passthrough: stop.passthrough,
                coordinate: stop.coordinate,
            }
        })
        .collect()
}

fn interpolated_time(times: &[Option<DateTime<Utc>>], i: usize) -> DateTime<Utc> {
    let prev = times[..i]
        .iter()
        .enumerate()
        .rev()
        .find_map(|(j, t)| t.map(|t| (j, t)));
    let next = times[i + 1..]
        .iter()
        .enumerate()
        .find_map(|(j, t)| t.map(|t| (i + 1 + j, t)));

    match (prev, next) {
        (Some((pi, p)), Some((ni, n))) => {
            let span = (ni - pi) as i32;
            p + (n - p) * (i - pi) as i32 / span
        }
        (Some((_, p)), None) => p,
        (None, Some((_, n))) => n,
        // Endpoints always carry a time, so at least one neighbour exists.
        (None, None) => DateTime::<Utc>::MIN_UTC,
    }
}
