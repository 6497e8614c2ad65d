use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

use geo::{Distance, Haversine, Point};
use serde::{Deserialize, Serialize};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Identifies one TrackPoint for the lifetime of the process. Never serialized; points read
/// from disk get fresh IDs.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct PointId(pub u64);

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SegmentId(pub u64);

impl PointId {
    pub fn fresh() -> PointId {
        PointId(next_id())
    }
}

impl SegmentId {
    pub fn fresh() -> SegmentId {
        SegmentId(next_id())
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Debug, Default)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Coordinate {
        Coordinate { lat, lon }
    }

    /// Linear interpolation in degrees; `t` is 0 at self and 1 at `other`.
    pub fn interpolate(self, other: Coordinate, t: f64) -> Coordinate {
        Coordinate {
            lat: self.lat + t * (other.lat - self.lat),
            lon: self.lon + t * (other.lon - self.lon),
        }
    }
}

impl From<Coordinate> for Point {
    fn from(c: Coordinate) -> Point {
        Point::new(c.lon, c.lat)
    }
}

impl From<Coordinate> for geo::Coord {
    fn from(c: Coordinate) -> geo::Coord {
        geo::Coord { x: c.lon, y: c.lat }
    }
}

/// Great-circle distance in meters.
pub fn distance(a: Coordinate, b: Coordinate) -> f64 {
    Haversine.distance(Point::from(a), Point::from(b))
}

/// Editor-only metadata about how a point is presented. Not part of the GPX document.
#[derive(Clone, Copy, PartialEq, Debug, Default)]
pub struct PointLayout {
    /// Is this point a draggable handle?
    pub anchor: bool,
    /// The minimum map zoom where the anchor is shown
    pub zoom: f64,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct TrackPoint {
    #[serde(skip, default = "PointId::fresh")]
    pub id: PointId,
    pub coordinates: Coordinate,
    pub ele: Option<f64>,
    #[serde(default)]
    pub extensions: BTreeMap<String, String>,
    #[serde(skip)]
    pub layout: PointLayout,
}

impl TrackPoint {
    pub fn new(coordinates: Coordinate) -> TrackPoint {
        TrackPoint {
            id: PointId::fresh(),
            coordinates,
            ele: None,
            extensions: BTreeMap::new(),
            layout: PointLayout::default(),
        }
    }

    pub fn with_ele(mut self, ele: f64) -> TrackPoint {
        self.ele = Some(ele);
        self
    }

    pub fn is_anchor(&self) -> bool {
        self.layout.anchor
    }

    /// Flags this point as an anchor visible from the given zoom.
    pub fn make_anchor(&mut self, zoom: f64) {
        self.layout = PointLayout { anchor: true, zoom };
    }
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct TrackSegment {
    #[serde(skip, default = "SegmentId::fresh")]
    pub id: SegmentId,
    pub trkpt: Vec<TrackPoint>,
    // Has anchor selection run for this segment yet?
    #[serde(skip)]
    pub anchors_computed: bool,
}

impl Default for TrackSegment {
    fn default() -> Self {
        TrackSegment::new(Vec::new())
    }
}

impl TrackSegment {
    pub fn new(trkpt: Vec<TrackPoint>) -> TrackSegment {
        TrackSegment {
            id: SegmentId::fresh(),
            trkpt,
            anchors_computed: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.trkpt.is_empty()
    }

    pub fn len(&self) -> usize {
        self.trkpt.len()
    }

    /// Replaces the points in `range` with `points`. An empty range inserts. Out-of-bounds ranges
    /// are clamped to the segment.
    pub fn replace(&mut self, range: Range<usize>, points: Vec<TrackPoint>) {
        let end = range.end.min(self.trkpt.len());
        let start = range.start.min(end);
        self.trkpt.splice(start..end, points);
    }

    /// Where every point currently sits. Build this fresh for each edit; indices shift whenever
    /// the segment is spliced.
    pub fn index_map(&self) -> HashMap<PointId, usize> {
        self.trkpt
            .iter()
            .enumerate()
            .map(|(idx, pt)| (pt.id, idx))
            .collect()
    }

    pub fn position(&self, id: PointId) -> Option<usize> {
        self.trkpt.iter().position(|pt| pt.id == id)
    }

    pub fn length_meters(&self) -> f64 {
        self.trkpt
            .windows(2)
            .map(|pair| distance(pair[0].coordinates, pair[1].coordinates))
            .sum()
    }
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug, Default)]
pub struct Track {
    pub name: Option<String>,
    pub trkseg: Vec<TrackSegment>,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug, Default)]
pub struct TrackFile {
    pub name: String,
    pub trk: Vec<Track>,
}

impl TrackFile {
    pub fn new(name: impl Into<String>) -> TrackFile {
        TrackFile {
            name: name.into(),
            trk: Vec::new(),
        }
    }

    /// A file with one track holding the given segments
    pub fn from_segments(name: impl Into<String>, segments: Vec<TrackSegment>) -> TrackFile {
        TrackFile {
            name: name.into(),
            trk: vec![Track {
                name: None,
                trkseg: segments,
            }],
        }
    }

    pub fn segments(&self) -> impl Iterator<Item = &TrackSegment> {
        self.trk.iter().flat_map(|track| track.trkseg.iter())
    }

    pub fn segments_mut(&mut self) -> impl Iterator<Item = &mut TrackSegment> {
        self.trk.iter_mut().flat_map(|track| track.trkseg.iter_mut())
    }

    pub fn segment(&self, id: SegmentId) -> Option<&TrackSegment> {
        self.segments().find(|seg| seg.id == id)
    }

    pub fn segment_mut(&mut self, id: SegmentId) -> Option<&mut TrackSegment> {
        self.segments_mut().find(|seg| seg.id == id)
    }

    pub fn first_segment_id(&self) -> Option<SegmentId> {
        self.segments().next().map(|seg| seg.id)
    }

    /// Returns the first segment, creating a track and segment if the file has none.
    pub fn first_segment_or_insert(&mut self) -> &mut TrackSegment {
        if self.trk.is_empty() {
            self.trk.push(Track::default());
        }
        let track = &mut self.trk[0];
        if track.trkseg.is_empty() {
            track.trkseg.push(TrackSegment::default());
        }
        &mut track.trkseg[0]
    }
}
