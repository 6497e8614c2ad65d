//! Choosing which track points become draggable anchors, and at what zoom they appear.

use geo::{Distance, Euclidean, Line, Point};

use track_router_model::{Coordinate, PointId, SegmentId, TrackSegment};

use crate::map::MarkerId;

/// Anchors never need a zoom above this to be shown
pub const MAX_ZOOM: f64 = 20.0;

/// How far a point must stray from the simplified line to matter at zoom 0, in meters. About 2
/// pixels at the equator; every zoom level halves it.
const WORLD_TOLERANCE_METERS: f64 = 313_086.0;

const METERS_PER_DEGREE: f64 = 111_195.0;

/// A track point acting as a route handle.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Anchor {
    pub segment: SegmentId,
    pub point: PointId,
}

/// An anchor and the marker showing it. The coordinates and zoom are copied from the track point
/// at the last sync.
#[derive(Clone, PartialEq, Debug)]
pub struct AnchorWithMarker {
    pub anchor: Anchor,
    pub marker: MarkerId,
    pub coordinates: Coordinate,
    pub zoom: f64,
    // Is the anchor's zoom threshold satisfied right now?
    pub in_zoom: bool,
}

/// Marks a subset of the segment's points as anchors, with less important points only showing
/// up at higher zooms. Runs once per segment.
pub fn select_anchors(segment: &mut TrackSegment) {
    let importance = importance(segment);
    for (pt, importance) in segment.trkpt.iter_mut().zip(importance) {
        if let Some(importance) = importance {
            pt.make_anchor(zoom_for_importance(importance));
        }
    }
    segment.anchors_computed = true;
}

/// The first and last point are always anchors, visible at every zoom.
pub fn pin_endpoints(segment: &mut TrackSegment) {
    if let Some(first) = segment.trkpt.first_mut() {
        first.make_anchor(0.0);
    }
    if let Some(last) = segment.trkpt.last_mut() {
        last.make_anchor(0.0);
    }
}

fn zoom_for_importance(importance: f64) -> f64 {
    if importance <= 0.0 {
        return MAX_ZOOM;
    }
    (WORLD_TOLERANCE_METERS / importance)
        .log2()
        .ceil()
        .clamp(0.0, MAX_ZOOM)
}

/// Ramer-Douglas-Peucker, remembering the distance at which each point got kept. A point is never
/// more important than the point that split its parent range, so zooming in only adds anchors.
/// Endpoints and points too close to the line to matter at MAX_ZOOM get None.
fn importance(segment: &TrackSegment) -> Vec<Option<f64>> {
    let n = segment.trkpt.len();
    let mut result = vec![None; n];
    if n < 3 {
        return result;
    }

    let origin = segment.trkpt[0].coordinates;
    let pts: Vec<Point> = segment
        .trkpt
        .iter()
        .map(|pt| project(origin, pt.coordinates))
        .collect();
    let min_tolerance = WORLD_TOLERANCE_METERS / 2f64.powf(MAX_ZOOM);

    let mut stack = vec![(0, n - 1, f64::INFINITY)];
    while let Some((start, end, parent)) = stack.pop() {
        if end <= start + 1 {
            continue;
        }
        let line = Line::new(pts[start], pts[end]);
        let mut best = (start, 0.0);
        for (idx, pt) in pts.iter().enumerate().take(end).skip(start + 1) {
            let dist = Euclidean.distance(pt, &line);
            if dist > best.1 {
                best = (idx, dist);
            }
        }
        let (split, dist) = best;
        if dist <= min_tolerance {
            continue;
        }
        let importance = dist.min(parent);
        result[split] = Some(importance);
        stack.push((start, split, importance));
        stack.push((split, end, importance));
    }
    result
}

/// Local equirectangular projection in meters, good enough for comparing nearby distances
fn project(origin: Coordinate, pt: Coordinate) -> Point {
    let scale = origin.lat.to_radians().cos();
    Point::new(
        (pt.lon - origin.lon) * scale * METERS_PER_DEGREE,
        (pt.lat - origin.lat) * METERS_PER_DEGREE,
    )
}
