use std::ops::Range;
use std::rc::Rc;
use std::time::{Duration, Instant};

use geo::{Distance, Euclidean, Intersects, Point};
use log::{debug, info, warn};
use rstar::primitives::GeomWithData;
use rstar::RTree;
use tokio::sync::watch;

use track_router_model::{
    distance, Coordinate, PointId, SegmentId, TrackFile, TrackPoint, TrackSegment,
};

use crate::anchors::{pin_endpoints, select_anchors, Anchor, AnchorWithMarker};
use crate::error::RoutingError;
use crate::map::{
    EventKind, ListenerId, MapEvent, MapSurface, MarkerEvent, MarkerId, MarkerStyle,
    PointerEvent, ScreenPoint,
};
use crate::routing::RouteProvider;
use crate::store::TrackStore;

/// The pointer must be further than this from every shown anchor to offer a temporary one
const SNAP_RADIUS_PX: f64 = 10.0;
/// The temporary anchor disappears once the pointer leaves this radius
const TEMPORARY_ANCHOR_RADIUS_PX: f64 = 20.0;
/// Marker clicks arriving this soon after a drag are part of the drag
const CLICK_AFTER_DRAG: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug)]
struct Listeners {
    zoom: ListenerId,
    moved: ListenerId,
    click: ListenerId,
    // Pointer moving over the track layer
    hover: ListenerId,
}

struct TemporaryAnchor {
    marker: MarkerId,
    // Where the anchor was offered on the track. None when not shown.
    coordinates: Option<Coordinate>,
    // Pointer moves anywhere on the map, while the anchor is shown
    follow: Option<ListenerId>,
}

/// One waypoint for `route_between_anchors`
#[derive(Clone, Copy, Debug)]
struct RouteStop {
    /// None for a new point after the end of the segment
    point: Option<PointId>,
    target: Coordinate,
}

/// What a successful route overwrites
struct Replacement {
    range: Range<usize>,
    // Endpoint anchors that stay in place, as indices into the segment
    keep_first: Option<usize>,
    keep_last: Option<usize>,
}

/// Lets the user edit one track file by dragging anchors. Every anchor gets a marker; the route
/// between anchors comes from a RouteProvider and gets written back into the TrackStore.
pub struct RoutingControls<M, R> {
    map: M,
    router: R,
    store: Rc<TrackStore>,
    file: watch::Receiver<TrackFile>,
    layer_id: String,

    anchors: Vec<AnchorWithMarker>,
    // Indices into anchors
    shown_anchors: Vec<usize>,
    // Screen positions of the shown anchors
    shown_index: RTree<GeomWithData<[f64; 2], usize>>,
    temporary: TemporaryAnchor,

    listeners: Option<Listeners>,
    // The marker whose delete popup is open
    popup: Option<MarkerId>,
    dragging: Option<MarkerId>,
    // The marker last dragged, and when
    last_drag: Option<(MarkerId, Instant)>,
}

impl<M: MapSurface, R: RouteProvider> RoutingControls<M, R> {
    pub fn new(
        mut map: M,
        router: R,
        store: Rc<TrackStore>,
        layer_id: impl Into<String>,
    ) -> RoutingControls<M, R> {
        let marker = map.create_marker(Coordinate::default(), MarkerStyle::Temporary);
        let file = store.subscribe();
        let mut controls = RoutingControls {
            map,
            router,
            store,
            file,
            layer_id: layer_id.into(),
            anchors: Vec::new(),
            shown_anchors: Vec::new(),
            shown_index: RTree::new(),
            temporary: TemporaryAnchor {
                marker,
                coordinates: None,
                follow: None,
            },
            listeners: None,
            popup: None,
            dragging: None,
            last_drag: None,
        };
        controls.add();
        controls
    }

    /// Starts listening to the map and the track file. `new` already does this.
    pub fn add(&mut self) {
        if self.listeners.is_some() {
            return;
        }
        self.listeners = Some(Listeners {
            zoom: self.map.on(EventKind::Zoom, None),
            moved: self.map.on(EventKind::Move, None),
            click: self.map.on(EventKind::Click, None),
            hover: self.map.on(EventKind::PointerMove, Some(&self.layer_id)),
        });
        self.file = self.store.subscribe();
        self.update_controls();
    }

    /// Takes every marker off the map and stops listening.
    pub fn remove(&mut self) {
        for anchor in &self.anchors {
            self.map.remove_marker(anchor.marker);
        }
        self.shown_anchors.clear();
        self.shown_index = RTree::new();
        self.hide_temporary_anchor();
        if self.popup.take().is_some() {
            self.map.close_popup();
        }
        if let Some(listeners) = self.listeners.take() {
            self.map.off(listeners.zoom);
            self.map.off(listeners.moved);
            self.map.off(listeners.click);
            self.map.off(listeners.hover);
        }
    }

    pub fn map(&self) -> &M {
        &self.map
    }

    pub fn map_mut(&mut self) -> &mut M {
        &mut self.map
    }

    pub fn router_mut(&mut self) -> &mut R {
        &mut self.router
    }

    pub fn anchors(&self) -> &[AnchorWithMarker] {
        &self.anchors
    }

    pub fn shown_anchors(&self) -> impl Iterator<Item = &AnchorWithMarker> {
        self.shown_anchors.iter().map(|idx| &self.anchors[*idx])
    }

    pub fn temporary_marker(&self) -> MarkerId {
        self.temporary.marker
    }

    /// Where the temporary anchor is offered, if it's shown
    pub fn temporary_anchor(&self) -> Option<Coordinate> {
        self.temporary.coordinates
    }

    /// Dispatches an event from a listener this registered.
    pub async fn handle_event(&mut self, listener: ListenerId, event: MapEvent) {
        let Some(listeners) = self.listeners else {
            return;
        };
        self.sync_if_changed();

        match event {
            MapEvent::Zoom | MapEvent::Move => {
                if listener == listeners.zoom || listener == listeners.moved {
                    self.toggle_anchors_for_zoom_level_and_bounds();
                }
            }
            MapEvent::Click(e) => {
                if listener == listeners.click {
                    self.append_anchor(e.coordinates).await;
                }
            }
            MapEvent::PointerMove(e) => {
                if listener == listeners.hover {
                    self.show_temporary_anchor(e);
                } else if Some(listener) == self.temporary.follow {
                    self.update_temporary_anchor(e);
                }
            }
        }
    }

    pub async fn handle_marker_event(&mut self, marker: MarkerId, event: MarkerEvent) {
        if self.listeners.is_none() {
            return;
        }
        self.sync_if_changed();

        match event {
            MarkerEvent::DragStart => {
                self.dragging = Some(marker);
                self.last_drag = Some((marker, Instant::now()));
            }
            MarkerEvent::DragEnd => {
                self.dragging = None;
                self.last_drag = Some((marker, Instant::now()));
                self.move_anchor(marker).await;
            }
            MarkerEvent::Click { shift } => {
                if self.last_drag.is_some_and(|(dragged, time)| {
                    dragged == marker && time.elapsed() < CLICK_AFTER_DRAG
                }) {
                    return;
                }
                let Some(anchor) = self.anchor_for_marker(marker) else {
                    return;
                };
                if shift {
                    self.delete_anchor(anchor).await;
                    return;
                }
                self.map.open_popup(marker);
                self.popup = Some(marker);
            }
        }
    }

    /// The user picked "delete" in the popup.
    pub async fn on_popup_delete(&mut self) {
        self.sync_if_changed();
        if let Some(anchor) = self.popup.and_then(|marker| self.anchor_for_marker(marker)) {
            self.delete_anchor(anchor).await;
        }
    }

    pub fn on_popup_close(&mut self) {
        self.popup = None;
    }

    /// Waits for the track file to change, then updates the anchors. Returns false if the store
    /// is gone or the controls were removed.
    pub async fn next_change(&mut self) -> bool {
        if self.listeners.is_none() || self.file.changed().await.is_err() {
            return false;
        }
        self.update_controls();
        true
    }

    pub fn sync_if_changed(&mut self) {
        if self.listeners.is_some() && self.file.has_changed().unwrap_or(false) {
            self.update_controls();
        }
    }

    /// Matches anchors and markers to the current track file. Markers are reused by position in
    /// the anchor order, not by point, because edits replace points all the time. Does nothing
    /// after `remove`.
    pub fn update_controls(&mut self) {
        if self.listeners.is_none() {
            return;
        }
        self.file.mark_unchanged();

        self.store.update_silently(|file| {
            for segment in file.segments_mut() {
                if segment.is_empty() {
                    continue;
                }
                if !segment.anchors_computed {
                    select_anchors(segment);
                }
                pin_endpoints(segment);
            }
        });

        let found: Vec<(Anchor, Coordinate, f64)> = {
            let file = self.store.current();
            file.segments()
                .flat_map(|segment| {
                    segment
                        .trkpt
                        .iter()
                        .filter(|pt| pt.is_anchor())
                        .map(move |pt| {
                            let anchor = Anchor {
                                segment: segment.id,
                                point: pt.id,
                            };
                            (anchor, pt.coordinates, pt.layout.zoom)
                        })
                })
                .collect()
        };

        let count = found.len();
        for (rank, (anchor, coordinates, zoom)) in found.into_iter().enumerate() {
            if let Some(existing) = self.anchors.get_mut(rank) {
                existing.anchor = anchor;
                existing.coordinates = coordinates;
                existing.zoom = zoom;
                self.map.set_marker_position(existing.marker, coordinates);
            } else {
                let marker = self.map.create_marker(coordinates, MarkerStyle::Anchor);
                self.anchors.push(AnchorWithMarker {
                    anchor,
                    marker,
                    coordinates,
                    zoom,
                    in_zoom: false,
                });
            }
        }
        while self.anchors.len() > count {
            if let Some(extra) = self.anchors.pop() {
                self.map.remove_marker(extra.marker);
            }
        }
        debug!("Synced {count} anchors");

        self.toggle_anchors_for_zoom_level_and_bounds();
    }

    /// Shows markers only if they're in the current zoom level and bounds.
    pub fn toggle_anchors_for_zoom_level_and_bounds(&mut self) {
        self.shown_anchors.clear();
        let zoom = self.map.zoom();
        let bounds = self.map.bounds();

        let mut positions = Vec::new();
        for (idx, anchor) in self.anchors.iter_mut().enumerate() {
            anchor.in_zoom = anchor.zoom <= zoom;
            let position = self.map.marker_position(anchor.marker);
            if anchor.in_zoom && bounds.intersects(&geo::Coord::from(position)) {
                self.map.add_marker(anchor.marker);
                self.shown_anchors.push(idx);
                let pt = self.map.project(position);
                positions.push(GeomWithData::new([pt.x, pt.y], idx));
            } else {
                self.map.remove_marker(anchor.marker);
            }
        }
        self.shown_index = RTree::bulk_load(positions);
    }

    fn show_temporary_anchor(&mut self, e: PointerEvent) {
        if self.close_to_other_anchor(e.point) {
            return;
        }
        self.temporary.coordinates = Some(e.coordinates);
        self.map
            .set_marker_position(self.temporary.marker, e.coordinates);
        self.map.add_marker(self.temporary.marker);
        if self.temporary.follow.is_none() {
            self.temporary.follow = Some(self.map.on(EventKind::PointerMove, None));
        }
    }

    fn update_temporary_anchor(&mut self, e: PointerEvent) {
        // Keep it while it's being dragged, but stop following the pointer
        if self.dragging == Some(self.temporary.marker) {
            self.unhook_temporary_anchor();
            return;
        }
        let Some(origin) = self.temporary.coordinates else {
            self.unhook_temporary_anchor();
            return;
        };

        let from_origin = screen_distance(e.point, self.map.project(origin));
        if from_origin > TEMPORARY_ANCHOR_RADIUS_PX || self.close_to_other_anchor(e.point) {
            self.hide_temporary_anchor();
            return;
        }
        self.map
            .set_marker_position(self.temporary.marker, e.coordinates);
    }

    fn hide_temporary_anchor(&mut self) {
        self.map.remove_marker(self.temporary.marker);
        self.temporary.coordinates = None;
        self.unhook_temporary_anchor();
    }

    fn unhook_temporary_anchor(&mut self) {
        if let Some(listener) = self.temporary.follow.take() {
            self.map.off(listener);
        }
    }

    fn close_to_other_anchor(&self, point: ScreenPoint) -> bool {
        self.shown_index
            .locate_within_distance([point.x, point.y], SNAP_RADIUS_PX * SNAP_RADIUS_PX)
            .next()
            .is_some()
    }

    fn anchor_for_marker(&self, marker: MarkerId) -> Option<Anchor> {
        self.anchors
            .iter()
            .find(|a| a.marker == marker)
            .map(|a| a.anchor)
    }

    /// Reroutes from and to the neighbouring anchors after an anchor is dropped somewhere new.
    async fn move_anchor(&mut self, marker: MarkerId) {
        let target = self.map.marker_position(marker);

        let (anchor, committed) = if marker == self.temporary.marker {
            // Turn it into a real anchor at the closest point of the track
            let origin = self.temporary.coordinates;
            self.hide_temporary_anchor();
            let Some((anchor, committed)) = origin.and_then(|pt| self.closest_point(pt)) else {
                return;
            };
            (anchor, committed)
        } else {
            let Some(existing) = self.anchors.iter().find(|a| a.marker == marker) else {
                return;
            };
            (existing.anchor, existing.coordinates)
        };

        let (previous, next) = self.neighbouring_anchors(anchor);
        let mut stops = Vec::new();
        if let Some(previous) = previous {
            stops.push(RouteStop {
                point: Some(previous.anchor.point),
                target: previous.coordinates,
            });
        }
        stops.push(RouteStop {
            point: Some(anchor.point),
            target,
        });
        if let Some(next) = next {
            stops.push(RouteStop {
                point: Some(next.anchor.point),
                target: next.coordinates,
            });
        }

        if !self.route_between_anchors(anchor.segment, &stops).await {
            self.map.set_marker_position(marker, committed);
            if marker == self.temporary.marker {
                self.map.remove_marker(marker);
            }
            self.sync_if_changed();
        }
    }

    /// The track point closest to the coordinates, across all segments
    fn closest_point(&self, coordinates: Coordinate) -> Option<(Anchor, Coordinate)> {
        let file = self.store.current();
        let mut best: Option<(f64, Anchor, Coordinate)> = None;
        for segment in file.segments() {
            for pt in &segment.trkpt {
                let dist = distance(pt.coordinates, coordinates);
                if best.as_ref().map_or(true, |(min, _, _)| dist < *min) {
                    let anchor = Anchor {
                        segment: segment.id,
                        point: pt.id,
                    };
                    best = Some((dist, anchor, pt.coordinates));
                }
            }
        }
        best.map(|(_, anchor, coordinates)| (anchor, coordinates))
    }

    /// Removes the anchor, rerouting between its neighbours if it has both.
    async fn delete_anchor(&mut self, anchor: Anchor) {
        self.popup = None;
        self.map.close_popup();

        let (previous, next) = self.neighbouring_anchors(anchor);
        match (previous, next) {
            (None, None) => {
                // The only anchor
                self.store.apply_to_segment(
                    anchor.segment,
                    |segment| segment.replace(0..segment.len(), Vec::new()),
                    true,
                );
            }
            (None, Some(next)) => {
                // The first anchor; remove everything before the next one
                self.store.apply_to_segment(
                    anchor.segment,
                    |segment| {
                        if let Some(idx) = segment.position(next.anchor.point) {
                            segment.replace(0..idx, Vec::new());
                        }
                    },
                    true,
                );
            }
            (Some(previous), None) => {
                // The last anchor; remove everything after the previous one
                self.store.apply_to_segment(
                    anchor.segment,
                    |segment| {
                        if let Some(idx) = segment.position(previous.anchor.point) {
                            segment.replace(idx + 1..segment.len(), Vec::new());
                        }
                    },
                    true,
                );
            }
            (Some(previous), Some(next)) => {
                let stops = [
                    RouteStop {
                        point: Some(previous.anchor.point),
                        target: previous.coordinates,
                    },
                    RouteStop {
                        point: Some(next.anchor.point),
                        target: next.coordinates,
                    },
                ];
                self.route_between_anchors(anchor.segment, &stops).await;
            }
        }
        self.sync_if_changed();
    }

    /// Adds a new anchor after the last one, routing to it.
    async fn append_anchor(&mut self, coordinates: Coordinate) {
        let Some(last) = self.anchors.last() else {
            let mut pt = TrackPoint::new(coordinates);
            pt.make_anchor(0.0);
            self.store.apply_to_file(
                |file| file.first_segment_or_insert().replace(0..0, vec![pt]),
                true,
            );
            self.sync_if_changed();
            return;
        };

        let segment = last.anchor.segment;
        let stops = [
            RouteStop {
                point: Some(last.anchor.point),
                target: last.coordinates,
            },
            RouteStop {
                point: None,
                target: coordinates,
            },
        ];
        self.route_between_anchors(segment, &stops).await;
    }

    /// The closest anchors before and after this one in its segment, among the anchors visible at
    /// the current zoom.
    fn neighbouring_anchors(
        &self,
        anchor: Anchor,
    ) -> (Option<AnchorWithMarker>, Option<AnchorWithMarker>) {
        let file = self.store.current();
        let Some(segment) = file.segment(anchor.segment) else {
            return (None, None);
        };
        let index = segment.index_map();
        let Some(&own) = index.get(&anchor.point) else {
            return (None, None);
        };

        let mut previous: Option<(usize, &AnchorWithMarker)> = None;
        let mut next: Option<(usize, &AnchorWithMarker)> = None;
        for candidate in &self.anchors {
            if candidate.anchor.segment != anchor.segment || !candidate.in_zoom {
                continue;
            }
            let Some(&idx) = index.get(&candidate.anchor.point) else {
                continue;
            };
            if idx < own && previous.map_or(true, |(best, _)| idx > best) {
                previous = Some((idx, candidate));
            } else if idx > own && next.map_or(true, |(best, _)| idx < best) {
                next = Some((idx, candidate));
            }
        }
        (
            previous.map(|(_, a)| a.clone()),
            next.map(|(_, a)| a.clone()),
        )
    }

    /// Routes through the stops and splices the result into the segment. Returns false if nothing
    /// changed, because routing failed or the track was edited in the meantime.
    async fn route_between_anchors(&mut self, segment: SegmentId, stops: &[RouteStop]) -> bool {
        if let [stop] = stops {
            let applied = self
                .store
                .apply_to_segment(segment, |seg| move_single_point(seg, *stop), true);
            self.sync_if_changed();
            return applied;
        }
        if stops.len() < 2 {
            return false;
        }

        let generation = self.store.generation();
        let targets: Vec<Coordinate> = stops.iter().map(|stop| stop.target).collect();
        let mut route = match self.router.route(&targets).await {
            Ok(route) if !route.is_empty() => route,
            Ok(_) => {
                self.report(&RoutingError::Service("The route is empty".to_string()));
                return false;
            }
            Err(err) => {
                self.report(&err);
                return false;
            }
        };
        if self.store.generation() != generation {
            info!("The track changed while routing; dropping the stale route");
            return false;
        }

        let plan = {
            let file = self.store.current();
            file.segment(segment)
                .and_then(|seg| plan_replacement(seg, stops))
        };
        let Some(plan) = plan else {
            warn!("Anchors for the route are no longer in segment {segment:?}");
            return false;
        };

        // Intermediate anchors move to the closest point of the new route
        let interior = 1..route.len().saturating_sub(1);
        for stop in &stops[1..stops.len() - 1] {
            let closest = interior
                .clone()
                .min_by(|a, b| {
                    distance(route[*a].coordinates, stop.target)
                        .total_cmp(&distance(route[*b].coordinates, stop.target))
                })
                .unwrap_or(0);
            route[closest].make_anchor(0.0);
        }
        // Endpoints that get replaced are represented by the route's endpoints, which the
        // service may have snapped to a road
        if plan.keep_first.is_none() {
            route[0].make_anchor(0.0);
        }
        if plan.keep_last.is_none() {
            if let Some(last) = route.last_mut() {
                last.make_anchor(0.0);
            }
        }

        self.store.apply_to_segment(
            segment,
            |seg| {
                for idx in [plan.keep_first, plan.keep_last].into_iter().flatten() {
                    seg.trkpt[idx].make_anchor(0.0);
                }
                seg.replace(plan.range, route);
            },
            true,
        );
        self.sync_if_changed();
        true
    }

    fn report(&mut self, err: &RoutingError) {
        warn!("Routing failed ({}): {err}", err.reason());
        self.map.report_error(err);
    }
}

/// Moves a lone anchor without routing, keeping the rest of the point's data.
fn move_single_point(segment: &mut TrackSegment, stop: RouteStop) {
    match stop.point.and_then(|id| segment.position(id)) {
        Some(idx) => {
            let pt = &mut segment.trkpt[idx];
            pt.coordinates = stop.target;
            pt.make_anchor(0.0);
        }
        None => {
            let mut pt = TrackPoint::new(stop.target);
            pt.make_anchor(0.0);
            segment.trkpt.push(pt);
        }
    }
}

/// Figures out which points a route through the stops replaces. The range runs from after the
/// first anchor to before the last, except that an anchor at the start or end of the segment is
/// replaced too. Appending past the end also replaces the old last point, since the route starts
/// there.
fn plan_replacement(segment: &TrackSegment, stops: &[RouteStop]) -> Option<Replacement> {
    let len = segment.len();
    let index = segment.index_map();
    let first = *index.get(&stops.first()?.point?)?;
    let last = match stops.last()?.point {
        Some(id) => Some(*index.get(&id)?),
        None => None,
    };

    let start = if first == 0 || last.is_none() {
        first
    } else {
        first + 1
    };
    let end = match last {
        Some(idx) if idx + 1 == len => len,
        Some(idx) => idx,
        None => len,
    };
    if start > end {
        return None;
    }

    Some(Replacement {
        range: start..end,
        keep_first: (start != first).then_some(first),
        keep_last: last.filter(|idx| *idx >= end),
    })
}

fn screen_distance(a: ScreenPoint, b: ScreenPoint) -> f64 {
    Euclidean.distance(Point::from(a), Point::from(b))
}
