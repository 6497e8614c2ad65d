use geo::{Coord, Rect};

use track_router_model::Coordinate;

use crate::error::RoutingError;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct MarkerId(pub u32);

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ListenerId(pub u32);

/// Pixel position on the map canvas
pub type ScreenPoint = Coord;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EventKind {
    Zoom,
    Move,
    Click,
    PointerMove,
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub struct PointerEvent {
    pub coordinates: Coordinate,
    pub point: ScreenPoint,
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum MapEvent {
    Zoom,
    Move,
    Click(PointerEvent),
    PointerMove(PointerEvent),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MarkerEvent {
    DragStart,
    DragEnd,
    /// `shift` is true if the shift key was held
    Click { shift: bool },
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MarkerStyle {
    Anchor,
    /// Drawn below the other markers
    Temporary,
}

/// What the routing controls need from the map library. Listeners registered with `on` get
/// events routed back by the host through `RoutingControls::handle_event`.
pub trait MapSurface {
    fn zoom(&self) -> f64;
    /// The visible area; x is longitude, y is latitude
    fn bounds(&self) -> Rect;
    fn project(&self, coordinates: Coordinate) -> ScreenPoint;

    /// Starts delivering events of this kind. With a layer, only events over that layer.
    fn on(&mut self, kind: EventKind, layer: Option<&str>) -> ListenerId;
    fn off(&mut self, listener: ListenerId);

    /// Creates a draggable marker, not yet on the map.
    fn create_marker(&mut self, coordinates: Coordinate, style: MarkerStyle) -> MarkerId;
    fn set_marker_position(&mut self, marker: MarkerId, coordinates: Coordinate);
    /// Where the marker is drawn, which differs from where it was put after the user drags it
    fn marker_position(&self, marker: MarkerId) -> Coordinate;
    fn add_marker(&mut self, marker: MarkerId);
    fn remove_marker(&mut self, marker: MarkerId);
    /// Opens the anchor popup, offering to delete it, at this marker
    fn open_popup(&mut self, marker: MarkerId);
    fn close_popup(&mut self);

    fn report_error(&mut self, error: &RoutingError);
}
