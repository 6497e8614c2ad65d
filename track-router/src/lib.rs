//! Interactive routing for a GPX track editor. The user drags anchors along a track on a map; the
//! path between anchors comes from a BRouter server, or from straight lines when routing is off.

pub mod anchors;
pub mod brouter;
pub mod controls;
pub mod error;
pub mod export;
pub mod map;
pub mod routing;
pub mod settings;
pub mod store;


pub use anchors::{Anchor, AnchorWithMarker};
pub use controls::RoutingControls;
pub use error::{Reason, RoutingError};
pub use map::{
    EventKind, ListenerId, MapEvent, MapSurface, MarkerEvent, MarkerId, MarkerStyle, PointerEvent,
    ScreenPoint,
};
pub use routing::{ConstantElevation, ElevationService, RouteProvider, Router};
pub use settings::{BRouterConfig, RoutingSettings};
pub use store::TrackStore;
pub use track_router_model as model;
