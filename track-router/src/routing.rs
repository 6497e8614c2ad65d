use std::collections::BTreeMap;

use anyhow::Result;
use log::{info, warn};

use track_router_model::{distance, Coordinate, TrackPoint};

use crate::brouter::BRouterClient;
use crate::error::RoutingError;
use crate::settings::{BRouterConfig, RoutingSettings};

/// Spacing of straight-line points, in kilometers
const INTERPOLATION_STEP_KM: f64 = 0.05;

/// Computes a path through waypoints, in order.
#[allow(async_fn_in_trait)]
pub trait RouteProvider {
    async fn route(&self, waypoints: &[Coordinate]) -> Result<Vec<TrackPoint>, RoutingError>;
}

/// Looks up one elevation per input point.
#[allow(async_fn_in_trait)]
pub trait ElevationService {
    async fn elevations(&self, points: &[Coordinate]) -> Result<Vec<f64>>;
}

/// Assigns the same elevation everywhere. Useful when there's no elevation data to consult.
pub struct ConstantElevation(pub f64);

impl ElevationService for ConstantElevation {
    async fn elevations(&self, points: &[Coordinate]) -> Result<Vec<f64>> {
        Ok(vec![self.0; points.len()])
    }
}

pub struct Router<E> {
    brouter: BRouterClient,
    elevation: E,
    settings: RoutingSettings,
    profiles: BTreeMap<String, String>,
}

impl<E: ElevationService> Router<E> {
    pub fn new(
        config: &BRouterConfig,
        settings: RoutingSettings,
        elevation: E,
    ) -> Result<Router<E>, RoutingError> {
        Ok(Router {
            brouter: BRouterClient::new(config)?,
            elevation,
            settings,
            profiles: BTreeMap::new(),
        })
    }

    pub fn settings(&self) -> &RoutingSettings {
        &self.settings
    }

    /// Changes take effect on the next route request.
    pub fn settings_mut(&mut self) -> &mut RoutingSettings {
        &mut self.settings
    }

    pub fn profiles(&self) -> &BTreeMap<String, String> {
        &self.profiles
    }

    /// Refetches the available profiles. If no profile has been chosen yet, picks the first one.
    /// Failures are logged and keep the old list.
    pub async fn refresh_profiles(&mut self) {
        match self.brouter.fetch_profiles().await {
            Ok(profiles) => {
                if self.settings.profile.is_empty() {
                    if let Some(first) = profiles.keys().next() {
                        info!("Defaulting to routing profile {first}");
                        self.settings.profile = first.clone();
                    }
                }
                self.profiles = profiles;
            }
            Err(err) => {
                warn!("Error fetching profiles: {err}");
            }
        }
    }

    fn active_profile(&self) -> &str {
        self.profiles
            .get(&self.settings.profile)
            .unwrap_or(&self.settings.profile)
    }

    async fn straight_line(&self, waypoints: &[Coordinate]) -> Result<Vec<TrackPoint>, RoutingError> {
        let mut route: Vec<TrackPoint> = interpolate(waypoints)
            .into_iter()
            .map(TrackPoint::new)
            .collect();
        let coords: Vec<Coordinate> = route.iter().map(|pt| pt.coordinates).collect();
        let elevations = self
            .elevation
            .elevations(&coords)
            .await
            .map_err(RoutingError::Elevation)?;
        if elevations.len() != route.len() {
            return Err(RoutingError::Elevation(anyhow::anyhow!(
                "asked for {} elevations, got {}",
                route.len(),
                elevations.len()
            )));
        }
        for (pt, ele) in route.iter_mut().zip(elevations) {
            pt.ele = Some(ele);
        }
        Ok(route)
    }
}

impl<E: ElevationService> RouteProvider for Router<E> {
    async fn route(&self, waypoints: &[Coordinate]) -> Result<Vec<TrackPoint>, RoutingError> {
        if self.settings.routing {
            self.brouter.route(waypoints, self.active_profile()).await
        } else {
            self.straight_line(waypoints).await
        }
    }
}

/// Fills in points every 50m along straight lines between consecutive waypoints. The first and
/// last output points are exactly the first and last waypoints.
pub fn interpolate(waypoints: &[Coordinate]) -> Vec<Coordinate> {
    let mut route = Vec::new();
    for pair in waypoints.windows(2) {
        let dist = distance(pair[0], pair[1]) / 1000.0;
        // Accumulating a float step drifts; count steps instead
        let mut step = 0;
        loop {
            let d = step as f64 * INTERPOLATION_STEP_KM;
            if d >= dist {
                break;
            }
            route.push(pair[0].interpolate(pair[1], d / dist));
            step += 1;
        }
    }
    if let Some(last) = waypoints.last() {
        route.push(*last);
    }
    route
}

#[cfg(test)]
mod tests {
    use anyhow::bail;

    use super::*;

    #[test]
    fn test_interpolate_keeps_endpoints() {
        let a = Coordinate::new(45.0, 6.0);
        // About 1km north
        let b = Coordinate::new(45.0 + 1.0 / 111.195, 6.0);
        let pts = interpolate(&[a, b]);

        assert_eq!(pts[0], a);
        assert_eq!(*pts.last().unwrap(), b);
        // 0, 50, ..., 950m, then b
        assert!((20..=22).contains(&pts.len()), "{}", pts.len());
        for pair in pts.windows(2) {
            assert!(pair[1].lat > pair[0].lat);
            assert_eq!(pair[1].lon, 6.0);
        }
    }

    #[test]
    fn test_interpolate_multiple_legs() {
        let a = Coordinate::new(0.0, 0.0);
        let b = Coordinate::new(0.0, 0.001);
        let c = Coordinate::new(0.001, 0.001);
        let pts = interpolate(&[a, b, c]);
        // Each leg is ~111m: 0, 50, 100m each, then c
        assert_eq!(pts.len(), 7);
        assert_eq!(pts[3], b);
        assert_eq!(pts[6], c);
    }

    #[test]
    fn test_interpolate_degenerate() {
        let a = Coordinate::new(1.0, 1.0);
        assert_eq!(interpolate(&[a]), vec![a]);
        assert_eq!(interpolate(&[a, a]), vec![a]);
        assert!(interpolate(&[]).is_empty());
    }

    struct FailingElevation;

    impl ElevationService for FailingElevation {
        async fn elevations(&self, _: &[Coordinate]) -> Result<Vec<f64>> {
            bail!("elevation tiles unavailable")
        }
    }

    fn router<E: ElevationService>(elevation: E) -> Router<E> {
        let settings = RoutingSettings {
            routing: false,
            profile: String::new(),
        };
        Router::new(&BRouterConfig::new("http://localhost:1"), settings, elevation).unwrap()
    }

    #[tokio::test]
    async fn test_fallback_assigns_elevation() {
        let router = router(ConstantElevation(120.0));
        let a = Coordinate::new(0.0, 0.0);
        let b = Coordinate::new(0.0, 0.001);
        let route = router.route(&[a, b]).await.unwrap();
        assert_eq!(route.first().unwrap().coordinates, a);
        assert_eq!(route.last().unwrap().coordinates, b);
        assert!(route.iter().all(|pt| pt.ele == Some(120.0)));
    }

    #[tokio::test]
    async fn test_fallback_propagates_elevation_failure() {
        let router = router(FailingElevation);
        let err = router
            .route(&[Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 0.001)])
            .await
            .unwrap_err();
        assert!(matches!(err, RoutingError::Elevation(_)));
        assert!(err.to_string().contains("elevation tiles unavailable"));
    }

    #[test]
    fn test_active_profile_falls_back_to_raw_name() {
        let mut router = router(ConstantElevation(0.0));
        router.settings_mut().profile = "hiking-mountain".to_string();
        assert_eq!(router.active_profile(), "hiking-mountain");
        router
            .profiles
            .insert("hiking-mountain".to_string(), "hiking-mountain".to_string());
        assert_eq!(router.active_profile(), "hiking-mountain");
    }
}
