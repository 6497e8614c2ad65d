//! Client for a BRouter server: route requests and profile listing.

use std::collections::BTreeMap;

use log::{debug, info};
use reqwest::Client;
use serde::Deserialize;

use track_router_model::{Coordinate, TrackPoint};

use crate::error::RoutingError;
use crate::settings::BRouterConfig;

/// BRouter reports way endpoints in micro-degrees
const MESSAGE_COORD_SCALE: f64 = 1_000_000.0;

pub struct BRouterClient {
    client: Client,
    address: String,
}

impl BRouterClient {
    pub fn new(config: &BRouterConfig) -> Result<BRouterClient, RoutingError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(BRouterClient {
            client,
            address: config.address.clone(),
        })
    }

    /// Asks BRouter for a route through all of the points, in order.
    pub async fn route(
        &self,
        points: &[Coordinate],
        profile: &str,
    ) -> Result<Vec<TrackPoint>, RoutingError> {
        let url = route_url(&self.address, points, profile);
        debug!("Requesting {url}");
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            let body = response.text().await?;
            return Err(RoutingError::classify(&body));
        }
        let body = response.text().await?;
        parse_route(&body)
    }

    /// Lists the profiles the server knows, as a name -> name map.
    pub async fn fetch_profiles(&self) -> Result<BTreeMap<String, String>, RoutingError> {
        let url = format!("{}/brouter/getprofiles", self.address);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(RoutingError::Service(format!(
                "Failed to fetch profiles: {}",
                response.status()
            )));
        }
        let files: Vec<String> = response.json().await?;
        let profiles = profile_map(files);
        info!("Got {} routing profiles", profiles.len());
        Ok(profiles)
    }
}

pub fn route_url(address: &str, points: &[Coordinate], profile: &str) -> String {
    let lonlats = points
        .iter()
        .map(|pt| format!("{:.8},{:.8}", pt.lon, pt.lat))
        .collect::<Vec<_>>()
        .join("|");
    format!("{address}?lonlats={lonlats}&profile={profile}&format=geojson&alternativeidx=0")
}

fn profile_map(files: Vec<String>) -> BTreeMap<String, String> {
    files
        .into_iter()
        .map(|file| {
            let name = file.replace(".brf", "");
            (name.clone(), name)
        })
        .collect()
}

#[derive(Deserialize)]
struct RouteResponse {
    features: Vec<RouteFeature>,
}

#[derive(Deserialize)]
struct RouteFeature {
    geometry: RouteGeometry,
    #[serde(default)]
    properties: RouteProperties,
}

#[derive(Deserialize)]
struct RouteGeometry {
    coordinates: Vec<Vec<f64>>,
}

#[derive(Deserialize, Default)]
struct RouteProperties {
    #[serde(default)]
    messages: Vec<Vec<String>>,
}

/// The `messages` table: a header row, then one row per stretch of way, ending at the row's
/// longitude/latitude.
struct Messages {
    rows: Vec<Vec<String>>,
    lon: Option<usize>,
    lat: Option<usize>,
    tags: Option<usize>,
}

impl Messages {
    fn new(rows: Vec<Vec<String>>) -> Messages {
        let column = |name: &str| rows.first()?.iter().position(|x| x == name);
        let lon = column("Longitude");
        let lat = column("Latitude");
        let tags = column("WayTags");
        Messages {
            rows,
            lon,
            lat,
            tags,
        }
    }

    fn tags(&self, row: usize) -> BTreeMap<String, String> {
        match (self.rows.get(row), self.tags) {
            (Some(fields), Some(col)) => fields.get(col).map(|x| parse_tags(x)).unwrap_or_default(),
            _ => BTreeMap::new(),
        }
    }

    /// Does the given row end at this coordinate?
    fn ends_at(&self, row: usize, lon: f64, lat: f64) -> bool {
        let (Some(fields), Some(lon_col), Some(lat_col)) = (self.rows.get(row), self.lon, self.lat)
        else {
            return false;
        };
        let parse = |col: usize| fields.get(col)?.trim().parse::<f64>().ok();
        match (parse(lon_col), parse(lat_col)) {
            (Some(row_lon), Some(row_lat)) => {
                micro_degrees(row_lon / MESSAGE_COORD_SCALE) == micro_degrees(lon)
                    && micro_degrees(row_lat / MESSAGE_COORD_SCALE) == micro_degrees(lat)
            }
            _ => false,
        }
    }
}

fn micro_degrees(x: f64) -> i64 {
    (x * MESSAGE_COORD_SCALE).round() as i64
}

/// Parses a BRouter GeoJSON response into track points, carrying elevation and way tags.
pub fn parse_route(body: &str) -> Result<Vec<TrackPoint>, RoutingError> {
    let response: RouteResponse = serde_json::from_str(body)
        .map_err(|err| RoutingError::Service(format!("Bad routing response: {err}")))?;
    let Some(feature) = response.features.into_iter().next() else {
        return Err(RoutingError::Service(
            "Routing response has no features".to_string(),
        ));
    };
    if feature.geometry.coordinates.is_empty() {
        return Err(RoutingError::Service("Routing response is empty".to_string()));
    }

    let messages = Messages::new(feature.properties.messages);
    let mut row = 1;
    let mut tags = messages.tags(row);

    let mut route: Vec<TrackPoint> = Vec::with_capacity(feature.geometry.coordinates.len());
    for coord in &feature.geometry.coordinates {
        let (Some(lon), Some(lat)) = (coord.first().copied(), coord.get(1).copied()) else {
            return Err(RoutingError::Service(format!(
                "Bad coordinate in routing response: {coord:?}"
            )));
        };
        let ele = coord
            .get(2)
            .copied()
            .or_else(|| route.last().and_then(|prev| prev.ele))
            .unwrap_or(0.0);
        let mut pt = TrackPoint::new(Coordinate::new(lat, lon)).with_ele(ele);

        if row < messages.rows.len() && messages.ends_at(row, lon, lat) {
            row += 1;
            tags = messages.tags(row);
        }
        pt.extensions = tags.clone();
        route.push(pt);
    }
    Ok(route)
}

/// Parses `key=value` pairs separated by spaces. Colons in keys become underscores.
pub fn parse_tags(message: &str) -> BTreeMap<String, String> {
    message
        .split(' ')
        .filter(|field| !field.is_empty())
        .map(|field| {
            let (key, value) = field.split_once('=').unwrap_or((field, ""));
            (key.replace(':', "_"), value.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = r#"{
      "type": "FeatureCollection",
      "features": [{
        "type": "Feature",
        "properties": {
          "creator": "BRouter-1.7.3",
          "messages": [
            ["Longitude", "Latitude", "Elevation", "Distance", "CostPerKm", "WayTags", "NodeTags"],
            ["2350010", "48850020", "35", "120", "1000", "highway=residential surface=asphalt", ""],
            ["2352000", "48851000", "36", "200", "1100", "highway=cycleway cycleway:surface=paved", ""]
          ]
        },
        "geometry": {
          "type": "LineString",
          "coordinates": [
            [2.349, 48.85, 34.0],
            [2.35001, 48.85002],
            [2.351, 48.8505, 35.5],
            [2.352, 48.851, 36.0]
          ]
        }
      }]
    }"#;

    #[test]
    fn test_parse_tags() {
        let tags = parse_tags("highway=residential surface=asphalt");
        assert_eq!(tags.len(), 2);
        assert_eq!(tags["highway"], "residential");
        assert_eq!(tags["surface"], "asphalt");

        let tags = parse_tags("a:b=1");
        assert_eq!(tags["a_b"], "1");
    }

    #[test]
    fn test_route_url() {
        let url = route_url(
            "https://brouter.example.org",
            &[Coordinate::new(48.85, 2.35), Coordinate::new(48.9, 2.4)],
            "trekking",
        );
        assert_eq!(
            url,
            "https://brouter.example.org?lonlats=2.35000000,48.85000000|2.40000000,48.90000000&profile=trekking&format=geojson&alternativeidx=0"
        );
    }

    #[test]
    fn test_parse_route_elevation_and_tags() {
        let route = parse_route(RESPONSE).unwrap();
        assert_eq!(route.len(), 4);
        assert_eq!(route[0].coordinates, Coordinate::new(48.85, 2.349));

        // Missing elevation falls back to the previous point
        let ele: Vec<Option<f64>> = route.iter().map(|pt| pt.ele).collect();
        assert_eq!(ele, vec![Some(34.0), Some(34.0), Some(35.5), Some(36.0)]);

        assert_eq!(route[0].extensions["highway"], "residential");
        // The end of the first way switches to the next row's tags
        assert_eq!(route[1].extensions["highway"], "cycleway");
        assert_eq!(route[2].extensions["cycleway_surface"], "paved");
        // Past the last row, no tags
        assert!(route[3].extensions.is_empty());
    }

    #[test]
    fn test_parse_route_without_elevation() {
        let body = r#"{"features": [{"geometry": {"coordinates": [[1.0, 2.0], [1.5, 2.5]]}}]}"#;
        let route = parse_route(body).unwrap();
        assert_eq!(route[0].ele, Some(0.0));
        assert_eq!(route[1].ele, Some(0.0));
        assert!(route[1].extensions.is_empty());
    }

    #[test]
    fn test_parse_route_rejects_garbage() {
        assert!(parse_route("not json").is_err());
        assert!(parse_route(r#"{"features": []}"#).is_err());
        assert!(parse_route(r#"{"features": [{"geometry": {"coordinates": []}}]}"#).is_err());
    }

    #[test]
    fn test_profile_map() {
        let profiles = profile_map(vec!["trekking.brf".to_string(), "car-fast.brf".to_string()]);
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles["car-fast"], "car-fast");
        assert_eq!(profiles.keys().next().unwrap(), "car-fast");
    }
}
