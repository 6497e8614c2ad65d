use geo::LineString;
use geojson::{Feature, FeatureCollection, GeoJson, Geometry};

use track_router_model::TrackFile;

/// Renders the track as GeoJSON: one LineString per segment with at least two points, then one
/// Point per anchor, so anchors draw on top.
pub fn track_to_geojson(file: &TrackFile) -> GeoJson {
    let mut features = Vec::new();
    for segment in file.segments() {
        if segment.len() < 2 {
            continue;
        }
        let line: LineString = segment
            .trkpt
            .iter()
            .map(|pt| geo::Coord::from(pt.coordinates))
            .collect();
        let mut f = Feature::from(Geometry::from(&line));
        f.set_property("length_meters", segment.length_meters());
        features.push(f);
    }
    for segment in file.segments() {
        for pt in segment.trkpt.iter().filter(|pt| pt.is_anchor()) {
            let mut f = Feature::from(Geometry::from(geojson::Value::Point(vec![
                pt.coordinates.lon,
                pt.coordinates.lat,
            ])));
            f.set_property("type", "anchor");
            f.set_property("zoom", pt.layout.zoom);
            if let Some(ele) = pt.ele {
                f.set_property("ele", ele);
            }
            features.push(f);
        }
    }
    GeoJson::from(features.into_iter().collect::<FeatureCollection>())
}

#[cfg(test)]
mod tests {
    use track_router_model::{Coordinate, TrackPoint, TrackSegment};

    use super::*;

    #[test]
    fn test_lines_then_anchors() {
        let mut pts: Vec<TrackPoint> = [(0.0, 0.0), (0.0, 0.001), (0.0, 0.002)]
            .iter()
            .map(|(lat, lon)| TrackPoint::new(Coordinate::new(*lat, *lon)))
            .collect();
        pts[0].make_anchor(0.0);
        pts[2].make_anchor(0.0);
        let lonely = TrackSegment::new(vec![TrackPoint::new(Coordinate::new(1.0, 1.0))]);
        let file = TrackFile::from_segments("test", vec![TrackSegment::new(pts), lonely]);

        let GeoJson::FeatureCollection(fc) = track_to_geojson(&file) else {
            panic!("expected a FeatureCollection");
        };
        assert_eq!(fc.features.len(), 3);
        let length = fc.features[0]
            .property("length_meters")
            .and_then(|x| x.as_f64())
            .unwrap();
        assert!((length - 222.4).abs() < 1.0, "{length}");
        assert_eq!(
            fc.features[1].property("type").and_then(|x| x.as_str()),
            Some("anchor")
        );
    }
}
