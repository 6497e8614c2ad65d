use std::fs::File;
use std::io::{BufWriter, Write};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use track_router::anchors::{pin_endpoints, select_anchors};
use track_router::brouter::BRouterClient;
use track_router::export::track_to_geojson;
use track_router::{BRouterConfig, ConstantElevation, RouteProvider, Router, RoutingSettings};
use track_router_model::{Coordinate, TrackFile, TrackSegment};

#[derive(Parser)]
struct Args {
    /// Root URL of the BRouter server. Routes are requested from the root itself and profiles
    /// from `/brouter/getprofiles` below it.
    #[arg(long, env = "BROUTER_ADDRESS")]
    brouter: String,

    /// Log debug output, including every request
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Route through waypoints and write the track as GeoJSON
    Route {
        /// A `lon,lat` pair. Repeat for every waypoint, in order.
        #[arg(long = "waypoint", required = true, value_parser = parse_waypoint)]
        waypoints: Vec<Coordinate>,

        /// Path to a JSON file with routing settings
        #[arg(long)]
        settings: Option<String>,

        /// Draw straight lines between waypoints instead of routing
        #[arg(long)]
        no_routing: bool,

        /// BRouter profile to use. Defaults to the first one the server lists.
        #[arg(long)]
        profile: Option<String>,

        /// Elevation for points on straight lines, in meters
        #[arg(long, default_value_t = 0.0)]
        elevation: f64,

        /// Output file to write. Prints to stdout if omitted.
        #[arg(long)]
        output: Option<String>,
    },
    /// List the profiles the server offers
    Profiles,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose {
        log::Level::Debug
    } else {
        log::Level::Info
    };
    simple_logger::init_with_level(level)?;

    let config = BRouterConfig::new(args.brouter);
    match args.command {
        Command::Route {
            waypoints,
            settings,
            no_routing,
            profile,
            elevation,
            output,
        } => {
            let mut settings = match settings {
                Some(path) => {
                    let raw = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading {path}"))?;
                    RoutingSettings::from_json(&raw).with_context(|| format!("parsing {path}"))?
                }
                None => RoutingSettings::default(),
            };
            if no_routing {
                settings.routing = false;
            }
            if let Some(profile) = profile {
                settings.profile = profile;
            }
            route(&config, settings, elevation, &waypoints, output).await
        }
        Command::Profiles => {
            let profiles = BRouterClient::new(&config)?.fetch_profiles().await?;
            for name in profiles.keys() {
                println!("{name}");
            }
            Ok(())
        }
    }
}

async fn route(
    config: &BRouterConfig,
    settings: RoutingSettings,
    elevation: f64,
    waypoints: &[Coordinate],
    output: Option<String>,
) -> Result<()> {
    if waypoints.len() < 2 {
        bail!("Need at least two waypoints, got {}", waypoints.len());
    }

    let routing = settings.routing;
    let mut router = Router::new(config, settings, ConstantElevation(elevation))?;
    if routing && router.settings().profile.is_empty() {
        router.refresh_profiles().await;
        if router.settings().profile.is_empty() {
            bail!("No routing profile; pass --profile or check that the server lists profiles");
        }
    }
    let points = router
        .route(waypoints)
        .await
        .with_context(|| format!("routing through {} waypoints", waypoints.len()))?;

    let mut segment = TrackSegment::new(points);
    select_anchors(&mut segment);
    pin_endpoints(&mut segment);
    info!(
        "Route has {} points and is {:.1}km long",
        segment.len(),
        segment.length_meters() / 1000.0
    );
    let file = TrackFile::from_segments("route", vec![segment]);
    let gj = track_to_geojson(&file);

    match output {
        Some(path) => {
            let mut out =
                BufWriter::new(File::create(&path).with_context(|| format!("creating {path}"))?);
            serde_json::to_writer(&mut out, &gj)?;
            out.flush()?;
            info!("Wrote {path}");
        }
        None => println!("{gj}"),
    }
    Ok(())
}

fn parse_waypoint(raw: &str) -> Result<Coordinate, String> {
    let Some((lon, lat)) = raw.split_once(',') else {
        return Err(format!("expected lon,lat, got {raw}"));
    };
    let lon: f64 = lon.trim().parse().map_err(|_| format!("bad longitude {lon}"))?;
    let lat: f64 = lat.trim().parse().map_err(|_| format!("bad latitude {lat}"))?;
    if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
        return Err(format!("{raw} is out of range"));
    }
    Ok(Coordinate::new(lat, lon))
}
