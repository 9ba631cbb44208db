//! Subcommand implementations.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use landlensdb::GeoImageFrame;
use landlensdb::config::LandlensConfig;
use landlensdb::db::{IfExists, PostGis, TableName};
use landlensdb::geometry::BBox;
use landlensdb::import::MapillaryImport;
use landlensdb::local::LocalImageLoader;
use landlensdb::mapillary::MapillaryClient;
use landlensdb::network::{
    NetworkType, RoadNetwork, clear_network_cache, create_network_cache_dir, get_osm_lines,
    optimize_network_for_snapping, validate_network_topology,
};
use landlensdb::snap::snap_to_road_network;
use landlensdb::visualize::MapOptions;
use std::path::{Path, PathBuf};

/// Attempts for OpenStreetMap downloads.
const OSM_RETRIES: u32 = 3;

async fn connect(cfg: &LandlensConfig) -> Result<PostGis> {
    PostGis::connect(&cfg.database_url)
        .await
        .context("could not connect to the database")
}

fn mapillary_client(cfg: &LandlensConfig) -> Result<MapillaryClient> {
    let token = cfg
        .mapillary_token
        .clone()
        .context("no Mapillary token: set MAPILLARY_TOKEN or mapillary_token in config.toml")?;
    Ok(MapillaryClient::builder()
        .token(token)
        .workers(cfg.download_workers)
        .timeouts(cfg.timeouts())
        .retry(cfg.retry_policy())
        .build()?)
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").with_context(|| format!("invalid date '{value}', expected YYYY-MM-DD"))
}

pub async fn run_init_db(cfg: &LandlensConfig, table: &str) -> Result<()> {
    let table = TableName::new(table)?;
    let db = connect(cfg).await?;
    db.create_image_table(&table).await?;
    println!("Table {table} is ready");
    Ok(())
}

pub fn run_load_local(directory: &Path, out: &Path, exiftool: Option<PathBuf>, include_hidden: bool) -> Result<()> {
    let mut loader = LocalImageLoader::builder()
        .maybe_exiftool_path(exiftool)
        .include_hidden(include_hidden)
        .build()
        .context("could not start exiftool")?;
    let frame = loader.load_images(directory)?;
    frame.to_file(out)?;
    println!("Loaded {} geotagged images into {}", frame.len(), out.display());
    Ok(())
}

/// Selects what `fetch-mapillary` asks for.
pub struct MapillaryQuery {
    pub bbox: Option<String>,
    pub image_id: Option<String>,
    pub sequence: Vec<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub fields: Vec<String>,
}

pub async fn run_fetch_mapillary(cfg: &LandlensConfig, query: MapillaryQuery, out: &Path) -> Result<()> {
    let client = mapillary_client(cfg)?;
    let frame = tokio::task::spawn_blocking(move || -> Result<GeoImageFrame> {
        let fields: Vec<&str> = query.fields.iter().map(String::as_str).collect();
        let fields = (!fields.is_empty()).then_some(fields.as_slice());
        let frame = if let Some(id) = &query.image_id {
            client.fetch_by_id(id, fields)?
        } else if !query.sequence.is_empty() {
            client.fetch_by_sequence(&query.sequence, fields)?
        } else {
            let bbox: BBox = query.bbox.as_deref().context("--bbox is required")?.parse()?;
            client
                .fetch_within_bbox()
                .bbox(bbox)
                .maybe_start_date(query.start.as_deref())
                .maybe_end_date(query.end.as_deref())
                .maybe_fields(fields)
                .call()?
        };
        Ok(frame)
    })
    .await??;

    frame.to_file(out)?;
    println!("Fetched {} images into {}", frame.len(), out.display());
    Ok(())
}

pub async fn run_import_mapillary(
    cfg: &LandlensConfig,
    bbox: Option<String>,
    image_id: Option<String>,
    start: Option<String>,
    end: Option<String>,
    image_dir: &Path,
    table: &str,
) -> Result<()> {
    let import = MapillaryImport::builder()
        .client(mapillary_client(cfg)?)
        .db(connect(cfg).await?)
        .table(TableName::new(table)?)
        .workers(cfg.download_workers)
        .timeouts(cfg.timeouts())
        .retry(cfg.retry_policy())
        .build();

    let started = std::time::Instant::now();
    let summary = match (image_id, bbox, start, end) {
        (Some(id), ..) => import.import_image_by_id(&id, image_dir).await?,
        (None, Some(bbox), Some(start), Some(end)) => {
            let bbox: BBox = bbox.parse()?;
            import.import_images_by_bbox(bbox, &start, &end, image_dir).await?
        }
        _ => anyhow::bail!("--bbox, --start and --end are required without --image-id"),
    };
    println!(
        "Imported {} of {} images ({} already stored, {} downloaded) in {:.1}s",
        summary.written,
        summary.fetched,
        summary.skipped,
        summary.downloaded,
        started.elapsed().as_secs_f64()
    );
    Ok(())
}

pub struct SnapOptions {
    pub network: Option<PathBuf>,
    pub network_type: NetworkType,
    pub tolerance: f64,
    pub realign: bool,
    pub optimize: bool,
    pub table: Option<String>,
    pub update_conflicting: bool,
}

pub async fn run_snap(cfg: &LandlensConfig, frame_path: &Path, options: SnapOptions, out: &Path) -> Result<()> {
    let frame = GeoImageFrame::from_file(frame_path)?;
    let network = match &options.network {
        Some(path) => RoadNetwork::from_geojson_file(path)?,
        None => {
            let bbox = frame.bbox().context("frame has no rows")?;
            let cache_dir = match &cfg.network_cache_dir {
                Some(dir) => dir.clone(),
                None => create_network_cache_dir()?,
            };
            let (network_type, timeouts) = (options.network_type, cfg.timeouts());
            tokio::task::spawn_blocking(move || {
                get_osm_lines(&bbox, network_type, Some(&cache_dir), OSM_RETRIES, timeouts)
            })
            .await??
        }
    };

    let (network, report) = validate_network_topology(&network);
    if !report.is_clean() {
        tracing::info!(?report, "repaired road network");
    }
    let network = if options.optimize {
        optimize_network_for_snapping(&network, true, true)
    } else {
        network
    };

    let snapped = snap_to_road_network(&frame, options.tolerance, &network, options.realign)?;
    snapped.to_file(out)?;
    let count = snapped.iter().filter(|r| r.snapped_geometry.is_some()).count();
    println!("Snapped {count} of {} images into {}", snapped.len(), out.display());

    if let Some(table) = options.table {
        let table = TableName::new(&table)?;
        let db = connect(cfg).await?;
        let updated = db.update_snapped(&snapped, &table, options.update_conflicting).await?;
        println!("Updated {updated} rows in {table}");
    }
    Ok(())
}

pub fn run_map(frame_path: &Path, out: &Path, options: &MapOptions) -> Result<()> {
    let frame = GeoImageFrame::from_file(frame_path)?;
    frame.save_map(out, options)?;
    println!("Wrote map of {} images to {}", frame.len(), out.display());
    Ok(())
}

pub async fn run_write_db(cfg: &LandlensConfig, table: &str, frame_path: &Path, if_exists: IfExists) -> Result<()> {
    let table = TableName::new(table)?;
    let frame = GeoImageFrame::from_file(frame_path)?;
    let db = connect(cfg).await?;
    let written = frame.to_postgis(&db, &table, if_exists).await?;
    println!("Wrote {written} rows to {table}");
    Ok(())
}

pub async fn run_read_db(
    cfg: &LandlensConfig,
    table: &str,
    out: &Path,
    bbox: Option<String>,
    dates: Option<(String, String)>,
) -> Result<()> {
    let table = TableName::new(table)?;
    let dates = match dates {
        Some((start, end)) => Some((parse_date(&start)?, parse_date(&end)?)),
        None => None,
    };
    let db = connect(cfg).await?;
    let frame = match bbox {
        Some(bbox) => db.select_within_bbox(&table, &bbox.parse::<BBox>()?, dates).await?,
        None if dates.is_some() => anyhow::bail!("--start/--end need --bbox"),
        None => db.select_all(&table).await?,
    };
    frame.to_file(out)?;
    println!("Exported {} rows from {table} to {}", frame.len(), out.display());
    Ok(())
}

pub fn run_clear_cache(cfg: &LandlensConfig, older_than_days: Option<u64>) -> Result<()> {
    let removed = clear_network_cache(cfg.network_cache_dir.as_deref(), older_than_days)?;
    println!("Removed {removed} cached road networks");
    Ok(())
}
