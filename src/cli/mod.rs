//! CLI for landlensdb.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use landlensdb::config;
use landlensdb::db::IfExists;
use landlensdb::network::NetworkType;
use landlensdb::visualize::GeometryLayer;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "landlensdb")]
#[command(about = "Load, snap, map and store geolocated street-level images", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Create the image table and its indexes.
    InitDb {
        #[arg(long, default_value = "mly_images")]
        table: String,
    },

    /// Read geotagged images from a directory into a GeoJSON frame.
    LoadLocal {
        directory: PathBuf,
        #[arg(long)]
        out: PathBuf,
        /// Path to the exiftool executable (default: from PATH).
        #[arg(long)]
        exiftool: Option<PathBuf>,
        #[arg(long)]
        include_hidden: bool,
    },

    /// Query Mapillary and save the result as a GeoJSON frame.
    FetchMapillary {
        /// `minx,miny,maxx,maxy` in EPSG:4326.
        #[arg(long, conflicts_with_all = ["image_id", "sequence"], required_unless_present_any = ["image_id", "sequence"])]
        bbox: Option<String>,
        #[arg(long)]
        image_id: Option<String>,
        #[arg(long, value_delimiter = ',')]
        sequence: Vec<String>,
        /// `YYYY-MM-DD`.
        #[arg(long)]
        start: Option<String>,
        /// `YYYY-MM-DD`, inclusive.
        #[arg(long)]
        end: Option<String>,
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,
        #[arg(long)]
        out: PathBuf,
    },

    /// Fetch Mapillary images, download them and upsert them into the database.
    ImportMapillary {
        #[arg(long, required_unless_present = "image_id")]
        bbox: Option<String>,
        #[arg(long)]
        image_id: Option<String>,
        #[arg(long, required_unless_present = "image_id")]
        start: Option<String>,
        #[arg(long, required_unless_present = "image_id")]
        end: Option<String>,
        #[arg(long, default_value = "images")]
        image_dir: PathBuf,
        #[arg(long, default_value = "mly_images")]
        table: String,
    },

    /// Snap a frame to a road network.
    Snap {
        frame: PathBuf,
        /// GeoJSON road network; fetched from OpenStreetMap when omitted.
        #[arg(long)]
        network: Option<PathBuf>,
        #[arg(long, default_value = "drive")]
        network_type: NetworkType,
        /// Snapping distance in meters.
        #[arg(long, default_value = "10")]
        tolerance: f64,
        /// Also compute `snapped_angle` from the road direction.
        #[arg(long)]
        realign: bool,
        #[arg(long)]
        optimize: bool,
        #[arg(long)]
        out: PathBuf,
        /// Also store the snapped geometries in this table.
        #[arg(long)]
        table: Option<String>,
        #[arg(long)]
        update_conflicting: bool,
    },

    /// Render a frame as an HTML map.
    Map {
        frame: PathBuf,
        #[arg(long, default_value = "map.html")]
        out: PathBuf,
        #[arg(long, default_value = "OpenStreetMap")]
        tiles: String,
        #[arg(long, default_value = "18")]
        zoom_start: u8,
        #[arg(long, default_value = "19")]
        max_zoom: u8,
        /// Extra columns shown in popups.
        #[arg(long, value_delimiter = ',')]
        property: Vec<String>,
        /// Extra geometry layers: `snapped`, `computed`.
        #[arg(long, value_delimiter = ',')]
        layer: Vec<GeometryLayer>,
    },

    /// Write a GeoJSON frame to the database, or export a table to GeoJSON.
    ExportDb {
        #[arg(long, default_value = "mly_images")]
        table: String,
        /// Frame to write; without it the table is read into `--out`.
        #[arg(long, conflicts_with = "out", required_unless_present = "out")]
        frame: Option<PathBuf>,
        #[arg(long, default_value = "fail")]
        if_exists: IfExists,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        bbox: Option<String>,
        #[arg(long, requires = "end")]
        start: Option<String>,
        #[arg(long, requires = "start")]
        end: Option<String>,
    },

    /// Delete cached road networks.
    ClearCache {
        #[arg(long)]
        older_than_days: Option<u64>,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?.apply_env();
        tracing::debug!(
            download_workers = cfg.download_workers,
            has_token = cfg.mapillary_token.is_some(),
            "loaded config"
        );

        match cli.command {
            CliCommand::InitDb { table } => commands::run_init_db(&cfg, &table).await?,
            CliCommand::LoadLocal {
                directory,
                out,
                exiftool,
                include_hidden,
            } => commands::run_load_local(&directory, &out, exiftool, include_hidden)?,
            CliCommand::FetchMapillary {
                bbox,
                image_id,
                sequence,
                start,
                end,
                fields,
                out,
            } => {
                let query = commands::MapillaryQuery {
                    bbox,
                    image_id,
                    sequence,
                    start,
                    end,
                    fields,
                };
                commands::run_fetch_mapillary(&cfg, query, &out).await?
            }
            CliCommand::ImportMapillary {
                bbox,
                image_id,
                start,
                end,
                image_dir,
                table,
            } => commands::run_import_mapillary(&cfg, bbox, image_id, start, end, &image_dir, &table).await?,
            CliCommand::Snap {
                frame,
                network,
                network_type,
                tolerance,
                realign,
                optimize,
                out,
                table,
                update_conflicting,
            } => {
                let options = commands::SnapOptions {
                    network,
                    network_type,
                    tolerance,
                    realign,
                    optimize,
                    table,
                    update_conflicting,
                };
                commands::run_snap(&cfg, &frame, options, &out).await?
            }
            CliCommand::Map {
                frame,
                out,
                tiles,
                zoom_start,
                max_zoom,
                property,
                layer,
            } => {
                let options = landlensdb::visualize::MapOptions::builder()
                    .tiles(tiles)
                    .zoom_start(zoom_start)
                    .max_zoom(max_zoom)
                    .additional_properties(property)
                    .additional_geometries(layer)
                    .build();
                commands::run_map(&frame, &out, &options)?
            }
            CliCommand::ExportDb {
                table,
                frame,
                if_exists,
                out,
                bbox,
                start,
                end,
            } => match (frame, out) {
                (Some(frame), _) => commands::run_write_db(&cfg, &table, &frame, if_exists).await?,
                (None, Some(out)) => commands::run_read_db(&cfg, &table, &out, bbox, start.zip(end)).await?,
                (None, None) => anyhow::bail!("either --frame or --out is required"),
            },
            CliCommand::ClearCache { older_than_days } => commands::run_clear_cache(&cfg, older_than_days)?,
        }

        Ok(())
    }
}
