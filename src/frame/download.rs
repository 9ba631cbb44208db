//! Parallel download of remote images into a local directory.

use super::GeoImageFrame;
use crate::http::{self, RetryPolicy, Timeouts};
use rayon::prelude::*;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static UNSAFE_FILENAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._|-]+").unwrap());

/// Which column names the downloaded file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FilenameSource {
    /// Last path segment of the URL, without extension.
    #[default]
    UrlStem,
    Name,
    MlyId,
}

impl GeoImageFrame {
    /// Downloads every remote `image_url` to `dest_dir/<filename>.jpg` on a pool of
    /// `workers` threads and returns a copy of the frame pointing at the local files.
    ///
    /// Rows whose URL is not `http(s)` are left untouched. A failed download keeps
    /// the original URL.
    pub fn download_images_to_local(
        &self,
        dest_dir: impl AsRef<Path>,
        filename_source: FilenameSource,
        workers: usize,
        timeouts: Timeouts,
        policy: &RetryPolicy,
    ) -> Result<GeoImageFrame, std::io::Error> {
        let dest_dir = dest_dir.as_ref();
        std::fs::create_dir_all(dest_dir)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .build()
            .map_err(std::io::Error::other)?;

        let destinations = self.plan_destinations(dest_dir, filename_source);
        let local_urls: Vec<Option<String>> = pool.install(|| {
            self.records
                .par_iter()
                .zip(destinations)
                .map(|(record, dest)| {
                    let dest = dest?;
                    match http::download_to_file(&record.image_url, &dest, timeouts, policy) {
                        Ok(bytes) => {
                            tracing::debug!(path = %dest.display(), bytes, "downloaded image");
                            Some(dest.to_string_lossy().into_owned())
                        }
                        Err(error) => {
                            tracing::warn!(image_url = %record.image_url, %error, "failed to download image");
                            None
                        }
                    }
                })
                .collect()
        });

        let mut records = self.records.clone();
        let mut downloaded = 0;
        for (record, local) in records.iter_mut().zip(local_urls) {
            if let Some(local) = local {
                record.image_url = local;
                downloaded += 1;
            }
        }
        tracing::info!(downloaded, total = records.len(), dest = %dest_dir.display(), "image download finished");
        Ok(GeoImageFrame { records })
    }
}

impl GeoImageFrame {
    /// Target file for every remote row, `None` for rows that are not downloaded.
    ///
    /// Stems that repeat (same file name under different URL paths, repeated
    /// names) get a `_<row>` suffix so parallel downloads never share a file.
    fn plan_destinations(&self, dest_dir: &Path, filename_source: FilenameSource) -> Vec<Option<PathBuf>> {
        let mut taken = HashSet::new();
        self.records
            .iter()
            .enumerate()
            .map(|(index, record)| {
                if !record.is_remote() {
                    tracing::warn!(image_url = %record.image_url, "not a URL, skipping download");
                    return None;
                }
                let stem = match filename_source {
                    FilenameSource::UrlStem => url_stem(&record.image_url),
                    FilenameSource::Name => Some(record.name.clone()),
                    FilenameSource::MlyId => record.mly_id.clone(),
                };
                let Some(stem) = stem.map(|s| sanitize_stem(&s)).filter(|s| !s.is_empty()) else {
                    tracing::warn!(image_url = %record.image_url, ?filename_source, "no filename available, skipping download");
                    return None;
                };
                let mut file_stem = stem.clone();
                let mut attempt = 0;
                while !taken.insert(file_stem.clone()) {
                    file_stem = match attempt {
                        0 => format!("{stem}_{index}"),
                        n => format!("{stem}_{index}_{n}"),
                    };
                    attempt += 1;
                }
                if attempt > 0 {
                    tracing::debug!(image_url = %record.image_url, %file_stem, "file name already used, adding row suffix");
                }
                Some(dest_dir.join(format!("{file_stem}.jpg")))
            })
            .collect()
    }
}

/// Last path segment of a URL without query string or extension.
fn url_stem(image_url: &str) -> Option<String> {
    let parsed = url::Url::parse(image_url).ok()?;
    let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).next_back()?;
    let stem = Path::new(segment).file_stem()?.to_string_lossy().into_owned();
    Some(stem)
}

fn sanitize_stem(stem: &str) -> String {
    UNSAFE_FILENAME_CHARS.replace_all(stem, "_").trim_matches('_').to_string()
}
