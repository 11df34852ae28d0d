//! bioRxiv metadata pipeline.
//!
//! Two cache stages: the publication feed is walked backward one calendar
//! day at a time into one JSON document per day, then the details endpoint
//! is fetched once per DOI found in those day files.
//!
//! https://api.biorxiv.org/

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Datelike, Local, NaiveDate};
use polars::prelude::*;
use serde::Deserialize;
use serde_json::Value;
use tokio_utils::RateLimiter;
use tracing::{info, warn};

use crate::cache;
use crate::client::ApiClient;
use crate::config::{Config, Dirs};
use crate::error::{Error, Result};
use crate::gender::{self, Gender, GenderDetector};
use crate::stats;

const PUB_BASE: &str = "https://api.biorxiv.org/pub";
const DETAILS_BASE: &str = "https://api.biorxiv.org/details/biorxiv";

/// Cursor step of the publication feed.
const PAGE_INTERVAL: usize = 100;

/// The feed's done sentinel: a status message, not an empty list.
const NO_ARTICLES: &str = "no articles found";

/// The server went online in November 2013; the walk stops there.
const DEFAULT_STOP: &str = "2013-11-01";

const FETCH_THROTTLE: Duration = Duration::from_millis(100);

pub fn stop_date(config: &Config) -> Result<NaiveDate> {
    let raw = config.biorxiv_stop.as_deref().unwrap_or(DEFAULT_STOP);
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| Error::Config(format!("invalid biorxiv_stop {raw:?}: {e}")))
}

#[derive(Debug, Deserialize)]
struct FeedPage {
    #[serde(default)]
    messages: Vec<FeedMessage>,
    #[serde(default)]
    collection: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct FeedMessage {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    count: Option<usize>,
}

/// Walk backward one day at a time from today, caching the feed's output
/// per day. A day whose file already exists is complete and is skipped
/// without a request, so an interrupted walk resumes where it stopped.
/// An empty day still caches an empty array.
pub async fn download_days(dirs: &Dirs, stop: NaiveDate) -> Result<()> {
    let api = ApiClient::new(PUB_BASE, None)?;
    let metadata = dirs.biorxiv_metadata();
    let one_day = chrono::Duration::days(1);
    let mut after = Local::now().date_naive();
    let mut before = after - one_day;
    let mut days = 0u32;
    let mut fetched = 0u32;
    while stop < before {
        let path = day_path(&metadata, after);
        if cache::fetch_cached(&path, || fetch_day(&api, before, after)).await? {
            fetched += 1;
        }
        days += 1;
        if days % 100 == 0 {
            info!(days, fetched, date = %after, "walking the publication feed");
        }
        after = before;
        before = before - one_day;
    }
    info!(days, fetched, "publication feed walk complete");
    Ok(())
}

/// One cache file per day: `metadata/{year}/{month}/{date}.json`.
fn day_path(metadata: &Path, day: NaiveDate) -> PathBuf {
    metadata
        .join(day.year().to_string())
        .join(format!("{:02}", day.month()))
        .join(format!("{day}.json"))
}

/// Page through one day's slice of the feed, advancing the path cursor by
/// `PAGE_INTERVAL` until the done sentinel or a short page.
async fn fetch_day(api: &ApiClient, before: NaiveDate, after: NaiveDate) -> Result<Vec<Value>> {
    let mut collection = Vec::new();
    let mut page = 0usize;
    loop {
        let resource = format!("{before}/{after}/{}", page * PAGE_INTERVAL);
        let body: FeedPage = serde_json::from_value(api.get_json(&resource, &[]).await?)?;
        let Some(message) = body.messages.into_iter().next() else {
            warn!(%after, "feed page without a status message");
            break;
        };
        if message.status.as_deref() == Some(NO_ARTICLES) {
            break;
        }
        collection.extend(body.collection);
        if message.count.unwrap_or(0) < PAGE_INTERVAL {
            break;
        }
        page += 1;
    }
    Ok(collection)
}

/// Phase 2: enumerate DOIs by listing the cached day files, never the API,
/// and fetch the details document for every DOI not cached yet.
pub async fn download_articles(dirs: &Dirs) -> Result<()> {
    let api = ApiClient::new(DETAILS_BASE, None)?;
    let articles = dirs.biorxiv_articles();
    fs::create_dir_all(&articles)?;
    let limiter = RateLimiter::new(FETCH_THROTTLE);
    let mut fetched = 0usize;
    for day_path in day_files(&dirs.biorxiv_metadata())? {
        let entries: Vec<Value> = cache::read_json(&day_path)?;
        for entry in &entries {
            let Some(doi) = entry.get("biorxiv_doi").and_then(Value::as_str) else {
                warn!(path = %day_path.display(), "feed entry without a biorxiv_doi");
                continue;
            };
            let path = articles.join(format!("{}.json", article_file_stem(doi)));
            let fetched_now = cache::fetch_cached(&path, || async {
                limiter
                    .throttle(|| async { api.get_json(doi, &[]).await })
                    .await
            })
            .await?;
            if fetched_now {
                fetched += 1;
                if fetched % 100 == 0 {
                    info!(fetched, "fetching article details");
                }
            }
        }
    }
    info!(fetched, "article details complete");
    Ok(())
}

/// DOIs contain a slash; flatten it for the filename.
fn article_file_stem(doi: &str) -> String {
    doi.replace('/', "_").trim().to_string()
}

/// Every cached day file, sorted for a deterministic crawl order.
fn day_files(metadata: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    if !metadata.exists() {
        return Ok(paths);
    }
    let mut stack = vec![metadata.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|e| e == "json") {
                paths.push(path);
            }
        }
    }
    paths.sort();
    Ok(paths)
}

#[derive(Debug, Deserialize)]
struct ArticleDocument {
    #[serde(default)]
    collection: Vec<ArticleVersion>,
}

#[derive(Debug, Deserialize)]
struct ArticleVersion {
    doi: String,
    title: String,
    /// Semicolon-separated, usually surname-first.
    authors: String,
    license: String,
    category: String,
    date: String,
    #[serde(default)]
    published: String,
}

/// One normalized article: the row layout of `articles.tsv`.
#[derive(Debug, Clone)]
pub struct BiorxivRow {
    pub id: String,
    pub title: String,
    pub first_author_name: String,
    pub gender: Gender,
    pub license: String,
    pub category: String,
    pub posted: String,
    pub peer_reviewed: String,
}

pub fn normalize(dirs: &Dirs, detector: &dyn GenderDetector) -> Result<Vec<BiorxivRow>> {
    let articles = dirs.biorxiv_articles();
    let mut paths = Vec::new();
    for entry in fs::read_dir(&articles)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().is_some_and(|e| e == "json") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut rows = Vec::new();
    for path in paths {
        let doc: ArticleDocument = cache::read_json(&path)?;
        match normalize_document(doc, detector) {
            Some(row) => rows.push(row),
            None => warn!(path = %path.display(), "empty collection; skipping"),
        }
    }
    rows.sort_by(|a, b| a.posted.cmp(&b.posted));

    let assigned = rows.iter().filter(|r| r.gender != Gender::Unknown).count();
    let share = if rows.is_empty() {
        0.0
    } else {
        100.0 * assigned as f64 / rows.len() as f64
    };
    info!(
        "authors with assigned genders: {assigned}/{} ({share:.2}%)",
        rows.len()
    );
    Ok(rows)
}

fn normalize_document(doc: ArticleDocument, detector: &dyn GenderDetector) -> Option<BiorxivRow> {
    let version = doc.collection.into_iter().next()?;
    let first_author = version
        .authors
        .split(';')
        .next()
        .unwrap_or("")
        .to_string();
    let gender = gender::infer(&first_author, detector);
    Some(BiorxivRow {
        id: version.doi,
        title: version.title,
        first_author_name: first_author,
        gender,
        license: version.license,
        category: version.category.trim().to_string(),
        posted: version.date,
        peer_reviewed: version.published,
    })
}

/// Write the normalized table handed to the plotting collaborator.
pub fn write_summary(dirs: &Dirs, rows: &[BiorxivRow]) -> Result<PathBuf> {
    let mut df = summary_frame(rows)?;
    let root = dirs.biorxiv_root();
    fs::create_dir_all(&root)?;
    let path = root.join("articles.tsv");
    let mut outf = File::create(&path)?;
    CsvWriter::new(&mut outf)
        .include_header(true)
        .with_separator(b'\t')
        .finish(&mut df)?;
    info!(rows = rows.len(), path = %path.display(), "wrote article table");
    Ok(path)
}

/// bioRxiv rows carry no ORCID, so only the identifier-free aggregates
/// apply.
pub fn write_stats(dirs: &Dirs, rows: &[BiorxivRow]) -> Result<()> {
    let mut stat_rows = Vec::new();
    for row in rows {
        let Some(bucket) = stats::bucket(&row.posted) else {
            warn!(id = %row.id, posted = %row.posted, "unparseable posted date");
            continue;
        };
        stat_rows.push(stats::StatRow {
            bucket,
            identifier: None,
            license: row.license.clone(),
            gender: row.gender,
        });
    }
    stats::write_tables(
        &stat_rows,
        &dirs.biorxiv_root().join("stats"),
        stats::TableSet::WithoutIdentifiers,
    )
}

fn summary_frame(rows: &[BiorxivRow]) -> Result<DataFrame> {
    let df = df![
        "id" => rows.iter().map(|r| r.id.clone()).collect::<Vec<String>>(),
        "title" => rows.iter().map(|r| r.title.clone()).collect::<Vec<String>>(),
        "first_author_name" => rows.iter().map(|r| r.first_author_name.clone()).collect::<Vec<String>>(),
        "first_author_inferred_gender" => rows.iter().map(|r| r.gender.to_string()).collect::<Vec<String>>(),
        "license" => rows.iter().map(|r| r.license.clone()).collect::<Vec<String>>(),
        "category" => rows.iter().map(|r| r.category.clone()).collect::<Vec<String>>(),
        "posted" => rows.iter().map(|r| r.posted.clone()).collect::<Vec<String>>(),
        "peer_reviewed" => rows.iter().map(|r| r.peer_reviewed.clone()).collect::<Vec<String>>(),
    ]?;
    Ok(df)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct StubDetector;

    impl GenderDetector for StubDetector {
        fn guess(&self, given_name: &str) -> Gender {
            match given_name {
                "Maria" => Gender::Female,
                _ => Gender::Unknown,
            }
        }
    }

    #[test]
    fn feed_page_parses_the_done_sentinel() {
        let body: FeedPage = serde_json::from_value(json!({
            "messages": [{"status": "no articles found"}]
        }))
        .unwrap();
        assert_eq!(
            body.messages[0].status.as_deref(),
            Some("no articles found")
        );
        assert!(body.collection.is_empty());
    }

    #[test]
    fn feed_page_parses_a_result_page() {
        let body: FeedPage = serde_json::from_value(json!({
            "messages": [{"status": "ok", "count": 2, "cursor": 0}],
            "collection": [
                {"biorxiv_doi": "10.1101/001"},
                {"biorxiv_doi": "10.1101/002"}
            ]
        }))
        .unwrap();
        assert_eq!(body.messages[0].count, Some(2));
        assert_eq!(body.collection.len(), 2);
    }

    #[test]
    fn day_path_layout() {
        let day = NaiveDate::from_ymd_opt(2021, 3, 7).unwrap();
        assert_eq!(
            day_path(Path::new("/data/biorxiv/metadata"), day),
            PathBuf::from("/data/biorxiv/metadata/2021/03/2021-03-07.json")
        );
    }

    #[test]
    fn doi_slash_becomes_underscore() {
        assert_eq!(
            article_file_stem("10.1101/2021.03.07.434176"),
            "10.1101_2021.03.07.434176"
        );
    }

    fn sample_document() -> Value {
        json!({
            "collection": [{
                "doi": "10.1101/2021.03.07.434176",
                "title": "Mapping a Signalling Cascade",
                "authors": "Rossi, Maria; Chen, Wei",
                "author_corresponding": "Maria Rossi",
                "license": "cc_by",
                "category": " molecular biology ",
                "date": "2021-03-07",
                "published": "NA",
                "version": "1"
            }],
            "messages": [{"status": "ok"}]
        })
    }

    #[test]
    fn normalization_takes_the_first_version_and_author() {
        let doc: ArticleDocument = serde_json::from_value(sample_document()).unwrap();
        let row = normalize_document(doc, &StubDetector).unwrap();
        assert_eq!(row.id, "10.1101/2021.03.07.434176");
        assert_eq!(row.first_author_name, "Rossi, Maria");
        // Surname-first formatting: inference is skipped, not mis-parsed.
        assert_eq!(row.gender, Gender::Unknown);
        assert_eq!(row.category, "molecular biology");
        assert_eq!(row.peer_reviewed, "NA");
    }

    #[test]
    fn given_name_first_reaches_the_detector() {
        let mut value = sample_document();
        value["collection"][0]["authors"] = json!("Maria Rossi; Wei Chen");
        let doc: ArticleDocument = serde_json::from_value(value).unwrap();
        let row = normalize_document(doc, &StubDetector).unwrap();
        assert_eq!(row.first_author_name, "Maria Rossi");
        assert_eq!(row.gender, Gender::Female);
    }

    #[test]
    fn empty_collection_is_skipped() {
        let doc: ArticleDocument = serde_json::from_value(json!({
            "collection": [],
            "messages": [{"status": "no posts found"}]
        }))
        .unwrap();
        assert!(normalize_document(doc, &StubDetector).is_none());
    }

    #[test]
    fn default_stop_date_parses() {
        let config = Config::default();
        assert_eq!(
            stop_date(&config).unwrap(),
            NaiveDate::from_ymd_opt(2013, 11, 1).unwrap()
        );
    }

    #[test]
    fn bad_stop_date_is_a_config_error() {
        let config = Config {
            biorxiv_stop: Some("last november".to_string()),
            ..Config::default()
        };
        assert!(stop_date(&config).is_err());
    }
}
