//! chemRxiv pipeline against the figshare API.
//!
//! Two-phase crawl: phase 1 ("short") pages through the institution's
//! article listing and caches one summary document per id; phase 2 ("full")
//! walks the phase-1 cache directory and fetches the detailed payload for
//! every id that does not have one yet. Restarting either phase re-fetches
//! nothing that is already on disk.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;

use polars::prelude::*;
use serde::Deserialize;
use serde_json::Value;
use tokio_utils::RateLimiter;
use tracing::{info, warn};

use crate::cache;
use crate::client::{ApiClient, Pager};
use crate::config::{Config, Dirs};
use crate::error::Result;
use crate::gender::{self, Gender, GenderDetector};
use crate::orcid;
use crate::stats;

const FIGSHARE_BASE: &str = "https://api.figshare.com/v2";

/// Custom-field label the submitter's ORCID is filed under.
const ORCID_FIELD: &str = "ORCID For Submitting Author";

const FETCH_THROTTLE: Duration = Duration::from_millis(100);

#[derive(Debug, Deserialize)]
struct InstitutionDetails {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ArticleDetail {
    id: u64,
    title: String,
    timeline: Timeline,
    license: License,
    #[serde(default)]
    authors: Vec<Author>,
    #[serde(default)]
    custom_fields: Vec<CustomField>,
}

#[derive(Debug, Deserialize)]
struct Timeline {
    posted: String,
}

#[derive(Debug, Deserialize)]
struct License {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Author {
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct CustomField {
    name: String,
    value: Value,
}

/// One normalized article: the row layout of `articles_summary.tsv`.
#[derive(Debug, Clone)]
pub struct ChemrxivRow {
    pub id: u64,
    pub title: String,
    pub posted: String,
    pub license: String,
    pub orcid: Option<String>,
    pub first_author_name: String,
    pub gender: Gender,
}

pub struct FigshareClient {
    api: ApiClient,
    page_size: usize,
    institution: u64,
    institution_name: String,
    root: PathBuf,
    articles_short: PathBuf,
    articles_long: PathBuf,
}

impl FigshareClient {
    /// Authenticate and resolve the account's institution. The institution
    /// id scopes both the article listing filter and the cache layout.
    pub async fn connect(dirs: &Dirs, config: &Config, token: Option<String>) -> Result<Self> {
        let token = config.figshare_token(token)?;
        let api = ApiClient::new(FIGSHARE_BASE, Some(&token))?;
        api.get_json("account", &[]).await?;
        let details: InstitutionDetails =
            serde_json::from_value(api.get_json("account/institution", &[]).await?)?;
        info!(institution = details.id, name = %details.name, "figshare account resolved");
        let root = dirs.figshare_root().join(details.id.to_string());
        Ok(Self {
            api,
            page_size: config.page_size(),
            institution: details.id,
            institution_name: details.name,
            articles_short: root.join("articles_short"),
            articles_long: root.join("articles_long"),
            root,
        })
    }

    /// Phase 1: enumerate every article id via the list endpoint and cache
    /// each summary document at `articles_short/{id}.json`.
    pub async fn download_short(&self) -> Result<()> {
        fs::create_dir_all(&self.articles_short)?;
        let params = vec![("institution", self.institution.to_string())];
        let mut pager = Pager::new(&self.api, "articles", params, self.page_size);
        let mut seen = 0usize;
        let mut cached = 0usize;
        while let Some(items) = pager.next_page().await? {
            for item in items {
                seen += 1;
                let Some(id) = item.get("id").and_then(Value::as_u64) else {
                    warn!("article summary without an id field");
                    continue;
                };
                let path = self.articles_short.join(format!("{id}.json"));
                if path.exists() {
                    continue;
                }
                cache::write_json_atomic(&path, &item)?;
                cached += 1;
            }
            info!(seen, cached, "listing articles");
        }
        info!(seen, cached, "article summaries complete");
        Ok(())
    }

    /// Phase 2: driven by the phase-1 cache directory, not the API, so it
    /// can be re-run indefinitely against a stable snapshot of ids.
    pub async fn download_full(&self) -> Result<()> {
        fs::create_dir_all(&self.articles_long)?;
        let ids = cached_ids(&self.articles_short)?;
        let total = ids.len();
        let limiter = RateLimiter::new(FETCH_THROTTLE);
        let mut fetched = 0usize;
        for (i, id) in ids.iter().enumerate() {
            let path = self.articles_long.join(format!("{id}.json"));
            let resource = format!("articles/{id}");
            let fetched_now = cache::fetch_cached(&path, || async {
                limiter
                    .throttle(|| async { self.api.get_json(&resource, &[]).await })
                    .await
            })
            .await?;
            if fetched_now {
                fetched += 1;
                if fetched % 100 == 0 {
                    info!(fetched, at = i + 1, total, "fetching article details");
                }
            }
        }
        info!(fetched, total, "article details complete");
        Ok(())
    }

    /// Flatten every cached detail document into one row, inferring the
    /// first author's gender along the way.
    pub fn normalize(&self, detector: &dyn GenderDetector) -> Result<Vec<ChemrxivRow>> {
        let mut rows = Vec::new();
        for id in cached_ids(&self.articles_long)? {
            let path = self.articles_long.join(format!("{id}.json"));
            let detail: ArticleDetail = cache::read_json(&path)?;
            if let Some(row) = normalize_detail(detail, detector) {
                rows.push(row);
            }
        }
        rows.sort_by_key(|r| r.id);
        info!(rows = rows.len(), "normalized article details");
        Ok(rows)
    }

    /// Write the normalized table. This TSV is the interface handed to the
    /// plotting collaborator.
    pub fn write_summary(&self, rows: &[ChemrxivRow]) -> Result<PathBuf> {
        let mut df = summary_frame(rows)?;
        fs::create_dir_all(&self.root)?;
        let path = self.root.join("articles_summary.tsv");
        let mut outf = File::create(&path)?;
        CsvWriter::new(&mut outf)
            .include_header(true)
            .with_separator(b'\t')
            .finish(&mut df)?;
        info!(
            institution = %self.institution_name,
            rows = rows.len(),
            path = %path.display(),
            "wrote article summary table"
        );
        Ok(path)
    }

    /// Derive the aggregate trend tables from the bucketed rows.
    pub fn write_stats(&self, rows: &[ChemrxivRow]) -> Result<()> {
        let stat_rows = stat_rows(rows);
        let cleaned = stat_rows.iter().filter(|r| r.identifier.is_some()).count();
        info!(
            cleaned,
            total = rows.len(),
            "built cleaned table"
        );
        stats::write_tables(
            &stat_rows,
            &self.root.join("stats"),
            stats::TableSet::WithIdentifiers,
        )
    }
}

fn summary_frame(rows: &[ChemrxivRow]) -> Result<DataFrame> {
    let df = df![
        "id" => rows.iter().map(|r| r.id).collect::<Vec<u64>>(),
        "title" => rows.iter().map(|r| r.title.clone()).collect::<Vec<String>>(),
        "posted" => rows.iter().map(|r| r.posted.clone()).collect::<Vec<String>>(),
        "license" => rows.iter().map(|r| r.license.clone()).collect::<Vec<String>>(),
        "orcid" => rows.iter().map(|r| r.orcid.clone()).collect::<Vec<Option<String>>>(),
        "first_author_name" => rows.iter().map(|r| r.first_author_name.clone()).collect::<Vec<String>>(),
        "first_author_inferred_gender" => rows.iter().map(|r| r.gender.to_string()).collect::<Vec<String>>(),
    ]?;
    Ok(df)
}

/// Ids present in a cache directory, from their `{id}.json` filenames.
fn cached_ids(dir: &Path) -> Result<Vec<u64>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let Some(stem) = name.strip_suffix(".json") else {
            continue;
        };
        match stem.parse::<u64>() {
            Ok(id) => ids.push(id),
            Err(_) => warn!(file = %name, "unexpected file in article cache"),
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

fn normalize_detail(detail: ArticleDetail, detector: &dyn GenderDetector) -> Option<ChemrxivRow> {
    let Some(first_author) = detail.authors.first() else {
        warn!(id = detail.id, "article has no authors; skipping");
        return None;
    };

    let mut orcid_value = None;
    for field in &detail.custom_fields {
        if field.name == ORCID_FIELD {
            orcid_value = match field.value.as_str() {
                Some(s) => Some(s.to_string()),
                None => {
                    warn!(id = detail.id, "ORCID custom field is not a string");
                    None
                }
            };
        }
    }

    let gender = gender::infer(&first_author.full_name, detector);
    Some(ChemrxivRow {
        id: detail.id,
        title: detail.title,
        posted: detail.timeline.posted,
        license: detail.license.name,
        orcid: orcid_value,
        first_author_name: first_author.full_name.clone(),
        gender,
    })
}

/// Build the bucketed stat table. Rows with no identifier skip cleaning,
/// and a cleaned value failing the `0000` prefix check is discarded. In
/// both cases the row stays in the volume/license/gender aggregates and is
/// absent from the author-identity ones. The raw summary table is
/// unaffected.
fn stat_rows(rows: &[ChemrxivRow]) -> Vec<stats::StatRow> {
    let mut out = Vec::new();
    for row in rows {
        let identifier = row.orcid.as_deref().and_then(|raw| {
            let cleaned = orcid::clean(raw);
            if !orcid::is_plausible(&cleaned) {
                warn!(id = row.id, orcid = %cleaned, "discarding invalid ORCID");
                return None;
            }
            if !orcid::is_well_formed(&cleaned) {
                warn!(id = row.id, orcid = %cleaned, "ORCID kept but oddly shaped");
            }
            Some(cleaned)
        });
        let Some(bucket) = stats::bucket(&row.posted) else {
            warn!(id = row.id, posted = %row.posted, "unparseable posted date");
            continue;
        };
        out.push(stats::StatRow {
            bucket,
            identifier,
            license: row.license.clone(),
            gender: row.gender,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct StubDetector;

    impl GenderDetector for StubDetector {
        fn guess(&self, given_name: &str) -> Gender {
            match given_name {
                "Alice" => Gender::Female,
                _ => Gender::Unknown,
            }
        }
    }

    fn sample_detail() -> Value {
        json!({
            "id": 12345,
            "title": "Synthesis of a Strained Macrocycle",
            "timeline": {"posted": "2023-01-15", "revision": "2023-02-01"},
            "license": {"value": 1, "name": "CC BY 4.0"},
            "authors": [
                {"id": 1, "full_name": "Alice Womack"},
                {"id": 2, "full_name": "Bob Nguyen"}
            ],
            "custom_fields": [
                {"name": "Funder", "value": "ERC"},
                {"name": "ORCID For Submitting Author", "value": "0000-0001-2345-6789"}
            ],
            "defined_type": 12
        })
    }

    #[test]
    fn detail_deserializes_from_api_shape() {
        let detail: ArticleDetail = serde_json::from_value(sample_detail()).unwrap();
        assert_eq!(detail.id, 12345);
        assert_eq!(detail.timeline.posted, "2023-01-15");
        assert_eq!(detail.license.name, "CC BY 4.0");
        assert_eq!(detail.authors.len(), 2);
    }

    #[test]
    fn normalization_extracts_the_orcid_custom_field() {
        let detail: ArticleDetail = serde_json::from_value(sample_detail()).unwrap();
        let row = normalize_detail(detail, &StubDetector).unwrap();
        assert_eq!(row.orcid.as_deref(), Some("0000-0001-2345-6789"));
        assert_eq!(row.first_author_name, "Alice Womack");
        assert_eq!(row.gender, Gender::Female);
    }

    #[test]
    fn missing_orcid_field_keeps_the_row() {
        let mut value = sample_detail();
        value["custom_fields"] = json!([{"name": "Funder", "value": "ERC"}]);
        let detail: ArticleDetail = serde_json::from_value(value).unwrap();
        let row = normalize_detail(detail, &StubDetector).unwrap();
        assert!(row.orcid.is_none());
    }

    #[test]
    fn a_later_duplicate_field_wins() {
        let mut value = sample_detail();
        value["custom_fields"] = json!([
            {"name": "ORCID For Submitting Author", "value": "0000-0001-0000-0000"},
            {"name": "ORCID For Submitting Author", "value": "0000-0002-9999-9999"}
        ]);
        let detail: ArticleDetail = serde_json::from_value(value).unwrap();
        let row = normalize_detail(detail, &StubDetector).unwrap();
        assert_eq!(row.orcid.as_deref(), Some("0000-0002-9999-9999"));
    }

    #[test]
    fn empty_author_list_skips_the_record() {
        let mut value = sample_detail();
        value["authors"] = json!([]);
        let detail: ArticleDetail = serde_json::from_value(value).unwrap();
        assert!(normalize_detail(detail, &StubDetector).is_none());
    }

    #[test]
    fn surname_first_author_gets_unknown_gender() {
        let mut value = sample_detail();
        value["authors"] = json!([{"full_name": "Womack, Alice"}]);
        let detail: ArticleDetail = serde_json::from_value(value).unwrap();
        let row = normalize_detail(detail, &StubDetector).unwrap();
        assert_eq!(row.gender, Gender::Unknown);
    }

    #[test]
    fn cleaning_discards_null_and_invalid_identifiers() {
        let base = ChemrxivRow {
            id: 1,
            title: "t".to_string(),
            posted: "2023-01-15".to_string(),
            license: "CC BY 4.0".to_string(),
            orcid: Some(" https://orcid.org/0000-0001-2345-6789".to_string()),
            first_author_name: "Alice".to_string(),
            gender: Gender::Female,
        };
        let rows = vec![
            base.clone(),
            ChemrxivRow {
                id: 2,
                orcid: Some("not-an-id".to_string()),
                ..base.clone()
            },
            ChemrxivRow {
                id: 3,
                orcid: None,
                posted: "2023-02-01".to_string(),
                ..base.clone()
            },
        ];
        let stat = stat_rows(&rows);
        // Every row keeps its bucket; only the URL-prefixed identifier
        // survives cleaning.
        assert_eq!(stat.len(), 3);
        assert_eq!(stat[0].identifier.as_deref(), Some("0000-0001-2345-6789"));
        assert_eq!(stat[0].bucket, "23-01");
        assert!(stat[1].identifier.is_none());
        assert!(stat[2].identifier.is_none());
        assert_eq!(stat[2].bucket, "23-02");
    }

    #[test]
    fn summary_frame_has_the_tsv_columns() {
        let rows = vec![ChemrxivRow {
            id: 7,
            title: "t".to_string(),
            posted: "2022-11-30".to_string(),
            license: "CC BY-NC 4.0".to_string(),
            orcid: None,
            first_author_name: "Alice Womack".to_string(),
            gender: Gender::Female,
        }];
        let df = summary_frame(&rows).unwrap();
        assert_eq!(df.height(), 1);
        let names: Vec<&str> = df
            .get_column_names()
            .into_iter()
            .map(|n| n.as_str())
            .collect();
        assert_eq!(
            names,
            vec![
                "id",
                "title",
                "posted",
                "license",
                "orcid",
                "first_author_name",
                "first_author_inferred_gender"
            ]
        );
    }
}
