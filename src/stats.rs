//! Time bucketing and the aggregate trend tables.
//!
//! Grouping and cumulative sums run over `BTreeMap`s keyed by the bucket
//! string, whose lexicographic order is calendar order within a century;
//! polars only serializes the finished tables.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File};
use std::path::Path;

use chrono::{Datelike, Local};
use polars::prelude::*;
use tracing::info;

use crate::error::Result;
use crate::gender::{self, Gender};

/// One observation of the bucketed table. `identifier` is the cleaned
/// ORCID when the row has a valid one; identifier-based aggregates use
/// only rows where it is present.
#[derive(Debug, Clone)]
pub struct StatRow {
    pub bucket: String,
    pub identifier: Option<String>,
    pub license: String,
    pub gender: Gender,
}

/// Bucket key for a `YYYY-MM-DD` date string: two-digit year and
/// zero-padded month, e.g. `23-01`. Derived by splitting on `-`; exactly
/// this format, since every downstream chronological sort relies on its
/// lexicographic order.
pub fn bucket(posted: &str) -> Option<String> {
    let mut parts = posted.split('-');
    let year: i32 = parts.next()?.trim().parse().ok()?;
    let month: u32 = parts.next()?.trim().parse().ok()?;
    if !(1..=12).contains(&month) {
        return None;
    }
    Some(format!("{}-{:02}", year - 2000, month))
}

/// The bucket of the in-progress calendar month.
pub fn current_bucket() -> String {
    let today = Local::now().date_naive();
    format!("{}-{:02}", today.year() - 2000, today.month())
}

/// Which tables a source supports. bioRxiv rows carry no ORCID, so the
/// author-identity tables only exist for chemRxiv.
#[derive(Debug, Clone, Copy)]
pub enum TableSet {
    WithIdentifiers,
    WithoutIdentifiers,
}

pub fn write_tables(rows: &[StatRow], dir: &Path, set: TableSet) -> Result<()> {
    fs::create_dir_all(dir)?;
    let current = current_bucket();

    let papers = papers_per_month(rows);
    let months: Vec<String> = papers.keys().cloned().collect();
    let counts: Vec<u32> = papers.values().copied().collect();
    write_csv(
        df!["month" => months, "papers" => counts]?,
        &dir.join("papers_by_month.csv"),
    )?;

    let licenses = licenses_per_month(rows);
    write_csv(
        df![
            "license" => licenses.iter().map(|l| l.license.clone()).collect::<Vec<String>>(),
            "month" => licenses.iter().map(|l| l.month.clone()).collect::<Vec<String>>(),
            "papers" => licenses.iter().map(|l| l.papers).collect::<Vec<u32>>(),
            "cumulative_papers" => licenses.iter().map(|l| l.cumulative).collect::<Vec<u32>>(),
        ]?,
        &dir.join("licenses_by_month.csv"),
    )?;

    let genders = gender_counts(rows, &current);
    write_csv(
        df![
            "month" => genders.keys().cloned().collect::<Vec<String>>(),
            "male" => genders.values().map(|c| c.male).collect::<Vec<u32>>(),
            "female" => genders.values().map(|c| c.female).collect::<Vec<u32>>(),
            "unknown" => genders.values().map(|c| c.unknown).collect::<Vec<u32>>(),
        ]?,
        &dir.join("gender_by_month.csv"),
    )?;

    let shares = gender_male_share(rows, &current);
    write_csv(
        df![
            "month" => shares.iter().map(|(m, _)| m.clone()).collect::<Vec<String>>(),
            "male_percent" => shares.iter().map(|(_, p)| *p).collect::<Vec<f64>>(),
        ]?,
        &dir.join("gender_male_percentage.csv"),
    )?;

    if matches!(set, TableSet::WithIdentifiers) {
        let unique = unique_authors_per_month(rows);
        write_csv(
            df![
                "month" => unique.keys().cloned().collect::<Vec<String>>(),
                "unique_authors" => unique.values().copied().collect::<Vec<u32>>(),
            ]?,
            &dir.join("unique_authors_by_month.csv"),
        )?;

        let population = author_population(rows);
        write_csv(
            df![
                "month" => population.iter().map(|p| p.month.clone()).collect::<Vec<String>>(),
                "new_authors" => population.iter().map(|p| p.new_authors).collect::<Vec<u32>>(),
                "total_authors" => population.iter().map(|p| p.total_authors).collect::<Vec<u32>>(),
            ]?,
            &dir.join("new_authors_by_month.csv"),
        )?;

        let prolific = prolific_authors(rows, 15);
        write_csv(
            df![
                "orcid" => prolific.iter().map(|(id, _)| id.clone()).collect::<Vec<String>>(),
                "papers" => prolific.iter().map(|(_, n)| *n).collect::<Vec<u32>>(),
            ]?,
            &dir.join("prolific_authors.csv"),
        )?;
    }
    info!(path = %dir.display(), "wrote aggregate tables");
    Ok(())
}

/// Rows per bucket: publication volume per month.
pub fn papers_per_month(rows: &[StatRow]) -> BTreeMap<String, u32> {
    let mut counts: BTreeMap<String, u32> = BTreeMap::new();
    for row in rows {
        *counts.entry(row.bucket.clone()).or_default() += 1;
    }
    counts
}

/// Distinct identifiers per bucket: unique first authors per month.
pub fn unique_authors_per_month(rows: &[StatRow]) -> BTreeMap<String, u32> {
    let mut authors: BTreeMap<&str, HashSet<&str>> = BTreeMap::new();
    for row in rows {
        if let Some(identifier) = row.identifier.as_deref() {
            authors
                .entry(row.bucket.as_str())
                .or_default()
                .insert(identifier);
        }
    }
    authors
        .into_iter()
        .map(|(bucket, set)| (bucket.to_string(), set.len() as u32))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopulationPoint {
    pub month: String,
    pub new_authors: u32,
    pub total_authors: u32,
}

/// First-appearance counts per bucket and their running total: the growth
/// of the distinct-author population over time.
pub fn author_population(rows: &[StatRow]) -> Vec<PopulationPoint> {
    let mut first_seen: HashMap<&str, &str> = HashMap::new();
    for row in rows {
        let Some(identifier) = row.identifier.as_deref() else {
            continue;
        };
        match first_seen.get_mut(identifier) {
            Some(bucket) => {
                if row.bucket.as_str() < *bucket {
                    *bucket = row.bucket.as_str();
                }
            }
            None => {
                first_seen.insert(identifier, row.bucket.as_str());
            }
        }
    }
    let mut debuts: BTreeMap<&str, u32> = BTreeMap::new();
    for bucket in first_seen.into_values() {
        *debuts.entry(bucket).or_default() += 1;
    }
    let mut total = 0u32;
    debuts
        .into_iter()
        .map(|(month, new_authors)| {
            total += new_authors;
            PopulationPoint {
                month: month.to_string(),
                new_authors,
                total_authors: total,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseMonth {
    pub license: String,
    pub month: String,
    pub papers: u32,
    pub cumulative: u32,
}

/// Per-license monthly counts with a per-license running total: license
/// adoption over time, in long format ordered by license then month.
pub fn licenses_per_month(rows: &[StatRow]) -> Vec<LicenseMonth> {
    let mut counts: BTreeMap<(&str, &str), u32> = BTreeMap::new();
    for row in rows {
        *counts
            .entry((row.license.as_str(), row.bucket.as_str()))
            .or_default() += 1;
    }
    let mut out = Vec::with_capacity(counts.len());
    let mut last_license: Option<&str> = None;
    let mut running = 0u32;
    for ((license, month), papers) in &counts {
        if last_license != Some(*license) {
            last_license = Some(*license);
            running = 0;
        }
        running += papers;
        out.push(LicenseMonth {
            license: license.to_string(),
            month: month.to_string(),
            papers: *papers,
            cumulative: running,
        });
    }
    out
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenderCount {
    pub male: u32,
    pub female: u32,
    pub unknown: u32,
}

/// Per-bucket counts after folding and the andy split. The in-progress
/// month is excluded so a partially elapsed month never enters a ratio's
/// denominator.
pub fn gender_counts(rows: &[StatRow], current: &str) -> BTreeMap<String, GenderCount> {
    let kept: Vec<&StatRow> = rows.iter().filter(|r| r.bucket != current).collect();
    let mut genders: Vec<Gender> = kept.iter().map(|r| r.gender.folded()).collect();
    gender::assign_andy(&mut genders);

    let mut counts: BTreeMap<String, GenderCount> = BTreeMap::new();
    for (row, g) in kept.iter().zip(&genders) {
        let entry = counts.entry(row.bucket.clone()).or_default();
        match g {
            Gender::Male => entry.male += 1,
            Gender::Female => entry.female += 1,
            _ => entry.unknown += 1,
        }
    }
    counts
}

/// Male share of the resolved (male + female) rows per month, in percent.
/// Months with no resolved rows are omitted.
pub fn gender_male_share(rows: &[StatRow], current: &str) -> Vec<(String, f64)> {
    gender_counts(rows, current)
        .into_iter()
        .filter_map(|(month, count)| {
            let resolved = count.male + count.female;
            if resolved == 0 {
                return None;
            }
            Some((month, 100.0 * f64::from(count.male) / f64::from(resolved)))
        })
        .collect()
}

/// The most prolific first authors by row count, ties broken by
/// identifier for a deterministic table.
pub fn prolific_authors(rows: &[StatRow], top: usize) -> Vec<(String, u32)> {
    let mut counts: HashMap<&str, u32> = HashMap::new();
    for row in rows {
        if let Some(identifier) = row.identifier.as_deref() {
            *counts.entry(identifier).or_default() += 1;
        }
    }
    let mut entries: Vec<(&str, u32)> = counts.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    entries.truncate(top);
    entries
        .into_iter()
        .map(|(id, n)| (id.to_string(), n))
        .collect()
}

fn write_csv(mut df: DataFrame, path: &Path) -> Result<()> {
    let mut outf = File::create(path)?;
    CsvWriter::new(&mut outf)
        .include_header(true)
        .with_separator(b',')
        .finish(&mut df)?;
    Ok(())
}
