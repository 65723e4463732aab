//! Snapshot export of the current opportunity set: a parquet table, a markdown
//! brief and a sha256 manifest, one directory per export.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{BooleanArray, Float64Array, Int64Array, RecordBatch, StringArray, UInt32Array};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use chrono::{DateTime, Utc};
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tof_core::{AffiliateProgram, OpportunityListing, RecommendedAction};
use tof_storage::Store;
use tokio::fs;
use uuid::Uuid;

const BRIEF_TOP_N: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportManifest {
    pub schema_version: u32,
    pub generated_at: DateTime<Utc>,
    pub opportunities: usize,
    pub files: Vec<ReportManifestFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub report_dir: PathBuf,
    pub opportunities: usize,
    pub brief_path: PathBuf,
    pub manifest_path: PathBuf,
}

/// Opportunities joined with their threads, best score first.
pub async fn load_listings(store: &dyn Store) -> Result<Vec<OpportunityListing>> {
    let threads: HashMap<Uuid, _> = store
        .all_threads()
        .await
        .context("loading threads")?
        .into_iter()
        .map(|t| (t.id, t))
        .collect();
    let mut listings = store
        .all_opportunities()
        .await
        .context("loading opportunities")?
        .into_iter()
        .filter_map(|opportunity| {
            threads
                .get(&opportunity.thread_id)
                .cloned()
                .map(|thread| OpportunityListing { opportunity, thread })
        })
        .collect::<Vec<_>>();
    listings.sort_by(|a, b| {
        b.opportunity
            .score
            .total_cmp(&a.opportunity.score)
            .then(a.opportunity.id.cmp(&b.opportunity.id))
    });
    Ok(listings)
}

pub async fn export_report(
    store: &dyn Store,
    reports_root: &Path,
    generated_at: DateTime<Utc>,
) -> Result<ReportSummary> {
    let listings = load_listings(store).await?;
    let programs = store.list_programs().await.context("loading programs")?;

    let report_dir = reports_root.join(generated_at.format("%Y%m%dT%H%M%SZ").to_string());
    fs::create_dir_all(&report_dir)
        .await
        .with_context(|| format!("creating {}", report_dir.display()))?;

    let parquet_path = report_dir.join("opportunities.parquet");
    write_opportunities_parquet(&parquet_path, &listings, &programs)?;

    let brief_path = report_dir.join("daily_brief.md");
    fs::write(&brief_path, render_daily_brief(&listings, &programs, generated_at))
        .await
        .with_context(|| format!("writing {}", brief_path.display()))?;

    let manifest = ReportManifest {
        schema_version: 1,
        generated_at,
        opportunities: listings.len(),
        files: vec![
            manifest_entry("opportunities", &report_dir, &parquet_path)?,
            manifest_entry("daily_brief", &report_dir, &brief_path)?,
        ],
    };
    let manifest_path = report_dir.join("manifest.json");
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing report manifest")?;
    fs::write(&manifest_path, bytes)
        .await
        .with_context(|| format!("writing {}", manifest_path.display()))?;

    Ok(ReportSummary {
        report_dir,
        opportunities: listings.len(),
        brief_path,
        manifest_path,
    })
}

fn program_names(listing: &OpportunityListing, programs: &HashMap<Uuid, &str>) -> String {
    listing
        .opportunity
        .matched_programs
        .iter()
        .filter_map(|id| programs.get(id).copied())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn render_daily_brief(
    listings: &[OpportunityListing],
    programs: &[AffiliateProgram],
    generated_at: DateTime<Utc>,
) -> String {
    let names: HashMap<Uuid, &str> = programs.iter().map(|p| (p.id, p.name.as_str())).collect();

    let mut by_action: BTreeMap<&str, usize> = BTreeMap::new();
    let mut by_source: BTreeMap<&str, usize> = BTreeMap::new();
    for listing in listings {
        *by_action.entry(listing.opportunity.action.as_str()).or_default() += 1;
        *by_source.entry(listing.thread.source.as_str()).or_default() += 1;
    }
    let serp_matches = listings.iter().filter(|l| l.opportunity.serp_match).count();

    let mut lines = vec![
        "# TOF Daily Brief".to_string(),
        String::new(),
        format!("- Generated: {}", generated_at.to_rfc3339()),
        format!("- Opportunities: {}", listings.len()),
        format!("- Ranked in search: {serp_matches}"),
        String::new(),
        "## Actions".to_string(),
    ];
    lines.extend(by_action.iter().map(|(k, v)| format!("- {k}: {v}")));
    lines.push(String::new());
    lines.push("## Sources".to_string());
    lines.extend(by_source.iter().map(|(k, v)| format!("- {k}: {v}")));
    lines.push(String::new());
    lines.push("## Comment Now".to_string());

    let to_comment = listings
        .iter()
        .filter(|l| l.opportunity.action == RecommendedAction::Comment)
        .take(BRIEF_TOP_N)
        .collect::<Vec<_>>();
    if to_comment.is_empty() {
        lines.push("_Nothing above the comment threshold._".to_string());
    }
    for listing in to_comment {
        lines.push(format!(
            "- [{}]({}) ({}, score {:.2}, programs: {})",
            listing.thread.title,
            listing.thread.permalink,
            listing.thread.source,
            listing.opportunity.score,
            program_names(listing, &names)
        ));
    }
    lines.push(String::new());
    lines.join("\n")
}

fn write_opportunities_parquet(
    path: &PathBuf,
    listings: &[OpportunityListing],
    programs: &[AffiliateProgram],
) -> Result<()> {
    let names: HashMap<Uuid, &str> = programs.iter().map(|p| (p.id, p.name.as_str())).collect();
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("opportunity_id", DataType::Utf8, false),
        ArrowField::new("thread_id", DataType::Utf8, false),
        ArrowField::new("source", DataType::Utf8, false),
        ArrowField::new("title", DataType::Utf8, false),
        ArrowField::new("permalink", DataType::Utf8, false),
        ArrowField::new("score", DataType::Float64, false),
        ArrowField::new("intent", DataType::Utf8, false),
        ArrowField::new("action", DataType::Utf8, false),
        ArrowField::new("serp_match", DataType::Boolean, false),
        ArrowField::new("matched_programs", DataType::UInt32, false),
        ArrowField::new("program_names", DataType::Utf8, false),
        ArrowField::new("upvotes", DataType::Int64, false),
        ArrowField::new("manual_override", DataType::Boolean, false),
        ArrowField::new("computed_at", DataType::Utf8, false),
    ]));

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(string_column(listings, |l| l.opportunity.id.to_string())),
            Arc::new(string_column(listings, |l| l.thread.id.to_string())),
            Arc::new(string_column(listings, |l| l.thread.source.clone())),
            Arc::new(string_column(listings, |l| l.thread.title.clone())),
            Arc::new(string_column(listings, |l| l.thread.permalink.clone())),
            Arc::new(Float64Array::from(
                listings.iter().map(|l| l.opportunity.score).collect::<Vec<_>>(),
            )),
            Arc::new(string_column(listings, |l| l.opportunity.intent.as_str().to_string())),
            Arc::new(string_column(listings, |l| l.opportunity.action.as_str().to_string())),
            Arc::new(BooleanArray::from(
                listings.iter().map(|l| l.opportunity.serp_match).collect::<Vec<_>>(),
            )),
            Arc::new(UInt32Array::from(
                listings
                    .iter()
                    .map(|l| l.opportunity.matched_programs.len() as u32)
                    .collect::<Vec<_>>(),
            )),
            Arc::new(string_column(listings, |l| program_names(l, &names))),
            Arc::new(Int64Array::from(
                listings.iter().map(|l| l.thread.upvotes).collect::<Vec<_>>(),
            )),
            Arc::new(BooleanArray::from(
                listings.iter().map(|l| l.opportunity.manual_override).collect::<Vec<_>>(),
            )),
            Arc::new(string_column(listings, |l| l.opportunity.computed_at.to_rfc3339())),
        ],
    )
    .context("building opportunities record batch")?;
    write_parquet(path, batch)
}

fn string_column(
    listings: &[OpportunityListing],
    value: impl Fn(&OpportunityListing) -> String,
) -> StringArray {
    StringArray::from(listings.iter().map(|l| Some(value(l))).collect::<Vec<_>>())
}

fn write_parquet(path: &PathBuf, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn manifest_entry(name: &str, report_dir: &Path, path: &Path) -> Result<ReportManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let sha256 = hex::encode(Sha256::digest(&bytes));
    let rel = path
        .strip_prefix(report_dir)
        .unwrap_or(path)
        .display()
        .to_string();
    Ok(ReportManifestFile {
        name: name.to_string(),
        path: rel,
        sha256,
        bytes: bytes.len() as u64,
    })
}
