//! Resource usage harvest.
//!
//! Joins the scheduler job ids found in a snakemake log with `sacct`
//! accounting and writes advisory per-tool memory/runtime ceilings for the
//! next run. Best effort throughout: without `sacct` or a parsable log the
//! overrides file is still written, as an empty skeleton with a note.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::HarvestError;
use crate::executor::latest_snakemake_log;
use crate::executor::process::run_argv;

pub const OVERRIDES_FILE: &str = "resources_overrides.yaml";
pub const SACCT_FORMAT: &str = "JobID,MaxRSS,ElapsedRaw,State,ExitCode";
const DEFAULT_SACCT_TIMEOUT: Duration = Duration::from_secs(120);

/// Inputs for one harvest.
#[derive(Debug, Clone)]
pub struct HarvestRequest {
    pub run_id: String,
    pub results_dir: PathBuf,
    pub fudge: f64,
    /// Root holding `.snakemake/log/`.
    pub repo_root: PathBuf,
    /// Explicit log; the latest one under `repo_root` otherwise.
    pub snakemake_log: Option<PathBuf>,
    /// Program (plus leading args) used to query accounting.
    pub sacct_command: Vec<String>,
    pub timeout: Duration,
}

impl HarvestRequest {
    pub fn new(run_id: impl Into<String>, results_dir: impl Into<PathBuf>, fudge: f64) -> Self {
        Self {
            run_id: run_id.into(),
            results_dir: results_dir.into(),
            fudge,
            repo_root: PathBuf::from("."),
            snakemake_log: None,
            sacct_command: vec!["sacct".to_string()],
            timeout: DEFAULT_SACCT_TIMEOUT,
        }
    }

    pub fn output_path(&self) -> PathBuf {
        self.results_dir
            .join(&self.run_id)
            .join("agent")
            .join(OVERRIDES_FILE)
    }
}

/// One accounting row, keyed by base job id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SacctRow {
    pub job_id: String,
    pub max_rss_mb: Option<u64>,
    pub elapsed_min: Option<u64>,
    pub state: String,
    pub exit_code: String,
}

/// Suggested ceilings for one tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mem_mb_max: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_max: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestSource {
    pub sacct: bool,
    pub snakemake_log: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Estimation {
    pub overrides: BTreeMap<String, ToolOverride>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Resources {
    pub estimation: Estimation,
}

/// On-disk overrides document. Field order is the written order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverridesReport {
    pub run_id: String,
    pub generated_by: String,
    pub source: HarvestSource,
    pub notes: Vec<String>,
    pub resources: Resources,
}

impl OverridesReport {
    pub fn overrides(&self) -> &BTreeMap<String, ToolOverride> {
        &self.resources.estimation.overrides
    }
}

/// Result of a harvest: the written file and what went into it.
#[derive(Debug, Clone)]
pub struct HarvestOutcome {
    pub path: PathBuf,
    pub report: OverridesReport,
}

struct LogPatterns {
    submitted: Regex,
    rule: Regex,
    jobid: Regex,
}

impl LogPatterns {
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            submitted: RegexBuilder::new(
                r#"Submitted job (?P<jobid>\d+) with external jobid '?"?(?P<ext>\d+)"#,
            )
            .case_insensitive(true)
            .build()?,
            rule: Regex::new(r"^(?:local)?rule\s+(?P<rule>[A-Za-z0-9_]+):\s*$")?,
            jobid: Regex::new(r"^\s*jobid:\s*(?P<jobid>\d+)\s*$")?,
        })
    }
}

/// Map external scheduler job ids to rule names.
pub fn parse_snakemake_log(text: &str) -> Result<BTreeMap<String, String>, HarvestError> {
    let patterns = LogPatterns::new()?;

    let mut jobid_to_rule: BTreeMap<&str, &str> = BTreeMap::new();
    let mut current_rule: Option<&str> = None;
    for line in text.lines() {
        if let Some(caps) = patterns.rule.captures(line) {
            current_rule = caps.name("rule").map(|m| m.as_str());
            continue;
        }
        let Some(rule) = current_rule else { continue };
        if let Some(id) = patterns.jobid.captures(line).and_then(|c| c.name("jobid")) {
            jobid_to_rule.insert(id.as_str(), rule);
        }
    }

    let mut ext_to_rule = BTreeMap::new();
    for line in text.lines() {
        let Some(caps) = patterns.submitted.captures(line) else {
            continue;
        };
        let (Some(internal), Some(ext)) = (caps.name("jobid"), caps.name("ext")) else {
            continue;
        };
        if let Some(rule) = jobid_to_rule.get(internal.as_str()) {
            ext_to_rule.insert(ext.as_str().to_string(), rule.to_string());
        }
    }
    Ok(ext_to_rule)
}

/// `MaxRSS` to whole megabytes, rounding up. A bare number is kilobytes.
pub fn parse_rss_mb(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let (num, unit) = match raw.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => (&raw[..raw.len() - 1], c.to_ascii_uppercase()),
        _ => (raw, 'K'),
    };
    if num.is_empty() || !num.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    let value: f64 = num.parse().ok()?;
    let factor = match unit {
        'K' => 1.0 / 1024.0,
        'M' => 1.0,
        'G' => 1024.0,
        'T' => 1024.0 * 1024.0,
        'P' => 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };
    Some((value * factor).ceil() as u64)
}

/// `ElapsedRaw` seconds to whole minutes, rounding up.
pub fn seconds_to_minutes(raw: &str) -> Option<u64> {
    let seconds: f64 = raw.trim().parse().ok()?;
    if seconds < 0.0 {
        return None;
    }
    Some((seconds.trunc() / 60.0).ceil() as u64)
}

/// Parse `sacct -P -n` output. Step rows (`123.batch`) fold into their job.
pub fn parse_sacct_rows(stdout: &str) -> BTreeMap<String, SacctRow> {
    let mut rows = BTreeMap::new();
    for line in stdout.lines() {
        let parts: Vec<&str> = line.split('|').collect();
        if parts.len() < 5 {
            continue;
        }
        let base = parts[0].trim().split('.').next().unwrap_or_default().to_string();
        rows.insert(
            base.clone(),
            SacctRow {
                job_id: base,
                max_rss_mb: parse_rss_mb(parts[1]),
                elapsed_min: seconds_to_minutes(parts[2]),
                state: parts[3].trim().to_string(),
                exit_code: parts[4].trim().to_string(),
            },
        );
    }
    rows
}

/// Pipeline tool whose resource block a rule draws from.
pub fn rule_to_tool(rule: &str) -> &'static str {
    match rule {
        "preprocess" => "fastp",
        "host_removal" => "bowtie2",
        "assembly" => "megahit",
        "vsearch" => "vsearch",
        "detect_virsorter" => "virsorter",
        "detect_genomad" => "genomad",
        "checkv" => "checkv",
        "busco_filter" => "busco",
        "viruslib_dedup" => "vclust",
        "viruslib_annotation" => "phabox2",
        "downstream_quant" => "coverm",
        "combine" | "high_quality" | "viruslib_merge" | "agent_decision_log" => "gmv",
        _ => "default",
    }
}

/// Per-tool maxima scaled by `fudge`. Zero observations produce no ceiling.
pub fn compute_overrides(
    ext_to_rule: &BTreeMap<String, String>,
    rows: &BTreeMap<String, SacctRow>,
    fudge: f64,
) -> BTreeMap<String, ToolOverride> {
    let mut rss: BTreeMap<&str, u64> = BTreeMap::new();
    let mut elapsed: BTreeMap<&str, u64> = BTreeMap::new();
    for (ext, rule) in ext_to_rule {
        let Some(row) = rows.get(ext) else { continue };
        let tool = rule_to_tool(rule);
        if let Some(mb) = row.max_rss_mb {
            let slot = rss.entry(tool).or_default();
            *slot = (*slot).max(mb);
        }
        if let Some(min) = row.elapsed_min {
            let slot = elapsed.entry(tool).or_default();
            *slot = (*slot).max(min);
        }
    }

    let scale = |v: u64| (v as f64 * fudge).ceil() as u64;
    let tools: BTreeSet<&str> = rss.keys().chain(elapsed.keys()).copied().collect();
    let mut out = BTreeMap::new();
    for tool in tools {
        let ov = ToolOverride {
            mem_mb_max: rss.get(tool).filter(|v| **v > 0).map(|v| scale(*v)),
            runtime_max: elapsed.get(tool).filter(|v| **v > 0).map(|v| scale(*v)),
        };
        if ov.mem_mb_max.is_some() || ov.runtime_max.is_some() {
            out.insert(tool.to_string(), ov);
        }
    }
    out
}

/// Whether `program` resolves to an executable, either as a path or on `PATH`.
fn program_available(program: &str) -> bool {
    match which::which(program) {
        Ok(path) => {
            tracing::debug!(program, resolved = %path.display(), "Found program");
            true
        }
        Err(e) => {
            tracing::debug!(program, "Program not available: {}", e);
            false
        }
    }
}

async fn query_sacct(
    request: &HarvestRequest,
    job_ids: &[&String],
) -> BTreeMap<String, SacctRow> {
    let ids = job_ids
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(",");
    let mut argv = request.sacct_command.clone();
    argv.extend(
        ["-X", "-P", "-n", "-j", ids.as_str(), "-o", SACCT_FORMAT]
            .into_iter()
            .map(str::to_string),
    );
    let cwd = &request.repo_root;
    match run_argv(&argv, cwd, &BTreeMap::new(), request.timeout).await {
        Ok(output) if output.returncode == 0 => parse_sacct_rows(&output.stdout),
        Ok(output) => {
            tracing::warn!(returncode = output.returncode, "sacct exited non-zero");
            BTreeMap::new()
        }
        Err(e) => {
            tracing::warn!("sacct query failed: {}", e);
            BTreeMap::new()
        }
    }
}

/// Run a harvest and write the overrides file.
pub async fn harvest_resources(request: &HarvestRequest) -> Result<HarvestOutcome, HarvestError> {
    let log_path = match &request.snakemake_log {
        Some(path) => Some(path.clone()),
        None => latest_snakemake_log(&request.repo_root.join(".snakemake").join("log")),
    };

    let have_sacct = request
        .sacct_command
        .first()
        .is_some_and(|p| program_available(p));

    let ext_to_rule = match &log_path {
        Some(path) if path.is_file() => {
            let bytes = tokio::fs::read(path).await?;
            parse_snakemake_log(&String::from_utf8_lossy(&bytes))?
        }
        _ => BTreeMap::new(),
    };

    let mut notes = Vec::new();
    let mut overrides = BTreeMap::new();
    if !have_sacct {
        notes.push("sacct not found: wrote an overrides skeleton without learned values.".to_string());
    } else if ext_to_rule.is_empty() {
        notes.push(
            "No SLURM job ids could be parsed from the snakemake log: wrote an overrides skeleton."
                .to_string(),
        );
    } else {
        let ids: Vec<&String> = ext_to_rule.keys().collect();
        let rows = query_sacct(request, &ids).await;
        if rows.is_empty() {
            notes.push("sacct returned nothing or failed: wrote an overrides skeleton.".to_string());
        } else {
            overrides = compute_overrides(&ext_to_rule, &rows, request.fudge);
            notes.push(format!(
                "sacct harvest complete: mem/runtime ceilings suggested for {} tool(s).",
                overrides.len()
            ));
        }
    }

    let report = OverridesReport {
        run_id: request.run_id.clone(),
        generated_by: "gmv agent harvest".to_string(),
        source: HarvestSource {
            sacct: have_sacct,
            snakemake_log: log_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        },
        notes,
        resources: Resources {
            estimation: Estimation { overrides },
        },
    };

    let path = request.output_path();
    let yaml = serde_yaml::to_string(&report)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| HarvestError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(&path, yaml).map_err(|source| HarvestError::Write {
        path: path.clone(),
        source,
    })?;

    tracing::info!(
        path = %path.display(),
        tools = report.overrides().len(),
        sacct = have_sacct,
        "Wrote resource overrides"
    );
    Ok(HarvestOutcome { path, report })
}
