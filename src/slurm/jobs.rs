use std::fmt;

use serde::{Deserialize, Deserializer};

use crate::error::ParseWarning;

/// State of a job as reported by the queue; only running and pending jobs
/// feed the aggregate views, everything else collapses to `Other`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Running,
    Pending,
    Other,
}

impl JobState {
    fn from_str<'de, D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: &str = Deserialize::deserialize(deserializer)?;
        Ok(match value.trim() {
            "RUNNING" => JobState::Running,
            "PENDING" => JobState::Pending,
            _ => JobState::Other,
        })
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let label = match self {
            JobState::Running => "RUNNING",
            JobState::Pending => "PENDING",
            JobState::Other => "OTHER",
        };

        fmt::Display::fmt(label, f)
    }
}

/// One `(job, gpu_type)` observation from a single collection cycle.
///
/// Like nodes, a job requesting several GPU types yields one record per
/// type, sharing `id`; jobs without a GPU request are dropped at parse
/// time since no aggregate view consumes them.
#[derive(Clone, Debug, PartialEq)]
pub struct JobRecord {
    pub id: String,
    pub user: String,
    pub state: JobState,
    pub gpu_type: String,
    pub gpu_count: usize,
    /// Requested wall-clock limit in hours; 1.0 when absent or unparseable
    pub time_limit_hours: f64,
}

/// Pipe-delimited row as emitted by `squeue --Format`
#[derive(Debug, Deserialize)]
struct RawJob {
    #[serde(rename = "JOBID")]
    id: String,
    #[serde(rename = "USER")]
    user: String,
    #[serde(rename = "STATE", deserialize_with = "JobState::from_str")]
    state: JobState,
    /// GPU request, e.g. `gres/gpu:a100:2`
    #[serde(rename = "TRES_PER_NODE")]
    tres: String,
    #[serde(rename = "TIME_LIMIT", deserialize_with = "time_limit_from_str")]
    time_limit_hours: f64,
}

/// Parses the verbatim output of `squeue --Format=...` (see [`squeue_format`]).
///
/// Rows that fail to deserialize are skipped and surfaced as warnings;
/// the parse itself never aborts.
pub fn parse_jobs(raw: &str) -> (Vec<JobRecord>, Vec<ParseWarning>) {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'|')
        .trim(csv::Trim::All)
        .from_reader(raw.as_bytes());

    let mut records = Vec::new();
    let mut warnings = Vec::new();
    for (idx, result) in reader.deserialize::<RawJob>().enumerate() {
        match result {
            Ok(job) => explode(job, &mut records, &mut warnings),
            Err(err) => warnings.push(ParseWarning::new(
                None,
                format!("skipping job row {}: {}", idx + 1, err),
            )),
        }
    }

    (records, warnings)
}

/// Expands a raw row into one record per requested GPU type
fn explode(job: RawJob, records: &mut Vec<JobRecord>, warnings: &mut Vec<ParseWarning>) {
    let gpus = parse_tres_gpus(&job.tres);
    if gpus.len() > 1 {
        warnings.push(ParseWarning::new(
            Some(job.id.as_str()),
            "job requests multiple GPU types; treating each independently",
        ));
    }

    for (gpu_type, gpu_count) in gpus {
        records.push(JobRecord {
            id: job.id.clone(),
            user: job.user.clone(),
            state: job.state,
            // The scheduler leaves untyped requests open to any GPU model
            gpu_type: gpu_type.unwrap_or_else(|| "Any".to_string()),
            gpu_count,
            time_limit_hours: job.time_limit_hours,
        });
    }
}

/// Extracts `(gpu_type, count)` pairs from a TRES request string.
///
/// Accepts `gres/gpu:a100:2`, `gpu:2`, and bare `gpu:a100` (count 1);
/// non-GPU resources and `N/A` yield nothing.
fn parse_tres_gpus(tres: &str) -> Vec<(Option<String>, usize)> {
    let mut gpus = Vec::new();

    for resource in tres.split(',') {
        let resource = resource.strip_prefix("gres/").unwrap_or(resource);
        let fields: Vec<_> = resource.splitn(3, ':').collect();
        if fields.first() != Some(&"gpu") {
            continue;
        }

        match &fields[1..] {
            [] => gpus.push((None, 1)),
            [value] => {
                let (value, _) = value.split_once('(').unwrap_or((value, ""));
                match value.parse::<usize>() {
                    Ok(count) => gpus.push((None, count)),
                    Err(_) => gpus.push((Some(value.to_string()), 1)),
                }
            }
            [gpu_type, count] => {
                let (count, _) = count.split_once('(').unwrap_or((count, ""));
                gpus.push((
                    Some(gpu_type.to_string()),
                    count.parse::<usize>().unwrap_or(1),
                ));
            }
            _ => {}
        }
    }

    gpus
}

/// Parses a `[D-]HH:MM:SS` / `MM:SS` time limit into hours, defaulting to
/// one hour on `UNLIMITED`, `N/A`, and anything else unparseable.
fn time_limit_from_str<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value: &str = Deserialize::deserialize(deserializer)?;
    Ok(parse_time_limit(value).unwrap_or(1.0))
}

fn parse_time_limit(value: &str) -> Option<f64> {
    let (days, value) = match value.split_once('-') {
        Some((days, rest)) => (days.parse::<u64>().ok()?, rest),
        None => (0, value),
    };

    let fields: Vec<_> = value.split(':').collect();
    let (hours, minutes) = match &fields[..] {
        [h, m, _s] => (h.parse::<u64>().ok()?, m.parse::<u64>().ok()?),
        [m, _s] => (0, m.parse::<u64>().ok()?),
        _ => return None,
    };

    let total = days as f64 * 24.0 + hours as f64 + minutes as f64 / 60.0;
    if total > 0.0 {
        Some(total)
    } else {
        None
    }
}

/// Generates the parameter for the `--Format` command-line option for `squeue`
pub fn squeue_format() -> String {
    format_string(["JobID", "UserName", "State", "tres-per-node", "TimeLimit"].iter())
}

/// Converts an iterator of &str to a ``--Format`` argument
fn format_string<'a, I, S>(iter: I) -> String
where
    I: Iterator<Item = &'a S>,
    S: ?Sized + AsRef<str> + 'a,
{
    iter
        // Remove limit on field length (defaults to 20)
        .map(|v| format!("{}:0", v.as_ref()))
        .collect::<Vec<_>>()
        // Join fields by a character that does not potentially appear in values
        .join("|,")
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUEUE: &str = "\
JOBID|USER|STATE|TRES_PER_NODE|TIME_LIMIT
101|alice|RUNNING|gres/gpu:a100:2|1-00:00:00
102|bob|PENDING|gres/gpu:h100:4|4:00:00
103|carol|COMPLETING|gres/gpu:a100:1|30:00
";

    #[test]
    fn parses_well_formed_rows() {
        let (records, warnings) = parse_jobs(QUEUE);
        assert!(warnings.is_empty(), "{:?}", warnings);
        assert_eq!(records.len(), 3);

        assert_eq!(records[0].id, "101");
        assert_eq!(records[0].state, JobState::Running);
        assert_eq!(records[0].gpu_type, "a100");
        assert_eq!(records[0].gpu_count, 2);
        assert_eq!(records[0].time_limit_hours, 24.0);

        assert_eq!(records[1].state, JobState::Pending);
        assert_eq!(records[1].time_limit_hours, 4.0);

        // Unrecognized states degrade to Other instead of failing the row
        assert_eq!(records[2].state, JobState::Other);
        assert_eq!(records[2].time_limit_hours, 0.5);
    }

    #[test]
    fn malformed_row_is_skipped_with_warning() {
        let raw = "\
JOBID|USER|STATE|TRES_PER_NODE|TIME_LIMIT
bad row without delimiters
104|dave|RUNNING|gres/gpu:a100:1|2:00:00
";
        let (records, warnings) = parse_jobs(raw);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "104");
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn job_without_gpus_is_dropped() {
        let raw = "\
JOBID|USER|STATE|TRES_PER_NODE|TIME_LIMIT
105|erin|RUNNING|N/A|1:00:00
";
        let (records, warnings) = parse_jobs(raw);
        assert!(records.is_empty());
        assert!(warnings.is_empty());
    }

    #[test]
    fn typeless_request_maps_to_any() {
        let raw = "\
JOBID|USER|STATE|TRES_PER_NODE|TIME_LIMIT
106|frank|PENDING|gpu:4|12:00:00
";
        let (records, _) = parse_jobs(raw);
        assert_eq!(records[0].gpu_type, "Any");
        assert_eq!(records[0].gpu_count, 4);
    }

    #[test]
    fn multiple_gpu_types_yield_one_record_each() {
        let raw = "\
JOBID|USER|STATE|TRES_PER_NODE|TIME_LIMIT
107|grace|RUNNING|gres/gpu:a100:2,gres/gpu:h100:1|1:00:00
";
        let (records, warnings) = parse_jobs(raw);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, records[1].id);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn time_limits() {
        assert_eq!(parse_time_limit("2-00:00:00"), Some(48.0));
        assert_eq!(parse_time_limit("1:30:00"), Some(1.5));
        assert_eq!(parse_time_limit("30:00"), Some(0.5));
        assert_eq!(parse_time_limit("UNLIMITED"), None);
        assert_eq!(parse_time_limit("N/A"), None);
        assert_eq!(parse_time_limit("0:00"), None);
    }

    #[test]
    fn tres_variants() {
        assert_eq!(
            parse_tres_gpus("gres/gpu:a100:2"),
            vec![(Some("a100".to_string()), 2)]
        );
        assert_eq!(parse_tres_gpus("gpu:3"), vec![(None, 3)]);
        assert_eq!(
            parse_tres_gpus("gpu:h100"),
            vec![(Some("h100".to_string()), 1)]
        );
        assert_eq!(parse_tres_gpus("cpu=4,mem=16G"), Vec::new());
    }
}
