use std::collections::BTreeMap;
use std::fmt;

use crate::error::ParseWarning;

/// Scheduler-reported health of a node, reduced to the states the
/// availability math cares about. Anything unrecognized maps to `Other`
/// so new scheduler state strings degrade gracefully.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NodeState {
    Idle,
    Allocated,
    Mixed,
    Drain,
    Down,
    #[default]
    Other,
}

impl NodeState {
    /// Derives the state from a raw token such as `MIXED+DRAIN` or `DOWN*`.
    ///
    /// `DOWN` wins over `DRAIN` when both are present; flag suffixes
    /// (`*`, `~`, `#`, ...) and compound `+` forms are tolerated.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.to_ascii_uppercase();
        if raw.contains("DOWN") {
            return NodeState::Down;
        }

        if raw.contains("DRAIN") || raw.contains("DRNG") {
            return NodeState::Drain;
        }

        let base: String = raw.chars().take_while(char::is_ascii_alphabetic).collect();
        match base.as_str() {
            "IDLE" => NodeState::Idle,
            "ALLOCATED" | "ALLOC" => NodeState::Allocated,
            "MIXED" | "MIX" => NodeState::Mixed,
            _ => NodeState::Other,
        }
    }

    /// Returns true if the node may contribute to true availability
    pub fn is_healthy(self) -> bool {
        !matches!(self, NodeState::Drain | NodeState::Down)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let label = match self {
            NodeState::Idle => "IDLE",
            NodeState::Allocated => "ALLOCATED",
            NodeState::Mixed => "MIXED",
            NodeState::Drain => "DRAIN",
            NodeState::Down => "DOWN",
            NodeState::Other => "OTHER",
        };

        fmt::Display::fmt(label, f)
    }
}

/// One `(node, gpu_type)` observation from a single collection cycle.
///
/// A node carrying several GPU GRES types yields one record per type,
/// sharing `name` and `state`; a node with no GPUs yields a single record
/// with an empty `gpu_type`. Records are rebuilt in full every cycle and
/// never mutated in place.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeRecord {
    pub name: String,
    pub state: NodeState,
    pub gpu_type: String,
    pub gpu_total: usize,
    pub gpu_used: usize,
}

/// Parses the verbatim output of `scontrol show node -d`.
///
/// Each stanza opens with a `NodeName=` line and is parsed independently;
/// a stanza missing its required fields is skipped and reported as a
/// warning rather than aborting the parse. Unknown keys are ignored.
pub fn parse_nodes(raw: &str) -> (Vec<NodeRecord>, Vec<ParseWarning>) {
    let mut records = Vec::new();
    let mut warnings = Vec::new();

    let mut stanza: Option<Stanza> = None;
    for line in raw.lines() {
        let line = line.trim_start();
        if line.starts_with("NodeName=") {
            if let Some(stanza) = stanza.take() {
                stanza.flush(&mut records, &mut warnings);
            }

            stanza = Some(Stanza::default());
        }

        let Some(stanza) = stanza.as_mut() else {
            continue;
        };

        // Lines carry whitespace-separated Key=Value tokens; free-text
        // values such as Reason= produce key-less tokens that fall through.
        for token in line.split_whitespace() {
            if let Some((key, value)) = token.split_once('=') {
                match key {
                    "NodeName" => stanza.name = value.to_string(),
                    "State" => stanza.state = Some(NodeState::parse(value)),
                    "Gres" => stanza.gres = value.to_string(),
                    "GresUsed" => stanza.gres_used = value.to_string(),
                    _ => {}
                }
            }
        }
    }

    if let Some(stanza) = stanza.take() {
        stanza.flush(&mut records, &mut warnings);
    }

    (records, warnings)
}

#[derive(Debug, Default)]
struct Stanza {
    name: String,
    state: Option<NodeState>,
    gres: String,
    gres_used: String,
}

impl Stanza {
    /// Converts the stanza into records, one per GPU type
    fn flush(self, records: &mut Vec<NodeRecord>, warnings: &mut Vec<ParseWarning>) {
        if self.name.is_empty() {
            warnings.push(ParseWarning::new(None, "stanza without node name"));
            return;
        }

        let Some(state) = self.state else {
            warnings.push(ParseWarning::new(Some(self.name.as_str()), "stanza without State field"));
            return;
        };

        let totals = parse_gres(&self.name, &self.gres, warnings);
        let mut used = parse_gres(&self.name, &self.gres_used, warnings);

        if totals.is_empty() {
            // Node without GPUs; kept so the parse stays lossless, excluded
            // from availability by its zero total.
            records.push(NodeRecord {
                name: self.name,
                state,
                gpu_type: String::new(),
                gpu_total: 0,
                gpu_used: 0,
            });
            return;
        }

        for (gpu_type, gpu_total) in totals {
            let mut gpu_used = used.remove(&gpu_type).unwrap_or(0);
            if gpu_used > gpu_total {
                warnings.push(ParseWarning::new(
                    Some(self.name.as_str()),
                    format!(
                        "GresUsed reports {} of {} {:?} GPUs; clamping",
                        gpu_used, gpu_total, gpu_type
                    ),
                ));
                gpu_used = gpu_total;
            }

            records.push(NodeRecord {
                name: self.name.clone(),
                state,
                gpu_type,
                gpu_total,
                gpu_used,
            });
        }

        for gpu_type in used.into_keys() {
            warnings.push(ParseWarning::new(
                Some(self.name.as_str()),
                format!("GresUsed reports unknown GPU type {:?}", gpu_type),
            ));
        }
    }
}

/// Splits a GRES string into per-type GPU counts.
///
/// Entries look like `gpu:a100:8(S:0-1)`, `gpu:4`, or non-GPU resources
/// that are skipped; a typeless `gpu:<count>` maps to the type `"gpu"`.
/// Repeated types accumulate so no entry is ever silently dropped.
fn parse_gres(
    node: &str,
    value: &str,
    warnings: &mut Vec<ParseWarning>,
) -> BTreeMap<String, usize> {
    let mut gpus = BTreeMap::new();

    for entry in value.split(',') {
        let mut fields = entry.splitn(3, ':');
        if fields.next() != Some("gpu") {
            continue;
        }

        let (gpu_type, count) = match (fields.next(), fields.next()) {
            (Some(gpu_type), Some(count)) => (gpu_type, count),
            (Some(count), None) => ("gpu", count),
            _ => continue,
        };

        // Trim socket/index annotations, e.g. `8(IDX:0-3)`
        let (count, _) = count.split_once('(').unwrap_or((count, ""));
        match count.parse::<usize>() {
            Ok(count) => *gpus.entry(gpu_type.to_string()).or_default() += count,
            Err(_) => warnings.push(ParseWarning::new(
                Some(node),
                format!("invalid GPU count in GRES entry {:?}", entry),
            )),
        }
    }

    gpus
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_NODES: &str = "\
NodeName=gpu01 Arch=x86_64 CoresPerSocket=32
   CPUAlloc=64 CPUTot=128 CPULoad=12.34
   Gres=gpu:a100:8(S:0-1)
   GresUsed=gpu:a100:4(IDX:0-3)
   NodeAddr=gpu01 NodeHostName=gpu01 Version=23.02.5
   State=MIXED ThreadsPerCore=2 TmpDisk=0 Weight=1

NodeName=gpu02 Arch=x86_64 CoresPerSocket=32
   Gres=gpu:h100:4
   GresUsed=gpu:h100:0
   State=IDLE+DRAIN Reason=bad DIMM [root@2024-01-01]
";

    #[test]
    fn parses_well_formed_stanzas() {
        let (records, warnings) = parse_nodes(TWO_NODES);
        assert!(warnings.is_empty(), "{:?}", warnings);
        assert_eq!(
            records,
            vec![
                NodeRecord {
                    name: "gpu01".to_string(),
                    state: NodeState::Mixed,
                    gpu_type: "a100".to_string(),
                    gpu_total: 8,
                    gpu_used: 4,
                },
                NodeRecord {
                    name: "gpu02".to_string(),
                    state: NodeState::Drain,
                    gpu_type: "h100".to_string(),
                    gpu_total: 4,
                    gpu_used: 0,
                },
            ]
        );
    }

    #[test]
    fn malformed_stanza_is_skipped_with_warning() {
        let raw = "\
NodeName=broken01
   Gres=gpu:a100:8
NodeName=gpu03
   Gres=gpu:a100:2
   GresUsed=gpu:a100:1
   State=ALLOCATED
";
        let (records, warnings) = parse_nodes(raw);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "gpu03");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].entity.as_deref(), Some("broken01"));
    }

    #[test]
    fn splits_multiple_gpu_types() {
        let raw = "\
NodeName=hybrid01
   Gres=gpu:a100:4,gpu:h100:2
   GresUsed=gpu:a100:1,gpu:h100:2
   State=MIXED
";
        let (records, warnings) = parse_nodes(raw);
        assert!(warnings.is_empty(), "{:?}", warnings);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].gpu_type, "a100");
        assert_eq!(records[0].gpu_total, 4);
        assert_eq!(records[0].gpu_used, 1);
        assert_eq!(records[1].gpu_type, "h100");
        assert_eq!(records[1].gpu_used, 2);
    }

    #[test]
    fn clamps_used_above_total() {
        let raw = "NodeName=gpu04 State=ALLOCATED Gres=gpu:a100:2 GresUsed=gpu:a100:3";
        let (records, warnings) = parse_nodes(raw);
        assert_eq!(records[0].gpu_used, records[0].gpu_total);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn flags_used_type_missing_from_totals() {
        let raw = "NodeName=gpu05 State=IDLE Gres=gpu:a100:2 GresUsed=gpu:h100:1";
        let (records, warnings) = parse_nodes(raw);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].gpu_used, 0);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn node_without_gpus_keeps_empty_type() {
        let raw = "NodeName=login01 State=IDLE Gres=(null) GresUsed=";
        let (records, warnings) = parse_nodes(raw);
        assert!(warnings.is_empty());
        assert_eq!(records.len(), 1);
        assert!(records[0].gpu_type.is_empty());
        assert_eq!(records[0].gpu_total, 0);
    }

    #[test]
    fn typeless_gres_maps_to_generic_type() {
        let raw = "NodeName=gpu06 State=IDLE Gres=gpu:4 GresUsed=gpu:1";
        let (records, _) = parse_nodes(raw);
        assert_eq!(records[0].gpu_type, "gpu");
        assert_eq!(records[0].gpu_total, 4);
        assert_eq!(records[0].gpu_used, 1);
    }

    #[test]
    fn state_tokens_reduce_to_closed_enum() {
        assert_eq!(NodeState::parse("IDLE"), NodeState::Idle);
        assert_eq!(NodeState::parse("ALLOCATED*"), NodeState::Allocated);
        assert_eq!(NodeState::parse("MIXED+DRAIN"), NodeState::Drain);
        assert_eq!(NodeState::parse("DRAINED"), NodeState::Drain);
        assert_eq!(NodeState::parse("DOWN*+DRAIN"), NodeState::Down);
        assert_eq!(NodeState::parse("COMPLETING"), NodeState::Other);
        assert_eq!(NodeState::parse("future"), NodeState::Other);
    }
}
