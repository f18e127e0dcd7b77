use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::error::ParseWarning;
use crate::slurm::{JobRecord, JobState, NodeRecord, NodeState};

/// Capacity summary for one GPU type.
///
/// `total = used + available` holds by construction; `true_available`
/// only counts capacity on healthy nodes, so `true_available <= available`.
#[derive(Clone, Debug, PartialEq)]
pub struct GpuAvailability {
    pub gpu_type: String,
    pub total: usize,
    pub used: usize,
    pub available: usize,
    pub true_available: usize,
    pub nodes_total: usize,
    pub nodes_healthy: usize,
}

impl GpuAvailability {
    pub fn usage_percent(&self) -> f64 {
        if self.total > 0 {
            self.used as f64 / self.total as f64 * 100.0
        } else {
            0.0
        }
    }
}

/// Pass-through view of one `(node, gpu_type)` pair
#[derive(Clone, Debug, PartialEq)]
pub struct NodeStatus {
    pub node: String,
    pub gpu_type: String,
    pub state: NodeState,
    pub gpu_total: usize,
    pub gpu_used: usize,
}

/// Running-job GPU usage for one `(user, gpu_type)` pair
#[derive(Clone, Debug, PartialEq)]
pub struct UserUsage {
    pub user: String,
    pub gpu_type: String,
    pub gpu_count: usize,
    pub job_count: usize,
}

/// Pending-job backlog for one GPU type
#[derive(Clone, Debug, PartialEq)]
pub struct QueueStatus {
    pub gpu_type: String,
    pub queued_jobs: usize,
    pub queued_gpus: usize,
    /// Requested GPU-hours, `gpu_count` weighted by each job's time limit
    pub queued_gpu_hours: f64,
    pub unique_users: usize,
}

/// The immutable bundle of aggregate views produced by one refresh cycle.
///
/// Published through the engine as an `Arc`; nothing downstream mutates it.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub availability: Vec<GpuAvailability>,
    pub nodes: Vec<NodeStatus>,
    pub users: Vec<UserUsage>,
    pub queue: Vec<QueueStatus>,
    /// Parse diagnostics accumulated while building this snapshot
    pub warnings: Vec<ParseWarning>,
}

impl Snapshot {
    /// GPUs available on healthy nodes, summed over all types
    pub fn total_true_available(&self) -> usize {
        self.availability.iter().map(|a| a.true_available).sum()
    }

    pub fn queued_jobs_total(&self) -> usize {
        self.queue.iter().map(|q| q.queued_jobs).sum()
    }

    pub fn queued_gpus_total(&self) -> usize {
        self.queue.iter().map(|q| q.queued_gpus).sum()
    }

    /// Users ordered by descending total GPU count, ties by name
    pub fn heavy_users(&self, limit: usize) -> Vec<(&str, usize)> {
        let mut totals: BTreeMap<&str, usize> = BTreeMap::new();
        for usage in &self.users {
            *totals.entry(usage.user.as_str()).or_default() += usage.gpu_count;
        }

        let mut totals: Vec<_> = totals.into_iter().collect();
        totals.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        totals.truncate(limit);
        totals
    }
}

/// Derives the four aggregate views from one cycle's record sets.
///
/// Grouping is order-independent and output sequences are ordered by
/// ascending `gpu_type`/`user`/`node`, so identical record sets produce
/// identical snapshots regardless of input ordering. GPU types with no
/// nodes and no jobs simply do not appear.
pub fn aggregate(nodes: &[NodeRecord], jobs: &[JobRecord], timestamp: DateTime<Utc>) -> Snapshot {
    Snapshot {
        timestamp,
        availability: availability(nodes),
        nodes: node_status(nodes),
        users: user_usage(jobs),
        queue: queue_status(jobs),
        warnings: Vec::new(),
    }
}

#[derive(Default)]
struct TypeTotals {
    total: usize,
    used: usize,
    true_available: usize,
    nodes_total: usize,
    nodes_healthy: usize,
}

fn availability(nodes: &[NodeRecord]) -> Vec<GpuAvailability> {
    let mut types: BTreeMap<&str, TypeTotals> = BTreeMap::new();

    // Nodes without GPUs of the type carry nothing to its availability
    for node in nodes.iter().filter(|node| node.gpu_total > 0) {
        let entry = types.entry(node.gpu_type.as_str()).or_default();
        entry.total += node.gpu_total;
        entry.used += node.gpu_used;
        entry.nodes_total += 1;

        // Drained and down nodes count toward capacity but never toward
        // what a new job could actually get.
        if node.state.is_healthy() {
            entry.nodes_healthy += 1;
            entry.true_available += node.gpu_total.saturating_sub(node.gpu_used);
        }
    }

    types
        .into_iter()
        .map(|(gpu_type, totals)| GpuAvailability {
            gpu_type: gpu_type.to_string(),
            total: totals.total,
            used: totals.used,
            available: totals.total.saturating_sub(totals.used),
            true_available: totals.true_available,
            nodes_total: totals.nodes_total,
            nodes_healthy: totals.nodes_healthy,
        })
        .collect()
}

fn node_status(nodes: &[NodeRecord]) -> Vec<NodeStatus> {
    let mut rows: Vec<NodeStatus> = nodes
        .iter()
        .filter(|node| !node.gpu_type.is_empty())
        .map(|node| NodeStatus {
            node: node.name.clone(),
            gpu_type: node.gpu_type.clone(),
            state: node.state,
            gpu_total: node.gpu_total,
            gpu_used: node.gpu_used,
        })
        .collect();

    rows.sort_by(|a, b| (&a.node, &a.gpu_type).cmp(&(&b.node, &b.gpu_type)));
    rows
}

fn user_usage(jobs: &[JobRecord]) -> Vec<UserUsage> {
    let mut usage: BTreeMap<(&str, &str), (usize, usize)> = BTreeMap::new();

    for job in jobs.iter().filter(|job| job.state == JobState::Running) {
        let entry = usage
            .entry((job.user.as_str(), job.gpu_type.as_str()))
            .or_default();
        entry.0 += job.gpu_count;
        entry.1 += 1;
    }

    usage
        .into_iter()
        .map(|((user, gpu_type), (gpu_count, job_count))| UserUsage {
            user: user.to_string(),
            gpu_type: gpu_type.to_string(),
            gpu_count,
            job_count,
        })
        .collect()
}

#[derive(Default)]
struct QueueTotals<'a> {
    jobs: usize,
    gpus: usize,
    gpu_hours: f64,
    users: BTreeSet<&'a str>,
}

fn queue_status(jobs: &[JobRecord]) -> Vec<QueueStatus> {
    let mut types: BTreeMap<&str, QueueTotals> = BTreeMap::new();

    for job in jobs.iter().filter(|job| job.state == JobState::Pending) {
        let entry = types.entry(job.gpu_type.as_str()).or_default();
        entry.jobs += 1;
        entry.gpus += job.gpu_count;
        entry.gpu_hours += job.gpu_count as f64 * job.time_limit_hours;
        entry.users.insert(job.user.as_str());
    }

    types
        .into_iter()
        .map(|(gpu_type, totals)| QueueStatus {
            gpu_type: gpu_type.to_string(),
            queued_jobs: totals.jobs,
            queued_gpus: totals.gpus,
            queued_gpu_hours: totals.gpu_hours,
            unique_users: totals.users.len(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, state: NodeState, gpu_type: &str, total: usize, used: usize) -> NodeRecord {
        NodeRecord {
            name: name.to_string(),
            state,
            gpu_type: gpu_type.to_string(),
            gpu_total: total,
            gpu_used: used,
        }
    }

    fn job(id: &str, user: &str, state: JobState, gpu_type: &str, count: usize) -> JobRecord {
        JobRecord {
            id: id.to_string(),
            user: user.to_string(),
            state,
            gpu_type: gpu_type.to_string(),
            gpu_count: count,
            time_limit_hours: 1.0,
        }
    }

    #[test]
    fn drained_capacity_counts_but_is_never_truly_available() {
        let nodes = vec![
            node("gpu01", NodeState::Allocated, "a100", 8, 8),
            node("gpu02", NodeState::Drain, "a100", 8, 0),
        ];

        let snapshot = aggregate(&nodes, &[], Utc::now());
        assert_eq!(
            snapshot.availability,
            vec![GpuAvailability {
                gpu_type: "a100".to_string(),
                total: 16,
                used: 8,
                available: 8,
                true_available: 0,
                nodes_total: 2,
                nodes_healthy: 1,
            }]
        );
    }

    #[test]
    fn usage_and_queue_filter_on_job_state() {
        let jobs = vec![
            job("1", "a", JobState::Running, "a100", 2),
            job("2", "a", JobState::Running, "a100", 1),
            job("3", "b", JobState::Pending, "h100", 4),
        ];

        let snapshot = aggregate(&[], &jobs, Utc::now());

        assert_eq!(
            snapshot.users,
            vec![UserUsage {
                user: "a".to_string(),
                gpu_type: "a100".to_string(),
                gpu_count: 3,
                job_count: 2,
            }]
        );
        assert_eq!(
            snapshot.queue,
            vec![QueueStatus {
                gpu_type: "h100".to_string(),
                queued_jobs: 1,
                queued_gpus: 4,
                queued_gpu_hours: 4.0,
                unique_users: 1,
            }]
        );
    }

    #[test]
    fn arithmetic_invariants_hold() {
        let nodes = vec![
            node("gpu01", NodeState::Mixed, "a100", 8, 3),
            node("gpu02", NodeState::Idle, "a100", 8, 0),
            node("gpu03", NodeState::Down, "h100", 4, 2),
            node("gpu04", NodeState::Other, "h100", 4, 4),
        ];

        let snapshot = aggregate(&nodes, &[], Utc::now());
        for row in &snapshot.availability {
            assert_eq!(row.total, row.used + row.available, "{:?}", row);
            assert!(row.true_available <= row.available, "{:?}", row);
            assert!(row.nodes_healthy <= row.nodes_total, "{:?}", row);
        }
    }

    #[test]
    fn output_is_independent_of_input_order() {
        let mut nodes = vec![
            node("gpu01", NodeState::Mixed, "a100", 8, 3),
            node("gpu02", NodeState::Drain, "h100", 4, 1),
            node("gpu03", NodeState::Idle, "a100", 8, 0),
        ];
        let mut jobs = vec![
            job("1", "a", JobState::Running, "a100", 2),
            job("2", "b", JobState::Pending, "h100", 4),
            job("3", "b", JobState::Running, "a100", 1),
        ];

        let timestamp = Utc::now();
        let forward = aggregate(&nodes, &jobs, timestamp);

        nodes.reverse();
        jobs.reverse();
        let reversed = aggregate(&nodes, &jobs, timestamp);

        assert_eq!(forward, reversed);
    }

    #[test]
    fn gpu_less_nodes_and_empty_types_are_omitted() {
        let nodes = vec![
            node("login01", NodeState::Idle, "", 0, 0),
            node("weird01", NodeState::Idle, "a100", 0, 0),
        ];

        let snapshot = aggregate(&nodes, &[], Utc::now());
        assert!(snapshot.availability.is_empty());
        // Node status still lists the typed record as a pass-through view
        assert_eq!(snapshot.nodes.len(), 1);
        assert_eq!(snapshot.nodes[0].node, "weird01");
    }

    #[test]
    fn heavy_users_rank_by_total_gpus() {
        let jobs = vec![
            job("1", "a", JobState::Running, "a100", 2),
            job("2", "b", JobState::Running, "a100", 4),
            job("3", "b", JobState::Running, "h100", 1),
            job("4", "c", JobState::Running, "h100", 5),
        ];

        let snapshot = aggregate(&[], &jobs, Utc::now());
        assert_eq!(snapshot.heavy_users(2), vec![("b", 5), ("c", 5)]);
    }
}
