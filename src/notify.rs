use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::aggregate::Snapshot;

/// Discord-compatible webhook payload
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Message {
    embeds: Vec<Embed>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
struct Embed {
    title: String,
    color: u32,
    timestamp: String,
    fields: Vec<EmbedField>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
struct EmbedField {
    name: String,
    value: String,
    inline: bool,
}

/// Formats and throttles outbound status summaries.
///
/// Throttling is purely wall-clock: at most one message per `interval`
/// since the last emitted message, no matter how many refresh cycles run
/// in between and no matter what changed. Delivery is best-effort with no
/// retry backlog.
pub struct Notifier {
    url: String,
    interval: Duration,
    client: reqwest::blocking::Client,
}

impl Notifier {
    pub fn new(url: impl Into<String>, interval: Duration) -> Result<Self, reqwest::Error> {
        // Dedicated client with its own timeout so a slow webhook endpoint
        // cannot stall the refresh cycle past one delivery attempt.
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            url: url.into(),
            interval,
            client,
        })
    }

    /// Returns the summary message for `current` unless one was already
    /// emitted within the configured interval. `previous` only annotates
    /// availability deltas; it never gates sending.
    pub fn maybe_notify(
        &self,
        previous: Option<&Snapshot>,
        current: &Snapshot,
        last_sent_at: Option<DateTime<Utc>>,
    ) -> Option<Message> {
        if !self.due(Utc::now(), last_sent_at) {
            return None;
        }

        Some(self.format(previous, current))
    }

    fn due(&self, now: DateTime<Utc>, last_sent_at: Option<DateTime<Utc>>) -> bool {
        match last_sent_at {
            None => true,
            // Clock skew makes the elapsed time negative; treat as not due
            Some(at) => match (now - at).to_std() {
                Ok(elapsed) => elapsed >= self.interval,
                Err(_) => false,
            },
        }
    }

    fn format(&self, previous: Option<&Snapshot>, current: &Snapshot) -> Message {
        let mut fields = Vec::new();

        for row in &current.availability {
            let mut value = format!(
                "Available: {}/{} ({:.1}% used)",
                row.true_available,
                row.total,
                row.usage_percent()
            );

            let prior = previous
                .and_then(|p| p.availability.iter().find(|r| r.gpu_type == row.gpu_type));
            if let Some(prior) = prior {
                if prior.true_available != row.true_available {
                    value.push_str(&format!(" [was {}]", prior.true_available));
                }
            }

            fields.push(EmbedField {
                name: format!("{} GPUs", row.gpu_type),
                value,
                inline: true,
            });
        }

        let heavy = current.heavy_users(5);
        if !heavy.is_empty() {
            let value = heavy
                .iter()
                .map(|(user, gpus)| format!("{}: {} GPUs", user, gpus))
                .collect::<Vec<_>>()
                .join("\n");

            fields.push(EmbedField {
                name: "Heavy Users".to_string(),
                value,
                inline: false,
            });
        }

        let queued_jobs = current.queued_jobs_total();
        if queued_jobs > 0 {
            fields.push(EmbedField {
                name: "Queue Status".to_string(),
                value: format!(
                    "{} jobs waiting for {} GPUs",
                    queued_jobs,
                    current.queued_gpus_total()
                ),
                inline: false,
            });
        }

        Message {
            embeds: vec![Embed {
                title: "GPU Cluster Status Update".to_string(),
                color: 3447003,
                timestamp: current.timestamp.to_rfc3339(),
                fields,
            }],
        }
    }

    /// Posts the message to the webhook; failures are the caller's to log
    pub fn deliver(&self, message: &Message) -> Result<(), reqwest::Error> {
        self.client
            .post(&self.url)
            .json(message)
            .send()?
            .error_for_status()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::aggregate::{aggregate, GpuAvailability};
    use crate::slurm::{JobRecord, JobState, NodeRecord, NodeState};

    fn snapshot() -> Snapshot {
        let nodes = vec![
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
                gpu_type: "a100".to_string(),
                gpu_total: 8,
                gpu_used: 0,
            },
        ];
        let jobs = vec![
            JobRecord {
                id: "1".to_string(),
                user: "alice".to_string(),
                state: JobState::Running,
                gpu_type: "a100".to_string(),
                gpu_count: 4,
                time_limit_hours: 1.0,
            },
            JobRecord {
                id: "2".to_string(),
                user: "bob".to_string(),
                state: JobState::Pending,
                gpu_type: "a100".to_string(),
                gpu_count: 2,
                time_limit_hours: 1.0,
            },
        ];

        aggregate(&nodes, &jobs, Utc::now())
    }

    fn notifier() -> Notifier {
        Notifier::new("http://localhost/webhook", Duration::from_secs(1800)).unwrap()
    }

    #[test]
    fn first_notification_is_always_due() {
        let message = notifier().maybe_notify(None, &snapshot(), None);
        assert!(message.is_some());
    }

    #[test]
    fn throttles_within_interval() {
        let notifier = notifier();
        let current = snapshot();

        let first = notifier.maybe_notify(None, &current, None);
        assert!(first.is_some());

        // A cycle 10 seconds later must not produce a second message
        let last_sent = Some(Utc::now() - ChronoDuration::seconds(10));
        assert!(notifier.maybe_notify(None, &current, last_sent).is_none());

        let long_ago = Some(Utc::now() - ChronoDuration::seconds(2000));
        assert!(notifier.maybe_notify(None, &current, long_ago).is_some());
    }

    #[test]
    fn summary_carries_availability_users_and_queue() {
        let message = notifier().maybe_notify(None, &snapshot(), None).unwrap();
        let body = serde_json::to_string(&message).unwrap();

        assert!(body.contains("a100 GPUs"));
        assert!(body.contains("Heavy Users"));
        assert!(body.contains("alice: 4 GPUs"));
        assert!(body.contains("1 jobs waiting for 2 GPUs"));
    }

    #[test]
    fn delta_against_previous_snapshot_is_annotated() {
        let mut previous = snapshot();
        previous.availability = vec![GpuAvailability {
            gpu_type: "a100".to_string(),
            total: 16,
            used: 2,
            available: 14,
            true_available: 6,
            nodes_total: 2,
            nodes_healthy: 2,
        }];

        let current = snapshot();
        let message = notifier()
            .maybe_notify(Some(&previous), &current, None)
            .unwrap();
        let body = serde_json::to_string(&message).unwrap();
        assert!(body.contains("[was 6]"));
    }
}
