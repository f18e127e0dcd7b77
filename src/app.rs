use std::time::Duration;

use color_eyre::Result;

use crate::args::Args;
use crate::db::SnapshotSink;
use crate::engine::{CurrentSnapshot, Engine};
use crate::notify::Notifier;
use crate::slurm::SlurmCollector;

pub struct App {
    /// Is the application running?
    pub running: bool,
    /// Command-line args
    pub args: Args,
    /// Background refresh cycle
    engine: Engine,
    /// Engine generation rendered last; used to skip redundant redraws
    seen_generation: u64,
}

impl App {
    /// Constructs a new instance of [`App`] and starts the refresh cycle.
    pub fn new(args: Args) -> Result<Self> {
        let collector = SlurmCollector::new(&args.scontrol, &args.squeue);

        let sink = if args.db {
            let sink = SnapshotSink::new(&args.db_path);
            sink.ensure_schema()?;
            Some(sink)
        } else {
            None
        };

        // The command-line takes precedence over the environment
        let webhook = args
            .webhook
            .clone()
            .or_else(|| std::env::var("DISCORD_WEBHOOK_URL").ok())
            .filter(|url| !url.is_empty());
        let notifier = webhook
            .map(|url| Notifier::new(url, Duration::from_secs(args.webhook_interval)))
            .transpose()?;

        let engine = Engine::spawn(
            Box::new(collector),
            sink,
            notifier,
            Duration::from_secs(args.interval.max(1)),
        );

        Ok(Self {
            running: true,
            args,
            engine,
            seen_generation: 0,
        })
    }

    /// Handles the tick event of the terminal; returns true when the
    /// engine published something new since the last draw.
    pub fn tick(&mut self) -> bool {
        let generation = self.engine.generation();
        if generation != self.seen_generation {
            self.seen_generation = generation;
            return true;
        }

        false
    }

    /// Requests an out-of-cycle refresh; the result arrives on a later tick
    pub fn refresh(&self) {
        self.engine.force_refresh();
    }

    /// Latest published snapshot, annotated with staleness
    pub fn current(&self) -> Option<CurrentSnapshot> {
        self.engine.current()
    }

    pub fn last_error(&self) -> Option<String> {
        self.engine.last_error()
    }

    pub fn persist_failed(&self) -> bool {
        self.engine.persist_failed()
    }

    /// Set running to false to quit the application.
    pub fn quit(&mut self) {
        self.running = false;
        self.engine.shutdown();
    }
}
