use argh::FromArgs;

/// Text-based GPU availability dashboard for Slurm clusters
#[derive(FromArgs, Debug)]
pub struct Args {
    /// refresh interval in seconds
    #[argh(option, default = "30")]
    pub interval: u64,

    /// log snapshots to a SQLite database
    #[argh(switch)]
    pub db: bool,

    /// location of the SQLite database
    #[argh(option, default = "\"gpu_monitor.db\".to_string()")]
    pub db_path: String,

    /// discord-compatible webhook URL; defaults to $DISCORD_WEBHOOK_URL
    #[argh(option)]
    pub webhook: Option<String>,

    /// minimum seconds between webhook notifications
    #[argh(option, default = "1800")]
    pub webhook_interval: u64,

    /// location of `scontrol` executable
    #[argh(option, default = "\"scontrol\".to_string()")]
    pub scontrol: String,

    /// location of `squeue` executable
    #[argh(option, default = "\"squeue\".to_string()")]
    pub squeue: String,

    /// append diagnostics to this log file
    #[argh(option)]
    pub log_file: Option<String>,

    /// print version information
    #[argh(switch, short = 'v')]
    pub version: bool,
}
