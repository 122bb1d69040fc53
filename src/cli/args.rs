use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Synthetic metrics traffic generator for InfluxDB and StatsD backends",
    long_about = "Teller replays a story of timed events against InfluxDB and StatsD endpoints.\n\
A story is a set of timelines. Each timeline runs its timeslices in order and every event\n\
in a timeslice fires a metric after a static or randomly varied delay.\n\
Stories can be written in json, yaml or toml, picked by file extension.\n\
\n\
Examples:\n\
  teller -c story.json                # run a story\n\
  teller -e > story.json              # write an example story to start from\n\
  teller -c story.yaml -vvv --seed 7  # debug logging and reproducible jitter"
)]
pub struct Args {
    /// Story file describing connections and timelines
    #[arg(short, long, default_value = "./config.json", value_name = "PATH")]
    pub config: PathBuf,

    /// Print an example json story and exit
    #[arg(short, long)]
    pub example: bool,

    /// Verbosity level, repeat for more (-v warn, -vv info, -vvv debug, -vvvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Also write logs to this file
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Seed for timer and flush jitter so runs can be reproduced
    #[arg(long)]
    pub seed: Option<u64>,
}

pub fn parse_args() -> Args {
    Args::parse()
}

impl Default for Args {
    fn default() -> Self {
        Self {
            config: PathBuf::from("./config.json"),
            example: false,
            verbosity: 0,
            log_file: None,
            seed: None,
        }
    }
}
