use std::{str::FromStr, time::Duration};

use anyhow::{anyhow, bail, Context};
use chrono::Duration as ChronoDuration;
use domain::{
    dispatch::DispatchConfig,
    droppers::cqrs::Tables,
    matcher::{Alignment, MatcherConfig},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Dynamo,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub store: StoreBackend,
    pub tables: Tables,
    /// Kinesis stream for device commands; commands are only logged when unset
    pub command_stream: Option<String>,
    pub queue_capacity: usize,
    pub dispatch: DispatchConfig,
    pub log_level: tracing::Level,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let vars = Vars(&lookup);

        let store = match vars.string("STORE_BACKEND", "memory").as_str() {
            "memory" => StoreBackend::Memory,
            "dynamo" => StoreBackend::Dynamo,
            other => bail!("STORE_BACKEND must be `memory` or `dynamo`, got `{}`", other),
        };

        let tolerance_secs = vars.parse("DISPATCH_TOLERANCE_SECS", 5i64)?;
        if tolerance_secs < 0 {
            bail!("DISPATCH_TOLERANCE_SECS must not be negative");
        }
        let tolerance = ChronoDuration::seconds(tolerance_secs);
        let alignment = match vars.string("DISPATCH_ALIGNMENT", "interval").as_str() {
            "interval" => Alignment::Interval,
            "fixed" => Alignment::Fixed(ChronoDuration::seconds(
                vars.parse("DISPATCH_FIXED_OFFSET_SECS", 8 * 3600i64)?,
            )),
            other => bail!("DISPATCH_ALIGNMENT must be `interval` or `fixed`, got `{}`", other),
        };

        let queue_capacity = vars.parse("COMMAND_QUEUE_CAPACITY", 20usize)?;
        if queue_capacity == 0 {
            bail!("COMMAND_QUEUE_CAPACITY must be positive");
        }

        Ok(Self {
            port: vars.parse("PORT", 8080u16)?,
            store,
            tables: Tables {
                event_log: vars.string("DYNAMODB_EVENT_LOG_TABLE", "dropper-event-log"),
                event_snapshots: vars
                    .string("DYNAMODB_EVENT_SNAPSHOTS_TABLE", "dropper-event-snapshots"),
                droppers_view: vars.string("DYNAMODB_DROPPERS_VIEW_TABLE", "dropper-droppers-view"),
                schedule_index: vars
                    .string("DYNAMODB_SCHEDULE_INDEX_TABLE", "dropper-schedule-index"),
            },
            command_stream: lookup("COMMAND_STREAM_NAME").filter(|s| !s.is_empty()),
            queue_capacity,
            dispatch: DispatchConfig {
                tick: Duration::from_secs(vars.parse("DISPATCH_TICK_SECS", 5u64)?),
                matcher: MatcherConfig {
                    tolerance,
                    alignment,
                },
                store_timeout: Duration::from_secs(vars.parse("STORE_TIMEOUT_SECS", 10u64)?),
                max_fetch_failures: vars.parse("DISPATCH_MAX_FETCH_FAILURES", 3u32)?,
            },
            log_level: vars.parse("LOG_LEVEL", tracing::Level::INFO)?,
        })
    }
}

struct Vars<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    fn string(&self, key: &str, default: &str) -> String {
        (self.0)(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, key: &str, default: T) -> anyhow::Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match (self.0)(key) {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e| anyhow!("{}", e))
                .with_context(|| format!("invalid value for {}: `{}`", key, raw)),
        }
    }
}
