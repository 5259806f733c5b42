//! Rendering of workload results

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use comfy_table::{Table, presets::UTF8_FULL};
use keypool_pool::{RegistryEntryInfo, RegistryStats};
use serde::{Deserialize, Serialize};

use crate::workload::{WorkloadConfig, WorkloadSummary};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// Everything printed after a simulation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub workload: WorkloadConfig,
    pub summary: WorkloadSummary,
    pub clients_created: u64,
    pub clients_destroyed: u64,
    pub registry: RegistryStats,
    pub entries: Vec<RegistryEntryInfo>,
}

impl Report {
    pub fn render(&self, format: OutputFormat) -> anyhow::Result<String> {
        match format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(self)?),
            OutputFormat::Table => Ok(self.render_tables()),
        }
    }

    fn render_tables(&self) -> String {
        let outcomes = &self.summary.outcomes;
        let mut totals = Table::new();
        totals.load_preset(UTF8_FULL).set_header(vec!["metric", "value"]);
        for (metric, value) in [
            ("generated at", self.generated_at.to_rfc3339()),
            ("operations", self.summary.operations.to_string()),
            ("elapsed", format!("{} ms", self.summary.elapsed_ms)),
            ("succeeded", outcomes.succeeded.to_string()),
            ("work failed", outcomes.work_failed.to_string()),
            ("exhausted", outcomes.exhausted.to_string()),
            ("factory failed", outcomes.factory_failed.to_string()),
            ("other errors", outcomes.other_errors.to_string()),
            ("clients created", self.clients_created.to_string()),
            ("clients destroyed", self.clients_destroyed.to_string()),
            ("pool loads", self.registry.loads.to_string()),
            ("load failures", self.registry.load_failures.to_string()),
            ("refreshes", self.registry.refreshes.to_string()),
            ("expirations", self.registry.expirations.to_string()),
            ("evictions", self.registry.evictions.to_string()),
        ] {
            totals.add_row(vec![metric.to_string(), value]);
        }

        let mut pools = Table::new();
        pools.load_preset(UTF8_FULL).set_header(vec![
            "key", "pool", "age", "total", "idle", "active", "created", "destroyed",
        ]);
        for entry in &self.entries {
            let stats = &entry.stats;
            pools.add_row(vec![
                entry.key.clone(),
                entry.pool_id.to_string(),
                format!("{} ms", entry.age_ms),
                stats.total().to_string(),
                stats.idle().to_string(),
                stats.active().to_string(),
                stats.created().to_string(),
                stats.destroyed().to_string(),
            ]);
        }

        format!("{totals}\n{pools}")
    }
}

#[cfg(test)]
mod tests {
    use keypool_pool::PoolStats;
    use uuid::Uuid;

    use super::*;
    use crate::workload::Outcomes;

    fn sample() -> Report {
        Report {
            generated_at: Utc::now(),
            workload: WorkloadConfig::default(),
            summary: WorkloadSummary {
                elapsed_ms: 42,
                operations: 10,
                outcomes: Outcomes {
                    succeeded: 9,
                    work_failed: 1,
                    ..Outcomes::default()
                },
            },
            clients_created: 3,
            clients_destroyed: 1,
            registry: RegistryStats {
                loads: 2,
                entries: 1,
                ..RegistryStats::default()
            },
            entries: vec![RegistryEntryInfo {
                key: "table_0".to_string(),
                pool_id: Uuid::nil(),
                loaded_at: DateTime::<Utc>::UNIX_EPOCH,
                age_ms: 5,
                stats: PoolStats::new(2, 2, 0, 0).with_lifetime_counts(3, 1),
            }],
        }
    }

    #[test]
    fn test_table_lists_every_entry() {
        let rendered = sample().render(OutputFormat::Table).expect("render");
        assert!(rendered.contains("table_0"));
        assert!(rendered.contains("work failed"));
        assert!(rendered.contains("42 ms"));
    }

    #[test]
    fn test_json_report() {
        let rendered = sample().render(OutputFormat::Json).expect("render");
        let value: serde_json::Value = serde_json::from_str(&rendered).expect("json");
        assert_eq!(value["summary"]["outcomes"]["succeeded"], 9);
        assert_eq!(value["registry"]["loads"], 2);
        assert_eq!(value["entries"][0]["key"], "table_0");
        assert_eq!(value["entries"][0]["stats"]["created"], 3);
    }
}
