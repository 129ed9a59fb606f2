use crate::{driver::SettlementFrequency, proration::AVERAGE_MONTH_DAYS};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardPeriodDays {
    pub weekly:   i64,
    pub biweekly: i64,
    pub monthly:  i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Divisor used to prorate monthly costs (365.25 / 12).
    pub average_month_days:   Decimal,
    pub standard_period_days: StandardPeriodDays,
    /// 0 lets rayon pick the worker count.
    #[serde(default)]
    pub batch_worker_threads: usize,
    #[serde(default = "default_currency")]
    pub currency:             String,
}

fn default_currency() -> String {
    "EUR".into()
}

impl EngineConfig {
    /// Load from the data/ directory.
    /// In tests, use EngineConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/settlement_config.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        if config.average_month_days <= Decimal::ZERO {
            anyhow::bail!("{path}: average_month_days must be positive");
        }
        let days = &config.standard_period_days;
        if days.weekly < 1 || days.biweekly < 1 || days.monthly < 1 {
            anyhow::bail!("{path}: standard period lengths must be at least one day");
        }
        Ok(config)
    }

    /// Config with hardcoded defaults for use in unit tests.
    pub fn default_test() -> Self {
        Self {
            average_month_days:   AVERAGE_MONTH_DAYS,
            standard_period_days: StandardPeriodDays {
                weekly:   7,
                biweekly: 14,
                monthly:  30,
            },
            batch_worker_threads: 2,
            currency:             default_currency(),
        }
    }

    /// Length of the "standard" period a frequency stands for.
    pub fn standard_days(&self, frequency: SettlementFrequency) -> i64 {
        match frequency {
            SettlementFrequency::Weekly   => self.standard_period_days.weekly,
            SettlementFrequency::Biweekly => self.standard_period_days.biweekly,
            SettlementFrequency::Monthly  => self.standard_period_days.monthly,
        }
    }
}
