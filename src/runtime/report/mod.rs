//! 报告输出

use anyhow::Result;

use super::{Record, Time};

mod csv;
mod log;
pub use csv::Csv;
pub use log::Log;

/// 报告输出
pub trait Report {
    /// 写入某个 agent 在时刻 `time` 报告的指标。
    fn record(&mut self, time: Time, agent: &str, records: &[Record]) -> Result<()>;

    /// 仿真结束。
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// 报告中的一行
#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    pub time: Time,
    pub agent: String,
    pub metric: &'static str,
    pub value: f64,
}

/// 保存在内存中的报告
#[derive(Default)]
pub struct Recorder {
    rows: Vec<Row>,
}

impl Recorder {
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// 某个 agent 的某个指标随时间的取值
    pub fn series(&self, agent: &str, metric: &str) -> Vec<(Time, f64)> {
        self.rows
            .iter()
            .filter(|row| row.agent == agent && row.metric == metric)
            .map(|row| (row.time, row.value))
            .collect()
    }

    /// 某个 agent 的某个指标在所有周期的总和
    pub fn total(&self, agent: &str, metric: &str) -> f64 {
        self.series(agent, metric)
            .into_iter()
            .map(|(_, value)| value)
            .sum()
    }
}

impl Report for Recorder {
    fn record(&mut self, time: Time, agent: &str, records: &[Record]) -> Result<()> {
        self.rows.extend(records.iter().map(|record| Row {
            time,
            agent: agent.to_string(),
            metric: record.metric,
            value: record.value,
        }));
        Ok(())
    }
}
