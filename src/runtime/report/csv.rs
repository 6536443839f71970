//! CSV 格式的报告

use std::io::Write;

use anyhow::Result;

use super::Report;
use crate::runtime::{Record, Time};

/// 每个指标一行：`time,agent,metric,value`
pub struct Csv<W: Write> {
    output: W,
    header: bool,
}

impl<W: Write> Csv<W> {
    pub fn new(output: W) -> Self {
        Self {
            output,
            header: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.output
    }
}

impl<W: Write> Report for Csv<W> {
    fn record(&mut self, time: Time, agent: &str, records: &[Record]) -> Result<()> {
        if !self.header {
            writeln!(self.output, "time,agent,metric,value")?;
            self.header = true;
        }
        for record in records {
            writeln!(
                self.output,
                "{},{},{},{}",
                time,
                agent,
                record.metric,
                record.format.render(record.value)
            )?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.output.flush()?;
        Ok(())
    }
}
