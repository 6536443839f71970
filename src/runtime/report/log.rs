//! 便于阅读的文本报告

use std::io::Write;

use anyhow::Result;

use super::Report;
use crate::runtime::{Record, Time};

/// 每个 agent 每个周期一行
pub struct Log<W: Write> {
    output: W,
}

impl<W: Write> Log<W> {
    pub fn new(output: W) -> Self {
        Self { output }
    }

    pub fn into_inner(self) -> W {
        self.output
    }
}

impl<W: Write> Report for Log<W> {
    fn record(&mut self, time: Time, agent: &str, records: &[Record]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        writeln!(
            self.output,
            "[{:>6}] {:<16} {}",
            time,
            agent,
            records
                .iter()
                .map(|r| r.to_string())
                .collect::<Vec<_>>()
                .join(" ")
        )?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.output.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligns_time_and_agent() {
        let mut log = Log::new(Vec::new());
        log.record(10, "DB", &[Record::count("requests", 3)])
            .unwrap();
        log.record(10, "silent", &[]).unwrap();

        let text = String::from_utf8(log.into_inner()).unwrap();
        assert_eq!(text, "[    10] DB               requests=3\n");
    }
}
