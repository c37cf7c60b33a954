use std::io::{self, Write};

use log::info;
use serde::Serialize;

/// Receives the named scalars of an applied update.
pub trait SummarySink: Send {
    /// Writes a group of scalars, all tagged with the same step.
    ///
    /// # Arguments
    /// * `step` - The global step the scalars belong to.
    /// * `scalars` - Pairs of tag and value.
    fn write_scalars(&mut self, step: u64, scalars: &[(&str, f64)]) -> io::Result<()>;
}

/// Writes every scalar through the `log` facade.
#[derive(Debug, Default)]
pub struct LogSink;

impl SummarySink for LogSink {
    fn write_scalars(&mut self, step: u64, scalars: &[(&str, f64)]) -> io::Result<()> {
        for &(tag, value) in scalars {
            info!(step = step, tag = tag, value = value; "summary");
        }

        Ok(())
    }
}

#[derive(Serialize)]
struct Record<'a> {
    step: u64,
    tag: &'a str,
    value: f64,
}

/// Writes every scalar as a JSON object on its own line.
#[derive(Debug)]
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> SummarySink for JsonLinesSink<W> {
    fn write_scalars(&mut self, step: u64, scalars: &[(&str, f64)]) -> io::Result<()> {
        for &(tag, value) in scalars {
            let record = Record { step, tag, value };
            serde_json::to_writer(&mut self.writer, &record)?;
            self.writer.write_all(b"\n")?;
        }

        self.writer.flush()
    }
}
