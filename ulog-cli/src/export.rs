//! Spreadsheet-style export
//!
//! Writes one CSV file per topic (`<schemaName>_<instanceId>.csv`) with a
//! `timestamp` column first, plus an Octave-compatible `parameters.txt` dump
//! of the current parameter map. Padding fields and the raw timestamp field
//! are filtered from the CSV columns.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};
use ulog_decoder::{DataUpdate, UlogReader};

pub struct ExportStats {
    pub topics: usize,
    pub records: u64,
}

/// Dump the current parameter map, sorted by key
pub fn write_parameters<R: Read + Seek>(reader: &UlogReader<R>, dir: &Path) -> Result<PathBuf> {
    let path = dir.join("parameters.txt");
    let file =
        File::create(&path).with_context(|| format!("Failed to create {:?}", path))?;
    let mut out = BufWriter::new(file);

    let mut keys: Vec<&String> = reader.parameters().keys().collect();
    keys.sort();
    for key in keys {
        writeln!(out, "# name: {}\n#type: scalar\n{}", key, reader.parameters()[key])?;
    }
    out.flush()?;
    Ok(path)
}

/// Drain the reader from its current position, writing one CSV per topic
pub fn write_topics<R: Read + Seek>(
    reader: &mut UlogReader<R>,
    dir: &Path,
) -> Result<ExportStats> {
    let mut writers: HashMap<String, TopicWriter> = HashMap::new();
    let mut records = 0u64;

    while let Some(update) = reader.read_next()? {
        let topic = match update.fields.keys().next() {
            Some(key) => key.split('.').next().unwrap_or(key).to_string(),
            None => continue,
        };

        if !writers.contains_key(&topic) {
            log::debug!("Creating export stream for topic {}", topic);
            writers.insert(topic.clone(), TopicWriter::create(dir, &topic, &update)?);
        }
        // Just inserted above, so the lookup cannot miss
        if let Some(writer) = writers.get_mut(&topic) {
            writer.write_record(&update)?;
        }
        records += 1;
    }

    for writer in writers.values_mut() {
        writer.out.flush()?;
    }

    Ok(ExportStats {
        topics: writers.len(),
        records,
    })
}

struct TopicWriter {
    out: BufWriter<File>,
    /// Column keys in header order, fixed by the first record of the topic
    columns: Vec<String>,
}

impl TopicWriter {
    fn create(dir: &Path, topic: &str, first: &DataUpdate) -> Result<TopicWriter> {
        let path = dir.join(format!("{}.csv", topic));
        let file =
            File::create(&path).with_context(|| format!("Failed to create {:?}", path))?;
        let mut out = BufWriter::new(file);

        let mut columns: Vec<String> = first
            .fields
            .keys()
            .filter(|key| {
                let field = key.split_once('.').map(|(_, f)| f).unwrap_or(key);
                !field.starts_with("_padding") && field != "timestamp"
            })
            .cloned()
            .collect();
        columns.sort();

        write!(out, "timestamp")?;
        for column in &columns {
            write!(out, ",{}", column)?;
        }
        writeln!(out)?;

        Ok(TopicWriter { out, columns })
    }

    fn write_record(&mut self, update: &DataUpdate) -> Result<()> {
        write!(self.out, "{}", update.timestamp)?;
        for column in &self.columns {
            match update.fields.get(column) {
                Some(value) => write!(self.out, ",{}", value)?,
                None => write!(self.out, ",")?,
            }
        }
        writeln!(self.out)?;
        Ok(())
    }
}
