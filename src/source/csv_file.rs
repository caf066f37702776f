use std::io::Read;

use anyhow::{Context, Result};
use csv::ByteRecord;
use encoding_rs::Encoding;
use log::debug;
use serde_json::Value;

use super::{
    FileSourceConfig, RowError, RowIter, RowWindow, SourceAdapter, SourceRows, SourceSample,
    collect_sample,
};
use crate::{
    io_utils,
    schema::{ImportOptions, SourceType},
    transform::Record,
};

/// Delimited text adapter. Empty cells become null; rows whose width does
/// not match the header surface as recoverable row errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvSource;

impl SourceAdapter for CsvSource {
    fn source_type(&self) -> SourceType {
        SourceType::Csv
    }

    fn sample(
        &self,
        config: &Value,
        options: &ImportOptions,
        limit: usize,
    ) -> Result<SourceSample> {
        let location = FileSourceConfig::parse(config, SourceType::Csv)?;
        let total = count_records(&location, options)?;
        let stream = open_stream(&location, options)?;
        let columns = stream.headers.clone();
        let rows = collect_sample(Box::new(stream), limit)?;
        debug!(
            "Sampled {} of {} row(s) from {}",
            rows.len(),
            total,
            location.describe()
        );
        Ok(SourceSample {
            columns,
            rows,
            total_estimate: total,
        })
    }

    fn open(&self, config: &Value, options: &ImportOptions) -> Result<SourceRows> {
        let location = FileSourceConfig::parse(config, SourceType::Csv)?;
        let total = count_records(&location, options)?;
        let stream = open_stream(&location, options)?;
        Ok(SourceRows {
            columns: stream.headers.clone(),
            total_hint: Some(total),
            rows: Box::new(stream) as RowIter,
        })
    }
}

struct CsvRecords {
    reader: csv::Reader<Box<dyn Read + Send>>,
    headers: Vec<String>,
    encoding: &'static Encoding,
    pending: Option<ByteRecord>,
    window: RowWindow,
    row: u64,
    failed: bool,
}

fn open_stream(location: &FileSourceConfig, options: &ImportOptions) -> Result<CsvRecords> {
    let delimiter = options.delimiter_byte()?;
    let encoding = io_utils::resolve_encoding(options.encoding.as_deref())?;
    let mut reader = io_utils::open_csv_reader(location.open()?, delimiter, options.has_header);

    let mut pending = None;
    let headers = if options.has_header {
        let record = reader
            .byte_headers()
            .with_context(|| format!("Reading header row from {}", location.describe()))?
            .clone();
        io_utils::decode_record(&record, encoding)
            .context("Decoding header row")?
            .into_iter()
            .map(|name| name.trim().to_string())
            .collect()
    } else {
        let mut first = ByteRecord::new();
        let width = if reader
            .read_byte_record(&mut first)
            .with_context(|| format!("Reading first row from {}", location.describe()))?
        {
            let width = first.len();
            pending = Some(first);
            width
        } else {
            0
        };
        generate_field_names(width)
    };

    Ok(CsvRecords {
        reader,
        headers,
        encoding,
        pending,
        window: RowWindow::new(options),
        row: 0,
        failed: false,
    })
}

fn generate_field_names(count: usize) -> Vec<String> {
    (1..=count).map(|idx| format!("column_{idx}")).collect()
}

fn count_records(location: &FileSourceConfig, options: &ImportOptions) -> Result<u64> {
    let delimiter = options.delimiter_byte()?;
    let mut reader = io_utils::open_csv_reader(location.open()?, delimiter, options.has_header);
    let mut record = ByteRecord::new();
    let mut total = 0u64;
    loop {
        match reader.read_byte_record(&mut record) {
            Ok(true) => total += 1,
            Ok(false) => break,
            Err(err) if err.is_io_error() => {
                return Err(err).with_context(|| format!("Counting rows in {}", location.describe()));
            }
            Err(_) => total += 1,
        }
    }
    Ok(RowWindow::new(options).clamp_total(total))
}

impl CsvRecords {
    fn to_record(&self, record: &ByteRecord) -> Result<Record, RowError> {
        if record.len() != self.headers.len() {
            return Err(RowError::Recoverable {
                row: self.row,
                message: format!(
                    "expected {} field(s) but found {}",
                    self.headers.len(),
                    record.len()
                ),
            });
        }
        let mut output = Record::with_capacity(self.headers.len());
        for (header, field) in self.headers.iter().zip(record.iter()) {
            let decoded = io_utils::decode_bytes(field, self.encoding).map_err(|err| {
                RowError::Recoverable {
                    row: self.row,
                    message: format!("column '{header}': {err}"),
                }
            })?;
            let value = if decoded.trim().is_empty() {
                Value::Null
            } else {
                Value::String(decoded)
            };
            output.insert(header.clone(), value);
        }
        Ok(output)
    }
}

impl Iterator for CsvRecords {
    type Item = Result<Record, RowError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.failed || self.window.exhausted() {
                return None;
            }
            let record = match self.pending.take() {
                Some(record) => record,
                None => {
                    let mut record = ByteRecord::new();
                    match self.reader.read_byte_record(&mut record) {
                        Ok(true) => record,
                        Ok(false) => return None,
                        Err(err) if err.is_io_error() => {
                            self.failed = true;
                            return Some(Err(RowError::Fatal(
                                anyhow::Error::new(err).context("Reading CSV source"),
                            )));
                        }
                        Err(err) => {
                            self.row += 1;
                            if !self.window.admit() {
                                continue;
                            }
                            return Some(Err(RowError::Recoverable {
                                row: self.row,
                                message: err.to_string(),
                            }));
                        }
                    }
                }
            };
            self.row += 1;
            if !self.window.admit() {
                continue;
            }
            return Some(self.to_record(&record));
        }
    }
}
