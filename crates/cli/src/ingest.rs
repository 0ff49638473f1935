//! CSV upload reading

use anyhow::{Context, Result};
use chardetng::EncodingDetector;
use encoding_rs::UTF_8;
use forecast_lib::RawTable;
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, warn};

/// Top-level domain hint for the detector; spreadsheet exports are mostly CP949
const DETECTION_TLD: &[u8] = b"kr";

/// Read a CSV file into a raw table, every cell kept as text
pub fn read_csv(path: &Path) -> Result<RawTable> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    read_csv_from(BufReader::new(file)).with_context(|| format!("Failed to read {}", path.display()))
}

/// Decode upload bytes: UTF-8 when valid, otherwise the detected legacy encoding
pub fn decode_upload(bytes: &[u8]) -> Cow<'_, str> {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return Cow::Borrowed(text);
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let encoding = detector.guess(Some(DETECTION_TLD), false);
    let (text, used, had_errors) = encoding.decode(bytes);
    if had_errors {
        warn!(encoding = used.name(), "Upload contains bytes invalid in the detected encoding");
    } else if used != UTF_8 {
        debug!(encoding = used.name(), "Decoded non-UTF-8 upload");
    }
    text
}

pub fn read_csv_from<R: Read>(mut reader: R) -> Result<RawTable> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes).context("Failed to read upload")?;
    let text = decode_upload(&bytes);

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .context("Failed to read CSV header")?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Malformed CSV record {}", line + 1))?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        rows.push(record.iter().map(str::to_string).collect());
    }

    Ok(RawTable::new(headers, rows))
}
