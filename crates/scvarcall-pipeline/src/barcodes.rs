//! Barcode discovery.
//!
//! Reads the gzipped `CB:Z:` listing produced by the listing stage. Every
//! line is validated before anything is returned, so a malformed listing
//! never leaves the registry half-populated.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use flate2::read::MultiGzDecoder;

use crate::error::{PipelineError, Result};

/// SAM tag prefix carried by every line of the listing.
pub const CELL_BARCODE_TAG: &str = "CB:Z:";

/// Strip the tag prefix from one listing line and check its length.
///
/// `line_number` is 1-based and only used for error reporting.
pub fn parse_barcode(line_number: usize, raw: &str, expected_len: usize) -> Result<String> {
    let raw = raw.trim_end();
    let barcode = raw.strip_prefix(CELL_BARCODE_TAG).unwrap_or(raw);
    if barcode.len() != expected_len {
        return Err(PipelineError::MalformedBarcode {
            line: line_number,
            raw: raw.to_string(),
            barcode: barcode.to_string(),
            expected: expected_len,
            actual: barcode.len(),
        });
    }
    Ok(barcode.to_string())
}

/// Read every barcode from a gzipped listing, in file order.
///
/// Blank lines are ignored.
pub fn read_barcode_listing(path: &Path, expected_len: usize) -> Result<Vec<String>> {
    let listing_error = |source| PipelineError::BarcodeListing {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(listing_error)?;
    let reader = BufReader::new(MultiGzDecoder::new(file));

    let mut barcodes = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line.map_err(listing_error)?;
        if line.trim().is_empty() {
            continue;
        }
        barcodes.push(parse_barcode(i + 1, &line, expected_len)?);
    }
    Ok(barcodes)
}
