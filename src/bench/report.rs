//! CSV export of benchmark points.

use super::Point;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;

pub const CSV_HEADER: &str =
    "clients,elements,interval,requestProcessTime,clientProcessTime,responseTime";

/// Render points as CSV, one row per point, header first.
pub fn to_csv(points: &[Point]) -> String {
    let mut out = String::with_capacity(CSV_HEADER.len() + 1 + points.len() * 48);
    out.push_str(CSV_HEADER);
    out.push('\n');
    for p in points {
        // Writing into a String cannot fail.
        let _ = writeln!(
            out,
            "{},{},{},{:.6},{:.6},{:.6}",
            p.client_count,
            p.element_count,
            p.interval_ms,
            p.avg_request_process_time_ms,
            p.avg_client_process_time_ms,
            p.avg_response_time_ms,
        );
    }
    out
}

pub fn write_csv(path: &Path, points: &[Point]) -> io::Result<()> {
    fs::write(path, to_csv(points))
}
