//! Spreadsheet-friendly CSV export of registrations.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use csv::{QuoteStyle, Terminator, WriterBuilder};

use crate::models::Registration;

pub const CSV_HEADERS: [&str; 5] = ["Name", "Nationality", "Provenance", "Profile", "Email"];

/// `ecofest_inscriptions_2025-11-30-09-15-00.csv`
pub fn default_export_filename(now: DateTime<Utc>) -> String {
    format!("ecofest_inscriptions_{}.csv", now.format("%Y-%m-%d-%H-%M-%S"))
}

/// Write one CSV row per registration (CRLF line endings, quoting only where needed).
/// Returns the number of data rows written.
pub fn write_registrations_csv<'a, W, I>(writer: W, registrations: I) -> Result<usize>
where
    W: Write,
    I: IntoIterator<Item = &'a Registration>,
{
    let mut csv = WriterBuilder::new()
        .terminator(Terminator::CRLF)
        .quote_style(QuoteStyle::Necessary)
        .from_writer(writer);

    csv.write_record(CSV_HEADERS).context("Failed to write CSV header")?;

    let mut rows = 0;
    for r in registrations {
        csv.write_record([
            r.full_name().as_str(),
            r.nationality.as_deref().unwrap_or(""),
            r.origin.as_deref().unwrap_or(""),
            r.profile.as_deref().unwrap_or(""),
            r.email.as_deref().unwrap_or(""),
        ])
        .with_context(|| format!("Failed to write CSV row for registration {}", r.id))?;
        rows += 1;
    }
    csv.flush().context("Failed to flush CSV output")?;
    Ok(rows)
}

/// Render registrations to an in-memory CSV document.
pub fn registrations_to_csv<'a, I>(registrations: I) -> Result<String>
where
    I: IntoIterator<Item = &'a Registration>,
{
    let mut buffer = Vec::new();
    write_registrations_csv(&mut buffer, registrations)?;
    String::from_utf8(buffer).context("CSV output is not valid UTF-8")
}
