//! Plain-text rendering of cached correlation results.

use std::io::{self, Write};

use chrono::{DateTime, Local};

use super::UsageRow;

/// Last-used column format, e.g. `Tue Nov 14 22:13:20 2023`.
pub const LAST_USED_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

/// Formats a last-used time in local time, or `0` for entries never used.
pub fn format_last_used(row: &UsageRow) -> String {
    if row.usage == 0 {
        return "0".to_string();
    }
    DateTime::from_timestamp(row.last_used, 0)
        .map(|t| t.with_timezone(&Local).format(LAST_USED_FORMAT).to_string())
        .unwrap_or_else(|| "0".to_string())
}

/// Sorts rows by usage, highest first, then by name.
pub fn sort_by_usage(rows: &mut [UsageRow]) {
    rows.sort_by(|a, b| b.usage.cmp(&a.usage).then_with(|| a.name.cmp(&b.name)));
}

/// Writes `usage name` lines for packages.
pub fn write_packages<W: Write>(out: &mut W, rows: &[UsageRow], unused_only: bool) -> io::Result<()> {
    for row in rows.iter().filter(|r| !unused_only || r.usage == 0) {
        writeln!(out, "{:<8} {}", row.usage, row.name)?;
    }
    Ok(())
}

/// Writes `usage last-used path` lines for the files of one package.
pub fn write_files<W: Write>(out: &mut W, rows: &[UsageRow], unused_only: bool) -> io::Result<()> {
    for row in rows.iter().filter(|r| !unused_only || r.usage == 0) {
        writeln!(out, "{:<8} {:<24} {}", row.usage, format_last_used(row), row.name)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(usage: u64, last_used: i64, name: &str) -> UsageRow {
        UsageRow {
            usage,
            last_used,
            name: name.to_string(),
        }
    }

    #[test]
    fn test_sort_by_usage() {
        let mut rows = vec![row(1, 0, "b"), row(9, 0, "z"), row(1, 0, "a"), row(0, 0, "c")];
        sort_by_usage(&mut rows);
        let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["z", "a", "b", "c"]);
    }

    #[test]
    fn test_write_packages() {
        let rows = vec![row(12, 100, "bash"), row(0, 0, "unused-pkg")];

        let mut out = Vec::new();
        write_packages(&mut out, &rows, false).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "12       bash\n0        unused-pkg\n");

        let mut out = Vec::new();
        write_packages(&mut out, &rows, true).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "0        unused-pkg\n");
    }

    #[test]
    fn test_format_last_used() {
        assert_eq!(format_last_used(&row(0, 1_700_000_000, "x")), "0");

        let expected = DateTime::from_timestamp(1_700_000_000, 0)
            .unwrap()
            .with_timezone(&Local)
            .format(LAST_USED_FORMAT)
            .to_string();
        assert_eq!(format_last_used(&row(3, 1_700_000_000, "x")), expected);
        assert!(expected.ends_with("2023"));
    }

    #[test]
    fn test_write_files() {
        let rows = vec![row(0, 0, "/usr/share/doc/x")];
        let mut out = Vec::new();
        write_files(&mut out, &rows, false).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            format!("{:<8} {:<24} {}\n", 0, "0", "/usr/share/doc/x")
        );
    }
}
