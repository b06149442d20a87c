use std::io::Write;

use tabwriter::TabWriter;

use crate::errors::{CliError, CliResult};

pub const POD_COLUMNS: &[&str] = &[
    "POD ID", "CREATED", "STATE", "NAME", "NAMESPACE", "ATTEMPT", "RUNTIME",
];
pub const CONTAINER_COLUMNS: &[&str] = &[
    "CONTAINER", "IMAGE", "CREATED", "STATE", "NAME", "ATTEMPT", "POD ID", "POD",
];
pub const IMAGE_COLUMNS: &[&str] = &["IMAGE", "TAG", "IMAGE ID", "SIZE"];
pub const IMAGE_DIGEST_COLUMNS: &[&str] = &["IMAGE", "TAG", "DIGEST", "IMAGE ID", "SIZE"];
pub const CONTAINER_STATS_COLUMNS: &[&str] = &["CONTAINER", "NAME", "CPU %", "MEM", "DISK", "INODES"];
pub const POD_STATS_COLUMNS: &[&str] = &["POD", "NAME", "CPU %", "MEM"];

/// Column-aligned text table with a static header.
#[derive(Debug, Clone)]
pub struct Table {
    columns: &'static [&'static str],
    rows: Vec<Vec<String>>,
    header: bool,
}

impl Table {
    pub fn new(columns: &'static [&'static str]) -> Self {
        Self {
            columns,
            rows: Vec::new(),
            header: true,
        }
    }

    /// Drops the header row, as `--quiet` style listings do.
    pub fn without_header(mut self) -> Self {
        self.header = false;
        self
    }

    pub fn push(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn render(&self) -> CliResult<String> {
        let mut tw = TabWriter::new(vec![]).minwidth(12).padding(3);

        if self.header {
            writeln!(tw, "{}", self.columns.join("\t"))?;
        }
        for row in &self.rows {
            writeln!(tw, "{}", row.join("\t"))?;
        }
        tw.flush()?;

        let bytes = tw
            .into_inner()
            .map_err(|err| CliError::Io(std::io::Error::other(err.to_string())))?;
        let text = String::from_utf8_lossy(&bytes);

        let mut out = String::with_capacity(text.len());
        for line in text.lines() {
            out.push_str(line.trim_end());
            out.push('\n');
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligns_columns_and_trims_trailing_space() {
        let mut table = Table::new(IMAGE_COLUMNS);
        table.push(vec![
            "docker.io/library/busybox".into(),
            "latest".into(),
            "a416a98b71e22".into(),
            "4.27MB".into(),
        ]);
        let text = table.render().unwrap();
        let lines: Vec<_> = text.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("IMAGE"));
        assert_eq!(
            lines[0].find("TAG"),
            lines[1].find("latest"),
            "columns should line up: {text}"
        );
        assert!(lines.iter().all(|line| !line.ends_with(' ')));
    }

    #[test]
    fn headerless_table_renders_only_rows() {
        let mut table = Table::new(CONTAINER_COLUMNS).without_header();
        table.push(vec!["abc".into()]);
        assert_eq!(table.render().unwrap(), "abc\n");
    }
}
