use anyhow::Result;
use comfy_table::{presets, CellAlignment};
use serde::Serialize;
use std::io::Write;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    /// Space-aligned columns.
    #[default]
    Simple,
    Json,
}

#[derive(Copy, Clone, Debug, Default)]
pub struct Output {
    pub format: Format,
    pub no_headers: bool,
    pub units: bool,
}

/// Rows rendered in `simple` format.
///
/// A header ending in `:` marks a numeric column, which is right-aligned.
#[derive(Debug)]
pub struct Table {
    header: Vec<&'static str>,
    inner: comfy_table::Table,
}

const UNITS: &[u8] = b"_KMGTPEZY";

// === impl Output ===

impl Output {
    /// Prints `records` as JSON, or `table` otherwise.
    pub fn print<T: Serialize + ?Sized>(&self, records: &T, table: Table) -> Result<()> {
        let stdout = std::io::stdout();
        let mut w = stdout.lock();
        self.write(&mut w, records, table)?;
        w.flush()?;
        Ok(())
    }

    pub fn write<W, T>(&self, w: &mut W, records: &T, table: Table) -> Result<()>
    where
        W: Write,
        T: Serialize + ?Sized,
    {
        match self.format {
            Format::Json => {
                serde_json::to_writer_pretty(&mut *w, records)?;
                writeln!(w)?;
            }
            Format::Simple => w.write_all(table.render(!self.no_headers).as_bytes())?,
        }
        Ok(())
    }

    /// Formats a traffic volume, with a power-of-1024 suffix when `--units` is set.
    pub fn volume(&self, v: u64) -> String {
        if self.units {
            format_with_units(v)
        } else {
            v.to_string()
        }
    }
}

pub fn format_with_units(v: u64) -> String {
    if v < 1024 {
        return v.to_string();
    }
    let mut i = 0;
    let mut fv = v as f64;
    while fv >= 1024.0 && i + 1 < UNITS.len() {
        i += 1;
        fv /= 1024.0;
    }
    format!("{:.1}{}", fv, UNITS[i] as char)
}

/// Average size of a packet, or zero when nothing was sent.
pub fn average(bytes: u64, count: u64) -> f64 {
    if count == 0 {
        return 0.0;
    }
    bytes as f64 / count as f64
}

// === impl Table ===

impl Table {
    pub fn new(header: &[&'static str]) -> Self {
        let mut inner = comfy_table::Table::new();
        inner.load_preset(presets::NOTHING);
        Self {
            header: header.to_vec(),
            inner,
        }
    }

    pub fn row<I>(&mut self, cells: I)
    where
        I: IntoIterator,
        I::Item: ToString,
    {
        self.inner
            .add_row(cells.into_iter().map(|c| c.to_string()).collect::<Vec<_>>());
    }

    pub fn render(mut self, headers: bool) -> String {
        if !headers && self.inner.row_iter().next().is_none() {
            return String::new();
        }
        if headers {
            self.inner.set_header(
                self.header
                    .iter()
                    .map(|h| h.strip_suffix(':').unwrap_or(h))
                    .collect::<Vec<_>>(),
            );
        }
        for (column, header) in self.inner.column_iter_mut().zip(&self.header) {
            column.set_padding((0, 1));
            if header.ends_with(':') {
                column.set_cell_alignment(CellAlignment::Right);
            }
        }
        self.inner
            .lines()
            .map(|line| format!("{}\n", line.trim_end()))
            .collect()
    }
}
