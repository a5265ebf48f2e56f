use comfy_table::{presets, Cell, CellAlignment, Table};
use serde::Serialize;

use crate::app::GlobalOptions;

/// Print `data` as JSON (if `--json`) or call `display_fn` for human-readable output.
pub fn print_output<T: Serialize>(
    data: &T,
    opts: &GlobalOptions,
    display_fn: impl FnOnce(&T),
) -> anyhow::Result<()> {
    if opts.json {
        println!("{}", serde_json::to_string_pretty(data)?);
    } else {
        display_fn(data);
    }
    Ok(())
}

/// A column of a [`Columns`] table.
#[derive(Clone, Copy)]
pub struct Column {
    pub header: &'static str,
    pub numeric: bool,
}

impl Column {
    pub const fn text(header: &'static str) -> Self {
        Column {
            header,
            numeric: false,
        }
    }

    pub const fn number(header: &'static str) -> Self {
        Column {
            header,
            numeric: true,
        }
    }
}

/// Borderless table, numbers right-aligned, two spaces between columns.
pub struct Columns {
    table: Table,
    columns: &'static [Column],
}

impl Columns {
    pub fn new(columns: &'static [Column]) -> Self {
        let mut table = Table::new();
        table.load_preset(presets::NOTHING);
        table.set_header(columns.iter().map(|column| Cell::new(column.header)));

        let last = columns.len().saturating_sub(1);
        for (index, column) in columns.iter().enumerate() {
            if let Some(table_column) = table.column_mut(index) {
                table_column.set_cell_alignment(if column.numeric {
                    CellAlignment::Right
                } else {
                    CellAlignment::Left
                });
                table_column.set_padding((u16::from(index != 0), u16::from(index != last)));
            }
        }

        Columns { table, columns }
    }

    /// Add a row. Missing cells are left empty, extra cells are ignored.
    pub fn row(&mut self, cells: impl IntoIterator<Item = String>) {
        let mut cells: Vec<String> = cells.into_iter().take(self.columns.len()).collect();
        cells.resize(self.columns.len(), String::new());
        self.table.add_row(cells);
    }

    /// The rendered lines without trailing whitespace.
    pub fn render(&self) -> String {
        self.table
            .lines()
            .map(|line| line.trim_end().to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLUMNS: &[Column] = &[Column::text("Method"), Column::number("Returns")];

    #[test]
    fn renders_aligned_columns() {
        let mut table = Columns::new(COLUMNS);
        table.row(["A::Run".to_string(), "1".to_string()]);
        table.row(["A::LongerName".to_string(), "12".to_string()]);

        let rendered = table.render();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Method"));
        assert!(lines[1].starts_with("A::Run"));
        assert!(lines[1].ends_with(" 1"));
        assert_eq!(lines[1].len(), lines[2].len());
    }

    #[test]
    fn short_rows_are_padded() {
        let mut table = Columns::new(COLUMNS);
        table.row(["A::Run".to_string()]);
        assert_eq!(table.render().lines().count(), 2);
    }
}
