// SPDX-License-Identifier: GPL-2.0

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Plain text table with grouped headers:
//!
//! ```text
//! # data                          | kern latency
//! #                               | jitter                  | overruns
//! # num | kernel parameter | load | mean    | stdev   | max | mean | max
//! # 1   | 1                | 1    | ns      | ns      | ns  | 1    | 1
//!     3 | isolcpus=1       | none |    1200 |     310 | ... |      |
//! ```

use std::io::Write;

use anyhow::Result;

const SEP: &str = " | ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
}

#[derive(Debug, Clone)]
pub struct Column {
    section: String,
    subsection: String,
    label: String,
    unit: String,
    align: Align,
    width: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    /// A number printed with the given number of decimals.
    Num(f64, usize),
    Missing,
}

impl Cell {
    fn render(&self) -> String {
        match self {
            Cell::Text(s) => s.clone(),
            Cell::Num(v, _) if v.is_nan() => "-".to_string(),
            Cell::Num(v, prec) => format!("{v:.prec$}"),
            Cell::Missing => "-".to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Table {
    columns: Vec<Column>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new() -> Table {
        Table::default()
    }

    /// Append a column and return its index. `width` is the minimum width.
    pub fn add_column(
        &mut self,
        section: &str,
        subsection: &str,
        label: &str,
        unit: &str,
        align: Align,
        width: usize,
    ) -> usize {
        self.columns.push(Column {
            section: section.to_string(),
            subsection: subsection.to_string(),
            label: label.to_string(),
            unit: unit.to_string(),
            align,
            width,
        });
        self.columns.len() - 1
    }

    /// Start a new row with every cell missing and return its index.
    pub fn add_row(&mut self) -> usize {
        self.rows.push(vec![Cell::Missing; self.columns.len()]);
        self.rows.len() - 1
    }

    pub fn set(&mut self, row: usize, col: usize, cell: Cell) {
        let cells = &mut self.rows[row];
        if cells.len() < self.columns.len() {
            cells.resize(self.columns.len(), Cell::Missing);
        }
        cells[col] = cell;
    }

    fn widths(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let cells = self
                    .rows
                    .iter()
                    .filter_map(|r| r.get(i))
                    .map(|cell| cell.render().chars().count());
                cells
                    .chain([c.width, c.label.chars().count(), c.unit.chars().count()])
                    .max()
                    .unwrap_or(0)
            })
            .collect()
    }

    /// Header line spanning groups of consecutive columns sharing `key`.
    fn write_groups<W, F>(&self, out: &mut W, widths: &[usize], key: F) -> Result<()>
    where
        W: Write,
        F: Fn(&Column) -> (&str, &str),
    {
        let mut line = String::from("# ");
        let mut i = 0;
        while i < self.columns.len() {
            let group = key(&self.columns[i]);
            let mut span = widths[i];
            let mut j = i + 1;
            while j < self.columns.len() && key(&self.columns[j]) == group {
                span += SEP.len() + widths[j];
                j += 1;
            }
            if i > 0 {
                line.push_str(SEP);
            }
            line.push_str(&format!("{:<span$}", group.1));
            i = j;
        }
        writeln!(out, "{}", line.trim_end())?;
        Ok(())
    }

    fn write_line<W: Write>(
        out: &mut W,
        prefix: &str,
        cells: impl Iterator<Item = (String, usize, Align)>,
    ) -> Result<()> {
        let mut line = String::from(prefix);
        for (i, (text, width, align)) in cells.enumerate() {
            if i > 0 {
                line.push_str(SEP);
            }
            match align {
                Align::Left => line.push_str(&format!("{text:<width$}")),
                Align::Right => line.push_str(&format!("{text:>width$}")),
            }
        }
        writeln!(out, "{}", line.trim_end())?;
        Ok(())
    }

    pub fn write<W: Write>(&self, out: &mut W, number_cols: bool) -> Result<()> {
        if self.columns.is_empty() {
            return Ok(());
        }
        let widths = self.widths();

        self.write_groups(out, &widths, |c| (c.section.as_str(), c.section.as_str()))?;
        self.write_groups(out, &widths, |c| (c.section.as_str(), c.subsection.as_str()))?;
        Self::write_line(
            out,
            "# ",
            self.columns
                .iter()
                .zip(&widths)
                .map(|(c, w)| (c.label.clone(), *w, Align::Left)),
        )?;
        Self::write_line(
            out,
            "# ",
            self.columns
                .iter()
                .zip(&widths)
                .map(|(c, w)| (c.unit.clone(), *w, Align::Left)),
        )?;
        if number_cols {
            Self::write_line(
                out,
                "# ",
                widths
                    .iter()
                    .enumerate()
                    .map(|(i, w)| ((i + 1).to_string(), *w, Align::Right)),
            )?;
        }

        for row in self.rows.iter() {
            Self::write_line(
                out,
                "  ",
                self.columns.iter().zip(&widths).enumerate().map(|(i, (c, w))| {
                    let cell = row.get(i).unwrap_or(&Cell::Missing);
                    // Missing values line up with the numbers.
                    let align = match cell {
                        Cell::Text(_) => c.align,
                        _ => Align::Right,
                    };
                    (cell.render(), *w, align)
                }),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(table: &Table, number_cols: bool) -> String {
        let mut out = Vec::new();
        table.write(&mut out, number_cols).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_grouped_headers() {
        let mut t = Table::new();
        let num = t.add_column("data", "", "num", "1", Align::Right, 3);
        let mean = t.add_column("kern latency", "jitter", "mean", "ns", Align::Right, 4);
        let max = t.add_column("kern latency", "jitter", "max", "ns", Align::Right, 4);
        let row = t.add_row();
        t.set(row, num, Cell::Text("7".into()));
        t.set(row, mean, Cell::Num(12.4, 0));
        t.set(row, max, Cell::Num(99.0, 0));

        let text = render(&t, true);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "# data | kern latency");
        assert_eq!(lines[1], "#     | jitter");
        assert_eq!(lines[2], "# num | mean | max");
        assert_eq!(lines[3], "# 1   | ns   | ns");
        assert_eq!(lines[4], "#   1 |    2 |    3");
        assert_eq!(lines[5], "    7 |   12 |   99");
    }

    #[test]
    fn test_missing_cells() {
        let mut t = Table::new();
        let name = t.add_column("data", "", "name", "", Align::Left, 2);
        t.add_column("data", "", "value", "", Align::Right, 5);
        let row = t.add_row();
        t.set(row, name, Cell::Text("abc".into()));
        let row = t.add_row();
        t.set(row, 1, Cell::Num(f64::NAN, 1));

        let text = render(&t, false);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[4], "  abc  |     -");
        assert_eq!(lines[5], "     - |     -");
    }
}
