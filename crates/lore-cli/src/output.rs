//! Plain-text table rendering for human-readable CLI output.
//!
//! Ported from `mcp-agent-mail-cli`'s `CliTable`, trimmed to this crate's
//! needs (no TTY color, no external rendering crate).

/// A simple auto-sizing table renderer.
pub struct CliTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl CliTable {
    #[must_use]
    pub fn new(headers: Vec<&str>) -> Self {
        CliTable {
            headers: headers.into_iter().map(String::from).collect(),
            rows: Vec::new(),
        }
    }

    pub fn add_row(&mut self, cells: Vec<String>) {
        self.rows.push(cells);
    }

    fn column_widths(&self) -> Vec<usize> {
        let mut widths: Vec<usize> = self.headers.iter().map(String::len).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                if i < widths.len() {
                    widths[i] = widths[i].max(cell.len());
                }
            }
        }
        widths
    }

    /// Render to stdout, one line per row plus a header.
    pub fn render(&self) {
        if self.rows.is_empty() {
            println!("(no results)");
            return;
        }
        let widths = self.column_widths();
        let header_line: Vec<String> = self
            .headers
            .iter()
            .zip(&widths)
            .map(|(h, w)| format!("{h:<w$}"))
            .collect();
        println!("{}", header_line.join("  "));
        println!("{}", "-".repeat(header_line.iter().map(String::len).sum::<usize>() + 2 * (widths.len().saturating_sub(1))));
        for row in &self.rows {
            let line: Vec<String> = row
                .iter()
                .enumerate()
                .map(|(i, cell)| {
                    let w = widths.get(i).copied().unwrap_or(0);
                    format!("{cell:<w$}")
                })
                .collect();
            println!("{}", line.join("  "));
        }
    }
}

/// Print a value as pretty-printed JSON.
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
