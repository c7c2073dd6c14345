use crate::model::{Compliance, ResultScreen, ScanTab, ScreenContent};

pub fn compliance_label(compliance: &Compliance) -> String {
    match compliance {
        Compliance::Synthetic(value) => format!("{}% (synthetic)", value),
    }
}

/// Plain-text rendering of a result screen: lines joined by newline, tables as aligned columns
pub fn render_screen(screen: &ResultScreen) -> String {
    match &screen.content {
        ScreenContent::Lines(lines) => lines.join("\n"),
        ScreenContent::Table(rows) => render_table(rows),
    }
}

fn render_table(rows: &[Vec<String>]) -> String {
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    let widths: Vec<usize> = (0..columns)
        .map(|col| {
            rows.iter()
                .filter_map(|row| row.get(col))
                .map(|cell| cell.chars().count())
                .max()
                .unwrap_or(0)
        })
        .collect();

    let line = |row: &Vec<String>| -> String {
        (0..columns)
            .map(|col| {
                let cell = row.get(col).map(String::as_str).unwrap_or("");
                format!("{:<width$}", cell, width = widths[col])
            })
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut out = Vec::with_capacity(rows.len() + 1);
    if let Some((header, body)) = rows.split_first() {
        out.push(line(header));
        out.push(
            widths
                .iter()
                .map(|w| "-".repeat(*w))
                .collect::<Vec<_>>()
                .join("  "),
        );
        out.extend(body.iter().map(line));
    }
    out.join("\n")
}

/// Every screen of a tab under its name
pub fn render_tab(tab: &ScanTab) -> String {
    tab.results
        .iter()
        .map(|screen| format!("== {} ==\n{}", screen.screen_name, render_screen(screen)))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;
    use chrono::Utc;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_text_screen() {
        let screen = ResultScreen::text("uptime", vec!["up 3 days".to_string(), "load 0.1".to_string()]);
        assert_eq!(render_screen(&screen), "up 3 days\nload 0.1");
    }

    #[test]
    fn test_table_alignment() {
        let screen = ResultScreen::table(
            "ports",
            vec![
                row(&["Port", "State", "Service"]),
                row(&["22", "open", "ssh"]),
                row(&["8080", "filtered"]),
            ],
        );
        assert_eq!(
            render_screen(&screen),
            "Port  State     Service\n----  --------  -------\n22    open      ssh\n8080  filtered"
        );
        assert_eq!(render_screen(&ResultScreen::table("empty", vec![])), "");
    }

    #[test]
    fn test_labels() {
        assert_eq!(compliance_label(&Compliance::for_index(1)), "85% (synthetic)");
        let tab = ScanTab::new(
            plugin("disk"),
            resource("10.0.0.1", "web"),
            vec![ResultScreen::text("df", vec!["40%".to_string()])],
            vec![],
            Utc::now(),
        );
        assert_eq!(render_tab(&tab), "== df ==\n40%");
    }
}
