use super::ui::{self, StyleType};
use crate::core::{BarSeries, FailureKind, FetchRequest, RetrievalError};
use crate::retrieval::{RetrieveOptions, Retriever};
use comfy_table::Table;

pub fn bars_table(series: &BarSeries) -> Table {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Date"),
        ui::header_cell("Open"),
        ui::header_cell("High"),
        ui::header_cell("Low"),
        ui::header_cell("Close"),
        ui::header_cell("Volume"),
        ui::header_cell("Adj. Close"),
        ui::header_cell("Change %"),
    ]);
    for bar in series.bars() {
        table.add_row(vec![
            comfy_table::Cell::new(bar.date.to_string()),
            ui::number_cell(bar.open, 2),
            ui::number_cell(bar.high, 2),
            ui::number_cell(bar.low, 2),
            ui::number_cell(bar.close, 2),
            ui::number_cell(bar.volume, 0),
            ui::format_optional_cell(bar.adjusted_close, |v| format!("{v:.2}")),
            ui::format_optional_cell(bar.pct_change, |v| format!("{v:+.2}")),
        ]);
    }
    table
}

pub async fn run(
    retriever: &Retriever,
    request: FetchRequest,
    options: RetrieveOptions,
) -> anyhow::Result<()> {
    let title = format!(
        "{} {} {} ({})",
        request.market, request.symbol, request.range, request.resolution
    );
    let spinner = ui::new_spinner(&format!("Retrieving {title}"));
    let result = retriever.retrieve_with(request, options).await;
    spinner.finish_and_clear();

    match result {
        Ok(series) => {
            println!("{}", ui::style_text(&title, StyleType::Title));
            println!("{}", bars_table(&series));
            println!(
                "{}",
                ui::style_text(&format!("{} bars", series.len()), StyleType::Subtle)
            );
            Ok(())
        }
        Err(e) => report_failure(&title, e),
    }
}

/// Prints a retrieval failure by kind. Missing data is not an error for the
/// command; everything else is returned to the caller.
pub(crate) fn report_failure(subject: &str, e: RetrievalError) -> anyhow::Result<()> {
    match e.kind() {
        FailureKind::NoData => {
            println!(
                "{}",
                ui::style_text(&format!("No data for {subject}"), StyleType::Warning)
            );
            Ok(())
        }
        FailureKind::TemporarilyUnavailable | FailureKind::DeadlineExceeded => {
            eprintln!(
                "{}",
                ui::style_text("Data sources are temporarily unavailable, retry later", StyleType::Warning)
            );
            Err(e.into())
        }
        FailureKind::Malformed | FailureKind::Unsupported => {
            eprintln!("{}", ui::style_text(&e.to_string(), StyleType::Error));
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Bar;
    use chrono::NaiveDate;

    #[test]
    fn test_bars_table_lists_each_bar() {
        let series = BarSeries::new(vec![
            Bar {
                date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                open: 9.39,
                high: 9.42,
                low: 9.21,
                close: 9.21,
                volume: 1_158_366.0,
                adjusted_close: None,
                amount: None,
                pct_change: None,
            },
            Bar {
                date: NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
                open: 9.19,
                high: 9.22,
                low: 9.15,
                close: 9.20,
                volume: 733_610.0,
                adjusted_close: Some(9.1),
                amount: Some(673_673_613.0),
                pct_change: Some(-0.11),
            },
        ]);
        let mut table = bars_table(&series);
        table.set_width(200);
        let rendered = table.to_string();
        assert!(rendered.contains("2024-01-02"));
        assert!(rendered.contains("2024-01-03"));
        assert!(rendered.contains("1158366"));
        assert!(rendered.contains("9.10"));
        assert!(rendered.contains("N/A"));
        assert!(rendered.contains("-0.11"));
    }
}
