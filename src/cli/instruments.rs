use super::fetch::report_failure;
use super::ui::{self, StyleType};
use crate::core::{Instrument, Market};
use crate::retrieval::{RetrieveOptions, Retriever};
use comfy_table::{Cell, Table};

/// Rows printed when no search keyword narrows the list.
const UNFILTERED_LIMIT: usize = 50;

pub fn instruments_table(instruments: &[Instrument]) -> Table {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Symbol"),
        ui::header_cell("Name"),
        ui::header_cell("Board"),
    ]);
    for instrument in instruments {
        table.add_row(vec![
            Cell::new(&instrument.symbol),
            Cell::new(&instrument.name),
            Cell::new(instrument.board.as_deref().unwrap_or("-")),
        ]);
    }
    table
}

pub async fn run(
    retriever: &Retriever,
    market: Market,
    keyword: Option<&str>,
    options: RetrieveOptions,
) -> anyhow::Result<()> {
    let title = match keyword {
        Some(keyword) => format!("{market} instruments matching '{keyword}'"),
        None => format!("{market} instruments"),
    };
    let spinner = ui::new_spinner(&format!("Listing {title}"));
    let result = match keyword {
        Some(keyword) => retriever.search(market, keyword, options).await,
        None => retriever
            .instruments(market, options)
            .await
            .map(|list| list.instruments().to_vec()),
    };
    spinner.finish_and_clear();

    let instruments = match result {
        Ok(instruments) => instruments,
        Err(e) => return report_failure(&title, e),
    };
    if instruments.is_empty() {
        println!("{}", ui::style_text(&format!("No {title}"), StyleType::Warning));
        return Ok(());
    }

    let shown = if keyword.is_some() {
        instruments.len()
    } else {
        instruments.len().min(UNFILTERED_LIMIT)
    };
    println!("{}", ui::style_text(&title, StyleType::Title));
    println!("{}", instruments_table(&instruments[..shown]));
    let summary = if shown < instruments.len() {
        format!(
            "showing {shown} of {} instruments, pass --search to narrow",
            instruments.len()
        )
    } else {
        format!("{} instruments", instruments.len())
    };
    println!("{}", ui::style_text(&summary, StyleType::Subtle));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruments_table_shows_missing_board() {
        let instruments = vec![
            Instrument {
                symbol: "000001".to_string(),
                name: "平安银行".to_string(),
                market: Market::China,
                board: Some("SZ".to_string()),
            },
            Instrument {
                symbol: "AAPL".to_string(),
                name: "Apple Inc.".to_string(),
                market: Market::UnitedStates,
                board: None,
            },
        ];
        let mut table = instruments_table(&instruments);
        table.set_width(200);
        let rendered = table.to_string();
        assert!(rendered.contains("000001"));
        assert!(rendered.contains("平安银行"));
        assert!(rendered.contains("SZ"));
        assert!(rendered.contains("Apple Inc."));
        assert!(rendered.contains(" - "));
    }
}
