use super::ui::{self, StyleType};
use crate::chain::ProviderChain;
use crate::core::Market;
use comfy_table::{Cell, Table};

pub fn markets_table(chain: &ProviderChain) -> Table {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Code"),
        ui::header_cell("Market"),
        ui::header_cell("Currency"),
        ui::header_cell("Timezone"),
        ui::header_cell("Trading Hours"),
        ui::header_cell("Providers"),
    ]);
    for market in Market::ALL {
        let info = market.info();
        let providers = chain.providers_for(market);
        let providers_cell = if providers.is_empty() {
            Cell::new(ui::style_text("none", StyleType::Subtle))
        } else {
            Cell::new(providers.join(" → "))
        };
        table.add_row(vec![
            Cell::new(market.code()),
            Cell::new(info.name),
            Cell::new(info.currency),
            Cell::new(info.timezone),
            Cell::new(info.trading_hours),
            providers_cell,
        ]);
    }
    table
}

pub fn run(chain: &ProviderChain) -> anyhow::Result<()> {
    println!("{}", ui::style_text("Markets", StyleType::Title));
    println!("{}", markets_table(chain));
    Ok(())
}
