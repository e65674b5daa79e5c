use super::ui::{self, StyleType};
use crate::core::{CacheKey, TierStats, TierStatus};
use crate::retrieval::Retriever;
use anyhow::Context;
use comfy_table::{Cell, Table};

pub fn stats_table(stats: &[TierStats]) -> Table {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Tier"),
        ui::header_cell("Status"),
        ui::header_cell("Entries"),
    ]);
    for stat in stats {
        let status = match &stat.status {
            TierStatus::Healthy => ui::status_cell("healthy", true, false),
            TierStatus::Disabled => ui::status_cell("disabled", false, true),
            TierStatus::Error(reason) => ui::status_cell(&format!("error: {reason}"), false, false),
        };
        table.add_row(vec![
            Cell::new(stat.tier.to_string()),
            status,
            ui::format_optional_cell(stat.entries, |n| n.to_string()),
        ]);
    }
    table
}

pub async fn stats(retriever: &Retriever) -> anyhow::Result<()> {
    let stats = retriever.stats().await;
    println!("{}", ui::style_text("Cache tiers", StyleType::Title));
    println!("{}", stats_table(&stats));
    Ok(())
}

/// Removes one entry, given its canonical key string, from every tier.
pub async fn invalidate(retriever: &Retriever, key: &str) -> anyhow::Result<()> {
    let key: CacheKey = key
        .parse()
        .with_context(|| format!("Invalid cache key: {key}"))?;
    retriever.invalidate(&key).await;
    println!(
        "{} {}",
        ui::style_text("Invalidated", StyleType::Success),
        key
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Tier;

    #[test]
    fn test_stats_table_renders_every_tier() {
        let stats = vec![
            TierStats {
                tier: Tier::Volatile,
                status: TierStatus::Healthy,
                entries: Some(12),
            },
            TierStats {
                tier: Tier::Structured,
                status: TierStatus::Error("lock held".to_string()),
                entries: None,
            },
            TierStats {
                tier: Tier::File,
                status: TierStatus::Disabled,
                entries: None,
            },
        ];
        let mut table = stats_table(&stats);
        table.set_width(200);
        let rendered = table.to_string();
        assert!(rendered.contains("volatile"));
        assert!(rendered.contains("error: lock held"));
        assert!(rendered.contains("disabled"));
        assert!(rendered.contains("12"));
    }
}
