//! Terminal tables for the `timegraph` binary

use tabled::{Table, Tabled, settings::Style};

use crate::entity::Entity;
use crate::relation::Relation;
use crate::storage::{StoreStats, VectorDiagnostics};

#[derive(Tabled)]
pub struct TableRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

#[derive(Default)]
pub struct TableBuilder {
    rows: Vec<TableRow>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_row(&mut self, label: &str, value: impl ToString) {
        self.rows.push(TableRow {
            metric: label.to_string(),
            value: value.to_string(),
        });
    }

    pub fn build(&self) -> String {
        if self.rows.is_empty() {
            return String::new();
        }
        Table::new(&self.rows).with(Style::rounded()).to_string()
    }
}

pub fn stats_table(stats: &StoreStats) -> String {
    let mut builder = TableBuilder::new();
    builder.add_row("Live entities", stats.live_entities);
    builder.add_row("Entity versions", stats.entity_versions);
    builder.add_row("Live relations", stats.live_relations);
    builder.add_row("Relation versions", stats.relation_versions);
    builder.add_row("Embeddings", stats.embeddings);
    builder.build()
}

pub fn diagnostics_table(report: &VectorDiagnostics) -> String {
    let mut builder = TableBuilder::new();
    builder.add_row("Dimensions", report.dimensions);
    builder.add_row("Live entities", report.total_entities);
    builder.add_row("With embedding", report.entities_with_embeddings);
    builder.add_row(
        "Without embedding",
        report.total_entities.saturating_sub(report.entities_with_embeddings),
    );
    builder.add_row("Wrong dimensions", report.mismatched_dimensions);
    for sample in &report.sample {
        builder.add_row(
            &format!("Sample: {}", sample.name),
            format!("{} ({} dims) @ {}", sample.model, sample.dimensions, sample.updated_at),
        );
    }
    builder.build()
}

#[derive(Tabled)]
struct VersionRow {
    #[tabled(rename = "Version")]
    version: i64,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Valid from")]
    valid_from: i64,
    #[tabled(rename = "Valid to")]
    valid_to: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

fn valid_to_cell(valid_to: Option<i64>) -> String {
    valid_to.map_or_else(|| "live".to_string(), |t| t.to_string())
}

/// One row per entity version
pub fn entity_history_table(history: &[Entity]) -> String {
    let rows: Vec<VersionRow> = history
        .iter()
        .map(|e| VersionRow {
            version: e.version,
            name: e.name.clone(),
            valid_from: e.valid_from,
            valid_to: valid_to_cell(e.valid_to),
            detail: format!("{} observations", e.observations.len()),
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

/// One row per relation version
pub fn relation_history_table(history: &[Relation]) -> String {
    let score = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{:.3}", v));
    let rows: Vec<VersionRow> = history
        .iter()
        .map(|r| VersionRow {
            version: r.version,
            name: r.key().to_string(),
            valid_from: r.valid_from,
            valid_to: valid_to_cell(r.valid_to),
            detail: format!("strength {} confidence {}", score(r.strength), score(r.confidence)),
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}
