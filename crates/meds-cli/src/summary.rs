use std::time::Duration;

use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};

use meds_cli::types::{LockListing, RunReport};

pub fn print_run_summary(report: &RunReport) {
    println!("{}", run_table(report));
    if !report.is_complete() {
        println!(
            "{} output(s) were being produced by other workers; rerun to pick up any they abandon.",
            report.locked()
        );
    }
}

pub fn print_lock_table(listings: &[LockListing]) {
    if listings.is_empty() {
        println!("No lock markers found.");
        return;
    }
    println!("{}", lock_table(listings));
}

fn run_table(report: &RunReport) -> Table {
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Stage"),
        header_cell("Items"),
        header_cell("Computed"),
        header_cell("Cache hits"),
        header_cell("Locked"),
        header_cell("Elapsed"),
    ]);
    apply_table_style(&mut table);
    for index in 1..=4 {
        align_column(&mut table, index, CellAlignment::Right);
    }
    table.add_row(vec![
        Cell::new(report.stage).add_attribute(Attribute::Bold),
        Cell::new(report.items.len()),
        count_cell(report.computed(), Color::Green),
        count_cell(report.cache_hits(), Color::Blue),
        count_cell(report.locked(), Color::Yellow),
        Cell::new(format_duration(report.elapsed)),
    ]);
    table
}

fn lock_table(listings: &[LockListing]) -> Table {
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Marker"),
        header_cell("Owner"),
        header_cell("Age"),
        header_cell("Stale"),
    ]);
    apply_table_style(&mut table);
    align_column(&mut table, 2, CellAlignment::Right);
    align_column(&mut table, 3, CellAlignment::Center);
    for listing in listings {
        let stale = if listing.stale {
            Cell::new("yes").fg(Color::Red).add_attribute(Attribute::Bold)
        } else {
            Cell::new("no").fg(Color::Green)
        };
        table.add_row(vec![
            Cell::new(listing.marker.display()),
            Cell::new(listing.owner.as_deref().unwrap_or("unknown")),
            Cell::new(format_duration(listing.age)),
            stale,
        ]);
    }
    table
}

fn apply_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(120);
}

fn align_column(table: &mut Table, index: usize, alignment: CellAlignment) {
    if let Some(column) = table.column_mut(index) {
        column.set_cell_alignment(alignment);
    }
}

fn header_cell(label: &str) -> Cell {
    Cell::new(label).add_attribute(Attribute::Bold)
}

fn count_cell(count: usize, color: Color) -> Cell {
    if count > 0 {
        Cell::new(count).fg(color).add_attribute(Attribute::Bold)
    } else {
        Cell::new(count).add_attribute(Attribute::Dim)
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}h {:02}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.2}s", duration.as_secs_f64())
    }
}
