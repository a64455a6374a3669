//! Human-readable output for each command.

use owo_colors::OwoColorize;
use plinth::cleanup::DropReport;
use plinth::migrate::{CreateReport, UpdateReport};
use plinth::seed::SeedReport;
use plinth::service::{MigrateOutcome, SchemaDump, StatusReport, TableDiffView, TableView};

fn section(title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    println!("{} ({})", title.bold(), items.len());
    for item in items {
        println!("  {item}");
    }
}

fn errors(items: &[String]) {
    if items.is_empty() {
        return;
    }
    println!("{} ({})", "Errors".red().bold(), items.len());
    for item in items {
        println!("  {}", item.red());
    }
}

fn statements(sql: &[String]) {
    for statement in sql {
        for line in statement.lines() {
            println!("  {}", line.dimmed());
        }
    }
}

pub fn migrate(outcome: &MigrateOutcome) {
    match outcome {
        MigrateOutcome::Create(report) => create(report),
        MigrateOutcome::Update(report) => update(report),
    }
}

fn create(report: &CreateReport) {
    if !report.planned.is_empty() {
        println!("{}", "Dry run, nothing executed".yellow());
        statements(&report.planned);
    }
    section("Created", &report.created);
    section("Already present", &report.skipped);
    section("Foreign keys", &report.foreign_keys);

    let registration = &report.registration;
    section("Registered", &registration.registered);
    section("Registration skipped", &registration.skipped);
    errors(&registration.errors);

    errors(&report.errors);
    if report.rolled_back {
        println!("{}", "Transaction rolled back, no tables were created".red());
    } else if report.created.is_empty() && report.planned.is_empty() && report.errors.is_empty() {
        println!("{}", "Nothing to create".green());
    }
}

fn update(report: &UpdateReport) {
    for plan in &report.plans {
        println!("{} ({} changes)", plan.table.bold(), plan.diff.change_count());
        print!("{}", plan.diff);
        statements(&plan.commands);
    }
    section("Updated", &report.updated);
    section("Skipped", &report.skipped);
    errors(&report.errors);
    if report.plans.is_empty() && report.errors.is_empty() {
        println!("{}", "All tables up to date".green());
    }
}

pub fn status(report: &StatusReport) {
    let info = &report.info;
    println!(
        "{} tables in schema, {} in database",
        info.schema_tables.len(),
        info.existing_tables.len()
    );
    section("Missing from database", &info.missing_tables);
    section("Not in schema", &info.extra_tables);
    errors(&info.validation_errors);

    if report.is_up_to_date {
        println!("{}", "Up to date".green());
    } else {
        println!("{}", "Out of date, run `plinth migrate`".yellow());
    }
}

pub fn schema(dump: &SchemaDump) {
    println!("{}", "Parent templates".bold());
    for parent in &dump.parents {
        println!("  {} ({} columns)", parent.name, parent.columns);
    }

    println!("{}", "Tables".bold());
    for table in &dump.tables {
        let mut notes = Vec::new();
        if let Some(parent) = &table.parent {
            notes.push(format!("parent {parent}"));
        }
        if let Some(plugin) = &table.plugin {
            notes.push(format!("plugin {plugin}"));
        }
        let notes = if notes.is_empty() {
            String::new()
        } else {
            format!(" [{}]", notes.join(", "))
        };
        println!(
            "  {} ({} columns, {} own){}",
            table.name, table.columns, table.own_columns, notes.dimmed()
        );
    }

    section("Creation order", &dump.creation_order.tables);
    if dump.creation_order.has_cycles() {
        println!(
            "{} {}",
            "Circular dependencies:".yellow(),
            dump.creation_order.cyclic.join(", ")
        );
    }
    errors(&dump.validation_errors);
}

pub fn table_view(view: &TableView) {
    println!("{}", view.name.bold());
    if let Some(description) = &view.definition.description {
        println!("  {}", description.dimmed());
    }
    if let Some(origin) = &view.origin {
        println!("  source: {}", origin.source);
        if let Some(parent) = &origin.parent {
            println!("  parent: {parent}");
        }
    }

    for (name, column) in &view.definition.columns {
        let mut attrs = Vec::new();
        if column.primary_key {
            attrs.push("PK".to_string());
        }
        if column.unique {
            attrs.push("UNIQUE".to_string());
        }
        if column.auto_increment {
            attrs.push("IDENTITY".to_string());
        }
        if column.is_not_null() {
            attrs.push("NOT NULL".to_string());
        }
        if let Some(default) = &column.default {
            attrs.push(format!("DEFAULT {default}"));
        }
        if let Some(fk) = &column.foreign_key {
            attrs.push(format!("-> {fk}"));
        }

        let attrs = if attrs.is_empty() {
            String::new()
        } else {
            format!(" [{}]", attrs.join(", "))
        };
        println!("    {name}: {}{attrs}", column.sql_type);
    }

    println!();
    statements(&view.sql);
}

pub fn diff(view: &TableDiffView) {
    if view.diff.is_empty() {
        println!("{} {}", view.diff.table.bold(), "up to date".green());
        return;
    }
    println!("{} ({} changes)", view.diff.table.bold(), view.diff.change_count());
    for line in view.diff.to_string().lines() {
        match line.chars().next() {
            Some('+') => println!("  {}", line.green()),
            Some('-') => println!("  {}", line.red()),
            _ => println!("  {}", line.yellow()),
        }
    }
    statements(&view.commands);
}

pub fn drop_candidates(report: &DropReport) {
    println!("{}", "The following tables will be dropped:".yellow().bold());
    for table in &report.candidates {
        println!("  {table}");
    }
}

pub fn dropped(report: &DropReport) {
    if report.candidates.is_empty() {
        println!("{}", "No tables to drop".green());
        return;
    }
    if report.dropped.is_empty() && report.errors.is_empty() {
        println!("{}", "Nothing dropped".yellow());
        return;
    }
    section("Foreign keys dropped", &report.foreign_keys_dropped);
    section("Dropped", &report.dropped);
    errors(&report.errors);
}

pub fn seed(report: &SeedReport) {
    section("Seeded", &report.seeded);
    section("Skipped", &report.skipped);
    errors(&report.errors);
    if report.seeded.is_empty() && report.skipped.is_empty() && report.errors.is_empty() {
        println!("{}", "No seed data found".dimmed());
    }
}
