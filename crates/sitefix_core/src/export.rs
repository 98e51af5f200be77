//! CSV layouts for fix plans and apply results, and the reverse import of an
//! edited plan.

use std::collections::BTreeMap;

use anyhow::{Result, bail};

use crate::apply::ApplyReport;
use crate::crawl::{BrokenUrlRecord, ImageAltRecord, RedirectChainRecord};
use crate::csv::{CsvTable, cell};
use crate::session::{Decision, DecisionAction, DecisionBook, DecisionOrigin};

pub const FIX_PLAN_HEADERS: &[&str] = &[
    "source_url",
    "broken_url",
    "status_code",
    "is_internal",
    "action",
    "replacement_url",
    "notes",
];

pub const REDIRECT_CHAIN_HEADERS: &[&str] = &[
    "source_url",
    "old_url",
    "new_url",
    "redirect_type",
    "hops",
    "action",
];

pub const ALT_TEXT_HEADERS: &[&str] = &[
    "source_url",
    "image_url",
    "current_alt",
    "alt_status",
    "new_alt",
];

pub const APPLY_RESULT_HEADERS: &[&str] = &["source_url", "target_url", "action", "status", "message"];

fn table_with(headers: &[&str]) -> CsvTable {
    CsvTable::new(headers.iter().map(|header| header.to_string()).collect())
}

/// One row per (source page, broken URL). Undecided URLs get a blank action
/// so the file doubles as an editable plan.
pub fn fix_plan_table(records: &[BrokenUrlRecord], decisions: &DecisionBook) -> CsvTable {
    let mut table = table_with(FIX_PLAN_HEADERS);
    for record in records {
        let decision = decisions.get(&record.url);
        let action = decision
            .map(|decision| decision.action.as_str())
            .unwrap_or_default();
        let replacement = decision
            .and_then(Decision::replacement)
            .unwrap_or_default();
        let notes = decision
            .map(|decision| decision.notes.as_str())
            .unwrap_or_default();
        let status_code = record
            .status_code
            .map(|code| code.to_string())
            .unwrap_or_default();
        for source in &record.source_pages {
            table.push_row(vec![
                source.clone(),
                record.url.clone(),
                status_code.clone(),
                record.is_internal.to_string(),
                action.to_string(),
                replacement.to_string(),
                notes.to_string(),
            ]);
        }
    }
    table
}

/// Reads an edited fix plan. Rows with a blank action are ignored; the first
/// decided row for a URL wins.
pub fn read_decisions(table: &CsvTable) -> Result<DecisionBook> {
    let url_column = table.column("broken_url");
    let action_column = table.column("action");
    if url_column.is_none() || action_column.is_none() {
        bail!("fix plan needs broken_url and action columns");
    }
    let replacement_column = table.column("replacement_url");
    let notes_column = table.column("notes");

    let mut book = DecisionBook::new();
    for (line, row) in table.rows.iter().enumerate() {
        let url = cell(row, url_column);
        let raw_action = cell(row, action_column);
        if url.is_empty() || raw_action.is_empty() || book.get(url).is_some() {
            continue;
        }
        let Some(action) = DecisionAction::parse(raw_action) else {
            bail!("row {}: unknown action '{raw_action}'", line + 2);
        };
        let replacement = cell(row, replacement_column);
        let decision = Decision {
            action,
            replacement_url: (!replacement.is_empty()).then(|| replacement.to_string()),
            notes: cell(row, notes_column).to_string(),
            origin: DecisionOrigin::Human,
        };
        book.record(url, decision)
            .map_err(|error| anyhow::anyhow!("row {}: {error}", line + 2))?;
    }
    Ok(book)
}

/// Rows for every chain not decided as skip.
pub fn redirect_chain_table(records: &[RedirectChainRecord], decisions: &DecisionBook) -> CsvTable {
    let mut table = table_with(REDIRECT_CHAIN_HEADERS);
    for record in records {
        if decisions
            .get(&record.address)
            .is_some_and(|decision| decision.action == DecisionAction::Skip)
        {
            continue;
        }
        let redirect_type = if record.is_temp_redirect {
            "302 (Temporary)"
        } else {
            "301 (Permanent)"
        };
        for source in &record.sources {
            table.push_row(vec![
                source.clone(),
                record.address.clone(),
                record.final_address.clone(),
                redirect_type.to_string(),
                record.hops.to_string(),
                "replace".to_string(),
            ]);
        }
    }
    table
}

pub fn alt_text_table(images: &[ImageAltRecord], alt_texts: &BTreeMap<String, String>) -> CsvTable {
    let mut table = table_with(ALT_TEXT_HEADERS);
    for image in images {
        let new_alt = alt_texts
            .get(&image.image_url)
            .map(String::as_str)
            .unwrap_or_default();
        for source in &image.sources {
            table.push_row(vec![
                source.clone(),
                image.image_url.clone(),
                image.current_alt.clone(),
                image.alt_status.as_str().to_string(),
                new_alt.to_string(),
            ]);
        }
    }
    table
}

/// Image URL to new alt text from an edited alt-text export.
pub fn read_alt_texts(table: &CsvTable) -> Result<BTreeMap<String, String>> {
    let image_column = table.column("image_url");
    let alt_column = table.column("new_alt");
    if image_column.is_none() || alt_column.is_none() {
        bail!("alt text plan needs image_url and new_alt columns");
    }
    let mut alt_texts = BTreeMap::new();
    for row in &table.rows {
        let image_url = cell(row, image_column);
        let new_alt = cell(row, alt_column);
        if image_url.is_empty() || new_alt.is_empty() {
            continue;
        }
        alt_texts
            .entry(image_url.to_string())
            .or_insert_with(|| new_alt.to_string());
    }
    Ok(alt_texts)
}

pub fn apply_results_table(report: &ApplyReport) -> CsvTable {
    let mut table = table_with(APPLY_RESULT_HEADERS);
    for item in &report.items {
        table.push_row(vec![
            item.source_url.clone(),
            item.target_url.clone(),
            item.action.as_str().to_string(),
            item.status.as_str().to_string(),
            item.message.clone(),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::AltStatus;

    fn record() -> BrokenUrlRecord {
        BrokenUrlRecord {
            url: "https://example.com/dead".to_string(),
            status_code: Some(404),
            status_text: "Not Found".to_string(),
            is_internal: true,
            anchor_texts: vec![],
            occurrence_count: 2,
            source_pages: vec![
                "https://example.com/a/".to_string(),
                "https://example.com/b/".to_string(),
            ],
            source_post_ids: BTreeMap::new(),
        }
    }

    #[test]
    fn fix_plan_reads_back_into_decisions() {
        let mut book = DecisionBook::new();
        book.record("https://example.com/dead", Decision::replace("https://example.com/new"))
            .expect("record");
        let table = fix_plan_table(&[record()], &book);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(
            table.rows[0],
            vec![
                "https://example.com/a/",
                "https://example.com/dead",
                "404",
                "true",
                "replace",
                "https://example.com/new",
                "",
            ]
        );

        let reparsed = CsvTable::parse(&table.to_csv_string()).expect("reparse");
        assert_eq!(read_decisions(&reparsed).expect("decisions"), book);
    }

    #[test]
    fn suggestion_notes_survive_the_plan_file() {
        let mut book = DecisionBook::new();
        book.record(
            "https://example.com/dead",
            Decision::remove()
                .with_notes("Page was retired, no successor found.")
                .from_ai(),
        )
        .expect("record");
        let table = fix_plan_table(&[record()], &book);
        assert_eq!(table.headers.last().map(String::as_str), Some("notes"));
        assert_eq!(table.rows[1][6], "Page was retired, no successor found.");

        let reparsed = CsvTable::parse(&table.to_csv_string()).expect("reparse");
        let decisions = read_decisions(&reparsed).expect("decisions");
        let decision = decisions.get("https://example.com/dead").expect("decision");
        assert_eq!(decision.action, DecisionAction::Remove);
        assert_eq!(decision.notes, "Page was retired, no successor found.");
    }

    #[test]
    fn undecided_rows_have_blank_actions_and_are_ignored_on_import() {
        let table = fix_plan_table(&[record()], &DecisionBook::new());
        assert_eq!(table.rows[0][4], "");
        assert!(read_decisions(&table).expect("decisions").is_empty());
    }

    #[test]
    fn import_rejects_bad_rows() {
        let table = CsvTable::parse("broken_url,action,replacement_url\nhttps://x/,replace,\n")
            .expect("parse");
        let error = read_decisions(&table).expect_err("blank replacement");
        assert!(error.to_string().starts_with("row 2:"));

        let table = CsvTable::parse("broken_url,action\nhttps://x/,nuke\n").expect("parse");
        assert!(read_decisions(&table).is_err());

        let table = CsvTable::parse("url,what\n").expect("parse");
        assert!(read_decisions(&table).is_err());
    }

    #[test]
    fn redirect_chain_rows_label_temporary_redirects() {
        let chain = RedirectChainRecord {
            address: "https://example.com/old".to_string(),
            final_address: "https://example.com/new".to_string(),
            is_internal: true,
            is_temp_redirect: true,
            hops: 2,
            anchors: vec![],
            sources: vec!["https://example.com/p/".to_string()],
            source_post_ids: BTreeMap::new(),
            count: 1,
        };
        let table = redirect_chain_table(&[chain], &DecisionBook::new());
        assert_eq!(table.rows[0][3], "302 (Temporary)");
        assert_eq!(table.rows[0][4], "2");
    }

    #[test]
    fn alt_text_plan_round_trips_new_alt() {
        let image = ImageAltRecord {
            image_url: "https://example.com/up/a.png".to_string(),
            current_alt: "IMG_1".to_string(),
            alt_status: AltStatus::Filename,
            img_type: "Image".to_string(),
            sources: vec!["https://example.com/p/".to_string()],
            source_post_ids: BTreeMap::new(),
            count: 1,
        };
        let alt_texts = BTreeMap::from([(image.image_url.clone(), "A red kite".to_string())]);
        let table = alt_text_table(&[image], &alt_texts);
        assert_eq!(table.rows[0][3], "filename");
        assert_eq!(read_alt_texts(&table).expect("alt texts"), alt_texts);
    }
}
