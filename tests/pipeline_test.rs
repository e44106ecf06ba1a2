use std::fs;
use std::path::Path;
use std::sync::Arc;

use esl_sync::config::Config;
use esl_sync::sync::{CycleOrchestrator, CycleOutcome, CycleStats, StateStore};

fn descriptor(name: &str, ftype: u8, len: u8, dec: u8) -> [u8; 32] {
    let mut d = [0u8; 32];
    d[..name.len()].copy_from_slice(name.as_bytes());
    d[11] = ftype;
    d[16] = len;
    d[17] = dec;
    d
}

/// Builds a dBase III table from field specs and cell-text rows.
fn build_table(fields: &[(&str, u8, u8, u8)], rows: &[Vec<&str>]) -> Vec<u8> {
    let record_len: usize = 1 + fields.iter().map(|f| f.2 as usize).sum::<usize>();
    let header_len = 32 + fields.len() * 32 + 1;

    let mut out = vec![0u8; 32];
    out[0] = 0x03;
    out[1] = 124;
    out[2] = 6;
    out[3] = 1;
    out[4..8].copy_from_slice(&(rows.len() as u32).to_le_bytes());
    out[8..10].copy_from_slice(&(header_len as u16).to_le_bytes());
    out[10..12].copy_from_slice(&(record_len as u16).to_le_bytes());

    for (name, ftype, len, dec) in fields {
        out.extend_from_slice(&descriptor(name, *ftype, *len, *dec));
    }
    out.push(0x0d);

    for values in rows {
        out.push(b' ');
        for ((_, ftype, len, _), value) in fields.iter().zip(values) {
            let mut cell = vec![b' '; *len as usize];
            let bytes = value.as_bytes();
            let n = bytes.len().min(cell.len());
            if *ftype == b'N' {
                let start = cell.len() - n;
                cell[start..].copy_from_slice(&bytes[..n]);
            } else {
                cell[..n].copy_from_slice(&bytes[..n]);
            }
            out.extend_from_slice(&cell);
        }
    }
    out.push(0x1a);
    out
}

const STOCK_FIELDS: &[(&str, u8, u8, u8)] = &[
    ("PART_NO", b'C', 10, 0),
    ("PRICE", b'N', 8, 2),
    ("STOCK", b'N', 6, 0),
];

fn write_stock_table(input_dir: &Path, rows: &[Vec<&str>]) {
    fs::write(input_dir.join("STOCK.DBF"), build_table(STOCK_FIELDS, rows)).unwrap();
}

async fn setup() -> (tempfile::TempDir, Config, CycleOrchestrator) {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        input_dir: dir.path().join("export"),
        output_dir: dir.path().join("esl"),
        state_file: dir.path().join("state.json"),
        max_retries: 1,
        retry_delay_secs: 0,
        ..Config::default()
    };
    config.ensure_directories().unwrap();
    let store = Arc::new(StateStore::load(config.state_file.clone()).await);
    let orchestrator = CycleOrchestrator::new(config.clone(), store);
    (dir, config, orchestrator)
}

async fn run(orchestrator: &CycleOrchestrator) -> CycleStats {
    match orchestrator.run_cycle().await.unwrap() {
        CycleOutcome::Completed(stats) => stats,
        CycleOutcome::Skipped => panic!("no other cycle should be running"),
    }
}

fn csv_contents(output_dir: &Path) -> Vec<String> {
    let mut out = Vec::new();
    for entry in fs::read_dir(output_dir).unwrap() {
        let path = entry.unwrap().path();
        if path.extension().map(|e| e == "csv").unwrap_or(false) {
            out.push(fs::read_to_string(path).unwrap());
        }
    }
    out
}

#[tokio::test]
async fn full_lifecycle_across_cycles() {
    let (_dir, config, orchestrator) = setup().await;

    // cycle 1: first sighting of A is New and lands in a CSV
    write_stock_table(&config.input_dir, &[vec!["A", "10.00", "5"]]);
    let stats = run(&orchestrator).await;
    assert!(stats.is_success());
    assert_eq!(stats.sources_processed, 1);
    assert_eq!(stats.new_records, 1);
    assert_eq!(stats.files_written, 1);

    let csvs = csv_contents(&config.output_dir);
    assert_eq!(csvs.len(), 1);
    assert!(csvs[0].starts_with("SKU,CurrentPrice,StockQuantity,TransactionID,TimeStampUTC"));
    assert!(csvs[0].contains("A,10.00,5,0,"));

    // cycle 2: identical snapshot produces nothing
    let stats = run(&orchestrator).await;
    assert_eq!(stats.new_records, 0);
    assert_eq!(stats.updated_records, 0);
    assert_eq!(stats.deleted_records, 0);
    assert_eq!(stats.unchanged_records, 1);
    assert_eq!(stats.files_written, 0);

    // cycle 3: a price change is Updated and lands in a CSV
    write_stock_table(&config.input_dir, &[vec!["A", "12.00", "5"]]);
    let stats = run(&orchestrator).await;
    assert_eq!(stats.updated_records, 1);
    assert_eq!(stats.files_written, 1);
    assert!(csv_contents(&config.output_dir)
        .iter()
        .any(|c| c.contains("A,12.00,5,0,")));

    // cycle 4: an empty snapshot deletes A; deletes alone write no CSV
    write_stock_table(&config.input_dir, &[]);
    let stats = run(&orchestrator).await;
    assert_eq!(stats.deleted_records, 1);
    assert_eq!(stats.files_written, 0);

    // cycle 5: reappearance is New again
    write_stock_table(&config.input_dir, &[vec!["A", "12.00", "5"]]);
    let stats = run(&orchestrator).await;
    assert_eq!(stats.new_records, 1);
    assert_eq!(stats.updated_records, 0);
}

#[tokio::test]
async fn state_file_uses_the_published_layout() {
    let (_dir, config, orchestrator) = setup().await;
    write_stock_table(&config.input_dir, &[vec!["A", "10.00", "5"]]);
    run(&orchestrator).await;

    let state: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&config.state_file).unwrap()).unwrap();
    let source = &state["STOCK.DBF"];
    assert!(source["last_processed"].is_string());
    assert_eq!(source["last_secondary_counter"], 0);
    let record = &source["records"]["A"];
    assert_eq!(record["record_id"], "A");
    assert_eq!(record["deleted"], false);
    assert!(record["checksum"].as_str().unwrap().len() == 64);
    assert!(record["last_seen"].is_string());
}

#[tokio::test]
async fn one_bad_source_does_not_block_the_rest() {
    let (_dir, config, orchestrator) = setup().await;
    write_stock_table(&config.input_dir, &[vec!["A", "10.00", "5"]]);
    fs::write(config.input_dir.join("AAA_STOCK.DBF"), b"nope").unwrap();

    let stats = run(&orchestrator).await;
    // the broken file sorts first and still must not stop STOCK.DBF
    assert_eq!(stats.errors.len(), 1);
    assert!(stats.errors[0].contains("AAA_STOCK.DBF"));
    assert_eq!(stats.sources_processed, 1);
    assert_eq!(stats.new_records, 1);

    // a failed pass leaves no state behind for the broken source
    let state: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&config.state_file).unwrap()).unwrap();
    assert!(state.get("AAA_STOCK.DBF").is_none());
    assert!(state.get("STOCK.DBF").is_some());
}

#[tokio::test]
async fn records_without_keys_are_dropped_quietly() {
    let (_dir, config, orchestrator) = setup().await;
    write_stock_table(
        &config.input_dir,
        &[vec!["A", "10.00", "5"], vec!["", "9.00", "2"]],
    );

    let stats = run(&orchestrator).await;
    assert!(stats.is_success());
    assert_eq!(stats.new_records, 1);
}

#[tokio::test]
async fn transaction_sources_track_the_document_counter() {
    let (_dir, config, orchestrator) = setup().await;
    let fields: &[(&str, u8, u8, u8)] = &[
        ("DOC_NO", b'N', 8, 0),
        ("ITEM_CODE", b'C', 10, 0),
        ("UNIT_PRICE", b'N', 8, 2),
        ("QTY_SOLD", b'N', 6, 0),
    ];
    fs::write(
        config.input_dir.join("INVOICES.DBF"),
        build_table(
            fields,
            &[
                vec!["1002", "B-2", "5.00", "3"],
                vec!["1001", "A-1", "2.50", "1"],
            ],
        ),
    )
    .unwrap();

    let stats = run(&orchestrator).await;
    assert_eq!(stats.new_records, 2);

    let state: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&config.state_file).unwrap()).unwrap();
    let source = &state["INVOICES.DBF"];
    assert_eq!(source["last_secondary_counter"], 1002);
    assert_eq!(source["records"]["1002"]["doc_no"], 1002);

    // transaction CSVs use the transaction alias set
    let csvs = csv_contents(&config.output_dir);
    assert!(csvs.iter().any(|c| c.contains("B-2,5.00,3,1002,")));
}
