use std::path::{Path, PathBuf};

use despatch_recon::audit::{read_jsonl, Tee};
use despatch_recon::engine::{build_despatch_advice, DespatchInputs, FallbackReason, ResolutionPath};
use despatch_recon::{
    AuditLog, DespatchAdvice, DespatchConfig, DespatchError, MatchStatus, RawTable, Severity, Stage,
};
use despatch_sscc::{CounterState, CounterStore, JsonFileBackend, MemoryBackend, Sscc, StoreAllocator};

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn load(name: &str) -> RawTable {
    let path = fixtures_dir().join(name);
    let data = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("cannot read {}: {e}", path.display()));
    RawTable::from_csv_str(&data).unwrap()
}

fn memory_store() -> CounterStore<MemoryBackend> {
    CounterStore::new(MemoryBackend::with_state(CounterState {
        arp_id: "123456".into(),
        ..CounterState::default()
    }))
}

fn config_with_state(state: &Path, extra: &str) -> DespatchConfig {
    let toml = format!(
        "[sscc]\narp_id = \"123456\"\nstate_path = \"{}\"\n{extra}",
        state.display().to_string().replace('\\', "\\\\")
    );
    DespatchConfig::from_toml(&toml).unwrap()
}

fn run_fixtures(config: &DespatchConfig, mapping: Option<&str>, warehouse: &str) -> (DespatchAdvice, AuditLog) {
    let store = memory_store();
    let mut allocator = config.allocator(&store).unwrap();
    let mut audit = AuditLog::new();
    let orders = load("po.csv");
    let mapping = mapping.map(load);
    let warehouse = load(warehouse);
    let inputs = DespatchInputs {
        orders: &orders,
        mapping: mapping.as_ref(),
        warehouse: &warehouse,
    };
    let advice = build_despatch_advice(config, inputs, &mut allocator, &mut audit).unwrap();
    (advice, audit)
}

// -------------------------------------------------------------------------
// Structured path
// -------------------------------------------------------------------------

#[test]
fn structured_match_from_csv() {
    let (advice, audit) = run_fixtures(&DespatchConfig::default(), Some("mapping.csv"), "warehouse.csv");

    assert_eq!(advice.path, ResolutionPath::Structured);
    // Trailing blank line is not an order line
    assert_eq!(advice.matches.len(), 4);

    let statuses: Vec<MatchStatus> = advice.matches.iter().map(|m| m.match_status).collect();
    assert_eq!(
        statuses,
        vec![
            MatchStatus::Ok,
            MatchStatus::QtyWarning,
            MatchStatus::NoMatch,
            MatchStatus::NoMapping
        ]
    );

    // Most recent sale wins; the later transfer is filtered out
    let first = &advice.matches[0];
    assert_eq!(first.target_item_code, "NAV-100");
    assert_eq!(first.document_ref, "ALB-002");
    assert_eq!(first.lot, "L-100B");
    assert_eq!(first.customer, "ACME Aero");
    assert_eq!(first.expiry_date.unwrap().to_string(), "2026-01-05");

    assert_eq!(advice.matches[2].target_item_code, "NAV-300");
    assert_eq!(advice.matches[3].target_item_code, "");

    assert_eq!(advice.summary.total, 4);
    assert_eq!(advice.summary.ok, 1);
    assert_eq!(advice.summary.qty_warning, 1);
    assert_eq!(advice.summary.no_match, 1);
    assert_eq!(advice.summary.no_mapping, 1);

    assert_eq!(advice.rows.len(), 4);
    assert_eq!(advice.rows[0].despatch_advice_id, "ALB-002");
    assert_eq!(advice.rows[2].despatch_advice_id, "DA-4500002");
    assert!(advice.packing.is_none());

    assert_eq!(audit.by_stage(Stage::Match).count(), 2);
    assert_eq!(audit.count(Severity::Warn), 2);
}

#[test]
fn extra_header_variant_from_config() {
    let config = DespatchConfig::from_toml("[headers.po]\nitem_code = [\"Article\"]\n").unwrap();
    let orders = RawTable::from_csv_str("PO;Article;Quantity\n4500009;AS-100;1\n").unwrap();
    let mapping = load("mapping.csv");
    let warehouse = load("warehouse.csv");

    let store = memory_store();
    let mut allocator = config.allocator(&store).unwrap();
    let mut audit = AuditLog::new();
    let inputs = DespatchInputs { orders: &orders, mapping: Some(&mapping), warehouse: &warehouse };
    let advice = build_despatch_advice(&config, inputs, &mut allocator, &mut audit).unwrap();
    assert_eq!(advice.matches[0].match_status, MatchStatus::Ok);
}

// -------------------------------------------------------------------------
// Fallback path
// -------------------------------------------------------------------------

#[test]
fn missing_mapping_table_falls_back() {
    let (advice, audit) = run_fixtures(&DespatchConfig::default(), None, "warehouse.csv");

    assert_eq!(advice.path, ResolutionPath::Fallback(FallbackReason::MissingMapping));
    assert_eq!(advice.rows.len(), 4);
    for row in &advice.rows {
        assert!(row.target_item_code.starts_with("FAKE-"));
        assert!(row.box_sscc.is_some());
        assert!(row.pallet_sscc.is_some());
        assert!(row.match_status.is_none());
    }
    assert!(advice.matches.is_empty());
    assert!(audit.by_stage(Stage::Fallback).count() >= 1);
}

#[test]
fn warehouse_schema_error_falls_back() {
    let (advice, audit) =
        run_fixtures(&DespatchConfig::default(), Some("mapping.csv"), "warehouse_missing_lot.csv");

    match &advice.path {
        ResolutionPath::Fallback(FallbackReason::Schema(e)) => {
            assert_eq!(e.table, "warehouse");
            assert_eq!(e.missing, vec!["lot"]);
        }
        other => panic!("unexpected path {other:?}"),
    }
    // Mapped lines defer identifiers, the unmapped one gets a placeholder
    let targets: Vec<&str> = advice.rows.iter().map(|r| r.target_item_code.as_str()).collect();
    assert_eq!(targets, vec!["NAV-100", "NAV-200", "NAV-300", "FAKE-AS-999"]);
    assert!(advice.rows[..3].iter().all(|r| r.box_sscc.is_none()));
    assert!(advice.rows[3].box_sscc.is_some());
    assert_eq!(audit.count(Severity::Error), 1);
}

#[test]
fn po_schema_error_is_fatal() {
    let store = memory_store();
    let mut allocator = StoreAllocator::new(&store);
    let mut audit = AuditLog::new();
    let orders = RawTable::from_csv_str("Order;Qty\n1;2\n").unwrap();
    let mapping = load("mapping.csv");
    let warehouse = load("warehouse.csv");
    let inputs = DespatchInputs { orders: &orders, mapping: Some(&mapping), warehouse: &warehouse };

    let err = build_despatch_advice(&DespatchConfig::default(), inputs, &mut allocator, &mut audit)
        .unwrap_err();
    match err {
        DespatchError::Schema(e) => {
            assert_eq!(e.table, "po");
            assert_eq!(e.missing, vec!["po_number", "item_code", "quantity"]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.state().unwrap().sequence_box, 0);
}

// -------------------------------------------------------------------------
// Packing with the file-backed counter store
// -------------------------------------------------------------------------

#[test]
fn packing_persists_counters_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("sscc_state.json");
    let config = config_with_state(&state, "[packing]\nenabled = true\n");

    let orders = load("po.csv");
    let mapping = load("mapping.csv");
    let warehouse = load("warehouse.csv");
    let inputs = DespatchInputs { orders: &orders, mapping: Some(&mapping), warehouse: &warehouse };

    let mut box_ids: Vec<Sscc> = Vec::new();
    let mut pallet_ids: Vec<Sscc> = Vec::new();
    for _run in 0..2 {
        // Fresh store per run, as after a restart
        let store: CounterStore<JsonFileBackend> = config.open_store();
        let mut allocator = config.allocator(&store).unwrap();
        let mut audit = AuditLog::new();
        let advice = build_despatch_advice(&config, inputs, &mut allocator, &mut audit).unwrap();

        // AS-100: 3 boxes on 2 pallets, AS-200: 2 boxes on 1 pallet, 2 unpacked rows
        assert_eq!(advice.rows.len(), 7);
        let plan = advice.packing.as_ref().unwrap();
        assert_eq!(plan.boxes.len(), 5);
        assert_eq!(plan.pallets.len(), 3);

        let qty: Vec<f64> = advice.rows.iter().map(|r| r.shipped_quantity).collect();
        assert_eq!(qty, vec![100.0, 100.0, 50.0, 20.0, 20.0, 10.0, 5.0]);
        assert_eq!(advice.rows[2].pallet_sscc.as_ref(), Some(&plan.pallets[1].sscc));

        for unit in &plan.boxes {
            assert_eq!(Sscc::parse(unit.sscc.as_str()).unwrap(), unit.sscc);
            box_ids.push(unit.sscc.clone());
        }
        pallet_ids.extend(plan.pallets.iter().map(|p| p.sscc.clone()));
    }

    let text = std::fs::read_to_string(&state).unwrap();
    let persisted: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(persisted["UE"], 10);
    assert_eq!(persisted["UX"], 6);

    // No identifier is handed out twice within a class, even across restarts
    for ids in [&mut box_ids, &mut pallet_ids] {
        let before = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), before);
    }
    assert_eq!(box_ids.len(), 10);
    assert_eq!(pallet_ids.len(), 6);
}

// -------------------------------------------------------------------------
// Audit trail
// -------------------------------------------------------------------------

#[test]
fn audit_trail_written_as_jsonl() {
    let dir = tempfile::tempdir().unwrap();
    let audit_path = dir.path().join("logs").join("audit.jsonl");
    let config = DespatchConfig::from_toml(&format!(
        "[audit]\npath = \"{}\"\n",
        audit_path.display().to_string().replace('\\', "\\\\")
    ))
    .unwrap();

    let store = memory_store();
    let mut allocator = config.allocator(&store).unwrap();
    let mut memory = AuditLog::new();
    let mut file = config.open_audit_file().unwrap().unwrap();

    let orders = load("po.csv");
    let mapping = load("mapping.csv");
    let warehouse = load("warehouse.csv");
    let inputs = DespatchInputs { orders: &orders, mapping: Some(&mapping), warehouse: &warehouse };
    {
        let mut tee = Tee { first: &mut memory, second: &mut file };
        build_despatch_advice(&config, inputs, &mut allocator, &mut tee).unwrap();
    }
    assert_eq!(file.written(), memory.len());
    drop(file);

    let events = read_jsonl(&audit_path).unwrap();
    assert_eq!(events.len(), memory.len());
    let no_mapping = events
        .iter()
        .find(|e| e.stage == Stage::Mapping)
        .unwrap();
    assert_eq!(no_mapping.severity, Severity::Warn);
    assert_eq!(no_mapping.get("item_code_source").unwrap(), "AS-999");
}
