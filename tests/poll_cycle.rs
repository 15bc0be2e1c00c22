use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use plc_block_mapper::comm::adapters::config_loader::load_field_table;
use plc_block_mapper::comm::adapters::reader::mock::SimulatedReader;
use plc_block_mapper::comm::adapters::reader::snapshot::HexSnapshotReader;
use plc_block_mapper::comm::adapters::sink::memory::MemorySink;
use plc_block_mapper::comm::adapters::sink::text_file::TextFileSink;
use plc_block_mapper::comm::adapters::sink::{RecordSink, SinkDispatcher};
use plc_block_mapper::comm::core::model::{ControllerState, DecodedRecord, FieldValue, Quality};
use plc_block_mapper::comm::core::table::BlockTable;
use plc_block_mapper::comm::usecase::engine::{
    run_single_cycle, ControllerOptions, CycleOptions, PollRunEngine,
};
use uuid::Uuid;

fn demos_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("demos")
}

fn demo_table() -> BlockTable {
    load_field_table(&demos_dir().join("field_tables"))
        .unwrap()
        .table
}

fn value(records: &[DecodedRecord], block_id: u32, field: &str) -> Option<FieldValue> {
    records
        .iter()
        .find(|r| r.block_id == block_id)?
        .get(field)?
        .value
        .clone()
}

#[tokio::test]
async fn replayed_exports_decode_every_configured_field() {
    let table = demo_table();
    let reader = HexSnapshotReader::new(demos_dir().join("raw"));

    let outcome = run_single_cycle(&reader, &table, &ControllerOptions::default())
        .await
        .unwrap();
    let records = &outcome.records;

    assert_eq!(
        records.iter().map(|r| r.block_id).collect::<Vec<_>>(),
        vec![100, 102, 103]
    );
    assert_eq!(outcome.stats.total, 16);
    assert_eq!(outcome.stats.ok, 16);
    assert!(outcome.warnings.is_empty());

    assert_eq!(value(records, 100, "TANK1_LEVEL"), Some(FieldValue::Float32(2.5)));
    assert_eq!(value(records, 100, "TANK1_TEMP"), Some(FieldValue::Float32(21.5)));
    assert_eq!(value(records, 100, "PUMP_STARTS"), Some(FieldValue::Int32(1234)));
    assert_eq!(value(records, 100, "PUMP1_ON"), Some(FieldValue::Bool(true)));
    assert_eq!(value(records, 100, "PUMP2_ON"), Some(FieldValue::Bool(false)));
    assert_eq!(value(records, 100, "ALARM_CODE"), Some(FieldValue::UInt16(7)));
    assert_eq!(
        value(records, 100, "OPERATOR"),
        Some(FieldValue::String {
            text: "ANNA".to_string(),
            max_length: 10,
            actual_length: 4,
        })
    );

    assert_eq!(value(records, 102, "SPEED"), Some(FieldValue::Int16(1500)));
    assert_eq!(value(records, 102, "SETPOINT"), Some(FieldValue::Float32(1500.0)));
    assert_eq!(value(records, 102, "STATUS"), Some(FieldValue::HexBlob(vec![0xBE, 0xEF])));
    assert_eq!(value(records, 102, "DOOR_OPEN"), Some(FieldValue::Bool(true)));
    assert_eq!(value(records, 102, "MODE"), Some(FieldValue::Char('A')));

    assert_eq!(value(records, 103, "FLOW"), Some(FieldValue::Float32(12.5)));
    assert_eq!(value(records, 103, "PRESSURE_RAW"), Some(FieldValue::UInt16(850)));
    assert_eq!(value(records, 103, "VALVE_OPEN"), Some(FieldValue::Bool(true)));
    assert_eq!(value(records, 103, "RUNTIME"), Some(FieldValue::UInt32(3600)));

    let db102 = records.iter().find(|r| r.block_id == 102).unwrap();
    assert_eq!(db102.display_name, "Line A");
    assert_eq!(
        db102.get("STATUS").unwrap().value_display().as_deref(),
        Some("0xBEEF")
    );
    assert_eq!(
        db102.get("SETPOINT").unwrap().value_display().as_deref(),
        Some("1500.000")
    );
}

#[tokio::test]
async fn raw_exports_replay_to_the_same_values() {
    let dir = std::env::temp_dir().join(format!("plc-block-mapper-it-replay-{}", Uuid::new_v4()));
    let table = demo_table();
    let live = SimulatedReader::new("line")
        .with_block(
            100,
            vec![
                0x40, 0x20, 0x00, 0x00, 0x41, 0xAC, 0x00, 0x00, 0x00, 0x00, 0x04, 0xD2, 0x03,
                0x00, 0x07, 0x00, 0x0A, 0x02, b'J', b'O',
            ],
        )
        .with_block(102, vec![0xFF, 0x9C, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, b'M'])
        .with_block(103, vec![0; 12]);
    let options = ControllerOptions {
        cycle: CycleOptions {
            raw_export_dir: Some(dir.clone()),
            ..CycleOptions::default()
        },
        ..ControllerOptions::default()
    };

    let first = run_single_cycle(&live, &table, &options).await.unwrap();
    let replay = HexSnapshotReader::new(&dir);
    let second = run_single_cycle(&replay, &table, &ControllerOptions::default())
        .await
        .unwrap();

    for (a, b) in first.records.iter().zip(&second.records) {
        assert_eq!(a.block_id, b.block_id);
        assert_eq!(a.values, b.values);
    }
    assert_eq!(value(&second.records, 100, "PUMP2_ON"), Some(FieldValue::Bool(true)));
    assert_eq!(value(&second.records, 102, "SPEED"), Some(FieldValue::Int16(-100)));
    assert_eq!(
        value(&second.records, 100, "OPERATOR"),
        Some(FieldValue::String {
            text: "JO".to_string(),
            max_length: 10,
            actual_length: 2,
        })
    );

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn failing_block_reaches_sinks_as_absent_fields_while_others_decode() {
    let dir = std::env::temp_dir().join(format!("plc-block-mapper-it-poll-{}", Uuid::new_v4()));
    let memory = Arc::new(MemorySink::new("memory"));
    let text = Arc::new(TextFileSink::new(dir.join("extracted_values.txt")));
    let dispatcher = SinkDispatcher::new(
        vec![
            memory.clone() as Arc<dyn RecordSink>,
            text.clone() as Arc<dyn RecordSink>,
        ],
        16,
        Duration::from_secs(2),
    );
    let engine = PollRunEngine::new(Some(dispatcher.clone()));

    let reader = Arc::new(
        SimulatedReader::new("line")
            .with_block(100, vec![0x40, 0x20, 0x00, 0x00])
            .with_failing_block(102, "connection reset by peer")
            .with_block(103, vec![0x41, 0x48, 0x00, 0x00, 0x03, 0x52, 0x01, 0x00, 0x00, 0x00, 0x0E, 0x10]),
    );
    let options = ControllerOptions {
        interval: Duration::from_millis(25),
        cycle: CycleOptions {
            read_timeout: Duration::from_millis(200),
            ..CycleOptions::default()
        },
        ..ControllerOptions::default()
    };
    let run_id = engine.start_run(reader.clone(), Arc::new(demo_table()), options);

    let deadline = Instant::now() + Duration::from_secs(5);
    while engine.latest(run_id).map(|s| s.cycles).unwrap_or(0) < 2 {
        assert!(Instant::now() < deadline, "no cycles completed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let last = engine.stop_run(run_id).await.unwrap();
    assert_eq!(last.state, ControllerState::Disconnected);
    assert_eq!(last.records.len(), 3);

    let db100 = &last.records[0];
    assert_eq!(db100.get("TANK1_LEVEL").unwrap().value, Some(FieldValue::Float32(2.5)));
    let starts = db100.get("PUMP_STARTS").unwrap();
    assert_eq!(starts.quality, Quality::DecodeError);
    assert!(starts.value.is_none());

    assert!(last.records[1]
        .values
        .iter()
        .all(|v| v.quality == Quality::TransportFailure && !v.decode_succeeded));
    assert_eq!(last.records[2].ok_count(), 4);
    assert_eq!(last.stats.blocks_failed, 1);

    dispatcher.flush().await;
    assert!(memory.records_for(102).len() >= 2);
    let written = std::fs::read_to_string(text.path()).unwrap();
    assert!(written.contains("--- Extracted Values from Line A (DB102)"));
    assert!(written.contains("Not extracted   - SPEED - Conveyor speed (rpm) [INT16] error: transport error: connection reset by peer"));
    assert!(written.contains("Offset      0: 12.500          - FLOW - Line flow (m3/h) [FLOAT32]"));

    let _ = std::fs::remove_dir_all(dir);
}
