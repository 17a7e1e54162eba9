mod common;

use common::*;
use flowstreams::flowstream::fql::execution::engine::EgressFormat;
use flowstreams::flowstream::fql::execution::operators::Ingress;
use flowstreams::flowstream::fql::plan::{wire, Comparator, FieldType, FieldUsage};
use flowstreams::{Engine, EngineConfig, EngineError};
use std::sync::atomic::AtomicBool;

fn sum_plan_with_pre_filter() -> flowstreams::Plan {
    PlanBuilder::new(vec![
        field("n", FieldType::Integer64, FieldUsage::Sequence),
        field("v", FieldType::Float64, FieldUsage::Data),
    ])
    .pre_filter(vec![condition("v", Comparator::GreaterThanOrEqual, "5")])
    .window(tumbling_distance_props("100", "n"))
    .aggregate(vec![call(
        "sum",
        Some("v"),
        field("s", FieldType::Float64, FieldUsage::Data),
    )])
    .build()
}

#[test]
fn test_ingress_filter_drops_rows_before_aggregation() {
    let plan = sum_plan_with_pre_filter();
    let mut engine = Engine::new(&plan, EngineConfig::default()).unwrap();
    let input = "1|1.0\n2|5.0\n3|7.0\n4|3.0\n5|8.0\n";
    let mut output = Vec::new();
    let cancel = AtomicBool::new(false);
    engine.run(input.as_bytes(), &mut output, &cancel).unwrap();

    // Only v in {5, 7, 8} reach aggregation.
    assert_eq!(String::from_utf8(output).unwrap(), "20\n");
    let metrics = engine.metrics();
    assert_eq!(metrics.rows_read, 5);
    assert_eq!(metrics.rows_filtered_ingress, 2);
    assert_eq!(metrics.rows_emitted, 1);
}

#[test]
fn test_ingress_row_matches_plan_field_count() {
    let plan = sum_plan_with_pre_filter();
    let ingress = Ingress::init(plan.root().unwrap()).unwrap();
    let row = ingress.ingress("7|2.5", '|').unwrap();
    assert_eq!(row.payload.len(), plan.root().unwrap().fields.len());
}

#[test]
fn test_malformed_rows_are_dropped_and_pipeline_continues() {
    let plan = sum_plan_with_pre_filter();
    let mut engine = Engine::new(&plan, EngineConfig::default()).unwrap();
    // Bad integer, missing field, empty field; the good rows still flow.
    let input = "x|6.0\n1\n2||\n3|6.0\n4|14.0\n";
    let mut output = Vec::new();
    let cancel = AtomicBool::new(false);
    engine.run(input.as_bytes(), &mut output, &cancel).unwrap();

    assert_eq!(String::from_utf8(output).unwrap(), "20\n");
    let metrics = engine.metrics();
    assert_eq!(metrics.rows_read, 5);
    assert_eq!(metrics.rows_dropped, 3);
    assert_eq!(metrics.rows_emitted, 1);
}

#[test]
fn test_post_filter_gates_aggregate_rows() {
    let plan = PlanBuilder::new(vec![
        field("k", FieldType::Text, FieldUsage::Group),
        field("n", FieldType::Integer64, FieldUsage::Sequence),
        field("v", FieldType::Float64, FieldUsage::Data),
    ])
    .window(tumbling_distance_props("100", "n"))
    .aggregate(vec![
        call("group", Some("k"), field("k", FieldType::Text, FieldUsage::Group)),
        call("sum", Some("v"), field("s", FieldType::Float64, FieldUsage::Data)),
    ])
    .post_filter(vec![condition("s", Comparator::GreaterThanOrEqual, "10")])
    .build();

    let mut engine = Engine::new(&plan, EngineConfig::default()).unwrap();
    let input = "a|1|1.0\nb|2|10.0\na|3|2.0\nb|4|20.0\n";
    let mut output = Vec::new();
    let cancel = AtomicBool::new(false);
    engine.run(input.as_bytes(), &mut output, &cancel).unwrap();

    assert_eq!(String::from_utf8(output).unwrap(), "b|30\n");
    assert_eq!(engine.metrics().rows_filtered_aggregate, 1);
}

#[test]
fn test_project_reorders_and_drops_fields() {
    let plan = PlanBuilder::new(vec![
        field("k", FieldType::Text, FieldUsage::Group),
        field("n", FieldType::Integer64, FieldUsage::Sequence),
        field("v", FieldType::Float64, FieldUsage::Data),
    ])
    .window(tumbling_distance_props("2", "n"))
    .aggregate(vec![
        call("group", Some("k"), field("k", FieldType::Text, FieldUsage::Group)),
        call("sum", Some("v"), field("s", FieldType::Float64, FieldUsage::Data)),
        call("count", None, field("c", FieldType::Float64, FieldUsage::Data)),
    ])
    .project(vec!["s", "k"])
    .build();

    let mut engine = Engine::new(&plan, EngineConfig::default()).unwrap();
    let input = "a|1|1.5\na|2|2.5\n";
    let mut output = Vec::new();
    let cancel = AtomicBool::new(false);
    engine.run(input.as_bytes(), &mut output, &cancel).unwrap();

    assert_eq!(String::from_utf8(output).unwrap(), "4|a\n");
}

#[test]
fn test_project_filter_gates_egress_rows() {
    let plan = PlanBuilder::new(vec![
        field("k", FieldType::Text, FieldUsage::Group),
        field("n", FieldType::Integer64, FieldUsage::Sequence),
        field("v", FieldType::Float64, FieldUsage::Data),
    ])
    .window(tumbling_distance_props("1", "n"))
    .aggregate(vec![
        call("group", Some("k"), field("k", FieldType::Text, FieldUsage::Group)),
        call("sum", Some("v"), field("s", FieldType::Float64, FieldUsage::Data)),
    ])
    .project_filter(vec![condition("k", Comparator::NotEqual, "skip")])
    .build();

    let mut engine = Engine::new(&plan, EngineConfig::default()).unwrap();
    let input = "keep|1|1.0\nskip|2|2.0\nkeep|3|3.0\n";
    let mut output = Vec::new();
    let cancel = AtomicBool::new(false);
    engine.run(input.as_bytes(), &mut output, &cancel).unwrap();

    assert_eq!(String::from_utf8(output).unwrap(), "keep|1\nkeep|3\n");
    assert_eq!(engine.metrics().rows_filtered_project, 1);
}

#[test]
fn test_aggregate_output_coerces_to_declared_type() {
    // sum computes Float64 internally; the declared Integer64 output forces
    // the coercion at window close.
    let plan = PlanBuilder::new(vec![
        field("n", FieldType::Integer64, FieldUsage::Sequence),
        field("v", FieldType::Integer64, FieldUsage::Data),
    ])
    .window(tumbling_distance_props("3", "n"))
    .aggregate(vec![call(
        "sum",
        Some("v"),
        field("s", FieldType::Integer64, FieldUsage::Data),
    )])
    .build();

    let mut engine = Engine::new(&plan, EngineConfig::default()).unwrap();
    let input = "1|1\n2|2\n3|3\n";
    let mut output = Vec::new();
    let cancel = AtomicBool::new(false);
    engine.run(input.as_bytes(), &mut output, &cancel).unwrap();
    assert_eq!(String::from_utf8(output).unwrap(), "6\n");
}

#[test]
fn test_cancellation_discards_open_windows() {
    let plan = sum_plan_with_pre_filter();
    let mut engine = Engine::new(&plan, EngineConfig::default()).unwrap();
    let input = "1|6.0\n2|7.0\n";
    let mut output = Vec::new();
    let cancel = AtomicBool::new(true);
    let result = engine.run(input.as_bytes(), &mut output, &cancel);
    assert!(matches!(result, Err(EngineError::Cancelled)));
    assert!(output.is_empty());
}

#[test]
fn test_binary_egress_rows_decode_against_the_schema() {
    let plan = PlanBuilder::new(vec![
        field("k", FieldType::Text, FieldUsage::Group),
        field("n", FieldType::Integer64, FieldUsage::Sequence),
        field("v", FieldType::Float64, FieldUsage::Data),
    ])
    .window(tumbling_distance_props("2", "n"))
    .aggregate(vec![
        call("group", Some("k"), field("k", FieldType::Text, FieldUsage::Group)),
        call("sum", Some("v"), field("s", FieldType::Float64, FieldUsage::Data)),
    ])
    .build();

    let config = EngineConfig {
        delimiter: '|',
        egress_format: EgressFormat::Binary,
    };
    let mut engine = Engine::new(&plan, config).unwrap();
    let input = "a|1|1.0\na|2|2.0\n";
    let mut output = Vec::new();
    let cancel = AtomicBool::new(false);
    engine.run(input.as_bytes(), &mut output, &cancel).unwrap();

    let schema = engine.schema();
    let row = wire::decode_egress_row(
        &output,
        &schema.group.field_types(),
        &schema.egress.field_types(),
    )
    .unwrap();
    assert_eq!(
        row.payload,
        vec![
            flowstreams::Value::Text("a".to_string()),
            flowstreams::Value::Float64(3.0)
        ]
    );
    assert_eq!(
        row.group.values(),
        &[flowstreams::Value::Text("a".to_string())]
    );
}
