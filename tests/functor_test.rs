use flowstreams::flowstream::fql::error::EngineError;
use flowstreams::flowstream::fql::execution::functors::{make_functor, value_hash, Functor};
use flowstreams::flowstream::fql::execution::types::Value;
use flowstreams::flowstream::fql::plan::FieldType;

fn feed(functor: &mut Box<dyn Functor>, values: &[Value]) {
    for value in values {
        functor.update(Some(value)).expect("update failed");
    }
}

#[test]
fn test_count_equals_number_of_updates() {
    let mut counter = make_functor("count", None).unwrap();
    for _ in 0..17 {
        counter.update(None).unwrap();
    }
    assert_eq!(counter.value().unwrap(), Value::Float64(17.0));
}

#[test]
fn test_sum_and_average_over_floats() {
    let mut sum = make_functor("sum", Some(FieldType::Float64)).unwrap();
    let mut avg = make_functor("average", Some(FieldType::Float64)).unwrap();
    let values: Vec<Value> = [1.5, 2.5, 6.0].iter().map(|f| Value::Float64(*f)).collect();
    feed(&mut sum, &values);
    feed(&mut avg, &values);
    assert_eq!(sum.value().unwrap(), Value::Float64(10.0));
    assert_eq!(avg.value().unwrap(), Value::Float64(10.0 / 3.0));
}

#[test]
fn test_sum_promotes_integer_input() {
    let mut sum = make_functor("sum", Some(FieldType::Integer64)).unwrap();
    feed(
        &mut sum,
        &[Value::Int64(2), Value::Int64(3), Value::Int64(5)],
    );
    assert_eq!(sum.value().unwrap(), Value::Float64(10.0));
}

#[test]
fn test_average_over_empty_window_is_an_error() {
    let avg = make_functor("average", Some(FieldType::Float64)).unwrap();
    assert!(matches!(
        avg.value(),
        Err(EngineError::ConversionError { .. })
    ));
}

#[test]
fn test_minimum_maximum_integers() {
    let mut min = make_functor("minimum", Some(FieldType::Integer64)).unwrap();
    let mut max = make_functor("maximum", Some(FieldType::Integer64)).unwrap();
    let values: Vec<Value> = [3, -7, 12, 0].iter().map(|i| Value::Int64(*i)).collect();
    feed(&mut min, &values);
    feed(&mut max, &values);
    assert_eq!(min.value().unwrap(), Value::Int64(-7));
    assert_eq!(max.value().unwrap(), Value::Int64(12));
}

#[test]
fn test_minimum_maximum_floats() {
    let mut min = make_functor("minimum", Some(FieldType::Float64)).unwrap();
    let mut max = make_functor("maximum", Some(FieldType::Float64)).unwrap();
    let values: Vec<Value> = [2.5, -1.25, 9.75].iter().map(|f| Value::Float64(*f)).collect();
    feed(&mut min, &values);
    feed(&mut max, &values);
    assert_eq!(min.value().unwrap(), Value::Float64(-1.25));
    assert_eq!(max.value().unwrap(), Value::Float64(9.75));
}

#[test]
fn test_minimum_over_boolean_rejected_at_init() {
    assert!(matches!(
        make_functor("minimum", Some(FieldType::Boolean)),
        Err(EngineError::ConversionError { .. })
    ));
    assert!(matches!(
        make_functor("maximum", Some(FieldType::Text)),
        Err(EngineError::ConversionError { .. })
    ));
}

#[test]
fn test_first_and_last() {
    let mut first = make_functor("first", Some(FieldType::Text)).unwrap();
    let mut last = make_functor("last", Some(FieldType::Text)).unwrap();
    let values: Vec<Value> = ["x", "y", "z"]
        .iter()
        .map(|s| Value::Text(s.to_string()))
        .collect();
    feed(&mut first, &values);
    feed(&mut last, &values);
    assert_eq!(first.value().unwrap(), Value::Text("x".to_string()));
    assert_eq!(last.value().unwrap(), Value::Text("z".to_string()));
}

#[test]
fn test_group_passes_through_latest_value() {
    let mut group = make_functor("group", Some(FieldType::Text)).unwrap();
    feed(
        &mut group,
        &[Value::Text("a".to_string()), Value::Text("b".to_string())],
    );
    assert_eq!(group.value().unwrap(), Value::Text("b".to_string()));
}

#[test]
fn test_distinctcount_is_exact() {
    let mut distinct = make_functor("distinctcount", Some(FieldType::Text)).unwrap();
    for s in ["a", "a", "b", "c", "b", "d"] {
        distinct.update(Some(&Value::Text(s.to_string()))).unwrap();
    }
    assert_eq!(distinct.value().unwrap(), Value::Int64(4));
}

#[test]
fn test_distinctcount_and_unique_over_boolean_rejected() {
    let mut distinct = make_functor("distinctcount", Some(FieldType::Boolean)).unwrap();
    assert!(matches!(
        distinct.update(Some(&Value::Bool(true))),
        Err(EngineError::ConversionError { .. })
    ));

    let mut unique = make_functor("unique", Some(FieldType::Boolean)).unwrap();
    assert!(matches!(
        unique.update(Some(&Value::Bool(false))),
        Err(EngineError::ConversionError { .. })
    ));
}

#[test]
fn test_unique_approximates_distinct_count() {
    let mut unique = make_functor("unique", Some(FieldType::Text)).unwrap();
    for s in ["a", "a", "b", "c", "b", "d"] {
        unique.update(Some(&Value::Text(s.to_string()))).unwrap();
    }
    let estimate = match unique.value().unwrap() {
        Value::Int64(n) => n,
        other => panic!("unique returned {:?}", other),
    };
    assert!(
        (estimate - 4).abs() as f64 / 4.0 <= 0.05,
        "estimate {} too far from 4",
        estimate
    );
}

#[test]
fn test_unique_tracks_larger_cardinalities() {
    let mut unique = make_functor("unique", Some(FieldType::Integer64)).unwrap();
    for i in 0..1000i64 {
        unique.update(Some(&Value::Int64(i % 250))).unwrap();
    }
    let estimate = match unique.value().unwrap() {
        Value::Int64(n) => n as f64,
        other => panic!("unique returned {:?}", other),
    };
    assert!(
        (estimate - 250.0).abs() / 250.0 <= 0.05,
        "estimate {} too far from 250",
        estimate
    );
}

#[test]
fn test_reset_returns_every_functor_to_post_init_state() {
    let cases: Vec<(&str, Option<FieldType>)> = vec![
        ("first", Some(FieldType::Integer64)),
        ("last", Some(FieldType::Integer64)),
        ("count", None),
        ("sum", Some(FieldType::Integer64)),
        ("minimum", Some(FieldType::Integer64)),
        ("maximum", Some(FieldType::Integer64)),
        ("distinctcount", Some(FieldType::Integer64)),
        ("unique", Some(FieldType::Integer64)),
        ("group", Some(FieldType::Integer64)),
    ];

    for (name, input_type) in cases {
        let fresh = make_functor(name, input_type).unwrap();
        let mut used = make_functor(name, input_type).unwrap();
        let input = Value::Int64(42);
        used.update(if name == "count" { None } else { Some(&input) })
            .unwrap();
        let _ = used.value();
        used.reset();

        match (fresh.value(), used.value()) {
            (Ok(a), Ok(b)) => assert_eq!(a, b, "{} value after reset", name),
            (Err(_), Err(_)) => {} // both undefined, e.g. first over empty window
            (a, b) => panic!("{}: fresh {:?} vs reset {:?}", name, a, b),
        }
    }
}

#[test]
fn test_unknown_function_name() {
    assert!(matches!(
        make_functor("median", Some(FieldType::Float64)),
        Err(EngineError::UnknownFunction { .. })
    ));
}

#[test]
fn test_fnv_hash_encodings() {
    // FNV-1 32-bit reference values
    assert_eq!(
        value_hash(&Value::Text("a".to_string())).unwrap(),
        0x050c5d7e
    );
    assert_eq!(
        value_hash(&Value::Text("abc".to_string())).unwrap(),
        0x439c2f4b
    );
    // Float64 hashes its 8-byte big-endian IEEE-754 form
    assert_eq!(value_hash(&Value::Float64(1.5)).unwrap(), 0x03050cd8);
    // Int64 hashes its 8-byte little-endian two's complement form
    assert_eq!(value_hash(&Value::Int64(-7)).unwrap(), 0xc7fcadab);
    // Booleans have no hash encoding
    assert!(matches!(
        value_hash(&Value::Bool(true)),
        Err(EngineError::ConversionError { .. })
    ));
    // Equal text and distinct text disagree
    assert_ne!(
        value_hash(&Value::Text("a".to_string())).unwrap(),
        value_hash(&Value::Text("b".to_string())).unwrap()
    );
}
