//! Tests for the ordered codec and predicates.

use std::sync::Arc;

use proptest::prelude::*;
use tessera_types::{Column, DataType, IndexDefinition, IndexId, KeyValue, TableDefinition, TableId, Value};
use test_case::test_case;

use crate::prefix::{key_payload, prefix_of};
use crate::*;

fn users() -> TableDefinition {
    TableDefinition::new(
        TableId::new(10),
        "users",
        vec![
            Column::primary("id", DataType::BigInt),
            Column::new("name", DataType::Text),
            Column::new("score", DataType::Double),
        ],
    )
}

fn row(id: i64, name: &str, score: f64) -> Vec<Value> {
    vec![Value::BigInt(id), Value::from(name), Value::Double(score)]
}

// ============================================================================
// Table codec
// ============================================================================

#[test]
fn table_row_decodes_to_itself() {
    let codec = OrderedCodec::for_table(&users()).unwrap();
    let original = row(1, "a", 2.5);
    let kv = codec.encode(&original).unwrap();
    assert_eq!(prefix_of(&kv.key).unwrap(), 10);
    assert_eq!(codec.decode(&kv).unwrap(), original);
}

#[test]
fn integer_widens_into_bigint_key() {
    let codec = OrderedCodec::for_table(&users()).unwrap();
    let narrow = codec
        .encode_key(&[Value::Integer(7), Value::Null, Value::Null])
        .unwrap();
    let wide = codec.encode_key(&row(7, "", 0.0)).unwrap();
    assert_eq!(narrow, wide);
}

#[test]
fn key_prefix_with_all_columns_is_the_key() {
    let codec = OrderedCodec::for_table(&users()).unwrap();
    let key = codec.encode_key(&row(3, "x", 1.0)).unwrap();
    assert_eq!(codec.encode_key_prefix(&[Value::BigInt(3)]).unwrap(), key);
    assert!(matches!(
        codec.encode_key_prefix(&[Value::BigInt(3), Value::BigInt(4)]),
        Err(CodecError::KeyArity { expected: 1, actual: 2 })
    ));
}

#[test_case(vec![Value::Null, Value::Null, Value::Null]; "null primary key")]
#[test_case(vec![Value::from("1"), Value::Null, Value::Null]; "text in bigint column")]
#[test_case(vec![Value::BigInt(1)]; "short row")]
fn invalid_rows_are_rejected(bad: Vec<Value>) {
    let codec = OrderedCodec::for_table(&users()).unwrap();
    assert!(codec.encode(&bad).is_err());
}

#[test]
fn table_without_primary_key_has_no_codec() {
    let table = TableDefinition::new(TableId::new(1), "t", vec![Column::new("a", DataType::Text)]);
    assert!(matches!(
        OrderedCodec::for_table(&table),
        Err(CodecError::NoPrimaryKey(_))
    ));
}

#[test]
fn vector_primary_key_is_rejected() {
    let table = TableDefinition::new(
        TableId::new(1),
        "t",
        vec![Column::primary("v", DataType::FloatVector)],
    );
    assert!(matches!(
        OrderedCodec::for_table(&table),
        Err(CodecError::NotOrderable { .. })
    ));
}

#[test]
fn corrupt_value_section_is_an_error() {
    let codec = OrderedCodec::for_table(&users()).unwrap();
    let kv = codec.encode(&row(1, "a", 1.0)).unwrap();
    let corrupt = KeyValue::new(kv.key, vec![0xFF, 0xFF, 0xFF]);
    assert!(codec.decode(&corrupt).is_err());
}

// ============================================================================
// Index codec
// ============================================================================

#[test]
fn index_row_appends_primary_key() {
    let table = users();
    let index = IndexDefinition::scalar(IndexId::new(20), table.id, "by_name", ["name"]);
    assert_eq!(index_row_positions(&table, &index).unwrap(), vec![1, 0]);

    let codec = OrderedCodec::for_index(&table, &index).unwrap();
    let kv = codec.encode(&[Value::from("a"), Value::BigInt(1)]).unwrap();
    assert_eq!(prefix_of(&kv.key).unwrap(), 20);
    // The value section carries the primary key back-reference.
    let back: Vec<Value> = postcard::from_bytes(&kv.value).unwrap();
    assert_eq!(back, vec![Value::BigInt(1)]);
}

#[test]
fn index_on_unknown_column_fails() {
    let table = users();
    let index = IndexDefinition::scalar(IndexId::new(20), table.id, "bad", ["missing"]);
    assert!(matches!(
        OrderedCodecFactory.index_codec(&table, &index),
        Err(CodecError::UnknownColumn(_))
    ));
}

#[test]
fn vector_index_has_no_codec() {
    let table = users();
    let index = IndexDefinition::vector(
        IndexId::new(21),
        table.id,
        "vec",
        "id",
        "embedding",
        tessera_types::VectorElementType::Float,
    );
    assert!(matches!(
        index_row_positions(&table, &index),
        Err(CodecError::VectorIndex(_))
    ));
}

// ============================================================================
// Predicates
// ============================================================================

#[test_case(Predicate::Eq(0, Value::Integer(1)), true; "eq across integer widths")]
#[test_case(Predicate::Ne(1, Value::from("a")), false; "ne on equal text")]
#[test_case(Predicate::Lt(2, Value::Double(3.0)), true; "lt double")]
#[test_case(Predicate::Ge(2, Value::Double(3.0)), false; "ge double")]
#[test_case(Predicate::Gt(1, Value::Null), false; "comparison with null")]
#[test_case(Predicate::IsNull(9), true; "missing column reads as null")]
#[test_case(Predicate::Eq(1, Value::Integer(1)), false; "incomparable types")]
#[test_case(Predicate::IsNull(1).negate(), true; "not")]
#[test_case(Predicate::Or(vec![Predicate::IsNull(0), Predicate::Le(0, Value::BigInt(1))]), true; "or")]
fn predicate_evaluation(predicate: Predicate, expected: bool) {
    assert_eq!(predicate.evaluate(&row(1, "a", 2.5)), expected);
}

#[test]
fn and_flattens() {
    let p = Predicate::IsNull(0).and(Predicate::IsNull(1)).and(Predicate::IsNull(2));
    assert!(matches!(&p, Predicate::And(ps) if ps.len() == 3));
}

#[test]
fn coprocessor_decodes_and_filters() {
    let codec: Arc<dyn KeyValueCodec> = Arc::new(OrderedCodec::for_table(&users()).unwrap());
    let copr = Coprocessor::new(codec.clone(), Predicate::Gt(2, Value::Double(1.0))).with_limit(5);
    assert_eq!(copr.limit, Some(5));
    assert!(copr.matches(&codec.encode(&row(1, "a", 2.0)).unwrap()).unwrap());
    assert!(!copr.matches(&codec.encode(&row(2, "b", 0.5)).unwrap()).unwrap());
}

proptest! {
    /// Property: encoded primary keys sort like the key values.
    #[test]
    fn prop_key_order_follows_values(a in any::<i64>(), b in any::<i64>()) {
        let codec = OrderedCodec::for_table(&users()).unwrap();
        let ka = codec.encode_key(&row(a, "", 0.0)).unwrap();
        let kb = codec.encode_key(&row(b, "", 0.0)).unwrap();
        prop_assert_eq!(ka.cmp(&kb), a.cmp(&b));
    }

    /// Property: a partial index key is a byte prefix of every full key
    /// that starts with the same value.
    #[test]
    fn prop_index_prefix_is_byte_prefix(name in "[a-z]{0,8}", id in any::<i64>()) {
        let table = users();
        let index = IndexDefinition::scalar(IndexId::new(20), table.id, "by_name", ["name"]);
        let codec = OrderedCodec::for_index(&table, &index).unwrap();
        let full = codec.encode_key(&[Value::Text(name.clone()), Value::BigInt(id)]).unwrap();
        let partial = codec.encode_key_prefix(&[Value::Text(name)]).unwrap();
        prop_assert!(full.starts_with(&partial));
        prop_assert!(key_payload(&full).unwrap().len() > key_payload(&partial).unwrap().len());
    }
}
