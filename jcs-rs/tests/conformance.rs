use jcs_rs::{canonicalize, canonicalize_str};

struct Vector {
    id: &'static str,
    input: &'static str,
    expected: &'static str,
}

const VECTORS: &[Vector] = &[
    Vector { id: "empty_object", input: "{}", expected: "{}" },
    Vector { id: "empty_array", input: "[]", expected: "[]" },
    Vector { id: "sorted_keys", input: r#"{"b":2,"a":1}"#, expected: r#"{"a":1,"b":2}"# },
    Vector {
        id: "nested_sorted_keys",
        input: r#"{"b":{"d":1,"c":2},"a":1}"#,
        expected: r#"{"a":1,"b":{"c":2,"d":1}}"#,
    },
    Vector {
        id: "array_order_preserved",
        input: r#"{"a":[3,1,2]}"#,
        expected: r#"{"a":[3,1,2]}"#,
    },
    Vector {
        id: "string_escapes",
        input: r#"{"a":"line1\nline2\ttab\"quote"}"#,
        expected: r#"{"a":"line1\nline2\ttab\"quote"}"#,
    },
    Vector { id: "null_and_bool", input: r#"{"a":null,"b":true,"c":false}"#, expected: r#"{"a":null,"b":true,"c":false}"# },
    Vector { id: "integer", input: r#"{"a":42}"#, expected: r#"{"a":42}"# },
    Vector { id: "negative_integer", input: r#"{"a":-7}"#, expected: r#"{"a":-7}"# },
];

#[test]
fn canonical_conformance_vectors() {
    for v in VECTORS {
        let got = canonicalize_str(v.input).unwrap_or_else(|e| panic!("{}: {e}", v.id));
        assert_eq!(
            String::from_utf8(got).unwrap(),
            v.expected,
            "vector failed: {}",
            v.id
        );
    }
}

#[test]
fn rfc_examples_and_edges() {
    let out = canonicalize_str(r#"{"b":2,"a":1}"#).unwrap();
    assert_eq!(out, br#"{"a":1,"b":2}"#);

    // Deep nesting round-trips without blowing the stack.
    let mut nested = String::new();
    for _ in 0..64 {
        nested.push('[');
    }
    nested.push('0');
    for _ in 0..64 {
        nested.push(']');
    }
    let out = canonicalize_str(&nested).unwrap();
    assert_eq!(out, nested.into_bytes());

    let out = canonicalize_str(r#"{"empty_obj":{},"empty_arr":[]}"#).unwrap();
    assert_eq!(out, br#"{"empty_arr":[],"empty_obj":{}}"#);
}

#[test]
fn object_key_sorting_by_utf16_units() {
    let input = "{\"\u{fffd}\":2,\"\u{1F600}\":1,\"a\":0}";
    let out = canonicalize_str(input).unwrap();
    let s = String::from_utf8(out).unwrap();
    assert_eq!(s, "{\"a\":0,\"\u{1F600}\":1,\"\u{fffd}\":2}");
}

#[test]
fn canonicalize_rejects_invalid_json() {
    assert!(canonicalize_str("{not json}").is_err());
}

#[test]
fn canonicalize_value_matches_str() {
    let value: serde_json::Value = serde_json::from_str(r#"{"b":2,"a":1}"#).unwrap();
    assert_eq!(canonicalize(&value).unwrap(), canonicalize_str(r#"{"b":2,"a":1}"#).unwrap());
}
