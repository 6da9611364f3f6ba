// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

crate::define_id! {
    /// Test-only id type.
    pub struct ProbeId;
}

#[test]
fn short_truncates() {
    assert_eq!("abcdef".short(3), "abc");
    assert_eq!("ab".short(3), "ab");
    assert_eq!("".short(3), "");
}

#[test]
fn generated_ids_are_ulid_shaped() {
    let id = ProbeId::generate();
    assert_eq!(id.as_str().len(), 26);
    assert!(id
        .as_str()
        .chars()
        .all(|c| c.is_ascii_alphanumeric() && c.is_ascii_uppercase() || c.is_ascii_digit()));
}

#[test]
fn generated_ids_are_unique() {
    let a = ProbeId::generate();
    let b = ProbeId::generate();
    assert_ne!(a, b);
}

#[test]
fn newtype_compares_with_str() {
    let id = ProbeId::new("abc-123");
    assert_eq!(id, "abc-123");
    assert_eq!(id.short(3), "abc");
    assert_eq!(id.to_string(), "abc-123");
}

#[test]
fn ulid_gen_is_monotonic_in_practice() {
    // ULIDs embed a millisecond timestamp prefix; two ids generated in
    // order never sort backwards across a millisecond boundary.
    let gen = UlidIdGen;
    let a = gen.next();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let b = gen.next();
    assert!(a < b, "expected {a} < {b}");
}

#[test]
fn sequential_gen_counts_up() {
    let gen = SequentialIdGen::new("sess");
    assert_eq!(gen.next(), "sess-1");
    assert_eq!(gen.next(), "sess-2");
}

#[test]
fn trace_ids_are_unique() {
    assert_ne!(new_trace_id(), new_trace_id());
}
