use chrono::Duration;
use mcq_pipeline::cache::{fingerprint, ResponseCache};
use mcq_pipeline::extract::Mcq;

fn mcq(question: &str) -> Mcq {
    Mcq {
        question: question.to_string(),
        options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
        answer_index: 0,
    }
}

#[test]
fn fingerprint_is_stable_and_input_sensitive() {
    assert_eq!(fingerprint("material", 5), fingerprint("material", 5));
    assert_ne!(fingerprint("material", 5), fingerprint("material", 6));
    assert_ne!(fingerprint("material", 5), fingerprint("other", 5));
}

#[test]
fn fresh_entry_round_trips() {
    let cache = ResponseCache::new(Duration::hours(2), 16);
    let fp = fingerprint("material", 3);
    let set = vec![mcq("one"), mcq("two")];
    cache.put(fp.clone(), set.clone());
    assert_eq!(cache.get(&fp), Some(set));
}

#[test]
fn unknown_fingerprint_is_absent() {
    let cache = ResponseCache::new(Duration::hours(2), 16);
    assert_eq!(cache.get("missing"), None);
}

#[test]
fn stale_entry_is_evicted_on_read() {
    let cache = ResponseCache::new(Duration::zero(), 16);
    let fp = fingerprint("material", 3);
    cache.put(fp.clone(), vec![mcq("one")]);
    assert_eq!(cache.get(&fp), None);
    assert!(cache.is_empty());
}

#[test]
fn put_sweeps_stale_entries_over_capacity() {
    let cache = ResponseCache::new(Duration::zero(), 2);
    cache.put("a".to_string(), vec![mcq("one")]);
    cache.put("b".to_string(), vec![mcq("two")]);
    assert_eq!(cache.len(), 2);
    // Third insert exceeds capacity; with a zero TTL every entry is stale
    // and the sweep drops the whole table.
    cache.put("c".to_string(), vec![mcq("three")]);
    assert!(cache.is_empty());
}

#[test]
fn fresh_entries_survive_the_sweep() {
    let cache = ResponseCache::new(Duration::hours(2), 2);
    cache.put("a".to_string(), vec![mcq("one")]);
    cache.put("b".to_string(), vec![mcq("two")]);
    cache.put("c".to_string(), vec![mcq("three")]);
    assert_eq!(cache.len(), 3);
}
