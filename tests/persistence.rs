//! Persistence and recovery tests for long-term memory.
//!
//! These tests verify that chunks, names and the logical clock survive a
//! close + reopen cycle, and how the two commit policies behave.

use ltm_kernel::config::LtmConfig;
use ltm_kernel::engine::Ltm;
use ltm_kernel::storage::StoreMode;
use ltm_kernel::symbol::{IdName, SymbolRef};
use ltm_kernel::wm::WorkingMemory;

fn red_chunk(wm: &mut WorkingMemory) -> SymbolRef {
    let b = wm.new_identifier('B', 1);
    let red = wm.symbols_mut().str("red");
    wm.add_str_attr(&b, "color", &red);
    b
}

#[test]
fn chunks_survive_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = LtmConfig::file(dir.path().join("ltm.redb"));

    // First session: store B1 -> B2 and close cleanly.
    {
        let mut wm = WorkingMemory::new();
        let mut ltm = Ltm::open(config.clone(), &mut wm).unwrap();
        let b = red_chunk(&mut wm);
        let c = red_chunk(&mut wm);
        wm.add_str_attr(&b, "next", &c);
        ltm.store(&mut wm, &b, StoreMode::Recursive).unwrap();
        ltm.close().unwrap();
    }

    // Second session: names are reserved and the chunks decode.
    {
        let mut wm = WorkingMemory::new();
        let mut ltm = Ltm::open(config, &mut wm).unwrap();
        assert_eq!(wm.new_identifier('B', 1).to_string(), "B3");

        let chunks = ltm.export_chunks().unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].to_string(), "(@B1 ^color red ^next @B2)");
        assert_eq!(chunks[1].to_string(), "(@B2 ^color red)");

        let q = wm.new_identifier('Q', 1);
        let red = wm.symbols_mut().str("red");
        wm.add_str_attr(&q, "color", &red);
        let best = ltm.query(&wm, &q, &[]).unwrap().unwrap();
        let b1 = ltm.lookup(&mut wm, IdName::new('B', 1), 1).unwrap().unwrap();
        let b2 = ltm.lookup(&mut wm, IdName::new('B', 2), 1).unwrap().unwrap();
        assert!(best == ltm.lti_of(&b1).unwrap().unwrap() || best == ltm.lti_of(&b2).unwrap().unwrap());
    }
}

#[test]
fn logical_clock_resumes_after_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = LtmConfig::file(dir.path().join("ltm.redb"));

    let before = {
        let mut wm = WorkingMemory::new();
        let mut ltm = Ltm::open(config.clone(), &mut wm).unwrap();
        let b = red_chunk(&mut wm);
        ltm.store(&mut wm, &b, StoreMode::Single).unwrap();
        let lti = ltm.lti_of(&b).unwrap().unwrap();
        ltm.chunk(lti).unwrap().unwrap().activation.unwrap()
    };

    let mut wm = WorkingMemory::new();
    let mut ltm = Ltm::open(config, &mut wm).unwrap();
    let b = red_chunk(&mut wm);
    ltm.store(&mut wm, &b, StoreMode::Single).unwrap();
    let lti = ltm.lti_of(&b).unwrap().unwrap();
    assert!(ltm.chunk(lti).unwrap().unwrap().activation.unwrap() > before);
}

#[test]
fn lazy_rollback_discards_uncommitted_stores() {
    let mut wm = WorkingMemory::new();
    let mut ltm = Ltm::open(LtmConfig::default(), &mut wm).unwrap();

    let kept = red_chunk(&mut wm);
    ltm.store(&mut wm, &kept, StoreMode::Single).unwrap();
    ltm.flush().unwrap();

    let dropped = red_chunk(&mut wm);
    ltm.store(&mut wm, &dropped, StoreMode::Single).unwrap();
    ltm.rollback().unwrap();

    assert_eq!(ltm.export_chunks().unwrap().len(), 1);
    assert!(ltm.lti_of(&kept).unwrap().is_some());
    assert!(ltm.lti_of(&dropped).unwrap().is_none());
    assert!(ltm.counters_consistent().unwrap());

    // Stale caches from the discarded transaction must not leak: storing
    // again reallocates cleanly.
    ltm.store(&mut wm, &dropped, StoreMode::Single).unwrap();
    assert_eq!(ltm.export_chunks().unwrap().len(), 2);
}

#[test]
fn eager_policy_commits_each_store() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = LtmConfig {
        lazy_commit: false,
        ..LtmConfig::file(dir.path().join("ltm.redb"))
    };

    let mut wm = WorkingMemory::new();
    let mut ltm = Ltm::open(config, &mut wm).unwrap();
    let b = red_chunk(&mut wm);
    ltm.store(&mut wm, &b, StoreMode::Single).unwrap();

    // Nothing pending: a rollback cannot undo a committed store.
    ltm.rollback().unwrap();
    assert_eq!(ltm.export_chunks().unwrap().len(), 1);
}

#[test]
fn reinit_removes_the_file_contents() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = LtmConfig::file(dir.path().join("ltm.redb"));

    let mut wm = WorkingMemory::new();
    let mut ltm = Ltm::open(config.clone(), &mut wm).unwrap();
    let b = red_chunk(&mut wm);
    ltm.store(&mut wm, &b, StoreMode::Single).unwrap();
    ltm.reinit(&mut wm).unwrap();
    ltm.close().unwrap();

    let mut wm = WorkingMemory::new();
    let mut ltm = Ltm::open(config, &mut wm).unwrap();
    assert!(ltm.export_chunks().unwrap().is_empty());
}
