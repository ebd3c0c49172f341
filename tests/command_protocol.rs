//! End-to-end tests driving long-term memory through the `^ltm` command
//! protocol, the way a reasoning engine does once per cycle.

use std::rc::Rc;

use ltm_kernel::command::{ATTR_RETRIEVED, ATTR_STATUS};
use ltm_kernel::config::LtmConfig;
use ltm_kernel::engine::Ltm;
use ltm_kernel::symbol::SymbolRef;
use ltm_kernel::wm::{WmeRef, WorkingMemory};

struct Agent {
    wm: WorkingMemory,
    ltm: Ltm,
    state: SymbolRef,
    command: SymbolRef,
}

impl Agent {
    fn new(config: LtmConfig) -> Self {
        let mut wm = WorkingMemory::new();
        let mut ltm = Ltm::open(config, &mut wm).unwrap();
        let state = wm.new_identifier('S', 1);
        let command = Rc::clone(&ltm.attach_state(&mut wm, &state).command);
        Self {
            wm,
            ltm,
            state,
            command,
        }
    }

    fn chunk(&mut self, pairs: &[(&str, &str)]) -> SymbolRef {
        let b = self.wm.new_identifier('B', 1);
        for (attr, value) in pairs {
            let v = self.wm.symbols_mut().str(value);
            self.wm.add_str_attr(&b, attr, &v);
        }
        b
    }

    fn cue(&mut self, pairs: &[(&str, &str)]) -> SymbolRef {
        let q = self.wm.new_identifier('Q', 1);
        for (attr, value) in pairs {
            let v = self.wm.symbols_mut().str(value);
            self.wm.add_str_attr(&q, attr, &v);
        }
        q
    }

    fn command(&mut self, attr: &str, value: &SymbolRef) -> WmeRef {
        self.wm.add_str_attr(&self.command, attr, value)
    }

    fn clear_command(&mut self) {
        let wmes: Vec<_> = self.wm.wmes_of(&self.command).to_vec();
        for wme in wmes {
            self.wm.remove(&wme);
        }
    }

    fn cycle(&mut self) {
        self.ltm.run_cycle(&mut self.wm);
    }

    fn result_values(&self, attr: &str) -> Vec<SymbolRef> {
        let header = self.ltm.header(&self.state).unwrap();
        self.wm.values_of(&header.result, attr)
    }

    fn status(&self) -> Option<String> {
        self.result_values(ATTR_STATUS)
            .first()
            .map(|s| s.to_string())
    }

    fn retrieved(&self) -> Option<SymbolRef> {
        self.result_values(ATTR_RETRIEVED).first().cloned()
    }

    fn store(&mut self, root: &SymbolRef) {
        self.clear_command();
        self.command("store", root);
        self.cycle();
        assert_eq!(self.status().as_deref(), Some("success"));
        self.clear_command();
    }
}

#[test]
fn store_query_prohibit_scenario() {
    let mut agent = Agent::new(LtmConfig::default());

    let b3 = agent.chunk(&[("color", "red"), ("color", "blue")]);
    agent.store(&b3);

    let q = agent.cue(&[("color", "red")]);
    agent.command("query", &q);
    agent.cycle();
    assert_eq!(agent.status().as_deref(), Some("success"));
    assert!(Rc::ptr_eq(&agent.retrieved().unwrap(), &b3));

    agent.command("prohibit", &b3);
    agent.cycle();
    assert_eq!(agent.status().as_deref(), Some("failure"));
    assert!(agent.retrieved().is_none());

    let b7 = agent.chunk(&[("color", "red")]);
    agent.store(&b7);

    agent.command("query", &q);
    agent.cycle();
    assert_eq!(agent.status().as_deref(), Some("success"));
    let winner = agent.retrieved().unwrap();
    assert!(Rc::ptr_eq(&winner, &b3) || Rc::ptr_eq(&winner, &b7));
    // B7 was stored after B3 was last retrieved, so it is the most recent.
    assert!(Rc::ptr_eq(&winner, &b7));
}

#[test]
fn retrieve_plus_store_is_bad_and_changes_nothing() {
    let mut agent = Agent::new(LtmConfig::default());
    let b3 = agent.chunk(&[("color", "red")]);
    agent.store(&b3);

    let before = agent.ltm.export_chunks().unwrap();
    let counters = agent.ltm.counters().unwrap();

    let other = agent.chunk(&[("size", "big")]);
    agent.command("retrieve", &b3);
    agent.command("store", &other);
    agent.cycle();

    assert_eq!(agent.status().as_deref(), Some("bad-cmd"));
    assert_eq!(agent.ltm.export_chunks().unwrap(), before);
    assert_eq!(agent.ltm.counters().unwrap(), counters);
    assert_eq!(agent.ltm.lti_of(&other).unwrap(), None);
    assert_eq!(agent.ltm.stats().unwrap().bad_commands, 1);
}

#[test]
fn retrieve_expands_a_chunk_into_fresh_memory() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = LtmConfig::file(dir.path().join("ltm.redb"));

    {
        let mut agent = Agent::new(config.clone());
        let b = agent.chunk(&[("color", "red"), ("size", "big")]);
        agent.store(&b);
        agent.ltm.flush().unwrap();
    }

    let mut agent = Agent::new(config);
    let name = ltm_kernel::symbol::IdName::new('B', 1);
    let b = agent.ltm.lookup(&mut agent.wm, name, 1).unwrap().unwrap();
    assert!(!agent.wm.has_children(&b));

    agent.command("retrieve", &b);
    agent.cycle();
    assert_eq!(agent.status().as_deref(), Some("success"));
    assert!(Rc::ptr_eq(&agent.retrieved().unwrap(), &b));
    assert_eq!(agent.wm.wmes_of(&b).len(), 2);
    assert_eq!(agent.wm.values_of(&b, "size")[0].to_string(), "big");
}

#[test]
fn unchanged_command_is_not_rerun() {
    let mut agent = Agent::new(LtmConfig::default());
    let b = agent.chunk(&[("color", "red")]);
    agent.store(&b);

    let q = agent.cue(&[("color", "red")]);
    agent.command("query", &q);
    agent.cycle();
    agent.cycle();
    agent.cycle();
    assert_eq!(agent.ltm.stats().unwrap().queries, 1);
    assert_eq!(agent.result_values(ATTR_STATUS).len(), 1);
}

#[test]
fn unmatchable_cue_reports_failure() {
    let mut agent = Agent::new(LtmConfig::default());
    let b = agent.chunk(&[("color", "red")]);
    agent.store(&b);

    let q = agent.cue(&[("color", "ultraviolet")]);
    agent.command("query", &q);
    agent.cycle();
    assert_eq!(agent.status().as_deref(), Some("failure"));
    assert!(!agent.ltm.is_failed());
}

#[test]
fn detached_state_stops_processing() {
    let mut agent = Agent::new(LtmConfig::default());
    let before = agent.wm.len();
    let state = Rc::clone(&agent.state);
    agent.ltm.detach_state(&mut agent.wm, &state);
    assert!(agent.ltm.header(&state).is_none());
    assert_eq!(agent.wm.len(), before - 3);
}

#[test]
fn store_command_in_eager_mode_commits_once() {
    let config = LtmConfig {
        lazy_commit: false,
        ..LtmConfig::default()
    };
    let mut agent = Agent::new(config);
    let a = agent.chunk(&[("color", "red")]);
    let b = agent.chunk(&[("color", "blue")]);
    agent.command("store", &a);
    agent.command("store", &b);
    agent.cycle();
    assert_eq!(agent.status().as_deref(), Some("success"));
    assert_eq!(agent.ltm.export_chunks().unwrap().len(), 2);
    assert_eq!(agent.ltm.stats().unwrap().stores, 2);
}

#[test]
fn retrieving_a_chunk_runs_once_while_the_command_stands() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = LtmConfig::file(dir.path().join("ltm.redb"));
    {
        let mut agent = Agent::new(config.clone());
        let b = agent.chunk(&[("color", "red")]);
        agent.store(&b);
        agent.ltm.flush().unwrap();
    }

    let mut agent = Agent::new(config);
    let name = ltm_kernel::symbol::IdName::new('B', 1);
    let b = agent.ltm.lookup(&mut agent.wm, name, 1).unwrap().unwrap();
    agent.command("retrieve", &b);
    for _ in 0..3 {
        agent.cycle();
    }

    let stats = agent.ltm.stats().unwrap();
    assert_eq!(stats.retrievals, 1);
    assert_eq!(stats.expansions, 1);
    assert_eq!(agent.result_values(ATTR_STATUS).len(), 1);
}

#[test]
fn store_command_is_not_repeated_once_roots_become_chunks() {
    let mut agent = Agent::new(LtmConfig::default());
    let b = agent.chunk(&[("color", "red")]);
    agent.command("store", &b);
    for _ in 0..3 {
        agent.cycle();
    }
    assert_eq!(agent.status().as_deref(), Some("success"));
    assert_eq!(agent.ltm.stats().unwrap().stores, 1);
}

#[test]
fn markers_from_before_a_reset_still_name_their_chunks() {
    let mut agent = Agent::new(LtmConfig::default());
    let b = agent.chunk(&[("color", "red")]);
    agent.store(&b);
    agent.ltm.reset(&mut agent.wm).unwrap();
    assert_eq!(b.lti(agent.ltm.epoch()), None);

    let q = agent.cue(&[("color", "red")]);
    agent.command("query", &q);
    agent.command("prohibit", &b);
    agent.cycle();
    assert_eq!(agent.status().as_deref(), Some("failure"));
    assert_eq!(agent.ltm.stats().unwrap().bad_commands, 0);

    agent.clear_command();
    agent.command("retrieve", &b);
    agent.cycle();
    assert_eq!(agent.status().as_deref(), Some("success"));
    assert!(Rc::ptr_eq(&agent.retrieved().unwrap(), &b));
}

#[test]
fn unknown_lti_keeps_pending_stores() {
    let mut agent = Agent::new(LtmConfig::default());
    let b = agent.chunk(&[("color", "red")]);
    agent.store(&b);

    let bogus = ltm_kernel::symbol::LtiId::new(999).unwrap();
    assert!(agent.ltm.retrieve(&mut agent.wm, bogus, 1).unwrap().is_none());
    assert!(!agent.ltm.is_failed());

    agent.ltm.reset(&mut agent.wm).unwrap();
    assert_eq!(agent.ltm.export_chunks().unwrap().len(), 1);
}
