//! Command protocol: how the reasoning engine drives long-term memory.
//!
//! Every state gets a header in working memory:
//!
//! ```text
//! (S1 ^ltm M1)
//! (M1 ^command C1 ^result R1)
//! ```
//!
//! Rules write a command under `C1` (`^retrieve`, `^query`, `^negquery`,
//! `^prohibit`, `^store`). Once per cycle the kernel compares the command
//! region's highest timetag and element count against what it saw last time;
//! on a change it parses the command, runs it and writes `^status` (and
//! `^retrieved` on success) under `R1`. Results of the previous command are
//! removed first.

use std::rc::Rc;

use crate::error::CommandError;
use crate::symbol::{Epoch, LtiId, SymbolRef};
use crate::wm::{WmeKind, WmeRef, WorkingMemory};

pub const ATTR_LTM: &str = "ltm";
pub const ATTR_COMMAND: &str = "command";
pub const ATTR_RESULT: &str = "result";
pub const ATTR_STATUS: &str = "status";
pub const ATTR_RETRIEVED: &str = "retrieved";

/// Outcome written under the result header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Failure,
    BadCmd,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::Failure => "failure",
            Status::BadCmd => "bad-cmd",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated command.
#[derive(Debug, Clone)]
pub enum Command {
    /// Expand one stored chunk onto `target`.
    Retrieve { target: SymbolRef, lti: LtiId },
    /// Cue-based search rooted at `cue`, skipping `prohibit`.
    Query { cue: SymbolRef, prohibit: Vec<LtiId> },
    /// Persist each root.
    Store { roots: Vec<SymbolRef> },
}

/// Per-state long-term memory header and the command-change bookkeeping.
#[derive(Debug)]
pub struct StateHeader {
    pub state: SymbolRef,
    pub link: SymbolRef,
    pub command: SymbolRef,
    pub result: SymbolRef,
    header: Vec<WmeRef>,
    last_cmd_time: u64,
    last_cmd_count: usize,
    results: Vec<WmeRef>,
}

impl StateHeader {
    /// Build `state ^ltm M`, `M ^command C`, `M ^result R`.
    pub fn attach(wm: &mut WorkingMemory, state: &SymbolRef) -> Self {
        let level = state.identifier().map(|i| i.level()).unwrap_or(1);
        let link = wm.new_identifier('M', level);
        let command = wm.new_identifier('C', level);
        let result = wm.new_identifier('R', level);

        let header = vec![
            arch(wm, state, ATTR_LTM, &link),
            arch(wm, &link, ATTR_COMMAND, &command),
            arch(wm, &link, ATTR_RESULT, &result),
        ];
        Self {
            state: Rc::clone(state),
            link,
            command,
            result,
            header,
            last_cmd_time: 0,
            last_cmd_count: 0,
            results: Vec::new(),
        }
    }

    /// Remove the header and any outstanding results.
    pub fn detach(mut self, wm: &mut WorkingMemory) {
        self.clear_results(wm);
        for wme in self.header.drain(..) {
            wm.remove(&wme);
        }
    }

    /// Goal-stack level of the state.
    pub fn level(&self) -> u32 {
        self.state.identifier().map(|i| i.level()).unwrap_or(1)
    }

    /// Whether the command region changed since the last call. Updates the
    /// cached signature.
    pub fn command_changed(&mut self, wm: &WorkingMemory, epoch: Epoch) -> bool {
        let (time, count) = signature(wm, &self.command, epoch);
        if time == self.last_cmd_time && count == self.last_cmd_count {
            return false;
        }
        self.last_cmd_time = time;
        self.last_cmd_count = count;
        true
    }

    /// Record the command region as seen after the kernel responded, so
    /// its own writes (markers, expansions) do not count as a new command.
    pub fn settle(&mut self, wm: &WorkingMemory, epoch: Epoch) {
        let (time, count) = signature(wm, &self.command, epoch);
        self.last_cmd_time = time;
        self.last_cmd_count = count;
    }

    /// Remove the WMEs written for the previous command.
    pub fn clear_results(&mut self, wm: &mut WorkingMemory) {
        for wme in self.results.drain(..) {
            wm.remove(&wme);
        }
    }

    /// Write `R ^status <status>`.
    pub fn write_status(&mut self, wm: &mut WorkingMemory, status: Status) {
        let value = wm.symbols_mut().str(status.as_str());
        let wme = arch(wm, &self.result, ATTR_STATUS, &value);
        self.results.push(wme);
    }

    /// Write `R ^retrieved <id>`.
    pub fn write_retrieved(&mut self, wm: &mut WorkingMemory, id: &SymbolRef) {
        let wme = arch(wm, &self.result, ATTR_RETRIEVED, id);
        self.results.push(wme);
    }

    /// Result WMEs currently in working memory.
    pub fn results(&self) -> &[WmeRef] {
        &self.results
    }
}

fn arch(wm: &mut WorkingMemory, id: &SymbolRef, attr: &str, value: &SymbolRef) -> WmeRef {
    let attr = wm.symbols_mut().str(attr);
    wm.add_with_kind(id, &attr, value, WmeKind::Architecture)
}

/// Highest timetag and element count of everything reachable from `root`.
/// Stored chunks are counted but not walked into.
fn signature(wm: &WorkingMemory, root: &SymbolRef, epoch: Epoch) -> (u64, usize) {
    let mut seen = std::collections::HashSet::new();
    let mut stack = vec![Rc::clone(root)];
    let (mut time, mut count) = (0, 0);
    while let Some(id) = stack.pop() {
        let Some(name) = id.identifier().map(|i| i.name()) else {
            continue;
        };
        if !seen.insert(name) {
            continue;
        }
        for wme in wm.wmes_of(&id) {
            time = time.max(wme.timetag);
            count += 1;
            if wme.value.is_identifier() && wme.value.lti(epoch).is_none() {
                stack.push(Rc::clone(&wme.value));
            }
        }
    }
    (time, count)
}

/// Parse the command under `command`.
///
/// `lti_of` resolves `^retrieve` and `^prohibit` values to persistent ids.
/// `Ok(None)` for an empty command. Any malformed element rejects the whole
/// command. `^negquery` is accepted but not evaluated.
pub fn parse(
    wm: &WorkingMemory,
    command: &SymbolRef,
    mut lti_of: impl FnMut(&SymbolRef) -> Option<LtiId>,
) -> Result<Option<Command>, CommandError> {
    let mut retrieve: Option<(SymbolRef, LtiId)> = None;
    let mut query: Option<SymbolRef> = None;
    let mut negquery = 0usize;
    let mut prohibit = Vec::new();
    let mut store = Vec::new();

    for wme in wm.wmes_of(command) {
        let attr = wme.attr.to_string();
        let value = &wme.value;
        match attr.as_str() {
            "retrieve" => {
                if retrieve.is_some() {
                    return Err(CommandError::Duplicate { attr: "retrieve" });
                }
                let lti = lti_of(value).ok_or(CommandError::WrongKind {
                    attr: "retrieve",
                    expected: "a stored identifier",
                })?;
                retrieve = Some((Rc::clone(value), lti));
            }
            "query" => {
                if query.is_some() {
                    return Err(CommandError::Duplicate { attr: "query" });
                }
                require_identifier(value, "query")?;
                query = Some(Rc::clone(value));
            }
            "negquery" => {
                require_identifier(value, "negquery")?;
                negquery += 1;
            }
            "prohibit" => {
                let lti = lti_of(value).ok_or(CommandError::WrongKind {
                    attr: "prohibit",
                    expected: "a stored identifier",
                })?;
                prohibit.push(lti);
            }
            "store" => {
                require_identifier(value, "store")?;
                store.push(Rc::clone(value));
            }
            _ => return Err(CommandError::UnknownAttribute { attr }),
        }
    }

    let has_query = query.is_some();
    if retrieve.is_some() && (has_query || !store.is_empty() || !prohibit.is_empty() || negquery > 0)
    {
        return Err(conflict("^retrieve cannot be combined with other commands"));
    }
    if !store.is_empty() && (has_query || !prohibit.is_empty() || negquery > 0) {
        return Err(conflict("^store cannot be combined with a query"));
    }
    if !has_query && (!prohibit.is_empty() || negquery > 0) {
        return Err(conflict("^prohibit and ^negquery need a ^query"));
    }

    Ok(if let Some((target, lti)) = retrieve {
        Some(Command::Retrieve { target, lti })
    } else if let Some(cue) = query {
        Some(Command::Query { cue, prohibit })
    } else if !store.is_empty() {
        Some(Command::Store { roots: store })
    } else {
        None
    })
}

fn require_identifier(value: &SymbolRef, attr: &'static str) -> Result<(), CommandError> {
    if value.is_identifier() {
        Ok(())
    } else {
        Err(CommandError::WrongKind {
            attr,
            expected: "an identifier",
        })
    }
}

fn conflict(message: &str) -> CommandError {
    CommandError::Conflict {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (WorkingMemory, StateHeader) {
        let mut wm = WorkingMemory::new();
        let s = wm.new_identifier('S', 1);
        let header = StateHeader::attach(&mut wm, &s);
        (wm, header)
    }

    fn stored_id(wm: &mut WorkingMemory, epoch: Epoch) -> SymbolRef {
        let b = wm.new_identifier('B', 1);
        b.identifier()
            .unwrap()
            .set_lti(LtiId::new(b.identifier().unwrap().name().number).unwrap(), epoch);
        b
    }

    /// Resolve persistent ids from markers only.
    fn marker(epoch: Epoch) -> impl FnMut(&SymbolRef) -> Option<LtiId> {
        move |sym| sym.lti(epoch)
    }

    #[test]
    fn attach_builds_header_and_detach_removes_it() {
        let (mut wm, header) = setup();
        assert_eq!(wm.len(), 3);
        assert_eq!(wm.values_of(&header.link, ATTR_COMMAND)[0].to_string(), header.command.to_string());
        header.detach(&mut wm);
        assert!(wm.is_empty());
    }

    #[test]
    fn empty_command_parses_to_none() {
        let (wm, header) = setup();
        assert!(parse(&wm, &header.command, marker(1)).unwrap().is_none());
    }

    #[test]
    fn retrieve_needs_a_stored_identifier() {
        let (mut wm, header) = setup();
        let fresh = wm.new_identifier('B', 1);
        wm.add_str_attr(&header.command, "retrieve", &fresh);
        assert!(matches!(
            parse(&wm, &header.command, marker(1)),
            Err(CommandError::WrongKind { attr: "retrieve", .. })
        ));
    }

    #[test]
    fn retrieve_uses_the_resolver() {
        let (mut wm, header) = setup();
        let b = wm.new_identifier('B', 1);
        wm.add_str_attr(&header.command, "retrieve", &b);
        let by_name = |sym: &SymbolRef| (sym.to_string() == "B1").then(|| LtiId::new(4).unwrap());
        match parse(&wm, &header.command, by_name).unwrap() {
            Some(Command::Retrieve { target, lti }) => {
                assert!(Rc::ptr_eq(&target, &b));
                assert_eq!(lti.get(), 4);
            }
            other => panic!("expected retrieve, got {other:?}"),
        }
    }

    #[test]
    fn retrieve_plus_store_is_a_conflict() {
        let (mut wm, header) = setup();
        let b = stored_id(&mut wm, 1);
        let c = wm.new_identifier('C', 1);
        wm.add_str_attr(&header.command, "retrieve", &b);
        wm.add_str_attr(&header.command, "store", &c);
        assert!(matches!(
            parse(&wm, &header.command, marker(1)),
            Err(CommandError::Conflict { .. })
        ));
    }

    #[test]
    fn query_with_prohibits() {
        let (mut wm, header) = setup();
        let q = wm.new_identifier('Q', 1);
        let b = stored_id(&mut wm, 1);
        wm.add_str_attr(&header.command, "query", &q);
        wm.add_str_attr(&header.command, "prohibit", &b);
        match parse(&wm, &header.command, marker(1)).unwrap() {
            Some(Command::Query { cue, prohibit }) => {
                assert!(Rc::ptr_eq(&cue, &q));
                assert_eq!(prohibit, vec![b.lti(1).unwrap()]);
            }
            other => panic!("expected query, got {other:?}"),
        }
    }

    #[test]
    fn malformed_commands_are_rejected() {
        let (mut wm, header) = setup();
        let red = wm.symbols_mut().str("red");
        wm.add_str_attr(&header.command, "frobnicate", &red);
        assert_eq!(
            parse(&wm, &header.command, marker(1)).unwrap_err(),
            CommandError::UnknownAttribute {
                attr: "frobnicate".into()
            }
        );

        let (mut wm, header) = setup();
        let q1 = wm.new_identifier('Q', 1);
        let q2 = wm.new_identifier('Q', 1);
        wm.add_str_attr(&header.command, "query", &q1);
        wm.add_str_attr(&header.command, "query", &q2);
        assert_eq!(
            parse(&wm, &header.command, marker(1)).unwrap_err(),
            CommandError::Duplicate { attr: "query" }
        );

        let (mut wm, header) = setup();
        let b = stored_id(&mut wm, 1);
        wm.add_str_attr(&header.command, "prohibit", &b);
        assert!(matches!(
            parse(&wm, &header.command, marker(1)),
            Err(CommandError::Conflict { .. })
        ));

        let (mut wm, header) = setup();
        wm.add_str_attr(&header.command, "store", &red);
        assert!(matches!(
            parse(&wm, &header.command, marker(1)),
            Err(CommandError::WrongKind { attr: "store", .. })
        ));
    }

    #[test]
    fn multiple_stores_are_one_command() {
        let (mut wm, header) = setup();
        let a = wm.new_identifier('A', 1);
        let b = wm.new_identifier('B', 1);
        wm.add_str_attr(&header.command, "store", &a);
        wm.add_str_attr(&header.command, "store", &b);
        match parse(&wm, &header.command, marker(1)).unwrap() {
            Some(Command::Store { roots }) => assert_eq!(roots.len(), 2),
            other => panic!("expected store, got {other:?}"),
        }
    }

    #[test]
    fn change_detection_sees_nested_edits() {
        let (mut wm, mut header) = setup();
        assert!(!header.command_changed(&wm, 1));

        let q = wm.new_identifier('Q', 1);
        wm.add_str_attr(&header.command, "query", &q);
        assert!(header.command_changed(&wm, 1));
        assert!(!header.command_changed(&wm, 1));

        let red = wm.symbols_mut().str("red");
        wm.add_str_attr(&q, "color", &red);
        assert!(header.command_changed(&wm, 1));
    }

    #[test]
    fn change_detection_stops_at_stored_chunks() {
        let (mut wm, mut header) = setup();
        let b = stored_id(&mut wm, 1);
        wm.add_str_attr(&header.command, "retrieve", &b);
        assert!(header.command_changed(&wm, 1));

        // Expanding the chunk adds children the command never named.
        let red = wm.symbols_mut().str("red");
        wm.add_str_attr(&b, "color", &red);
        assert!(!header.command_changed(&wm, 1));
    }

    #[test]
    fn settle_absorbs_the_kernels_own_writes() {
        let (mut wm, mut header) = setup();
        let b = wm.new_identifier('B', 1);
        let red = wm.symbols_mut().str("red");
        wm.add_str_attr(&b, "color", &red);
        wm.add_str_attr(&header.command, "store", &b);
        assert!(header.command_changed(&wm, 1));

        // Storing marks `b` as a chunk, which shrinks the walked region.
        b.identifier().unwrap().set_lti(LtiId::new(1).unwrap(), 1);
        header.settle(&wm, 1);
        assert!(!header.command_changed(&wm, 1));
    }

    #[test]
    fn results_are_replaced() {
        let (mut wm, mut header) = setup();
        header.write_status(&mut wm, Status::Failure);
        assert_eq!(header.results().len(), 1);
        header.clear_results(&mut wm);
        header.write_status(&mut wm, Status::Success);
        let status = wm.values_of(&header.result, ATTR_STATUS);
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].to_string(), "success");
    }
}
