//! Virtual-circuit registry: per-session UID allocation, each UID's
//! tree-connection table, search-slot table, and single in-flight
//! transaction slot (spec §3, §4.5).

use std::collections::HashMap;

use crate::collaborators::SearchContext;
use crate::error::{Error, Result, SmbStatus};
use crate::packets::smb1::transact::TransactionReassembly;
use crate::session::tree::{Tid, TreeConnection};

/// A 16-bit user id. `0` and `0xFFFF` are reserved and never allocated.
pub type Uid = u16;

/// A 16-bit search-slot id, scoped to a virtual circuit.
pub type SearchId = u16;

const RESERVED_LOW: u16 = 0;
const RESERVED_HIGH: u16 = 0xFFFF;

/// Scans `used` starting just after `hint` for the next free id in
/// `(0, 0xFFFF)`, wrapping once. Shared by UID, TID, and search-slot
/// allocation, which all have the same "16-bit id, skip the reserved
/// ends, reject when full" shape (spec §4.5).
fn allocate_id<T>(table: &HashMap<u16, T>, next_hint: &mut u16, max: u32) -> Option<u16> {
    if table.len() as u32 >= max {
        return None;
    }
    let start = *next_hint;
    let mut candidate = start;
    loop {
        if candidate != RESERVED_LOW && candidate != RESERVED_HIGH && !table.contains_key(&candidate) {
            *next_hint = candidate.wrapping_add(1);
            if *next_hint == RESERVED_LOW {
                *next_hint = 1;
            }
            return Some(candidate);
        }
        candidate = candidate.wrapping_add(1);
        if candidate == RESERVED_LOW {
            candidate = 1;
        }
        if candidate == start {
            return None;
        }
    }
}

/// Per-user state established at session setup (spec §3's *Virtual
/// circuit*).
pub struct VirtualCircuit {
    pub uid: Uid,
    pub client_identity: String,
    pub is_guest: bool,
    trees: HashMap<Tid, TreeConnection>,
    next_tid_hint: u16,
    max_trees: u32,
    searches: HashMap<SearchId, ()>,
    next_search_hint: u16,
    max_searches: u32,
    transaction: Option<TransactionReassembly>,
    /// Live `Trans2FindFirst2`/`FindNext2` iterators, keyed by the same
    /// id `searches` tracks slot occupancy for. Kept separate so the
    /// id-bookkeeping stays a plain reservation table independent of
    /// whatever the search happens to be doing right now.
    search_contexts: HashMap<SearchId, Box<dyn SearchContext>>,
}

impl VirtualCircuit {
    pub fn new(uid: Uid, client_identity: String, is_guest: bool, max_trees: u32, max_searches: u32) -> Self {
        VirtualCircuit {
            uid,
            client_identity,
            is_guest,
            trees: HashMap::new(),
            next_tid_hint: 1,
            max_trees,
            searches: HashMap::new(),
            next_search_hint: 1,
            max_searches,
            transaction: None,
            search_contexts: HashMap::new(),
        }
    }

    pub fn connect_tree(&mut self, tree: TreeConnection) -> Result<Tid> {
        let tid = allocate_id(&self.trees, &mut self.next_tid_hint, self.max_trees)
            .ok_or(Error::Status(SmbStatus::TOO_MANY_CONNECTIONS))?;
        self.trees.insert(tid, tree);
        Ok(tid)
    }

    pub fn tree(&self, tid: Tid) -> Option<&TreeConnection> {
        self.trees.get(&tid)
    }

    pub fn tree_mut(&mut self, tid: Tid) -> Option<&mut TreeConnection> {
        self.trees.get_mut(&tid)
    }

    pub fn disconnect_tree(&mut self, tid: Tid) -> Option<TreeConnection> {
        self.trees.remove(&tid)
    }

    pub fn all_tree_ids(&self) -> Vec<Tid> {
        self.trees.keys().copied().collect()
    }

    pub fn allocate_search_slot(&mut self) -> Result<SearchId> {
        let id = allocate_id(&self.searches, &mut self.next_search_hint, self.max_searches)
            .ok_or(Error::Status(SmbStatus::NO_RESOURCES))?;
        self.searches.insert(id, ());
        Ok(id)
    }

    pub fn release_search_slot(&mut self, id: SearchId) {
        self.searches.remove(&id);
        self.search_contexts.remove(&id);
    }

    /// Stores the live iterator for a just-allocated (or resumed)
    /// search slot.
    pub fn store_search_context(&mut self, id: SearchId, context: Box<dyn SearchContext>) {
        self.search_contexts.insert(id, context);
    }

    pub fn search_context_mut(&mut self, id: SearchId) -> Option<&mut Box<dyn SearchContext>> {
        self.search_contexts.get_mut(&id)
    }

    /// Removes and returns the iterator for `id`, without releasing the
    /// slot reservation itself -- used by `FindNext2` to take exclusive
    /// ownership across an `.await` point and put it back afterward.
    pub fn take_search_context(&mut self, id: SearchId) -> Option<Box<dyn SearchContext>> {
        self.search_contexts.remove(&id)
    }

    /// Begins a new multi-packet transaction, rejecting a second
    /// concurrent one per the single-slot invariant (spec §5).
    pub fn begin_transaction(&mut self, reassembly: TransactionReassembly) -> Result<()> {
        if self.transaction.is_some() {
            return Err(Error::Status(SmbStatus::SRV_NON_SPECIFIC_ERROR));
        }
        self.transaction = Some(reassembly);
        Ok(())
    }

    pub fn transaction_mut(&mut self) -> Option<&mut TransactionReassembly> {
        self.transaction.as_mut()
    }

    pub fn take_transaction(&mut self) -> Option<TransactionReassembly> {
        self.transaction.take()
    }
}

/// The per-session table of logged-on users.
pub struct VirtualCircuitTable {
    circuits: HashMap<Uid, VirtualCircuit>,
    next_hint: u16,
    max_circuits: u32,
}

impl VirtualCircuitTable {
    pub fn new(max_circuits: u32) -> Self {
        VirtualCircuitTable {
            circuits: HashMap::new(),
            next_hint: 1,
            max_circuits,
        }
    }

    /// Allocates a new UID, failing with `LOGON_FAILURE` when the
    /// session's circuit limit is reached (spec §4.5).
    pub fn allocate(&mut self, client_identity: String, is_guest: bool, max_trees: u32, max_searches: u32) -> Result<Uid> {
        let uid = allocate_id(&self.circuits, &mut self.next_hint, self.max_circuits)
            .ok_or(Error::Status(SmbStatus::LOGON_FAILURE))?;
        self.circuits
            .insert(uid, VirtualCircuit::new(uid, client_identity, is_guest, max_trees, max_searches));
        Ok(uid)
    }

    pub fn get(&self, uid: Uid) -> Option<&VirtualCircuit> {
        self.circuits.get(&uid)
    }

    pub fn get_mut(&mut self, uid: Uid) -> Option<&mut VirtualCircuit> {
        self.circuits.get_mut(&uid)
    }

    pub fn remove(&mut self, uid: Uid) -> Option<VirtualCircuit> {
        self.circuits.remove(&uid)
    }

    pub fn all_uids(&self) -> Vec<Uid> {
        self.circuits.keys().copied().collect()
    }
}
