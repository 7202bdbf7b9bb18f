//! The data heap: a fixed-capacity slab of uniform entries.
//!
//! Every runtime value, objects visible to scripts and the support
//! records behind them alike, lives in one [`Entry`] slot addressed by its
//! [`HeapId`]. Entries never hold references to each other, only 28-bit
//! indices, so the whole machine state is a plain serializable block.
//! Slot 0 is reserved for the `None` singleton; a zero index therefore
//! doubles as "null" in link fields, which always use `Option<HeapId>`
//! here, while value fields use a bare `HeapId` where 0 means `None`.
//!
//! The allocator is a LIFO free list threaded through the `Free` entries
//! themselves. A low-water mark records the smallest free count ever
//! observed so hosts can size the heap for their workload.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use crate::result::{EngineResult, RunResult};

/// Number of bytes one heap entry occupies in the wire layout.
///
/// Hosts hand the engine a data size in bytes; capacity in entries is
/// `data_size / DATA_ENTRY_SIZE`.
pub const DATA_ENTRY_SIZE: usize = 16;

/// Inline capacity of one string fragment.
pub(crate) const FRAGMENT_CAPACITY: usize = 14;

/// Index of an entry within the data heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HeapId(u32);

impl HeapId {
    /// The `None` singleton, always at slot 0.
    pub const NONE: Self = Self(0);

    #[inline]
    pub(crate) fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the raw slot index.
    #[inline]
    #[must_use]
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Entry kind tags, with their wire values.
///
/// Kinds at or below the object mask (0x3F) are script-visible objects
/// and carry a use count; the rest are internal support records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, IntoStaticStr)]
#[repr(u8)]
pub enum DataKind {
    None = 0x00,
    Ellipsis = 0x01,
    Boolean = 0x02,
    Integer = 0x03,
    Float = 0x04,
    Range = 0x07,
    String = 0x08,
    Tuple = 0x09,
    List = 0x0A,
    Set = 0x0B,
    Dictionary = 0x0D,
    Iterator = 0x0E,
    Function = 0x0F,
    Module = 0x10,
    Type = 0x1F,
    CodeAddress = 0x40,
    StackEntry = 0x50,
    Frame = 0x52,
    Element = 0x62,
    StringFragment = 0x64,
    KeyValuePair = 0x66,
    Namespace = 0x70,
    SetNode = 0x74,
    DictionaryNode = 0x78,
    NamespaceNode = 0x7C,
    TreeLinks = 0x7D,
    Parameter = 0x80,
    ParameterList = 0x81,
    Argument = 0x82,
    ArgumentList = 0x83,
    Free = 0xFF,
}

const OBJECT_KIND_MASK: u8 = 0x3F;

impl DataKind {
    /// Returns true for script-visible, reference-counted kinds.
    #[inline]
    #[must_use]
    pub fn is_object(self) -> bool {
        (self as u8) & !OBJECT_KIND_MASK == 0
    }

    /// Kinds that own no other entries and can be freed directly.
    #[inline]
    pub(crate) fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::None
                | Self::Ellipsis
                | Self::Boolean
                | Self::Integer
                | Self::Float
                | Self::Type
                | Self::CodeAddress
                | Self::StringFragment
        )
    }

    /// Stable name used in [`HeapStats`] breakdowns.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// Header of a linked sequence container (head, tail, count).
///
/// For strings the count is the total byte length, not the fragment
/// count; everywhere else an element counts as 1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Sequence {
    pub count: u32,
    pub head: Option<HeapId>,
    pub tail: Option<HeapId>,
}

/// Header of a keyed tree container (root, count).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Tree {
    pub count: u32,
    pub root: Option<HeapId>,
}

/// Up to [`FRAGMENT_CAPACITY`] string bytes stored inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Fragment {
    len: u8,
    bytes: [u8; FRAGMENT_CAPACITY],
}

impl Fragment {
    pub fn new(data: &[u8]) -> Self {
        debug_assert!(data.len() <= FRAGMENT_CAPACITY);
        let mut bytes = [0u8; FRAGMENT_CAPACITY];
        bytes[..data.len()].copy_from_slice(data);
        Self {
            len: data.len() as u8,
            bytes,
        }
    }

    #[inline]
    pub fn len(&self) -> u8 {
        self.len
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..usize::from(self.len)]
    }

    /// Remaining inline capacity in bytes.
    #[inline]
    pub fn room(&self) -> usize {
        FRAGMENT_CAPACITY - usize::from(self.len)
    }

    /// Appends bytes, which must fit.
    pub fn push(&mut self, data: &[u8]) {
        debug_assert!(data.len() <= self.room());
        let start = usize::from(self.len);
        self.bytes[start..start + data.len()].copy_from_slice(data);
        self.len += data.len() as u8;
    }
}

/// A script or application function target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum FunctionTarget {
    /// A script function entered at a code address.
    Script { code_address: u32 },
    /// An application function dispatched to the host by symbol.
    App { symbol: i32 },
}

/// Group flavor of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum ParameterGroup {
    None,
    /// Absorbs extra positional arguments into a tuple.
    Tuple,
    /// Absorbs extra named arguments into a dictionary.
    Dictionary,
}

/// Payload of one heap entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum EntryData {
    /// A free slot, linked into the allocator's free list.
    Free { next: u32 },

    /* Object kinds. */
    None,
    Ellipsis,
    Boolean(bool),
    Integer(i32),
    Float(f64),
    Range {
        start: Option<HeapId>,
        end: Option<HeapId>,
        step: Option<HeapId>,
    },
    String(Sequence),
    Tuple(Sequence),
    List(Sequence),
    Set(Tree),
    Dictionary(Tree),
    Iterator {
        iterable: HeapId,
        member: Option<HeapId>,
        /// Byte offset within the current string fragment.
        string_index: u8,
        /// True when the member is owned by the iterator (range values).
        needs_cleanup: bool,
    },
    Function {
        target: FunctionTarget,
        module: HeapId,
        parameters: HeapId,
    },
    Module {
        code_address: u32,
        namespace: HeapId,
        is_loaded: bool,
    },
    Type(DataKind),

    /* Support kinds. */
    CodeAddress(u32),
    StackEntry {
        previous: Option<HeapId>,
        value: HeapId,
        value2: Option<HeapId>,
        flag: bool,
    },
    Frame {
        return_address: u32,
        module: HeapId,
        local_namespace: HeapId,
    },
    Element {
        previous: Option<HeapId>,
        next: Option<HeapId>,
        value: HeapId,
    },
    StringFragment(Fragment),
    KeyValuePair {
        key: HeapId,
        value: HeapId,
    },
    Namespace(Tree),
    SetNode {
        key: HeapId,
        parent: Option<HeapId>,
        left: Option<HeapId>,
        right: Option<HeapId>,
        is_black: bool,
    },
    DictionaryNode {
        key: HeapId,
        parent: Option<HeapId>,
        links: Option<HeapId>,
        value: HeapId,
        is_black: bool,
    },
    NamespaceNode {
        symbol: i32,
        parent: Option<HeapId>,
        links: Option<HeapId>,
        value: HeapId,
        is_global: bool,
        is_local: bool,
        is_black: bool,
    },
    /// Left/right child pair lifted out of dictionary and namespace nodes.
    TreeLinks {
        left: Option<HeapId>,
        right: Option<HeapId>,
    },
    Parameter {
        symbol: i32,
        default: Option<HeapId>,
        group: ParameterGroup,
    },
    ParameterList(Sequence),
    Argument {
        symbol: i32,
        has_name: bool,
        is_group: bool,
        value: HeapId,
    },
    ArgumentList(Sequence),
}

impl EntryData {
    /// Returns the kind tag for this payload.
    pub fn kind(&self) -> DataKind {
        match self {
            Self::Free { .. } => DataKind::Free,
            Self::None => DataKind::None,
            Self::Ellipsis => DataKind::Ellipsis,
            Self::Boolean(_) => DataKind::Boolean,
            Self::Integer(_) => DataKind::Integer,
            Self::Float(_) => DataKind::Float,
            Self::Range { .. } => DataKind::Range,
            Self::String(_) => DataKind::String,
            Self::Tuple(_) => DataKind::Tuple,
            Self::List(_) => DataKind::List,
            Self::Set(_) => DataKind::Set,
            Self::Dictionary(_) => DataKind::Dictionary,
            Self::Iterator { .. } => DataKind::Iterator,
            Self::Function { .. } => DataKind::Function,
            Self::Module { .. } => DataKind::Module,
            Self::Type(_) => DataKind::Type,
            Self::CodeAddress(_) => DataKind::CodeAddress,
            Self::StackEntry { .. } => DataKind::StackEntry,
            Self::Frame { .. } => DataKind::Frame,
            Self::Element { .. } => DataKind::Element,
            Self::StringFragment(_) => DataKind::StringFragment,
            Self::KeyValuePair { .. } => DataKind::KeyValuePair,
            Self::Namespace(_) => DataKind::Namespace,
            Self::SetNode { .. } => DataKind::SetNode,
            Self::DictionaryNode { .. } => DataKind::DictionaryNode,
            Self::NamespaceNode { .. } => DataKind::NamespaceNode,
            Self::TreeLinks { .. } => DataKind::TreeLinks,
            Self::Parameter { .. } => DataKind::Parameter,
            Self::ParameterList(_) => DataKind::ParameterList,
            Self::Argument { .. } => DataKind::Argument,
            Self::ArgumentList(_) => DataKind::ArgumentList,
        }
    }

    #[inline]
    pub fn is_object(&self) -> bool {
        self.kind().is_object()
    }

    /// Sequence header, for the five sequence-shaped kinds.
    pub fn as_sequence(&self) -> Option<&Sequence> {
        match self {
            Self::String(s) | Self::Tuple(s) | Self::List(s) | Self::ParameterList(s) | Self::ArgumentList(s) => {
                Some(s)
            }
            _ => None,
        }
    }

    pub fn as_sequence_mut(&mut self) -> Option<&mut Sequence> {
        match self {
            Self::String(s) | Self::Tuple(s) | Self::List(s) | Self::ParameterList(s) | Self::ArgumentList(s) => {
                Some(s)
            }
            _ => None,
        }
    }

    /// Tree header, for the three tree-shaped kinds.
    pub fn as_tree(&self) -> Option<&Tree> {
        match self {
            Self::Set(t) | Self::Dictionary(t) | Self::Namespace(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_tree_mut(&mut self) -> Option<&mut Tree> {
        match self {
            Self::Set(t) | Self::Dictionary(t) | Self::Namespace(t) => Some(t),
            _ => None,
        }
    }
}

/// One uniform heap slot: a use count plus the typed payload.
///
/// The use count is meaningful only for object kinds; support kinds are
/// single-owner and freed on their first release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Entry {
    pub use_count: u32,
    pub data: EntryData,
}

/// Census of the heap at a point in time.
///
/// `entries_by_kind` maps kind names to live-entry counts; keys are the
/// stable kind names, so snapshots compare and display deterministically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapStats {
    /// Live (non-free) entries.
    pub live_entries: usize,
    /// Entries currently on the free list.
    pub free_entries: usize,
    /// Total heap capacity in entries.
    pub capacity: usize,
    /// Minimum free count ever observed since the last reset.
    pub low_free_entries: usize,
    /// Breakdown of live entries by kind name.
    pub entries_by_kind: BTreeMap<&'static str, usize>,
}

/// The fixed-capacity entry slab and its free-list allocator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Heap {
    entries: Vec<Entry>,
    free_head: u32,
    free_count: u32,
    low_free_count: u32,
}

impl Heap {
    /// Creates a heap of `capacity` entries, all free.
    pub fn new(capacity: u32) -> Self {
        let mut heap = Self {
            entries: Vec::new(),
            free_head: 0,
            free_count: 0,
            low_free_count: 0,
        };
        heap.entries = (0..capacity)
            .map(|i| Entry {
                use_count: 0,
                data: EntryData::Free {
                    next: if i + 1 < capacity { i + 1 } else { 0 },
                },
            })
            .collect();
        heap.free_head = 0;
        heap.free_count = capacity;
        heap.low_free_count = capacity;
        heap
    }

    /// Resets every slot to free and relinks the free list.
    pub fn clear(&mut self) {
        let capacity = self.entries.len() as u32;
        for (i, entry) in self.entries.iter_mut().enumerate() {
            let i = i as u32;
            entry.use_count = 0;
            entry.data = EntryData::Free {
                next: if i + 1 < capacity { i + 1 } else { 0 },
            };
        }
        self.free_head = 0;
        self.free_count = capacity;
        self.low_free_count = capacity;
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.entries.len() as u32
    }

    #[inline]
    pub fn free_count(&self) -> u32 {
        self.free_count
    }

    #[inline]
    pub fn low_free_count(&self) -> u32 {
        self.low_free_count
    }

    /// Takes the head of the free list and initializes it with `data`.
    ///
    /// Object kinds start with a use count of 1, support kinds with 0.
    pub fn alloc(&mut self, data: EntryData) -> EngineResult<HeapId> {
        if self.free_count == 0 {
            return Err(RunResult::OutOfDataMemory);
        }
        let index = self.free_head;
        let entry = &mut self.entries[index as usize];
        let EntryData::Free { next } = entry.data else {
            return Err(RunResult::InternalError);
        };
        entry.use_count = u32::from(data.is_object());
        entry.data = data;
        self.free_head = next;
        self.free_count -= 1;
        if self.free_count < self.low_free_count {
            self.low_free_count = self.free_count;
        }
        Ok(HeapId::new(index))
    }

    /// Returns a live entry's slot to the free list.
    ///
    /// Freeing slot 0 or an already-free entry is an internal error.
    pub fn free(&mut self, id: HeapId) -> EngineResult<()> {
        let index = id.index();
        if index == 0 || index >= self.capacity() {
            return Err(RunResult::InternalError);
        }
        let entry = &mut self.entries[index as usize];
        if matches!(entry.data, EntryData::Free { .. }) {
            return Err(RunResult::InternalError);
        }
        entry.use_count = 0;
        entry.data = EntryData::Free { next: self.free_head };
        self.free_head = index;
        self.free_count += 1;
        Ok(())
    }

    /// Returns the entry at `id`.
    ///
    /// # Panics
    /// Panics when the index is out of range; ids are only minted by
    /// [`Heap::alloc`], so a bad index is a bug.
    #[inline]
    pub fn entry(&self, id: HeapId) -> &Entry {
        &self.entries[id.index() as usize]
    }

    #[inline]
    pub fn entry_mut(&mut self, id: HeapId) -> &mut Entry {
        &mut self.entries[id.index() as usize]
    }

    #[inline]
    pub fn data(&self, id: HeapId) -> &EntryData {
        &self.entry(id).data
    }

    #[inline]
    pub fn data_mut(&mut self, id: HeapId) -> &mut EntryData {
        &mut self.entry_mut(id).data
    }

    #[inline]
    pub fn kind(&self, id: HeapId) -> DataKind {
        self.data(id).kind()
    }

    #[inline]
    pub fn use_count(&self, id: HeapId) -> u32 {
        self.entry(id).use_count
    }

    /// Builds the per-kind census of live entries.
    pub fn stats(&self) -> HeapStats {
        let mut entries_by_kind: BTreeMap<&'static str, usize> = BTreeMap::new();
        let mut live = 0usize;
        for entry in &self.entries {
            let kind = entry.data.kind();
            if kind == DataKind::Free {
                continue;
            }
            live += 1;
            *entries_by_kind.entry(kind.name()).or_insert(0) += 1;
        }
        HeapStats {
            live_entries: live,
            free_entries: self.free_count as usize,
            capacity: self.entries.len(),
            low_free_entries: self.low_free_count as usize,
            entries_by_kind,
        }
    }

    /// Renders a short human-readable description of an entry.
    ///
    /// Used by tracers; not part of any script-visible behavior.
    pub fn describe(&self, id: HeapId) -> String {
        match self.data(id) {
            EntryData::Free { .. } => "free".to_string(),
            EntryData::None => "None".to_string(),
            EntryData::Ellipsis => "...".to_string(),
            EntryData::Boolean(b) => b.to_string(),
            EntryData::Integer(i) => i.to_string(),
            EntryData::Float(v) => {
                let mut buffer = ryu::Buffer::new();
                buffer.format(*v).to_string()
            }
            EntryData::Range { .. } => "range".to_string(),
            EntryData::String(s) => format!("str[{len}]", len = s.count),
            EntryData::Tuple(s) => format!("tuple[{len}]", len = s.count),
            EntryData::List(s) => format!("list[{len}]", len = s.count),
            EntryData::Set(t) => format!("set[{len}]", len = t.count),
            EntryData::Dictionary(t) => format!("dict[{len}]", len = t.count),
            other => other.kind().name().to_string(),
        }
    }
}
