//! The closed set of traced state-database operations and their wire format.
//!
//! Every record is `[discriminant u8][payload]`. The discriminant values are
//! the wire contract and must never be renumbered.

use std::fmt;
use std::io::{self, Read, Write};

use sdbtrace_core::Amount;
use smallvec::SmallVec;

use crate::codec::*;
use crate::error::TraceError;

/// Number of operation kinds.
pub const NUM_OPERATIONS: usize = 48;

// ── OperationId ─────────────────────────────────────────────────

/// Discriminant of an [`Operation`].
///
/// `Lc` variants reuse the previous contract. `Lcls` variants reuse the
/// previous contract and the most recent storage key. `Lccs` variants reuse
/// the previous contract and a storage key at an explicit cache position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum OperationId {
    AddBalance = 0,
    BeginBlock = 1,
    BeginSyncPeriod = 2,
    BeginTransaction = 3,
    CreateAccount = 4,
    Commit = 5,
    Empty = 6,
    EndBlock = 7,
    EndSyncPeriod = 8,
    EndTransaction = 9,
    Exist = 10,
    Finalise = 11,
    GetBalance = 12,
    GetCodeHash = 13,
    GetCodeHashLc = 14,
    GetCode = 15,
    GetCodeSize = 16,
    GetCommittedState = 17,
    GetCommittedStateLcls = 18,
    GetNonce = 19,
    GetState = 20,
    GetStateLccs = 21,
    GetStateLc = 22,
    GetStateLcls = 23,
    HasSuicided = 24,
    RevertToSnapshot = 25,
    SetCode = 26,
    SetNonce = 27,
    SetState = 28,
    SetStateLcls = 29,
    Snapshot = 30,
    SubBalance = 31,
    Suicide = 32,
    AddAddressToAccessList = 33,
    AddressInAccessList = 34,
    AddSlotToAccessList = 35,
    PrepareAccessList = 36,
    SlotInAccessList = 37,
    AddLog = 38,
    AddPreimage = 39,
    AddRefund = 40,
    Close = 41,
    ForEachStorage = 42,
    GetLogs = 43,
    GetRefund = 44,
    IntermediateRoot = 45,
    Prepare = 46,
    SubRefund = 47,
}

impl OperationId {
    /// Every discriminant in wire order.
    pub const ALL: [OperationId; NUM_OPERATIONS] = [
        Self::AddBalance,
        Self::BeginBlock,
        Self::BeginSyncPeriod,
        Self::BeginTransaction,
        Self::CreateAccount,
        Self::Commit,
        Self::Empty,
        Self::EndBlock,
        Self::EndSyncPeriod,
        Self::EndTransaction,
        Self::Exist,
        Self::Finalise,
        Self::GetBalance,
        Self::GetCodeHash,
        Self::GetCodeHashLc,
        Self::GetCode,
        Self::GetCodeSize,
        Self::GetCommittedState,
        Self::GetCommittedStateLcls,
        Self::GetNonce,
        Self::GetState,
        Self::GetStateLccs,
        Self::GetStateLc,
        Self::GetStateLcls,
        Self::HasSuicided,
        Self::RevertToSnapshot,
        Self::SetCode,
        Self::SetNonce,
        Self::SetState,
        Self::SetStateLcls,
        Self::Snapshot,
        Self::SubBalance,
        Self::Suicide,
        Self::AddAddressToAccessList,
        Self::AddressInAccessList,
        Self::AddSlotToAccessList,
        Self::PrepareAccessList,
        Self::SlotInAccessList,
        Self::AddLog,
        Self::AddPreimage,
        Self::AddRefund,
        Self::Close,
        Self::ForEachStorage,
        Self::GetLogs,
        Self::GetRefund,
        Self::IntermediateRoot,
        Self::Prepare,
        Self::SubRefund,
    ];

    /// Look up a discriminant byte.
    pub fn from_u8(id: u8) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    /// Discriminant byte.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Position in dense per-operation tables.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Human-readable name, also used as the label in simulation models.
    pub fn label(self) -> &'static str {
        match self {
            Self::AddBalance => "AddBalance",
            Self::BeginBlock => "BeginBlock",
            Self::BeginSyncPeriod => "BeginSyncPeriod",
            Self::BeginTransaction => "BeginTransaction",
            Self::CreateAccount => "CreateAccount",
            Self::Commit => "Commit",
            Self::Empty => "Empty",
            Self::EndBlock => "EndBlock",
            Self::EndSyncPeriod => "EndSyncPeriod",
            Self::EndTransaction => "EndTransaction",
            Self::Exist => "Exist",
            Self::Finalise => "Finalise",
            Self::GetBalance => "GetBalance",
            Self::GetCodeHash => "GetCodeHash",
            Self::GetCodeHashLc => "GetCodeHashLc",
            Self::GetCode => "GetCode",
            Self::GetCodeSize => "GetCodeSize",
            Self::GetCommittedState => "GetCommittedState",
            Self::GetCommittedStateLcls => "GetCommittedStateLcls",
            Self::GetNonce => "GetNonce",
            Self::GetState => "GetState",
            Self::GetStateLccs => "GetStateLccs",
            Self::GetStateLc => "GetStateLc",
            Self::GetStateLcls => "GetStateLcls",
            Self::HasSuicided => "HasSuicided",
            Self::RevertToSnapshot => "RevertToSnapshot",
            Self::SetCode => "SetCode",
            Self::SetNonce => "SetNonce",
            Self::SetState => "SetState",
            Self::SetStateLcls => "SetStateLcls",
            Self::Snapshot => "Snapshot",
            Self::SubBalance => "SubBalance",
            Self::Suicide => "Suicide",
            Self::AddAddressToAccessList => "AddAddressToAccessList",
            Self::AddressInAccessList => "AddressInAccessList",
            Self::AddSlotToAccessList => "AddSlotToAccessList",
            Self::PrepareAccessList => "PrepareAccessList",
            Self::SlotInAccessList => "SlotInAccessList",
            Self::AddLog => "AddLog",
            Self::AddPreimage => "AddPreimage",
            Self::AddRefund => "AddRefund",
            Self::Close => "Close",
            Self::ForEachStorage => "ForEachStorage",
            Self::GetLogs => "GetLogs",
            Self::GetRefund => "GetRefund",
            Self::IntermediateRoot => "IntermediateRoot",
            Self::Prepare => "Prepare",
            Self::SubRefund => "SubRefund",
        }
    }

    /// Look up an operation by its [`label`](Self::label).
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|id| id.label() == label)
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ── Operation ───────────────────────────────────────────────────

/// Value-index list of log topics.
pub type TopicIndices = SmallVec<[u64; 4]>;

/// One traced state-database call with its operands compressed to
/// dictionary indices.
///
/// `contract` fields index the contract dictionary, `storage` fields the
/// storage-key dictionary, `value` and hash fields the value dictionary,
/// `code` fields the code dictionary.
#[derive(Clone, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Operation {
    AddBalance { contract: u32, amount: Amount },
    BeginBlock { block: u64 },
    BeginSyncPeriod { period: u64 },
    BeginTransaction { tx: u32 },
    CreateAccount { contract: u32 },
    Commit { delete_empty: bool },
    Empty { contract: u32 },
    EndBlock,
    EndSyncPeriod,
    EndTransaction,
    Exist { contract: u32 },
    Finalise { delete_empty: bool },
    GetBalance { contract: u32 },
    GetCodeHash { contract: u32 },
    GetCodeHashLc,
    GetCode { contract: u32 },
    GetCodeSize { contract: u32 },
    GetCommittedState { contract: u32, storage: u32 },
    GetCommittedStateLcls,
    GetNonce { contract: u32 },
    GetState { contract: u32, storage: u32 },
    GetStateLccs { pos: u8 },
    GetStateLc { storage: u32 },
    GetStateLcls,
    HasSuicided { contract: u32 },
    RevertToSnapshot { snapshot: i32 },
    SetCode { contract: u32, code: u32 },
    SetNonce { contract: u32, nonce: u64 },
    SetState { contract: u32, storage: u32, value: u64 },
    SetStateLcls { value: u64 },
    Snapshot { snapshot: i32 },
    SubBalance { contract: u32, amount: Amount },
    Suicide { contract: u32 },
    AddAddressToAccessList { contract: u32 },
    AddressInAccessList { contract: u32 },
    AddSlotToAccessList { contract: u32, storage: u32 },
    PrepareAccessList { sender: u32, dest: Option<u32> },
    SlotInAccessList { contract: u32, storage: u32 },
    AddLog { contract: u32, topics: TopicIndices, data: Vec<u8> },
    AddPreimage { hash: u64, preimage: Vec<u8> },
    AddRefund { gas: u64 },
    Close,
    ForEachStorage { contract: u32 },
    GetLogs { tx_hash: u64, block_hash: u64 },
    GetRefund,
    IntermediateRoot { delete_empty: bool },
    Prepare { tx_hash: u64, tx_index: i32 },
    SubRefund { gas: u64 },
}

impl Operation {
    /// Discriminant of this operation.
    pub fn id(&self) -> OperationId {
        use OperationId as Id;
        match self {
            Self::AddBalance { .. } => Id::AddBalance,
            Self::BeginBlock { .. } => Id::BeginBlock,
            Self::BeginSyncPeriod { .. } => Id::BeginSyncPeriod,
            Self::BeginTransaction { .. } => Id::BeginTransaction,
            Self::CreateAccount { .. } => Id::CreateAccount,
            Self::Commit { .. } => Id::Commit,
            Self::Empty { .. } => Id::Empty,
            Self::EndBlock => Id::EndBlock,
            Self::EndSyncPeriod => Id::EndSyncPeriod,
            Self::EndTransaction => Id::EndTransaction,
            Self::Exist { .. } => Id::Exist,
            Self::Finalise { .. } => Id::Finalise,
            Self::GetBalance { .. } => Id::GetBalance,
            Self::GetCodeHash { .. } => Id::GetCodeHash,
            Self::GetCodeHashLc => Id::GetCodeHashLc,
            Self::GetCode { .. } => Id::GetCode,
            Self::GetCodeSize { .. } => Id::GetCodeSize,
            Self::GetCommittedState { .. } => Id::GetCommittedState,
            Self::GetCommittedStateLcls => Id::GetCommittedStateLcls,
            Self::GetNonce { .. } => Id::GetNonce,
            Self::GetState { .. } => Id::GetState,
            Self::GetStateLccs { .. } => Id::GetStateLccs,
            Self::GetStateLc { .. } => Id::GetStateLc,
            Self::GetStateLcls => Id::GetStateLcls,
            Self::HasSuicided { .. } => Id::HasSuicided,
            Self::RevertToSnapshot { .. } => Id::RevertToSnapshot,
            Self::SetCode { .. } => Id::SetCode,
            Self::SetNonce { .. } => Id::SetNonce,
            Self::SetState { .. } => Id::SetState,
            Self::SetStateLcls { .. } => Id::SetStateLcls,
            Self::Snapshot { .. } => Id::Snapshot,
            Self::SubBalance { .. } => Id::SubBalance,
            Self::Suicide { .. } => Id::Suicide,
            Self::AddAddressToAccessList { .. } => Id::AddAddressToAccessList,
            Self::AddressInAccessList { .. } => Id::AddressInAccessList,
            Self::AddSlotToAccessList { .. } => Id::AddSlotToAccessList,
            Self::PrepareAccessList { .. } => Id::PrepareAccessList,
            Self::SlotInAccessList { .. } => Id::SlotInAccessList,
            Self::AddLog { .. } => Id::AddLog,
            Self::AddPreimage { .. } => Id::AddPreimage,
            Self::AddRefund { .. } => Id::AddRefund,
            Self::Close => Id::Close,
            Self::ForEachStorage { .. } => Id::ForEachStorage,
            Self::GetLogs { .. } => Id::GetLogs,
            Self::GetRefund => Id::GetRefund,
            Self::IntermediateRoot { .. } => Id::IntermediateRoot,
            Self::Prepare { .. } => Id::Prepare,
            Self::SubRefund { .. } => Id::SubRefund,
        }
    }

    // ── Encode ──────────────────────────────────────────────────

    /// Write the payload (without discriminant).
    pub fn write(&self, w: &mut dyn Write) -> Result<(), TraceError> {
        match self {
            Self::AddBalance { contract, amount } | Self::SubBalance { contract, amount } => {
                write_u32_le(w, *contract)?;
                write_amount(w, *amount)
            }
            Self::BeginBlock { block } => write_u64_le(w, *block),
            Self::BeginSyncPeriod { period } => write_u64_le(w, *period),
            Self::BeginTransaction { tx } => write_u32_le(w, *tx),
            Self::Commit { delete_empty }
            | Self::Finalise { delete_empty }
            | Self::IntermediateRoot { delete_empty } => write_bool(w, *delete_empty),
            Self::CreateAccount { contract }
            | Self::Empty { contract }
            | Self::Exist { contract }
            | Self::GetBalance { contract }
            | Self::GetCodeHash { contract }
            | Self::GetCode { contract }
            | Self::GetCodeSize { contract }
            | Self::GetNonce { contract }
            | Self::HasSuicided { contract }
            | Self::Suicide { contract }
            | Self::AddAddressToAccessList { contract }
            | Self::AddressInAccessList { contract }
            | Self::ForEachStorage { contract } => write_u32_le(w, *contract),
            Self::GetCommittedState { contract, storage }
            | Self::GetState { contract, storage }
            | Self::AddSlotToAccessList { contract, storage }
            | Self::SlotInAccessList { contract, storage } => {
                write_u32_le(w, *contract)?;
                write_u32_le(w, *storage)
            }
            Self::GetStateLccs { pos } => write_u8(w, *pos),
            Self::GetStateLc { storage } => write_u32_le(w, *storage),
            Self::RevertToSnapshot { snapshot } | Self::Snapshot { snapshot } => {
                write_i32_le(w, *snapshot)
            }
            Self::SetCode { contract, code } => {
                write_u32_le(w, *contract)?;
                write_u32_le(w, *code)
            }
            Self::SetNonce { contract, nonce } => {
                write_u32_le(w, *contract)?;
                write_u64_le(w, *nonce)
            }
            Self::SetState {
                contract,
                storage,
                value,
            } => {
                write_u32_le(w, *contract)?;
                write_u32_le(w, *storage)?;
                write_u64_le(w, *value)
            }
            Self::SetStateLcls { value } => write_u64_le(w, *value),
            Self::PrepareAccessList { sender, dest } => {
                write_u32_le(w, *sender)?;
                // Presence flag + value for the optional destination
                match dest {
                    Some(dest) => {
                        write_u8(w, 1)?;
                        write_u32_le(w, *dest)
                    }
                    None => write_u8(w, 0),
                }
            }
            Self::AddLog {
                contract,
                topics,
                data,
            } => {
                write_u32_le(w, *contract)?;
                write_length(w, topics.len())?;
                for topic in topics {
                    write_u64_le(w, *topic)?;
                }
                write_length_prefixed_bytes(w, data)
            }
            Self::AddPreimage { hash, preimage } => {
                write_u64_le(w, *hash)?;
                write_length_prefixed_bytes(w, preimage)
            }
            Self::AddRefund { gas } | Self::SubRefund { gas } => write_u64_le(w, *gas),
            Self::GetLogs {
                tx_hash,
                block_hash,
            } => {
                write_u64_le(w, *tx_hash)?;
                write_u64_le(w, *block_hash)
            }
            Self::Prepare { tx_hash, tx_index } => {
                write_u64_le(w, *tx_hash)?;
                write_i32_le(w, *tx_index)
            }
            Self::EndBlock
            | Self::EndSyncPeriod
            | Self::EndTransaction
            | Self::GetCodeHashLc
            | Self::GetCommittedStateLcls
            | Self::GetStateLcls
            | Self::Close
            | Self::GetRefund => Ok(()),
        }
    }

    /// Write the discriminant byte followed by the payload.
    pub fn write_tagged(&self, w: &mut dyn Write) -> Result<(), TraceError> {
        write_u8(w, self.id().as_u8())?;
        self.write(w)
    }

    // ── Decode ──────────────────────────────────────────────────

    /// Decode the payload of an operation whose discriminant is `id`.
    pub fn read(id: u8, r: &mut dyn Read) -> Result<Self, TraceError> {
        let decoder = DECODERS
            .get(id as usize)
            .ok_or(TraceError::UnknownOperation { id })?;
        let op = decoder(r).map_err(|e| match e {
            TraceError::Io(io) if io.kind() == io::ErrorKind::UnexpectedEof => {
                TraceError::MalformedRecord {
                    detail: format!("truncated payload for discriminant {id}"),
                }
            }
            other => other,
        })?;
        let found = op.id().as_u8();
        if found != id {
            return Err(TraceError::DiscriminantMismatch {
                expected: id,
                found,
            });
        }
        Ok(op)
    }

    /// Read one `[discriminant][payload]` record.
    ///
    /// Returns `Ok(None)` on clean EOF, `Ok(Some(op))` on success, or an
    /// error on truncated or corrupt data.
    pub fn read_tagged(r: &mut dyn Read) -> Result<Option<Self>, TraceError> {
        match read_tag(r)? {
            Some(id) => Self::read(id, r).map(Some),
            None => Ok(None),
        }
    }
}

// ── Decoder table ───────────────────────────────────────────────

type Decoder = fn(&mut dyn Read) -> Result<Operation, TraceError>;

/// Payload decoders indexed by discriminant.
static DECODERS: [Decoder; NUM_OPERATIONS] = [
    |r| {
        Ok(Operation::AddBalance {
            contract: read_u32_le(r)?,
            amount: read_amount(r)?,
        })
    },
    |r| Ok(Operation::BeginBlock { block: read_u64_le(r)? }),
    |r| Ok(Operation::BeginSyncPeriod { period: read_u64_le(r)? }),
    |r| Ok(Operation::BeginTransaction { tx: read_u32_le(r)? }),
    |r| Ok(Operation::CreateAccount { contract: read_u32_le(r)? }),
    |r| Ok(Operation::Commit { delete_empty: read_bool(r)? }),
    |r| Ok(Operation::Empty { contract: read_u32_le(r)? }),
    |_| Ok(Operation::EndBlock),
    |_| Ok(Operation::EndSyncPeriod),
    |_| Ok(Operation::EndTransaction),
    |r| Ok(Operation::Exist { contract: read_u32_le(r)? }),
    |r| Ok(Operation::Finalise { delete_empty: read_bool(r)? }),
    |r| Ok(Operation::GetBalance { contract: read_u32_le(r)? }),
    |r| Ok(Operation::GetCodeHash { contract: read_u32_le(r)? }),
    |_| Ok(Operation::GetCodeHashLc),
    |r| Ok(Operation::GetCode { contract: read_u32_le(r)? }),
    |r| Ok(Operation::GetCodeSize { contract: read_u32_le(r)? }),
    |r| {
        Ok(Operation::GetCommittedState {
            contract: read_u32_le(r)?,
            storage: read_u32_le(r)?,
        })
    },
    |_| Ok(Operation::GetCommittedStateLcls),
    |r| Ok(Operation::GetNonce { contract: read_u32_le(r)? }),
    |r| {
        Ok(Operation::GetState {
            contract: read_u32_le(r)?,
            storage: read_u32_le(r)?,
        })
    },
    |r| Ok(Operation::GetStateLccs { pos: read_u8(r)? }),
    |r| Ok(Operation::GetStateLc { storage: read_u32_le(r)? }),
    |_| Ok(Operation::GetStateLcls),
    |r| Ok(Operation::HasSuicided { contract: read_u32_le(r)? }),
    |r| Ok(Operation::RevertToSnapshot { snapshot: read_i32_le(r)? }),
    |r| {
        Ok(Operation::SetCode {
            contract: read_u32_le(r)?,
            code: read_u32_le(r)?,
        })
    },
    |r| {
        Ok(Operation::SetNonce {
            contract: read_u32_le(r)?,
            nonce: read_u64_le(r)?,
        })
    },
    |r| {
        Ok(Operation::SetState {
            contract: read_u32_le(r)?,
            storage: read_u32_le(r)?,
            value: read_u64_le(r)?,
        })
    },
    |r| Ok(Operation::SetStateLcls { value: read_u64_le(r)? }),
    |r| Ok(Operation::Snapshot { snapshot: read_i32_le(r)? }),
    |r| {
        Ok(Operation::SubBalance {
            contract: read_u32_le(r)?,
            amount: read_amount(r)?,
        })
    },
    |r| Ok(Operation::Suicide { contract: read_u32_le(r)? }),
    |r| Ok(Operation::AddAddressToAccessList { contract: read_u32_le(r)? }),
    |r| Ok(Operation::AddressInAccessList { contract: read_u32_le(r)? }),
    |r| {
        Ok(Operation::AddSlotToAccessList {
            contract: read_u32_le(r)?,
            storage: read_u32_le(r)?,
        })
    },
    |r| {
        let sender = read_u32_le(r)?;
        // Read optional destination (presence flag + value)
        let dest = match read_u8(r)? {
            0 => None,
            1 => Some(read_u32_le(r)?),
            flag => {
                return Err(TraceError::MalformedRecord {
                    detail: format!("invalid access-list destination flag: {flag}"),
                })
            }
        };
        Ok(Operation::PrepareAccessList { sender, dest })
    },
    |r| {
        Ok(Operation::SlotInAccessList {
            contract: read_u32_le(r)?,
            storage: read_u32_le(r)?,
        })
    },
    |r| {
        let contract = read_u32_le(r)?;
        let count = read_u32_le(r)? as usize;
        let mut topics = TopicIndices::new();
        for _ in 0..count {
            topics.push(read_u64_le(r)?);
        }
        let data = read_length_prefixed_bytes(r)?;
        Ok(Operation::AddLog {
            contract,
            topics,
            data,
        })
    },
    |r| {
        Ok(Operation::AddPreimage {
            hash: read_u64_le(r)?,
            preimage: read_length_prefixed_bytes(r)?,
        })
    },
    |r| Ok(Operation::AddRefund { gas: read_u64_le(r)? }),
    |_| Ok(Operation::Close),
    |r| Ok(Operation::ForEachStorage { contract: read_u32_le(r)? }),
    |r| {
        Ok(Operation::GetLogs {
            tx_hash: read_u64_le(r)?,
            block_hash: read_u64_le(r)?,
        })
    },
    |_| Ok(Operation::GetRefund),
    |r| Ok(Operation::IntermediateRoot { delete_empty: read_bool(r)? }),
    |r| {
        Ok(Operation::Prepare {
            tx_hash: read_u64_le(r)?,
            tx_index: read_i32_le(r)?,
        })
    },
    |r| Ok(Operation::SubRefund { gas: read_u64_le(r)? }),
];
