//! The broadcast relay core.
//!
//! # Architecture
//!
//! ```text
//!                           Arc<Caster>
//!                  ┌──────────────────────────────┐
//!                  │ mounts: HashMap<path,        │
//!                  │   Arc<Mountpoint> {          │
//!                  │     source,                  │
//!                  │     subscribers: HashMap<id, │
//!                  │       Arc<Connection>>       │
//!                  │   }                          │
//!                  │ >                            │
//!                  └──────────────┬───────────────┘
//!                                 │
//!     POST body ──► source conduit ──► relay loop ──┬──► subscriber conduit ──► GET body
//!                                                   ├──► subscriber conduit ──► GET body
//!                                                   └──► subscriber conduit ──► GET body
//! ```
//!
//! Every chunk is a `bytes::Bytes`, so fan-out clones a reference count rather
//! than the payload.

pub mod caster;
pub mod connection;
pub mod mountpoint;

pub use caster::{Caster, DEFAULT_TIMEOUT};
pub use connection::{
    Chunk, Connection, ConnectionId, RequestInfo, DEFAULT_CONDUIT_CAPACITY, NTRIP_VERSION,
};
pub use mountpoint::Mountpoint;
