//! Conversation/message lifecycle engine for a shared team inbox
//!
//! Businesses receive customer messages (inbound SMS, missed calls) and a
//! team collaborates on replying. This crate owns the parts with real
//! invariants:
//!
//! - **Conversation**: the state machine `NEW -> OPEN -> RESOLVED` with
//!   reopen, and `ARCHIVED` as the terminal state.
//!
//! - **Assignment**: at most one active assignment per conversation, enforced
//!   transactionally and backed by a partial unique index.
//!
//! - **Message**: an append-only thread ordered by
//!   `(created_at, insertion_sequence)` with per-user read tracking.
//!
//! - **Notification**: event-driven fan-out to assigned and mentioned users,
//!   decoupled from the triggering write by the [`logic::EventBus`].
//!
//! Every read and write is scoped to a business (tenant); cross-tenant
//! access is an authorization error.

pub mod logic;
pub mod repository;
pub mod router;
pub mod service;
