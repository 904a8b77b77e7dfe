// Stable identities: agent signatures, trading timestamps, the frequency axis
pub mod agent_kind;

// AgentRun lifecycle tracked by the runner registry
pub mod agent_run;

// Domain-specific error types
pub mod errors;

// Market data entities (Symbol, Timestamp, Bar, IndexBar, IndexWeight)
pub mod market;

// External collaborator interfaces (LLM tool server, vendor market API)
pub mod ports;

// Position ledger entities and trade-verb semantics
pub mod position;

// Repository traits for persistence (store-backed and journal-backed)
pub mod repositories;

// Session/message entities for the per-timestamp conversation transcript
pub mod session;
