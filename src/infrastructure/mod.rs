// Relational store + line-delimited journal adapters (C1, C2 storage layer).
pub mod persistence;

// Market/position journal files, the fallback path for C1 and the durable
// mirror for C2.
pub mod journal;

// Vendor market API adapter consumed by the ingestor (C4).
pub mod vendor;

// Scripted LLM tool server used where no real collaborator is wired in.
pub mod llm;
