//! # Linkium
//!
//! Pairing-code rendezvous relay. A receiving device registers under a short
//! numeric code; a sending device links by presenting that code; from then on
//! the relay forwards newline-delimited JSON payloads between the two without
//! interpreting them.
//!
//! ## Key Modules
//! * `network` – Wire envelopes, pairing registry, relay router, connection
//!   sessions, the TCP listener and a client used by the other binaries.
//! * `agent` – Receiver-side reconnecting agent and its collaborators (code
//!   store, code generator, program catalog, process executor).
//! * `audit` – Best-effort persistence of registrations, links and relayed
//!   payloads.
//! * `config` – TOML configuration with defaults for every field.
//! * `events` – Structured logging/events dispatcher (console + JSON lines).

pub mod agent;
pub mod audit;
pub mod config;
pub mod constants;
pub mod events;
pub mod network;
