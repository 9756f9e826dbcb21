//! Gathers local ICE candidates: host candidates bound on every usable interface address,
//! optionally rewritten or extended through static 1:1 NAT mappings.

mod agent;
mod candidate;
mod config;
mod enumerator;
mod event;
mod id;
mod nat;
pub mod network;
mod port;
mod process;

pub use agent::Agent;
pub use agent::AgentError;
pub use agent::GatherError;
pub use agent::GatheringState;
pub use candidate::Candidate;
pub use candidate::CandidateKind;
pub use candidate::SocketHandle;
pub use config::AgentConfig;
pub use config::ConfigError;
pub use config::InterfaceFilter;
pub use config::DEFAULT_LOG_TARGET;
pub use event::CandidateEvent;
pub use event::CandidateStream;
pub use id::IdGenerator;
pub use nat::Nat1To1CandidateType;
pub use nat::Nat1To1ConfigError;
pub use nat::Nat1To1Mapping;
pub use port::ListenError;
