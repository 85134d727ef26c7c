mod awareness;
mod dispatcher;
mod endpoint;
mod member_map;
mod pb_store;
mod probe;
mod probe_order;
mod recent_event_queue;
mod swim;
pub(crate) mod transport;

mod types;

#[cfg(test)]
mod testing;
#[cfg(test)]
mod tests;

pub use awareness::{Awareness, LocalHealth};
pub use dispatcher::MessageDispatcher;
pub use endpoint::{MessageEndpoint, MessageHandler};
pub use member_map::MemberMap;
pub use pb_store::PriorityPBStore;
pub use probe::{ProbeEngine, ProbeOutcome};
pub use swim::Swim;
pub use transport::{Transport, UdpTransport};
pub use types::member::*;
pub use types::messages::*;

pub(crate) const BINCODE_CONFIG: bincode::config::Configuration = bincode::config::standard();
