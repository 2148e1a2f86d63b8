//! Service events and the broadcast bus that carries them

mod bus;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus};
pub use types::ServiceEvent;
