pub mod credentials;
pub mod events;
pub mod history;
pub mod store;
pub mod usage;
pub mod wire;
