pub mod amount;
pub mod config;
pub mod csv;
pub mod engine;
pub mod model;
pub mod store;

pub use amount::Amount;
pub use config::{BonusSettings, SettingsRegistry};
pub use engine::{Engine, Member, Placement};
pub use model::{BonusId, Command, MemberId, Status};
pub use store::{InMemoryStore, TreeStore};
