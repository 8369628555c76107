pub mod error;
pub mod forms;
pub mod handlers;
pub mod models;
pub mod orm;
pub mod router;
pub mod settings;
pub mod store;
pub mod template;

pub use handlers::build_router;
pub use models::{Cafe, NewCafe};
pub use settings::Settings;
pub use store::CafeStore;
