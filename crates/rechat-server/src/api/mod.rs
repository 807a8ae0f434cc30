pub mod conversations;
pub mod generate;
pub mod response;
pub mod state;
pub mod stream;

pub use state::AppState;
