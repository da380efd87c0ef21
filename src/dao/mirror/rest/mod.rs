mod config;
mod error;
mod store;

pub use config::RestMirrorConfig;
pub use error::RestMirrorError;
pub use store::RestMirror;
