//! A pool of gifs pulled from several web feeds, with view history and
//! favorites that stay consistent across every window sharing the store.

pub mod aggregator;
pub mod bus;
pub mod cloud;
pub mod config;
mod error;
pub mod favorites;
pub mod feed;
mod gif;
mod http;
mod pool;
pub mod retention;
pub mod selection;
pub mod settings;
pub mod store;
#[cfg(test)]
mod testing;

pub use bus::{Bus, Envelope, Event, ExternalPort, LocalChannel, NullPort};
pub use cloud::{CloudFavorites, CloudMap, FileCloud, MemoryCloud};
pub use config::{EngineConfig, Endpoints};
pub use error::{GifError, Result};
pub use favorites::SyncReport;
pub use feed::{Feed, FeedRegistry};
pub use gif::{Gif, ID_SEPARATOR, gif_id, index, now_ms, split_id};
pub use http::http_client;
pub use pool::GifPool;
pub use settings::Settings;
pub use store::GifStore;
