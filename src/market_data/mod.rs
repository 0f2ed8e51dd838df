pub mod book;
pub mod broadcast;
pub mod feed;
pub mod fetcher;
pub mod price_cache;

pub use broadcast::Broadcaster;
pub use feed::{spawn_supervisor, FeedControl, FeedCoordinator};
pub use fetcher::MarketDataFetcher;
pub use price_cache::PriceCache;
