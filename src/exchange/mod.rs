pub mod info;
pub mod relay;

pub use info::{HttpInfoClient, InfoClient};
pub use relay::{OrderGateway, SignerRelay};
