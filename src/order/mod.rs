pub mod desk;
pub mod sizer;

pub use desk::{OrderDesk, OrderRequest};
pub use sizer::PreparedOrder;
