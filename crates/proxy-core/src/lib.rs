pub mod chains;
pub mod dates;
pub mod types;

pub use chains::{ChainMaps, UsdtAddress};
pub use types::{PriceResult, Source};
