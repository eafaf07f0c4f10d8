mod ebay;
mod traits;

pub use ebay::EbayProvider;
pub use traits::{IdentityProvider, TokenSet};
