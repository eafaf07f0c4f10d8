mod cipher;
mod state;

pub use cipher::TokenCipher;
pub use state::{StateSigner, STATE_TTL_SECS};
