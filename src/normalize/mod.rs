mod description;
mod normalizer;
mod shape;
mod types;

pub use description::{DescribedAmount, DescribedSwap};
pub use normalizer::EventNormalizer;
pub use shape::{SwapLeg, SwapShape, TokenTransfer};
pub use types::{
    is_native_sol,
    EventSource,
    NormalizeError,
    SwapDirection,
    SwapEvent,
    LAMPORTS_PER_SOL,
    WSOL_MINT,
};
