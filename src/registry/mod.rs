//! Model registry: the active model pointer and the promoter that moves it

mod active;
mod promoter;

pub use active::{ActiveModel, ModelPointer};
pub use promoter::{PromotionOutcome, Promoter};
