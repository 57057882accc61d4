pub mod core;
pub mod langtok;
pub mod switchout;

pub use self::core::{Chain, Identity, Transform};
pub use langtok::{tag_sampling_probs, LangTokRewrite};
pub use switchout::{switchout, SwitchOut};
