pub mod inspect;
pub mod resolve_key;
pub mod serve;
