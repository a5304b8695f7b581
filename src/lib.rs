pub mod app;
pub mod error;
pub mod fallback;
pub mod handlers;
pub mod normalize;
pub mod protocol;
pub mod stream;
pub mod tokens;
pub mod upstream;
