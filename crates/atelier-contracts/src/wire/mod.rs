mod aspect;
pub mod gemini;
pub mod proxy;

pub use aspect::AspectRatio;
