pub mod markers;
pub mod resolve;
pub mod simulate;
pub mod timing;
pub mod validate;
