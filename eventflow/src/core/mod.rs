//! Core value types shared across the broker.

mod value;

pub use value::{AnyValue, Event, TypeKey};
