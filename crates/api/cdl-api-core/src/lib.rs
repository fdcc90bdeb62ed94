pub mod coercion;
pub mod path;
pub mod value;

pub use path::ConnectorPath;
pub use value::{Value, ValueKind};
