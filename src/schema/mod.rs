//! Schema DSL - table definitions consumed by migration steps
//!
//! Create steps receive a [`TableBlueprint`] to describe the new table;
//! modify steps receive a [`TableAlteration`] to describe changes to an
//! existing one. Both compile to plain SQL statements that the backend
//! executes inside the step's transactional envelope.

pub mod alteration;
pub mod blueprint;

pub use alteration::TableAlteration;
pub use blueprint::TableBlueprint;
