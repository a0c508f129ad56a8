pub mod cod;
pub mod emc;
pub mod primitive;
pub mod schema;
