pub mod inventory;
pub mod pricing;

pub use inventory::{Reserved, ResourceInventory};
pub use pricing::{quote, Quote};
