// Reconciliation services
//
// Each engine runs one operation to completion inside a single store
// transaction. `check` strings them together for the admin triggers.

pub mod changelog;
pub mod check;
pub mod portal_sync;
pub mod product_sync;
pub mod version;
