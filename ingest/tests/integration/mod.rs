#[path = "../common/mod.rs"]
mod common;

mod change_test;
mod housekeeping_test;
mod lock_test;
mod pipeline_test;
