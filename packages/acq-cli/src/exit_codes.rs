pub const SUCCESS: i32 = 0;
pub const EXECUTION_ERROR: i32 = 1;
pub const INPUT_ERROR: i32 = 2;
/// The run finished but at least one segment was not persisted
pub const PARTIAL_FAILURE: i32 = 3;
