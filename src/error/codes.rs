/// Error code registry for adminflow
///
/// Error codes are organized by category:
/// - 1000-1999: Configuration errors
/// - 2000-2999: Planning errors
/// - 3000-3999: Storage errors
/// - 5000-5999: Workflow lifecycle errors
///
/// Step failures are recorded on the run and carry no code here.
pub struct ErrorCode;

impl ErrorCode {
    // Configuration errors (1000-1999)
    pub const CONFIG_NOT_FOUND: u16 = 1001;
    pub const CONFIG_INVALID_TOML: u16 = 1002;
    pub const CONFIG_INVALID_VALUE: u16 = 1005;

    // Planning errors (2000-2999)
    pub const PLANNING_UNSUPPORTED_INTENT: u16 = 2001;
    pub const PLANNING_EMPTY_PLAN: u16 = 2002;

    // Storage errors (3000-3999)
    pub const STORAGE_GENERIC: u16 = 3000;
    pub const STORAGE_IO_ERROR: u16 = 3001;
    pub const STORAGE_SERIALIZATION_ERROR: u16 = 3011;
    pub const STORAGE_DESERIALIZATION_ERROR: u16 = 3012;

    // Workflow lifecycle errors (5000-5999)
    pub const WORKFLOW_NOT_FOUND: u16 = 5001;
    pub const WORKFLOW_PLAN_NOT_FOUND: u16 = 5002;
    pub const WORKFLOW_INVALID_TRANSITION: u16 = 5003;
}

/// Get a human-readable description for an error code
pub fn describe_error_code(code: u16) -> &'static str {
    match code {
        ErrorCode::CONFIG_NOT_FOUND => "Configuration file not found",
        ErrorCode::CONFIG_INVALID_TOML => "Configuration file is not valid TOML",
        ErrorCode::CONFIG_INVALID_VALUE => "Configuration value is out of range or malformed",

        ErrorCode::PLANNING_UNSUPPORTED_INTENT => {
            "Request did not match a workflow template and no steps were supplied"
        }
        ErrorCode::PLANNING_EMPTY_PLAN => "Plan contains no steps",

        ErrorCode::STORAGE_GENERIC => "General storage error",
        ErrorCode::STORAGE_IO_ERROR => "Storage I/O failed",
        ErrorCode::STORAGE_SERIALIZATION_ERROR => "Failed to serialize workflow state",
        ErrorCode::STORAGE_DESERIALIZATION_ERROR => "Stored workflow state is corrupted",

        ErrorCode::WORKFLOW_NOT_FOUND => "Workflow run not found",
        ErrorCode::WORKFLOW_PLAN_NOT_FOUND => "Workflow plan not found",
        ErrorCode::WORKFLOW_INVALID_TRANSITION => {
            "Workflow is not in a state that allows this action"
        }

        _ => "Unknown error",
    }
}
