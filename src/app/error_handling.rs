//! Fatal error reporting for the binary

use tracing::error;

use crate::error::AdminflowError;

/// Print an error and exit with its status code.
///
/// `AdminflowError`s show their user message, plus the full cause chain
/// when `verbose >= 1`.
pub fn handle_fatal_error(error: anyhow::Error, verbose: u8) -> ! {
    error!("Fatal error: {}", error);

    let exit_code = if let Some(err) = error.downcast_ref::<AdminflowError>() {
        eprintln!("{}", err.user_message());
        if verbose >= 1 {
            eprintln!("\nContext Chain:\n{}", err.developer_message());
        }
        err.exit_code()
    } else {
        eprintln!("Error: {error}");
        if verbose >= 1 {
            eprintln!("\nError chain:");
            for (i, cause) in error.chain().enumerate() {
                eprintln!("  {}: {}", i, cause);
            }
        }
        1
    };

    std::process::exit(exit_code)
}
