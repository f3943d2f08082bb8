//! ASCII art banner for Dynamo.

use super::colors::SemanticStyle;

/// Prints a mini banner for use in subcommands.
pub fn print_mini_banner() {
    print!("{} {}", "◆".info(), "Dynamo".header());
}
