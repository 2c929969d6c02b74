//! sp - Stackpilot command-line entry point.

fn main() {
    std::process::exit(stackpilot::cli::run());
}
