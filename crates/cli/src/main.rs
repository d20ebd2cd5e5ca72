use std::process::ExitCode;

fn main() -> ExitCode {
    haven_cli::run()
}
