use std::process::ExitCode;

fn main() -> ExitCode {
    maitre_cli::run()
}
