use std::process::ExitCode;

fn main() -> ExitCode {
    stockflow_cli::run()
}
