use std::process::ExitCode;

fn main() -> ExitCode {
    ragdesk_cli::run()
}
