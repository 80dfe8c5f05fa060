use std::process::ExitCode;

fn main() -> ExitCode {
    match lingua_relay::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("lingua-relay: {e}");
            ExitCode::FAILURE
        }
    }
}
