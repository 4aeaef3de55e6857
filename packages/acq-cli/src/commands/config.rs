use crate::cli::ConfigArgs;
use crate::exit_codes;
use crate::output;
use crate::session::SessionConfig;

pub fn execute(args: ConfigArgs) -> i32 {
    let config = match SessionConfig::from_args(&args.session) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return exit_codes::INPUT_ERROR;
        }
    };

    match output::to_json(&config, args.compact) {
        Ok(json) => {
            if let Err(e) = output::write_output(&json, args.output.as_deref()) {
                eprintln!("Error: {}", e);
                return exit_codes::EXECUTION_ERROR;
            }
            exit_codes::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            exit_codes::EXECUTION_ERROR
        }
    }
}
